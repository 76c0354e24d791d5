use std::collections::BTreeSet;

const FUNCTIONS_DIR: &str = "supabase/functions/";
const SHARED_MODULE: &str = "_shared";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployAction {
    DeleteFunction(String),
    DeployFunction(String),
    /// Redeploys every function because shared code changed.
    DeployAll,
}

/// Deploy intents collected while walking tags, resolved once afterwards.
#[derive(Debug, Clone, Default)]
pub struct DeployPlan {
    touched: BTreeSet<String>,
    deleted: BTreeSet<String>,
    shared_touched: bool,
}

impl DeployPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_touched(&mut self, path: &str) {
        match function_name(path) {
            Some(SHARED_MODULE) => self.shared_touched = true,
            Some(name) => {
                self.touched.insert(name.to_string());
            }
            None => {}
        }
    }

    pub fn record_deleted(&mut self, path: &str) {
        match function_name(path) {
            Some(SHARED_MODULE) => self.shared_touched = true,
            Some(name) => {
                self.deleted.insert(name.to_string());
            }
            None => {}
        }
    }

    /// Deletes first, then either one bulk redeploy or one deploy per
    /// surviving function.
    #[must_use]
    pub fn actions(&self) -> Vec<DeployAction> {
        let mut actions: Vec<DeployAction> = self
            .deleted
            .iter()
            .cloned()
            .map(DeployAction::DeleteFunction)
            .collect();

        if self.shared_touched {
            actions.push(DeployAction::DeployAll);
        } else {
            actions.extend(
                self.touched
                    .iter()
                    .filter(|name| !self.deleted.contains(*name))
                    .cloned()
                    .map(DeployAction::DeployFunction),
            );
        }

        actions
    }
}

/// `supabase/functions/<name>/...` yields `<name>`.
#[must_use]
pub fn function_name(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(FUNCTIONS_DIR)?;
    let name = rest.split('/').next()?;
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn each_function_deploys_once() {
        let mut plan = DeployPlan::new();
        plan.record_touched("supabase/functions/hello/index.ts");
        plan.record_touched("supabase/functions/hello/util.ts");
        plan.record_touched("supabase/functions/bye/index.ts");
        plan.record_touched("src/App.tsx");

        assert_eq!(
            plan.actions(),
            vec![
                DeployAction::DeployFunction("bye".to_string()),
                DeployAction::DeployFunction("hello".to_string()),
            ]
        );
    }

    #[test]
    fn shared_change_replaces_per_function_deploys() {
        let mut plan = DeployPlan::new();
        plan.record_touched("supabase/functions/hello/index.ts");
        plan.record_touched("supabase/functions/_shared/cors.ts");

        assert_eq!(plan.actions(), vec![DeployAction::DeployAll]);
    }

    #[test]
    fn deleted_functions_are_never_redeployed() {
        let mut plan = DeployPlan::new();
        plan.record_touched("supabase/functions/old/index.ts");
        plan.record_deleted("supabase/functions/old");

        assert_eq!(
            plan.actions(),
            vec![DeployAction::DeleteFunction("old".to_string())]
        );
    }

    #[test]
    fn function_name_requires_functions_prefix() {
        assert_eq!(function_name("supabase/functions/a/index.ts"), Some("a"));
        assert_eq!(function_name("supabase/functions/"), None);
        assert_eq!(function_name("src/functions/a.ts"), None);
    }
}
