use serde::{Deserialize, Serialize};

/// One directive extracted from model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tag {
    Write {
        path: String,
        content: String,
        description: Option<String>,
    },
    Rename {
        from: String,
        to: String,
    },
    Delete {
        path: String,
    },
    AddDependency {
        packages: Vec<String>,
    },
    ExecuteSql {
        content: String,
        description: Option<String>,
    },
    SearchReplace {
        path: String,
        content: String,
        description: Option<String>,
    },
    ToolCall {
        server: String,
        tool: String,
        payload: String,
    },
    ToolResult {
        server: String,
        tool: String,
        payload: String,
    },
    ChatSummary {
        text: String,
    },
}

impl Tag {
    /// Returns the element name without the `dyad-` prefix.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::Rename { .. } => "rename",
            Self::Delete { .. } => "delete",
            Self::AddDependency { .. } => "add-dependency",
            Self::ExecuteSql { .. } => "execute-sql",
            Self::SearchReplace { .. } => "search-replace",
            Self::ToolCall { .. } => "mcp-tool-call",
            Self::ToolResult { .. } => "mcp-tool-result",
            Self::ChatSummary { .. } => "chat-summary",
        }
    }

    /// Returns true for tags that change the working tree or an external system.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::ToolCall { .. } | Self::ToolResult { .. } | Self::ChatSummary { .. }
        )
    }
}

/// Full-file write or search-replace edit targeting one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlOp {
    pub content: String,
    pub description: Option<String>,
}

/// Mutation tags grouped by kind, each group in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pub deletes: Vec<String>,
    pub renames: Vec<RenameOp>,
    pub search_replaces: Vec<FileEdit>,
    pub writes: Vec<FileEdit>,
    pub dependencies: Vec<String>,
    pub sql: Vec<SqlOp>,
    pub chat_summary: Option<String>,
}

impl TagSet {
    #[must_use]
    pub fn from_tags(tags: &[Tag]) -> Self {
        let mut set = Self::default();

        for tag in tags {
            match tag {
                Tag::Write { path, content, .. } => set.writes.push(FileEdit {
                    path: path.clone(),
                    content: content.clone(),
                }),
                Tag::Rename { from, to } => set.renames.push(RenameOp {
                    from: from.clone(),
                    to: to.clone(),
                }),
                Tag::Delete { path } => set.deletes.push(path.clone()),
                Tag::AddDependency { packages } => {
                    for package in packages {
                        if !set.dependencies.contains(package) {
                            set.dependencies.push(package.clone());
                        }
                    }
                }
                Tag::ExecuteSql {
                    content,
                    description,
                } => set.sql.push(SqlOp {
                    content: content.clone(),
                    description: description.clone(),
                }),
                Tag::SearchReplace { path, content, .. } => set.search_replaces.push(FileEdit {
                    path: path.clone(),
                    content: content.clone(),
                }),
                Tag::ChatSummary { text } => set.chat_summary = Some(text.clone()),
                Tag::ToolCall { .. } | Tag::ToolResult { .. } => {}
            }
        }

        set
    }

    #[must_use]
    pub fn has_file_changes(&self) -> bool {
        !(self.deletes.is_empty()
            && self.renames.is_empty()
            && self.search_replaces.is_empty()
            && self.writes.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_file_changes() && self.dependencies.is_empty() && self.sql.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_set_groups_by_kind_and_dedupes_packages() {
        let tags = vec![
            Tag::AddDependency {
                packages: vec!["zod".to_string(), "react-query".to_string()],
            },
            Tag::Write {
                path: "a.ts".to_string(),
                content: "a".to_string(),
                description: None,
            },
            Tag::AddDependency {
                packages: vec!["zod".to_string()],
            },
            Tag::ChatSummary {
                text: "Add form".to_string(),
            },
            Tag::ToolCall {
                server: "s".to_string(),
                tool: "t".to_string(),
                payload: "{}".to_string(),
            },
        ];

        let set = TagSet::from_tags(&tags);

        assert_eq!(set.dependencies, vec!["zod", "react-query"]);
        assert_eq!(set.writes.len(), 1);
        assert_eq!(set.chat_summary.as_deref(), Some("Add form"));
        assert!(set.has_file_changes());
    }

    #[test]
    fn tool_tags_are_not_mutations() {
        let call = Tag::ToolCall {
            server: "s".to_string(),
            tool: "t".to_string(),
            payload: String::new(),
        };
        assert!(!call.is_mutation());
        assert!(Tag::Delete {
            path: "x".to_string()
        }
        .is_mutation());
        assert_eq!(call.kind(), "mcp-tool-call");
    }
}
