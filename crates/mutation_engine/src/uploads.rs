use std::collections::HashMap;

const TOKEN_PREFIX: &str = "DYAD_ATTACHMENT_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Files the user attached for upload, keyed by the placeholder token the
/// model is told to write as file content.
#[derive(Debug, Clone, Default)]
pub struct FileUploads {
    files: HashMap<String, UploadedFile>,
}

impl FileUploads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an upload and returns its `DYAD_ATTACHMENT_<n>` token.
    pub fn register(&mut self, file_name: impl Into<String>, bytes: Vec<u8>) -> String {
        let token = format!("{TOKEN_PREFIX}{}", self.files.len());
        self.files.insert(
            token.clone(),
            UploadedFile {
                file_name: file_name.into(),
                bytes,
            },
        );
        token
    }

    /// Looks up a token; surrounding whitespace is ignored.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<&UploadedFile> {
        self.files.get(token.trim())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_sequential_and_trim_whitespace() {
        let mut uploads = FileUploads::new();
        let first = uploads.register("logo.png", vec![1, 2, 3]);
        let second = uploads.register("data.csv", b"a,b".to_vec());

        assert_eq!(first, "DYAD_ATTACHMENT_0");
        assert_eq!(second, "DYAD_ATTACHMENT_1");
        assert_eq!(
            uploads.get("\nDYAD_ATTACHMENT_0\n").map(|file| file.bytes.clone()),
            Some(vec![1, 2, 3])
        );
        assert!(uploads.get("DYAD_ATTACHMENT_9").is_none());
    }
}
