use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A single observed change, relative to the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: ChangeKind,
    /// Project-relative path with `/` separators
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    /// BLAKE3 hex digest of the content at observation time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_hash: Option<String>,
}

impl FileChange {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: OffsetDateTime::now_utc(),
            size: None,
            content_hash: None,
        }
    }

    /// Attach size and hash from the bytes read for this change.
    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.size = Some(content.len() as u64);
        self.content_hash = Some(content_hash(content));
        self
    }
}

/// Coalesced changes flushed together after the quiet window.
///
/// One entry per path, ordered by path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub id: u64,
    pub changes: Vec<FileChange>,
    #[serde(with = "time::serde::rfc3339")]
    pub flushed_at: OffsetDateTime,
}

impl ChangeBatch {
    pub fn new(id: u64, changes: Vec<FileChange>) -> Self {
        Self {
            id,
            changes,
            flushed_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.path.as_str())
    }
}

/// Compute the BLAKE3 hash of the given content.
pub fn content_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}
