use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocArtifact {
    ApiReference,
    Changelog,
}

/// One write against the documentation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub artifact: DocArtifact,
    /// Project-relative path of the artifact file
    pub target: String,
    /// Components this update documents
    pub components: Vec<String>,
    /// Project files the generated text links to
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub references: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub updates: Vec<DocUpdate>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.updates.iter().map(|u| u.target.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub issues: Vec<String>,
}
