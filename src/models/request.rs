use serde::{Deserialize, Serialize};

/// A control request read by the NDJSON session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: Command,
    /// Approval request id (for approve/reject)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Paths to analyze, relative to the project root (for analyze)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Analyze,
    Approve,
    Reject,
    Status,
    Stop,
}
