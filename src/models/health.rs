use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Shape returned by `GET /health`.
/// `service` and `model_loaded` are only sent by some deployments of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model: String,
    /// Class name to human readable description
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<bool>,
}

impl HealthResponse {
    pub fn is_online(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "online" | "healthy")
    }
}
