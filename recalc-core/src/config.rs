//! Registry configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What registering an already-registered name does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedefinitionPolicy {
    /// Fail with `RedefinitionConflict` and keep the existing definition.
    #[default]
    Reject,

    /// Supersede the existing definition and invalidate its readers.
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub redefinition: RedefinitionPolicy,
}

impl RegistryConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
