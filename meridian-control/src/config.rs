use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const LOCAL_CREATOR: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Name of the rule barrier implementation registered in [`crate::ControlPlugins`].
    #[serde(default = "default_creator")]
    pub rule_barrier_creator: String,

    /// Name of the rate counter implementation used by the local barrier.
    #[serde(default = "default_creator")]
    pub rate_count_creator: String,

    /// Directory holding persisted tps rules, one file per point.
    #[serde(default)]
    pub rule_storage_dir: Option<PathBuf>,
}

fn default_creator() -> String {
    LOCAL_CREATOR.to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rule_barrier_creator: default_creator(),
            rate_count_creator: default_creator(),
            rule_storage_dir: None,
        }
    }
}

impl ControlConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("MERIDIAN_CONTROL"))
            .build()
            .map_err(|e| ControlError::Config(e.to_string()))?;

        let config: ControlConfig = settings
            .try_deserialize()
            .map_err(|e| ControlError::Config(e.to_string()))?;

        Ok(config)
    }
}
