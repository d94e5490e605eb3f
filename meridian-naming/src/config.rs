use crate::error::{NamingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingClientConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Delay between two redo passes.
    #[serde(default = "default_delay_ms")]
    pub redo_delay_ms: u64,

    #[serde(default = "default_delay_ms")]
    pub fuzzy_watch_sync_delay_ms: u64,
}

fn default_namespace() -> String {
    "public".to_string()
}

fn default_delay_ms() -> u64 {
    3000
}

impl Default for NamingClientConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            redo_delay_ms: default_delay_ms(),
            fuzzy_watch_sync_delay_ms: default_delay_ms(),
        }
    }
}

impl NamingClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("MERIDIAN_NAMING"))
            .build()
            .map_err(|e| NamingError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| NamingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redo_delay_ms == 0 {
            return Err(NamingError::Config("redo_delay_ms must be positive".to_string()));
        }
        if self.fuzzy_watch_sync_delay_ms == 0 {
            return Err(NamingError::Config(
                "fuzzy_watch_sync_delay_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Never shorter than one millisecond, even for a config built in code.
    pub fn redo_delay(&self) -> Duration {
        Duration::from_millis(self.redo_delay_ms.max(1))
    }

    pub fn fuzzy_watch_sync_delay(&self) -> Duration {
        Duration::from_millis(self.fuzzy_watch_sync_delay_ms.max(1))
    }
}
