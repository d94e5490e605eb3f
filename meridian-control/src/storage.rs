use crate::error::{ControlError, Result};
use crate::rule::TpsControlRule;
use std::fs;
use std::path::PathBuf;

pub trait RuleStorage: Send + Sync {
    fn load_tps_rule(&self, point_name: &str) -> Result<Option<TpsControlRule>>;

    fn save_tps_rule(&self, point_name: &str, rule: &TpsControlRule) -> Result<()>;
}

/// Keeps one JSON document per point under `<base_dir>/tps/<point>`.
pub struct LocalDiskRuleStorage {
    base_dir: PathBuf,
}

impl LocalDiskRuleStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Point names become file names, so anything that could leave the
    /// `tps` directory is refused.
    fn rule_path(&self, point_name: &str) -> Result<PathBuf> {
        if point_name.is_empty()
            || point_name == "."
            || point_name == ".."
            || point_name.contains(['/', '\\'])
        {
            return Err(ControlError::InvalidRule(format!(
                "point name {:?} is not a valid file name",
                point_name
            )));
        }
        Ok(self.base_dir.join("tps").join(point_name))
    }
}

impl RuleStorage for LocalDiskRuleStorage {
    fn load_tps_rule(&self, point_name: &str) -> Result<Option<TpsControlRule>> {
        let path = self.rule_path(point_name)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(TpsControlRule::from_json(&content)?))
    }

    fn save_tps_rule(&self, point_name: &str, rule: &TpsControlRule) -> Result<()> {
        let path = self.rule_path(point_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, rule.to_json()?)?;
        Ok(())
    }
}
