use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of the window a rule's `max_count` applies to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Period {
    #[default]
    Seconds,
    Minutes,
}

impl Period {
    pub fn window_secs(&self) -> i64 {
        match self {
            Period::Seconds => 1,
            Period::Minutes => 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    /// Record denials but let the request through.
    #[default]
    Monitor,
    /// Reject requests over the limit.
    Intercept,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleModel {
    /// Every key matching the pattern shares one counter.
    #[default]
    Fuzzy,
    /// Each distinct matching key is counted on its own.
    Proto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDetail {
    #[serde(default)]
    pub pattern: String,
    #[serde(default = "unlimited")]
    pub max_count: i64,
    #[serde(default)]
    pub period: Period,
    #[serde(default)]
    pub monitor_type: MonitorType,
    #[serde(default)]
    pub model: RuleModel,
    #[serde(default = "active")]
    pub active: bool,
}

fn unlimited() -> i64 {
    -1
}

fn active() -> bool {
    true
}

impl Default for RuleDetail {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            max_count: unlimited(),
            period: Period::Seconds,
            monitor_type: MonitorType::Monitor,
            model: RuleModel::Fuzzy,
            active: true,
        }
    }
}

impl RuleDetail {
    pub fn new(max_count: i64, period: Period, monitor_type: MonitorType) -> Self {
        Self {
            max_count,
            period,
            monitor_type,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_model(mut self, model: RuleModel) -> Self {
        self.model = model;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_monitor(&self) -> bool {
        self.monitor_type == MonitorType::Monitor
    }
}

/// Rule set for one tps point: the point-wide rule plus named keyed rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TpsControlRule {
    #[serde(default)]
    pub point_name: String,
    #[serde(default)]
    pub point_rule: Option<RuleDetail>,
    #[serde(default)]
    pub monitor_key_rule: HashMap<String, RuleDetail>,
}

impl TpsControlRule {
    pub fn new(point_name: impl Into<String>) -> Self {
        Self {
            point_name: point_name.into(),
            ..Self::default()
        }
    }

    pub fn with_point_rule(mut self, detail: RuleDetail) -> Self {
        self.point_rule = Some(detail);
        self
    }

    pub fn with_monitor_key_rule(mut self, name: impl Into<String>, detail: RuleDetail) -> Self {
        self.monitor_key_rule.insert(name.into(), detail);
        self
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let rule: TpsControlRule = serde_json::from_str(content)?;
        rule.validate()?;
        Ok(rule)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.monitor_key_rule.keys().any(|name| name.trim().is_empty()) {
            return Err(ControlError::InvalidRule(
                "monitor key rule name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
