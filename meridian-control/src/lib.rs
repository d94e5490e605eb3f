pub mod barrier;
pub mod config;
pub mod counter;
pub mod error;
pub mod manager;
pub mod monitor_key;
pub mod plugins;
pub mod request;
pub mod rule;
pub mod storage;
pub mod tps_barrier;

pub use barrier::{
    BarrierMetrics, LocalSimpleCountBarrierCreator, RuleBarrier, RuleBarrierCreator,
    SimpleCountRuleBarrier,
};
pub use config::ControlConfig;
pub use counter::{LocalRateCountCreator, LocalSimpleCountRateCounter, RateCountCreator, RateCounter};
pub use error::{ControlError, Result};
pub use manager::TpsControlManager;
pub use monitor_key::{MatchType, MonitorKey, match_pattern};
pub use plugins::ControlPlugins;
pub use request::{BarrierCheckRequest, TpsCheckRequest, TpsCheckResponse, TpsResultCode, now_millis};
pub use rule::{MonitorType, Period, RuleDetail, RuleModel, TpsControlRule};
pub use storage::{LocalDiskRuleStorage, RuleStorage};
pub use tps_barrier::TpsBarrier;
