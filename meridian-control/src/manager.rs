use crate::barrier::RuleBarrierCreator;
use crate::config::ControlConfig;
use crate::error::Result;
use crate::plugins::ControlPlugins;
use crate::request::{TpsCheckRequest, TpsCheckResponse};
use crate::rule::TpsControlRule;
use crate::storage::{LocalDiskRuleStorage, RuleStorage};
use crate::tps_barrier::TpsBarrier;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Entry point of admission control: tps barriers by point name plus the
/// rules pushed for them.
pub struct TpsControlManager {
    creator: Arc<dyn RuleBarrierCreator>,
    points: ArcSwap<HashMap<String, Arc<TpsBarrier>>>,
    // Also serialises registration against rule application.
    rules: Mutex<HashMap<String, TpsControlRule>>,
    storage: Option<Arc<dyn RuleStorage>>,
}

impl TpsControlManager {
    pub fn new(config: &ControlConfig, plugins: &ControlPlugins) -> Self {
        let storage = config
            .rule_storage_dir
            .as_ref()
            .map(|dir| Arc::new(LocalDiskRuleStorage::new(dir)) as Arc<dyn RuleStorage>);

        Self {
            creator: plugins.resolve(config),
            points: ArcSwap::from_pointee(HashMap::new()),
            rules: Mutex::new(HashMap::new()),
            storage,
        }
    }

    pub fn with_rule_storage(mut self, storage: Arc<dyn RuleStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Creates the barrier for `point_name` if absent. A rule applied before
    /// registration, or else one found in rule storage, is applied to it.
    pub fn register_tps_point(&self, point_name: &str) {
        let mut rules = self.rules.lock();
        if self.points.load().contains_key(point_name) {
            return;
        }

        let barrier = Arc::new(TpsBarrier::new(point_name, self.creator.clone()));

        let pending = match rules.get(point_name) {
            Some(rule) => Some(rule.clone()),
            None => self.load_stored_rule(point_name),
        };
        if let Some(rule) = pending {
            barrier.apply_rule(Some(&rule));
            rules.insert(point_name.to_string(), rule);
        }

        let mut points = HashMap::clone(&self.points.load());
        points.insert(point_name.to_string(), barrier);
        self.points.store(Arc::new(points));

        tracing::info!("register tps point, point={}", point_name);
    }

    /// Stores the rule for `point_name` and pushes it to a registered
    /// barrier right away. `None` removes every limit of the point.
    pub fn apply_tps_rule(&self, point_name: &str, rule: Option<TpsControlRule>) {
        let mut rules = self.rules.lock();

        match &rule {
            Some(rule) => {
                rules.insert(point_name.to_string(), rule.clone());
            }
            None => {
                rules.remove(point_name);
            }
        }

        if let Some(barrier) = self.points.load().get(point_name) {
            barrier.apply_rule(rule.as_ref());
        }
    }

    /// Unknown points are never limited.
    pub fn check(&self, point_name: &str, request: &TpsCheckRequest) -> TpsCheckResponse {
        match self.points.load().get(point_name) {
            Some(barrier) => barrier.apply_tps(request),
            None => TpsCheckResponse::skip(format!("tps point {} not registered", point_name)),
        }
    }

    /// Re-reads the rule of `point_name` from storage and applies it live.
    /// A failed load leaves the point untouched.
    pub fn reload_tps_rule(&self, point_name: &str) -> Result<()> {
        let Some(storage) = &self.storage else {
            tracing::warn!("no rule storage configured, skip reload of point={}", point_name);
            return Ok(());
        };

        match storage.load_tps_rule(point_name) {
            Ok(rule) => {
                tracing::info!("reload tps rule, point={} found={}", point_name, rule.is_some());
                self.apply_tps_rule(point_name, rule);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("failed to reload tps rule, point={} error={}", point_name, e);
                Err(e)
            }
        }
    }

    pub fn barrier(&self, point_name: &str) -> Option<Arc<TpsBarrier>> {
        self.points.load().get(point_name).cloned()
    }

    pub fn points(&self) -> Vec<String> {
        let mut names: Vec<String> = self.points.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn rule(&self, point_name: &str) -> Option<TpsControlRule> {
        self.rules.lock().get(point_name).cloned()
    }

    pub fn rules(&self) -> HashMap<String, TpsControlRule> {
        self.rules.lock().clone()
    }

    fn load_stored_rule(&self, point_name: &str) -> Option<TpsControlRule> {
        let storage = self.storage.as_ref()?;
        match storage.load_tps_rule(point_name) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!("failed to load tps rule, point={} error={}", point_name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TpsResultCode;
    use crate::rule::{MonitorType, Period, RuleDetail};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000_000;

    fn manager() -> TpsControlManager {
        TpsControlManager::new(&ControlConfig::default(), &ControlPlugins::new())
    }

    fn limit(point: &str, max_count: i64) -> TpsControlRule {
        TpsControlRule::new(point).with_point_rule(RuleDetail::new(
            max_count,
            Period::Seconds,
            MonitorType::Intercept,
        ))
    }

    fn request() -> TpsCheckRequest {
        TpsCheckRequest::new().with_client_ip("10.0.0.1").with_timestamp(NOW)
    }

    #[test]
    fn unknown_point_fails_open() {
        let manager = manager();
        manager.apply_tps_rule("nonexistent", Some(limit("nonexistent", 0)));

        for _ in 0..10 {
            let response = manager.check("nonexistent", &request());
            assert!(response.success);
            assert_eq!(response.code, TpsResultCode::CheckSkip);
        }
    }

    #[test]
    fn pending_rule_applies_on_registration() {
        let manager = manager();
        manager.apply_tps_rule("ConfigPublish", Some(limit("ConfigPublish", 1)));
        manager.register_tps_point("ConfigPublish");
        manager.register_tps_point("ConfigPublish");

        assert_eq!(manager.points(), vec!["ConfigPublish".to_string()]);
        assert!(manager.check("ConfigPublish", &request()).success);
        assert!(!manager.check("ConfigPublish", &request()).success);
    }

    #[test]
    fn rule_updates_apply_live_and_none_clears() {
        let manager = manager();
        manager.register_tps_point("NamingRegister");
        assert!(manager.check("NamingRegister", &request()).success);

        manager.apply_tps_rule("NamingRegister", Some(limit("NamingRegister", 1)));
        assert!(!manager.check("NamingRegister", &request()).success);
        assert!(manager.rule("NamingRegister").is_some());

        manager.apply_tps_rule("NamingRegister", None);
        assert!(manager.check("NamingRegister", &request()).success);
        assert!(manager.rules().is_empty());
    }

    #[test]
    fn registration_reads_stored_rule_and_reload_applies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalDiskRuleStorage::new(dir.path()));
        storage
            .save_tps_rule("ConfigQuery", &limit("ConfigQuery", 1))
            .unwrap();

        let manager = manager().with_rule_storage(storage.clone());
        manager.register_tps_point("ConfigQuery");
        assert!(manager.check("ConfigQuery", &request()).success);
        assert!(!manager.check("ConfigQuery", &request()).success);

        storage
            .save_tps_rule("ConfigQuery", &limit("ConfigQuery", 3))
            .unwrap();
        manager.reload_tps_rule("ConfigQuery").unwrap();
        assert!(manager.check("ConfigQuery", &request()).success);
        assert_eq!(
            manager.rule("ConfigQuery").and_then(|r| r.point_rule).map(|d| d.max_count),
            Some(3)
        );
    }

    #[test]
    fn failed_reload_keeps_current_rule() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().with_rule_storage(Arc::new(LocalDiskRuleStorage::new(dir.path())));
        manager.register_tps_point("ConfigQuery");
        manager.apply_tps_rule("ConfigQuery", Some(limit("ConfigQuery", 0)));

        std::fs::create_dir_all(dir.path().join("tps")).unwrap();
        std::fs::write(dir.path().join("tps").join("ConfigQuery"), "not json").unwrap();

        assert!(manager.reload_tps_rule("ConfigQuery").is_err());
        assert!(!manager.check("ConfigQuery", &request()).success);
    }

    #[test]
    fn concurrent_checks_admit_at_most_limit() {
        let manager = manager();
        manager.register_tps_point("ConfigPublish");
        manager.apply_tps_rule("ConfigPublish", Some(limit("ConfigPublish", 25)));

        let admitted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        if manager.check("ConfigPublish", &request()).success {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
    }
}
