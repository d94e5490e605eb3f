use crate::counter::{RateCountCreator, RateCounter};
use crate::request::{BarrierCheckRequest, TpsCheckResponse, TpsResultCode};
use crate::rule::{MonitorType, Period, RuleDetail, RuleModel};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound of per-key counters a proto model barrier keeps. Idle ones
/// are pruned first; keys beyond the bound share the rule's counter.
const MAX_PROTO_KEYS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarrierMetrics {
    pub rule_name: String,
    pub passed: u64,
    pub intercepted_count: u64,
    pub intercepted_load: u64,
    pub window_count: i64,
}

/// Admission decision for one dimension of a tps point.
pub trait RuleBarrier: Send + Sync {
    fn point_name(&self) -> &str;

    fn rule_name(&self) -> &str;

    fn rule_detail(&self) -> Arc<RuleDetail>;

    fn pattern(&self) -> String {
        self.rule_detail().pattern.clone()
    }

    fn apply_tps(&self, request: &BarrierCheckRequest) -> TpsCheckResponse;

    /// Gives back load taken by an earlier successful `apply_tps`.
    fn rollback_tps(&self, request: &BarrierCheckRequest);

    fn apply_rule_detail(&self, detail: &RuleDetail);

    fn clear_limit_rule(&self);

    fn metrics(&self, timestamp: i64) -> BarrierMetrics;
}

pub trait RuleBarrierCreator: Send + Sync {
    fn name(&self) -> &str;

    fn create_rule_barrier(
        &self,
        point_name: &str,
        rule_name: &str,
        detail: &RuleDetail,
    ) -> Arc<dyn RuleBarrier>;
}

struct CounterSet {
    period: Period,
    shared: Arc<dyn RateCounter>,
    per_key: Mutex<HashMap<String, Arc<dyn RateCounter>>>,
}

impl CounterSet {
    fn new(creator: &dyn RateCountCreator, rule_name: &str, period: Period) -> Self {
        Self {
            period,
            shared: creator.create_rate_count(rule_name, period),
            per_key: Mutex::new(HashMap::new()),
        }
    }
}

/// Barrier counting admitted load in one-second buckets through a
/// [`RateCounter`]. Rule and counters are swapped atomically so checks never
/// wait on rule updates.
pub struct SimpleCountRuleBarrier {
    point_name: String,
    rule_name: String,
    rule: ArcSwap<RuleDetail>,
    counters: ArcSwap<CounterSet>,
    rate_count_creator: Arc<dyn RateCountCreator>,
    passed: AtomicU64,
    intercepted_count: AtomicU64,
    intercepted_load: AtomicU64,
}

impl SimpleCountRuleBarrier {
    pub fn new(
        point_name: impl Into<String>,
        rule_name: impl Into<String>,
        detail: RuleDetail,
        rate_count_creator: Arc<dyn RateCountCreator>,
    ) -> Self {
        let rule_name = rule_name.into();
        let counters = CounterSet::new(rate_count_creator.as_ref(), &rule_name, detail.period);
        Self {
            point_name: point_name.into(),
            rule_name,
            rule: ArcSwap::from_pointee(detail),
            counters: ArcSwap::from_pointee(counters),
            rate_count_creator,
            passed: AtomicU64::new(0),
            intercepted_count: AtomicU64::new(0),
            intercepted_load: AtomicU64::new(0),
        }
    }

    fn counter_for(
        &self,
        counters: &CounterSet,
        rule: &RuleDetail,
        request: &BarrierCheckRequest,
        create: bool,
    ) -> Option<Arc<dyn RateCounter>> {
        let key = match (&request.monitor_key, rule.model) {
            (Some(key), RuleModel::Proto) => key.build(),
            _ => return Some(counters.shared.clone()),
        };

        let mut per_key = counters.per_key.lock();
        if let Some(counter) = per_key.get(&key) {
            return Some(counter.clone());
        }
        if !create {
            return (per_key.len() >= MAX_PROTO_KEYS).then(|| counters.shared.clone());
        }

        if per_key.len() >= MAX_PROTO_KEYS {
            per_key.retain(|_, counter| counter.get_count(request.timestamp) > 0);
            if per_key.len() >= MAX_PROTO_KEYS {
                tracing::warn!(
                    "point={} rule={} has {} active keys, key={} counted on the shared counter",
                    self.point_name,
                    self.rule_name,
                    per_key.len(),
                    key
                );
                return Some(counters.shared.clone());
            }
        }
        let counter = self
            .rate_count_creator
            .create_rate_count(&self.rule_name, counters.period);
        per_key.insert(key, counter.clone());
        Some(counter)
    }

    fn deny_message(&self, rule: &RuleDetail) -> String {
        format!(
            "[{}|{}] tps over limit, max_count={}, period={:?}",
            self.point_name, self.rule_name, rule.max_count, rule.period
        )
    }
}

impl RuleBarrier for SimpleCountRuleBarrier {
    fn point_name(&self) -> &str {
        &self.point_name
    }

    fn rule_name(&self) -> &str {
        &self.rule_name
    }

    fn rule_detail(&self) -> Arc<RuleDetail> {
        self.rule.load_full()
    }

    fn apply_tps(&self, request: &BarrierCheckRequest) -> TpsCheckResponse {
        let rule = self.rule.load();
        if !rule.active {
            return TpsCheckResponse::skip("rule inactive");
        }

        let counters = self.counters.load();
        let Some(counter) = self.counter_for(&counters, &rule, request, true) else {
            return TpsCheckResponse::skip("no counter");
        };

        if counter.try_add(request.timestamp, request.count, rule.max_count) {
            self.passed.fetch_add(1, Ordering::Relaxed);
            return TpsCheckResponse::pass();
        }

        self.intercepted_count.fetch_add(1, Ordering::Relaxed);
        self.intercepted_load
            .fetch_add(request.count.max(0) as u64, Ordering::Relaxed);

        if rule.is_monitor() {
            counter.add(request.timestamp, request.count);
            TpsCheckResponse::new(true, TpsResultCode::PassByMonitor, self.deny_message(&rule))
        } else {
            TpsCheckResponse::new(false, TpsResultCode::CheckDeny, self.deny_message(&rule))
        }
    }

    fn rollback_tps(&self, request: &BarrierCheckRequest) {
        let rule = self.rule.load();
        let counters = self.counters.load();
        if let Some(counter) = self.counter_for(&counters, &rule, request, false) {
            counter.minus(request.timestamp, request.count);
        }
    }

    fn apply_rule_detail(&self, detail: &RuleDetail) {
        let current = self.rule.load();
        if current.period != detail.period {
            tracing::info!(
                "point={} rule={} period changed {:?} -> {:?}, counters reset",
                self.point_name,
                self.rule_name,
                current.period,
                detail.period
            );
            self.counters.store(Arc::new(CounterSet::new(
                self.rate_count_creator.as_ref(),
                &self.rule_name,
                detail.period,
            )));
        } else if current.model != detail.model {
            self.counters.load().per_key.lock().clear();
        }

        self.rule.store(Arc::new(detail.clone()));
    }

    fn clear_limit_rule(&self) {
        let current = self.rule.load();
        self.rule.store(Arc::new(RuleDetail {
            max_count: -1,
            monitor_type: MonitorType::Monitor,
            ..RuleDetail::clone(&current)
        }));
    }

    fn metrics(&self, timestamp: i64) -> BarrierMetrics {
        BarrierMetrics {
            rule_name: self.rule_name.clone(),
            passed: self.passed.load(Ordering::Relaxed),
            intercepted_count: self.intercepted_count.load(Ordering::Relaxed),
            intercepted_load: self.intercepted_load.load(Ordering::Relaxed),
            window_count: self.counters.load().shared.get_count(timestamp),
        }
    }
}

pub struct LocalSimpleCountBarrierCreator {
    rate_count_creator: Arc<dyn RateCountCreator>,
}

impl LocalSimpleCountBarrierCreator {
    pub fn new(rate_count_creator: Arc<dyn RateCountCreator>) -> Self {
        Self { rate_count_creator }
    }
}

impl RuleBarrierCreator for LocalSimpleCountBarrierCreator {
    fn name(&self) -> &str {
        crate::config::LOCAL_CREATOR
    }

    fn create_rule_barrier(
        &self,
        point_name: &str,
        rule_name: &str,
        detail: &RuleDetail,
    ) -> Arc<dyn RuleBarrier> {
        Arc::new(SimpleCountRuleBarrier::new(
            point_name,
            rule_name,
            detail.clone(),
            self.rate_count_creator.clone(),
        ))
    }
}
