use crate::barrier::{BarrierMetrics, RuleBarrier, RuleBarrierCreator};
use crate::monitor_key::{is_exact_pattern, match_pattern};
use crate::request::{BarrierCheckRequest, TpsCheckRequest, TpsCheckResponse, TpsResultCode};
use crate::rule::{RuleDetail, TpsControlRule};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Reservation = (Arc<dyn RuleBarrier>, BarrierCheckRequest);

/// All barriers of one tps point: a point-wide barrier plus keyed barriers
/// selected by pattern. A request is admitted only when every matching
/// barrier admits it.
pub struct TpsBarrier {
    point_name: String,
    creator: Arc<dyn RuleBarrierCreator>,
    point_barrier: Arc<dyn RuleBarrier>,
    pattern_barriers: ArcSwap<Vec<Arc<dyn RuleBarrier>>>,
    apply_lock: Mutex<()>,
}

impl TpsBarrier {
    pub fn new(point_name: impl Into<String>, creator: Arc<dyn RuleBarrierCreator>) -> Self {
        let point_name = point_name.into();
        let point_barrier = creator.create_rule_barrier(&point_name, &point_name, &RuleDetail::default());
        Self {
            point_name,
            creator,
            point_barrier,
            pattern_barriers: ArcSwap::from_pointee(Vec::new()),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn point_name(&self) -> &str {
        &self.point_name
    }

    pub fn point_barrier(&self) -> Arc<dyn RuleBarrier> {
        self.point_barrier.clone()
    }

    pub fn pattern_barriers(&self) -> Arc<Vec<Arc<dyn RuleBarrier>>> {
        self.pattern_barriers.load_full()
    }

    pub fn apply_tps(&self, request: &TpsCheckRequest) -> TpsCheckResponse {
        let barriers = self.pattern_barriers.load();
        let mut applied: Vec<Reservation> = Vec::new();

        for key in request.rate_keys() {
            let built = key.build();
            for barrier in barriers.iter() {
                if !match_pattern(&barrier.pattern(), &built).is_match() {
                    continue;
                }

                let check = BarrierCheckRequest::new(&self.point_name, request.timestamp, request.count)
                    .with_monitor_key(key.clone());
                let response = barrier.apply_tps(&check);

                if !response.success {
                    rollback(&applied);
                    let message = format!(
                        "[{}] pattern barrier [{}] check fail, monitor_key={}, msg={}",
                        self.point_name,
                        barrier.rule_name(),
                        built,
                        response.message
                    );
                    tracing::warn!(
                        "{} client_ip={} connection_id={}",
                        message,
                        request.client_ip_label(),
                        request.connection_label()
                    );
                    return TpsCheckResponse::new(false, TpsResultCode::DenyByPattern, message);
                }

                if response.code == TpsResultCode::PassByMonitor {
                    tracing::info!(
                        "point={} rule={} pass by monitor, monitor_key={} client_ip={} connection_id={}",
                        self.point_name,
                        barrier.rule_name(),
                        built,
                        request.client_ip_label(),
                        request.connection_label()
                    );
                }

                if response.code != TpsResultCode::CheckSkip {
                    applied.push((barrier.clone(), check));
                }
            }
        }

        let point_check = BarrierCheckRequest::new(&self.point_name, request.timestamp, request.count);
        let response = self.point_barrier.apply_tps(&point_check);
        if !response.success {
            rollback(&applied);
            tracing::warn!(
                "point={} denied by point barrier, client_ip={} connection_id={} msg={}",
                self.point_name,
                request.client_ip_label(),
                request.connection_label(),
                response.message
            );
            return TpsCheckResponse::new(false, TpsResultCode::DenyByPoint, response.message);
        }

        if response.code == TpsResultCode::PassByMonitor {
            tracing::info!(
                "point={} pass by monitor, client_ip={} connection_id={}",
                self.point_name,
                request.client_ip_label(),
                request.connection_label()
            );
        }

        response
    }

    /// Replaces the point rule and the whole keyed rule set. Keyed barriers
    /// whose name survives keep their counters; `None` clears every limit.
    pub fn apply_rule(&self, rule: Option<&TpsControlRule>) {
        let _guard = self.apply_lock.lock();
        tracing::info!("apply tps control rule start, point={}", self.point_name);

        let Some(rule) = rule else {
            tracing::info!("clear all tps control rule, point={}", self.point_name);
            self.point_barrier.clear_limit_rule();
            self.pattern_barriers.store(Arc::new(Vec::new()));
            return;
        };

        match &rule.point_rule {
            Some(detail) => {
                let current = self.point_barrier.rule_detail();
                tracing::info!(
                    "update point control rule, point={} max_count={} -> {} monitor_type={:?} -> {:?}",
                    self.point_name,
                    current.max_count,
                    detail.max_count,
                    current.monitor_type,
                    detail.monitor_type
                );
                self.point_barrier.apply_rule_detail(detail);
            }
            None => {
                tracing::info!("clear point control rule, point={}", self.point_name);
                self.point_barrier.clear_limit_rule();
            }
        }

        let mut existing: HashMap<String, Arc<dyn RuleBarrier>> = self
            .pattern_barriers
            .load()
            .iter()
            .map(|barrier| (barrier.rule_name().to_string(), barrier.clone()))
            .collect();

        let mut next: Vec<Arc<dyn RuleBarrier>> = Vec::with_capacity(rule.monitor_key_rule.len());
        for (name, detail) in &rule.monitor_key_rule {
            let mut detail = detail.clone();
            if detail.pattern.is_empty() {
                detail.pattern = name.clone();
            }

            match existing.remove(name) {
                Some(barrier) => {
                    barrier.apply_rule_detail(&detail);
                    next.push(barrier);
                }
                None => {
                    tracing::info!(
                        "add pattern control rule, point={} name={} pattern={} max_count={} monitor_type={:?}",
                        self.point_name,
                        name,
                        detail.pattern,
                        detail.max_count,
                        detail.monitor_type
                    );
                    next.push(self.creator.create_rule_barrier(&self.point_name, name, &detail));
                }
            }
        }

        for name in existing.keys() {
            tracing::info!(
                "delete pattern control rule, point={} name={}",
                self.point_name,
                name
            );
        }

        // exact patterns are checked first
        next.sort_by_key(|barrier| !is_exact_pattern(&barrier.pattern()));
        self.pattern_barriers.store(Arc::new(next));

        tracing::info!("apply tps control rule end, point={}", self.point_name);
    }

    pub fn metrics(&self, timestamp: i64) -> Vec<BarrierMetrics> {
        std::iter::once(self.point_barrier.metrics(timestamp))
            .chain(self.pattern_barriers.load().iter().map(|b| b.metrics(timestamp)))
            .collect()
    }
}

fn rollback(applied: &[Reservation]) {
    for (barrier, check) in applied {
        barrier.rollback_tps(check);
    }
}
