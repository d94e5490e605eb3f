use crate::barrier::{LocalSimpleCountBarrierCreator, RuleBarrierCreator};
use crate::config::{ControlConfig, LOCAL_CREATOR};
use crate::counter::{LocalRateCountCreator, RateCountCreator};
use std::collections::HashMap;
use std::sync::Arc;

type BarrierFactory = Arc<dyn Fn(Arc<dyn RateCountCreator>) -> Arc<dyn RuleBarrierCreator> + Send + Sync>;

/// Named counter and barrier implementations available to the control
/// manager. The built-in `local` implementations are always registered.
pub struct ControlPlugins {
    rate_count_creators: HashMap<String, Arc<dyn RateCountCreator>>,
    barrier_creators: HashMap<String, BarrierFactory>,
}

impl Default for ControlPlugins {
    fn default() -> Self {
        let mut plugins = Self {
            rate_count_creators: HashMap::new(),
            barrier_creators: HashMap::new(),
        };
        plugins.register_rate_count_creator(Arc::new(LocalRateCountCreator));
        plugins.register_barrier_creator(LOCAL_CREATOR, |rate_count_creator| {
            Arc::new(LocalSimpleCountBarrierCreator::new(rate_count_creator))
        });
        plugins
    }
}

impl ControlPlugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rate_count_creator(&mut self, creator: Arc<dyn RateCountCreator>) {
        self.rate_count_creators
            .insert(creator.name().to_string(), creator);
    }

    /// Registers a barrier implementation. The factory receives the rate
    /// counter implementation selected by configuration.
    pub fn register_barrier_creator<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn RateCountCreator>) -> Arc<dyn RuleBarrierCreator> + Send + Sync + 'static,
    {
        self.barrier_creators.insert(name.into(), Arc::new(factory));
    }

    pub fn rate_count_creator(&self, name: &str) -> Arc<dyn RateCountCreator> {
        if let Some(creator) = self.rate_count_creators.get(name) {
            return creator.clone();
        }
        tracing::warn!(
            "rate count creator {} not found, fall back to {}",
            name,
            LOCAL_CREATOR
        );
        Arc::new(LocalRateCountCreator)
    }

    /// Resolves the barrier creator named in `config`, falling back to the
    /// local implementation when the name is unknown.
    pub fn resolve(&self, config: &ControlConfig) -> Arc<dyn RuleBarrierCreator> {
        let rate_count_creator = self.rate_count_creator(&config.rate_count_creator);

        match self.barrier_creators.get(&config.rule_barrier_creator) {
            Some(factory) => factory(rate_count_creator),
            None => {
                tracing::warn!(
                    "rule barrier creator {} not found, fall back to {}",
                    config.rule_barrier_creator,
                    LOCAL_CREATOR
                );
                Arc::new(LocalSimpleCountBarrierCreator::new(rate_count_creator))
            }
        }
    }
}
