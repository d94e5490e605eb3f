use crate::error::{NamingError, Result};
use crate::fuzzy::FuzzyWatchRequest;
use crate::instance::Instance;
use crate::proxy::NamingClientProxy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Records every successful remote call; calls naming a failing service,
/// pattern or deregistered address return a transport error.
pub(crate) struct MockProxy {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    enable: AtomicBool,
}

impl MockProxy {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            enable: AtomicBool::new(true),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn fail_service(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub(crate) fn recover_service(&self, name: &str) {
        self.failing.lock().remove(name);
    }

    pub(crate) fn fail_address(&self, address: &str) {
        self.failing.lock().insert(address.to_string());
    }

    pub(crate) fn recover_address(&self, address: &str) {
        self.failing.lock().remove(address);
    }

    pub(crate) fn set_enable(&self, enable: bool) {
        self.enable.store(enable, Ordering::SeqCst);
    }

    fn record(&self, name: &str, call: String) -> Result<()> {
        if self.failing.lock().contains(name) {
            return Err(NamingError::Transport(format!("{} unreachable", name)));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl NamingClientProxy for MockProxy {
    async fn do_register_service(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &Instance,
    ) -> Result<()> {
        self.record(
            service_name,
            format!("register:{}:{}:{}", service_name, group_name, instance.address()),
        )
    }

    async fn do_batch_register_service(
        &self,
        service_name: &str,
        group_name: &str,
        instances: &[Instance],
    ) -> Result<()> {
        self.record(
            service_name,
            format!("batch_register:{}:{}:{}", service_name, group_name, instances.len()),
        )
    }

    async fn do_deregister_service(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &Instance,
    ) -> Result<()> {
        let address = instance.address();
        if self.failing.lock().contains(&address) {
            return Err(NamingError::Transport(format!("{} unreachable", address)));
        }
        self.record(
            service_name,
            format!("deregister:{}:{}:{}", service_name, group_name, instance.address()),
        )
    }

    async fn do_subscribe(&self, service_name: &str, group_name: &str, clusters: &str) -> Result<()> {
        self.record(
            service_name,
            format!("subscribe:{}:{}:{}", service_name, group_name, clusters),
        )
    }

    async fn do_unsubscribe(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &str,
    ) -> Result<()> {
        self.record(
            service_name,
            format!("unsubscribe:{}:{}:{}", service_name, group_name, clusters),
        )
    }

    async fn fuzzy_watch_request(&self, request: &FuzzyWatchRequest) -> Result<()> {
        self.record(
            &request.pattern,
            format!("fuzzy:{:?}:{}", request.watch_type, request.pattern),
        )
    }

    fn is_enable(&self) -> bool {
        self.enable.load(Ordering::SeqCst)
    }

    fn namespace_id(&self) -> String {
        "public".to_string()
    }
}
