use crate::config::NamingClientConfig;
use crate::connection::ConnectionEventListener;
use crate::error::Result;
use crate::fuzzy::{FuzzyWatchEventWatcher, FuzzyWatchManager, FuzzyWatchSyncTask, build_pattern};
use crate::instance::{Instance, group_or_default};
use crate::proxy::NamingClientProxy;
use crate::redo::NamingRedoService;
use std::sync::Arc;

/// Naming client front: every registration or subscription is remembered
/// for redo before it is sent, and confirmed once the server accepts it.
pub struct NamingClient {
    namespace: String,
    proxy: Arc<dyn NamingClientProxy>,
    redo_service: Arc<NamingRedoService>,
    fuzzy_watch: Arc<FuzzyWatchManager>,
    fuzzy_sync: Arc<FuzzyWatchSyncTask>,
}

impl NamingClient {
    pub fn new(config: &NamingClientConfig, proxy: Arc<dyn NamingClientProxy>) -> Self {
        let fuzzy_watch = Arc::new(FuzzyWatchManager::new());
        let fuzzy_sync = Arc::new(FuzzyWatchSyncTask::new(
            fuzzy_watch.clone(),
            proxy.clone(),
            config.fuzzy_watch_sync_delay(),
        ));

        Self {
            namespace: config.namespace.clone(),
            proxy,
            redo_service: Arc::new(NamingRedoService::new(config)),
            fuzzy_watch,
            fuzzy_sync,
        }
    }

    /// Starts the background redo and fuzzy watch loops.
    pub fn start(&self) {
        self.redo_service.start(self.proxy.clone());
        self.fuzzy_sync.start();
    }

    pub fn redo_service(&self) -> &Arc<NamingRedoService> {
        &self.redo_service
    }

    pub fn fuzzy_watch_manager(&self) -> &Arc<FuzzyWatchManager> {
        &self.fuzzy_watch
    }

    pub async fn register_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: Instance,
    ) -> Result<()> {
        let group_name = group_or_default(group_name);
        instance.validate()?;
        tracing::info!(
            "register instance service={} group={} instance={}",
            service_name,
            group_name,
            instance.address()
        );

        self.redo_service
            .cache_instance_for_redo(service_name, group_name, instance.clone());
        self.proxy
            .do_register_service(service_name, group_name, &instance)
            .await?;
        self.redo_service.instance_registered(service_name, group_name);
        Ok(())
    }

    pub async fn batch_register_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instances: Vec<Instance>,
    ) -> Result<()> {
        let group_name = group_or_default(group_name);
        for instance in &instances {
            instance.validate()?;
        }
        tracing::info!(
            "batch register instance service={} group={} count={}",
            service_name,
            group_name,
            instances.len()
        );

        self.redo_service
            .cache_batch_instances_for_redo(service_name, group_name, instances.clone());
        self.proxy
            .do_batch_register_service(service_name, group_name, &instances)
            .await?;
        self.redo_service.instance_registered(service_name, group_name);
        Ok(())
    }

    pub async fn deregister_instance(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &Instance,
    ) -> Result<()> {
        let group_name = group_or_default(group_name);
        tracing::info!(
            "deregister instance service={} group={} instance={}",
            service_name,
            group_name,
            instance.address()
        );

        self.redo_service.instance_deregister(service_name, group_name);
        self.proxy
            .do_deregister_service(service_name, group_name, instance)
            .await?;
        self.redo_service.instance_deregistered(service_name, group_name);
        Ok(())
    }

    pub async fn subscribe(&self, service_name: &str, group_name: &str, clusters: &str) -> Result<()> {
        let group_name = group_or_default(group_name);
        self.redo_service
            .cache_subscriber_for_redo(service_name, group_name, clusters);
        self.proxy
            .do_subscribe(service_name, group_name, clusters)
            .await?;
        self.redo_service
            .subscriber_registered(service_name, group_name, clusters);
        Ok(())
    }

    pub async fn unsubscribe(&self, service_name: &str, group_name: &str, clusters: &str) -> Result<()> {
        let group_name = group_or_default(group_name);
        self.redo_service
            .subscriber_deregister(service_name, group_name, clusters);
        self.proxy
            .do_unsubscribe(service_name, group_name, clusters)
            .await?;
        self.redo_service
            .subscriber_deregistered(service_name, group_name, clusters);
        Ok(())
    }

    /// Watches every service matching the patterns; the server is told on
    /// the next fuzzy watch sync. Returns the full pattern.
    pub fn fuzzy_watch(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        watcher: Arc<dyn FuzzyWatchEventWatcher>,
    ) -> String {
        let pattern = build_pattern(
            &self.namespace,
            group_or_default(group_pattern),
            service_pattern,
        );
        self.fuzzy_watch.register_watcher(&pattern, watcher);
        pattern
    }

    pub fn cancel_fuzzy_watch(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        watcher: &Arc<dyn FuzzyWatchEventWatcher>,
    ) {
        let pattern = build_pattern(
            &self.namespace,
            group_or_default(group_pattern),
            service_pattern,
        );
        self.fuzzy_watch.remove_watcher(&pattern, watcher);
    }

    pub fn shutdown(&self) {
        self.fuzzy_sync.shutdown();
        self.redo_service.shutdown();
    }
}

impl ConnectionEventListener for NamingClient {
    fn on_connected(&self) {
        self.redo_service.on_connected();
    }

    fn on_disconnect(&self) {
        self.redo_service.on_disconnect();
        self.fuzzy_watch.reset_consistence_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NamingError;
    use crate::fuzzy::FuzzyWatchChangeEvent;
    use crate::mock::MockProxy;
    use crate::redo::RedoType;
    use std::time::Duration;

    struct NoopWatcher;

    impl FuzzyWatchEventWatcher for NoopWatcher {
        fn on_event(&self, _event: &FuzzyWatchChangeEvent) {}
    }

    fn client() -> (NamingClient, Arc<MockProxy>) {
        let proxy = Arc::new(MockProxy::new());
        let client = NamingClient::new(&NamingClientConfig::default(), proxy.clone());
        client.on_connected();
        (client, proxy)
    }

    #[tokio::test]
    async fn register_confirms_and_failure_leaves_redo_pending() {
        let (client, proxy) = client();
        client
            .register_instance("order-service", "DEFAULT", Instance::new("10.0.0.1", 8080))
            .await
            .unwrap();
        assert!(client.redo_service().find_instance_redo_data().is_empty());

        proxy.fail_service("payment-service");
        let error = client
            .register_instance("payment-service", "DEFAULT", Instance::new("10.0.0.2", 8080))
            .await
            .unwrap_err();
        assert!(matches!(error, NamingError::Transport(_)));

        let pending = client.redo_service().find_instance_redo_data();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].service_name, "payment-service");
        assert_eq!(pending[0].redo_type(), RedoType::Register);
    }

    #[tokio::test]
    async fn invalid_instance_is_rejected_before_caching() {
        let (client, proxy) = client();
        let result = client
            .register_instance("order-service", "DEFAULT", Instance::new("", 8080))
            .await;
        assert!(matches!(result, Err(NamingError::InvalidRequest(_))));
        assert!(client.redo_service().find_instance_redo_data().is_empty());
        assert!(proxy.calls().is_empty());
    }

    #[tokio::test]
    async fn deregister_and_unsubscribe_leave_entries_for_eviction() {
        let (client, _proxy) = client();
        let instance = Instance::new("10.0.0.1", 8080);
        client
            .batch_register_instance("order-service", "DEFAULT", vec![instance.clone()])
            .await
            .unwrap();
        client.subscribe("order-service", "DEFAULT", "").await.unwrap();

        client
            .deregister_instance("order-service", "DEFAULT", &instance)
            .await
            .unwrap();
        client.unsubscribe("order-service", "DEFAULT", "").await.unwrap();

        let instances = client.redo_service().find_instance_redo_data();
        assert_eq!(instances[0].redo_type(), RedoType::Remove);
        let subscribers = client.redo_service().find_subscriber_redo_data();
        assert_eq!(subscribers[0].redo_type(), RedoType::Remove);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loops_restore_state_after_reconnect() {
        let (client, proxy) = client();
        client
            .register_instance("order-service", "DEFAULT", Instance::new("10.0.0.1", 8080))
            .await
            .unwrap();
        let pattern = client.fuzzy_watch("DEFAULT", "order-*", Arc::new(NoopWatcher));
        assert_eq!(pattern, "public>>DEFAULT@@order-*");

        client.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.fuzzy_watch_manager().is_consistent(&pattern), Some(true));

        client.on_disconnect();
        assert_eq!(client.fuzzy_watch_manager().is_consistent(&pattern), Some(false));
        client.on_connected();
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert!(client.redo_service().find_instance_redo_data().is_empty());
        assert_eq!(client.fuzzy_watch_manager().is_consistent(&pattern), Some(true));
        let registrations = proxy
            .calls()
            .iter()
            .filter(|call| call.starts_with("register:order-service"))
            .count();
        assert_eq!(registrations, 2);

        client.shutdown();
    }

    #[tokio::test]
    async fn empty_group_falls_back_to_default_group() {
        let (client, proxy) = client();
        client
            .register_instance("order-service", "", Instance::new("10.0.0.1", 8080).with_cluster("c1"))
            .await
            .unwrap();
        assert_eq!(
            proxy.calls(),
            vec!["register:order-service:DEFAULT_GROUP:10.0.0.1:8080".to_string()]
        );
        assert!(
            client
                .redo_service()
                .registered_instance("DEFAULT_GROUP@@order-service")
                .is_some()
        );
    }
}
