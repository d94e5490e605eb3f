use crate::error::Result;
use crate::fuzzy::FuzzyWatchRequest;
use crate::instance::Instance;
use async_trait::async_trait;

/// Remote calls the redo machinery issues against the naming server.
/// Every call may fail with a transport error.
#[async_trait]
pub trait NamingClientProxy: Send + Sync {
    async fn do_register_service(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &Instance,
    ) -> Result<()>;

    async fn do_batch_register_service(
        &self,
        service_name: &str,
        group_name: &str,
        instances: &[Instance],
    ) -> Result<()>;

    async fn do_deregister_service(
        &self,
        service_name: &str,
        group_name: &str,
        instance: &Instance,
    ) -> Result<()>;

    async fn do_subscribe(&self, service_name: &str, group_name: &str, clusters: &str) -> Result<()>;

    async fn do_unsubscribe(&self, service_name: &str, group_name: &str, clusters: &str)
    -> Result<()>;

    async fn fuzzy_watch_request(&self, request: &FuzzyWatchRequest) -> Result<()>;

    /// False once the proxy is shutting down.
    fn is_enable(&self) -> bool;

    fn namespace_id(&self) -> String;
}
