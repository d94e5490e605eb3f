use super::data::{InstancePayload, InstanceRedoData, RedoType, SubscriberRedoData};
use super::service::NamingRedoService;
use crate::error::Result;
use crate::proxy::NamingClientProxy;
use std::sync::Arc;

/// One reconciliation pass over the redo service. Remote failures are
/// logged per entry and retried on the next pass.
pub struct RedoScheduledTask {
    proxy: Arc<dyn NamingClientProxy>,
    redo_service: Arc<NamingRedoService>,
}

impl RedoScheduledTask {
    pub fn new(proxy: Arc<dyn NamingClientProxy>, redo_service: Arc<NamingRedoService>) -> Self {
        Self {
            proxy,
            redo_service,
        }
    }

    pub async fn run_once(&self) {
        if !self.redo_service.is_connected() {
            return;
        }
        self.redo_for_instances().await;
        self.redo_for_subscribes().await;
    }

    async fn redo_for_instances(&self) {
        for redo in self.redo_service.find_instance_redo_data() {
            if let Err(error) = self.redo_for_instance(&redo).await {
                tracing::warn!(
                    "redo instance operation {:?} for {}@@{} failed: {}",
                    redo.redo_type(),
                    redo.group_name,
                    redo.service_name,
                    error
                );
            }
        }
    }

    async fn redo_for_instance(&self, redo: &InstanceRedoData) -> Result<()> {
        let service_name = redo.service_name.as_str();
        let group_name = redo.group_name.as_str();

        match redo.redo_type() {
            RedoType::Register => {
                if !self.proxy.is_enable() {
                    return Ok(());
                }
                tracing::info!("redo register instance for {}@@{}", group_name, service_name);
                match &redo.data {
                    InstancePayload::Single(instance) => {
                        self.proxy
                            .do_register_service(service_name, group_name, instance)
                            .await?
                    }
                    InstancePayload::Batch(instances) => {
                        self.proxy
                            .do_batch_register_service(service_name, group_name, instances)
                            .await?
                    }
                }
                self.redo_service.instance_registered(service_name, group_name);
            }
            RedoType::Unregister => {
                if !self.proxy.is_enable() {
                    return Ok(());
                }
                tracing::info!("redo deregister instance for {}@@{}", group_name, service_name);
                for instance in redo.data.instances() {
                    self.proxy
                        .do_deregister_service(service_name, group_name, instance)
                        .await?;
                }
                self.redo_service.instance_deregistered(service_name, group_name);
            }
            RedoType::Remove => {
                self.redo_service
                    .remove_instance_for_redo(service_name, group_name);
            }
            RedoType::None => {}
        }
        Ok(())
    }

    async fn redo_for_subscribes(&self) {
        for redo in self.redo_service.find_subscriber_redo_data() {
            if let Err(error) = self.redo_for_subscribe(&redo).await {
                tracing::warn!(
                    "redo subscriber operation {:?} for {}@@{} cluster={} failed: {}",
                    redo.redo_type(),
                    redo.group_name,
                    redo.service_name,
                    redo.clusters(),
                    error
                );
            }
        }
    }

    async fn redo_for_subscribe(&self, redo: &SubscriberRedoData) -> Result<()> {
        let service_name = redo.service_name.as_str();
        let group_name = redo.group_name.as_str();
        let clusters = redo.clusters();

        match redo.redo_type() {
            RedoType::Register => {
                if !self.proxy.is_enable() {
                    return Ok(());
                }
                tracing::info!(
                    "redo subscribe for {}@@{} cluster={}",
                    group_name,
                    service_name,
                    clusters
                );
                self.proxy
                    .do_subscribe(service_name, group_name, clusters)
                    .await?;
                self.redo_service
                    .subscriber_registered(service_name, group_name, clusters);
            }
            RedoType::Unregister => {
                if !self.proxy.is_enable() {
                    return Ok(());
                }
                tracing::info!(
                    "redo unsubscribe for {}@@{} cluster={}",
                    group_name,
                    service_name,
                    clusters
                );
                self.proxy
                    .do_unsubscribe(service_name, group_name, clusters)
                    .await?;
                self.redo_service
                    .subscriber_deregistered(service_name, group_name, clusters);
            }
            RedoType::Remove => {
                self.redo_service
                    .remove_subscriber_for_redo(service_name, group_name, clusters);
            }
            RedoType::None => {}
        }
        Ok(())
    }
}
