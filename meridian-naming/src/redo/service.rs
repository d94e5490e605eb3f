use super::data::{InstanceRedoData, SubscriberRedoData};
use super::task::RedoScheduledTask;
use crate::config::NamingClientConfig;
use crate::connection::ConnectionEventListener;
use crate::instance::{Instance, grouped_name, service_info_key};
use crate::proxy::NamingClientProxy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Remembers what the client registered and subscribed so it can be
/// asserted again after the server link drops.
pub struct NamingRedoService {
    connected: AtomicBool,
    registered_instances: Mutex<HashMap<String, InstanceRedoData>>,
    subscribes: Mutex<HashMap<String, SubscriberRedoData>>,
    redo_delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NamingRedoService {
    pub fn new(config: &NamingClientConfig) -> Self {
        Self {
            connected: AtomicBool::new(false),
            registered_instances: Mutex::new(HashMap::new()),
            subscribes: Mutex::new(HashMap::new()),
            redo_delay: config.redo_delay(),
            task: Mutex::new(None),
        }
    }

    /// Spawns the fixed delay redo loop. Calling it again replaces the loop.
    pub fn start(self: &Arc<Self>, proxy: Arc<dyn NamingClientProxy>) {
        let task = RedoScheduledTask::new(proxy, self.clone());
        let delay = self.redo_delay;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task.run_once().await;
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn cache_instance_for_redo(&self, service_name: &str, group_name: &str, instance: Instance) {
        let key = grouped_name(service_name, group_name);
        let redo = InstanceRedoData::single(service_name, group_name, instance);
        self.registered_instances.lock().insert(key, redo);
    }

    pub fn cache_batch_instances_for_redo(
        &self,
        service_name: &str,
        group_name: &str,
        instances: Vec<Instance>,
    ) {
        let key = grouped_name(service_name, group_name);
        let redo = InstanceRedoData::batch(service_name, group_name, instances);
        self.registered_instances.lock().insert(key, redo);
    }

    pub fn instance_registered(&self, service_name: &str, group_name: &str) {
        let key = grouped_name(service_name, group_name);
        if let Some(redo) = self.registered_instances.lock().get_mut(&key) {
            redo.registered();
        }
    }

    pub fn instance_deregister(&self, service_name: &str, group_name: &str) {
        let key = grouped_name(service_name, group_name);
        if let Some(redo) = self.registered_instances.lock().get_mut(&key) {
            redo.deregister();
        }
    }

    pub fn instance_deregistered(&self, service_name: &str, group_name: &str) {
        let key = grouped_name(service_name, group_name);
        if let Some(redo) = self.registered_instances.lock().get_mut(&key) {
            redo.unregistered();
        }
    }

    /// Evicts the entry only once registration is no longer expected.
    pub fn remove_instance_for_redo(&self, service_name: &str, group_name: &str) {
        let key = grouped_name(service_name, group_name);
        let mut instances = self.registered_instances.lock();
        if instances
            .get(&key)
            .is_some_and(|redo| !redo.is_expected_registered())
        {
            instances.remove(&key);
        }
    }

    pub fn find_instance_redo_data(&self) -> Vec<InstanceRedoData> {
        self.registered_instances
            .lock()
            .values()
            .filter(|redo| redo.is_need_redo())
            .cloned()
            .collect()
    }

    /// Looks up an entry by its `group@@service` key.
    pub fn registered_instance(&self, grouped_key: &str) -> Option<InstanceRedoData> {
        self.registered_instances.lock().get(grouped_key).cloned()
    }

    pub fn cache_subscriber_for_redo(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = subscriber_key(service_name, group_name, clusters);
        let redo = SubscriberRedoData::subscriber(service_name, group_name, clusters);
        self.subscribes.lock().insert(key, redo);
    }

    pub fn is_subscriber_registered(&self, service_name: &str, group_name: &str, clusters: &str) -> bool {
        let key = subscriber_key(service_name, group_name, clusters);
        self.subscribes
            .lock()
            .get(&key)
            .is_some_and(|redo| redo.is_registered())
    }

    pub fn subscriber_registered(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = subscriber_key(service_name, group_name, clusters);
        if let Some(redo) = self.subscribes.lock().get_mut(&key) {
            redo.registered();
        }
    }

    pub fn subscriber_deregister(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = subscriber_key(service_name, group_name, clusters);
        if let Some(redo) = self.subscribes.lock().get_mut(&key) {
            redo.deregister();
        }
    }

    pub fn subscriber_deregistered(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = subscriber_key(service_name, group_name, clusters);
        if let Some(redo) = self.subscribes.lock().get_mut(&key) {
            redo.unregistered();
        }
    }

    pub fn remove_subscriber_for_redo(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = subscriber_key(service_name, group_name, clusters);
        let mut subscribes = self.subscribes.lock();
        if subscribes
            .get(&key)
            .is_some_and(|redo| !redo.is_expected_registered())
        {
            subscribes.remove(&key);
        }
    }

    pub fn find_subscriber_redo_data(&self) -> Vec<SubscriberRedoData> {
        self.subscribes
            .lock()
            .values()
            .filter(|redo| redo.is_need_redo())
            .cloned()
            .collect()
    }

    /// Stops the redo loop and drops all remembered state.
    pub fn shutdown(&self) {
        tracing::info!("shutdown naming redo service");
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.registered_instances.lock().clear();
        self.subscribes.lock().clear();
    }
}

impl ConnectionEventListener for NamingRedoService {
    fn on_connected(&self) {
        self.connected.store(true, Ordering::Release);
        tracing::info!("naming client connected to server");
    }

    fn on_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        tracing::warn!("naming client disconnected from server, mark to redo");

        for redo in self.registered_instances.lock().values_mut() {
            redo.set_registered(false);
        }
        for redo in self.subscribes.lock().values_mut() {
            redo.set_registered(false);
        }
    }
}

fn subscriber_key(service_name: &str, group_name: &str, clusters: &str) -> String {
    service_info_key(&grouped_name(service_name, group_name), clusters)
}
