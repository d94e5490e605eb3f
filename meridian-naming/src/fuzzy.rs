//! Fuzzy watch: subscriptions to a pattern of services rather than one
//! service, reconciled with the server by a periodic sync task.

use crate::error::Result;
use crate::instance::SERVICE_INFO_SPLITER;
use crate::proxy::NamingClientProxy;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};

pub const NAMESPACE_SPLITER: &str = ">>";

/// Every pattern is re-sent at least this often, consistent or not.
pub const FULL_SYNC_INTERVAL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchType {
    Watch,
    CancelWatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeType {
    AddService,
    DeleteService,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuzzyWatchChangeEvent {
    pub namespace: String,
    pub group_name: String,
    pub service_name: String,
    pub change_type: ChangeType,
}

pub trait FuzzyWatchEventWatcher: Send + Sync {
    fn on_event(&self, event: &FuzzyWatchChangeEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyWatchRequest {
    pub namespace: String,
    pub pattern: String,
    pub watch_type: WatchType,
    pub received_keys: HashSet<String>,
    pub initializing: bool,
}

/// `namespace>>group@@service`, used for patterns and for matched keys.
pub fn build_pattern(namespace: &str, group_pattern: &str, service_pattern: &str) -> String {
    format!(
        "{}{}{}{}{}",
        namespace, NAMESPACE_SPLITER, group_pattern, SERVICE_INFO_SPLITER, service_pattern
    )
}

pub fn parse_service_key(service_key: &str) -> Option<(&str, &str, &str)> {
    let (namespace, rest) = service_key.split_once(NAMESPACE_SPLITER)?;
    let (group, service) = rest.split_once(SERVICE_INFO_SPLITER)?;
    Some((namespace, group, service))
}

struct FuzzyWatchContext {
    watchers: Vec<Arc<dyn FuzzyWatchEventWatcher>>,
    received_keys: HashSet<String>,
    discard: bool,
    consistent_with_server: bool,
    initializing: bool,
}

impl FuzzyWatchContext {
    fn new() -> Self {
        Self {
            watchers: Vec::new(),
            received_keys: HashSet::new(),
            discard: false,
            consistent_with_server: false,
            initializing: true,
        }
    }

    fn watch_type(&self) -> WatchType {
        if self.discard && self.watchers.is_empty() {
            WatchType::CancelWatch
        } else {
            WatchType::Watch
        }
    }
}

type Notification = (Arc<dyn FuzzyWatchEventWatcher>, FuzzyWatchChangeEvent);

fn change_event(service_key: &str, change_type: ChangeType) -> Option<FuzzyWatchChangeEvent> {
    let (namespace, group, service) = parse_service_key(service_key)?;
    Some(FuzzyWatchChangeEvent {
        namespace: namespace.to_string(),
        group_name: group.to_string(),
        service_name: service.to_string(),
        change_type,
    })
}

fn deliver(notifications: Vec<Notification>) {
    for (watcher, event) in notifications {
        watcher.on_event(&event);
    }
}

/// Fuzzy watch contexts by pattern.
#[derive(Default)]
pub struct FuzzyWatchManager {
    contexts: Mutex<HashMap<String, FuzzyWatchContext>>,
}

impl FuzzyWatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a watcher to `pattern`, creating the context when absent. The new
    /// watcher is told about every service already matched.
    pub fn register_watcher(&self, pattern: &str, watcher: Arc<dyn FuzzyWatchEventWatcher>) {
        let mut notifications = Vec::new();
        {
            let mut contexts = self.contexts.lock();
            let context = contexts.entry(pattern.to_string()).or_insert_with(|| {
                tracing::info!("init fuzzy watch context for pattern={}", pattern);
                FuzzyWatchContext::new()
            });

            if context.discard {
                context.discard = false;
                context.consistent_with_server = false;
            }
            if !context.watchers.iter().any(|w| Arc::ptr_eq(w, &watcher)) {
                context.watchers.push(watcher.clone());
                for key in &context.received_keys {
                    if let Some(event) = change_event(key, ChangeType::AddService) {
                        notifications.push((watcher.clone(), event));
                    }
                }
            }
        }
        deliver(notifications);
    }

    /// Removes a watcher. Once the last one is gone the pattern is marked for
    /// cancellation on the next sync.
    pub fn remove_watcher(&self, pattern: &str, watcher: &Arc<dyn FuzzyWatchEventWatcher>) {
        let mut contexts = self.contexts.lock();
        let Some(context) = contexts.get_mut(pattern) else {
            return;
        };

        context.watchers.retain(|w| !Arc::ptr_eq(w, watcher));
        if context.watchers.is_empty() {
            tracing::info!("no watcher left for pattern={}, mark discard", pattern);
            context.discard = true;
            context.consistent_with_server = false;
        }
    }

    /// Replaces the matched keys of `pattern` with a full snapshot from the
    /// server, notifying watchers of the difference.
    pub fn handle_sync_notify(&self, pattern: &str, service_keys: HashSet<String>) {
        let mut notifications = Vec::new();
        {
            let mut contexts = self.contexts.lock();
            let Some(context) = contexts.get_mut(pattern) else {
                return;
            };

            let added = service_keys
                .difference(&context.received_keys)
                .filter_map(|key| change_event(key, ChangeType::AddService));
            let removed = context
                .received_keys
                .difference(&service_keys)
                .filter_map(|key| change_event(key, ChangeType::DeleteService));
            for event in added.chain(removed) {
                for watcher in &context.watchers {
                    notifications.push((watcher.clone(), event.clone()));
                }
            }

            context.received_keys = service_keys;
            context.initializing = false;
        }
        deliver(notifications);
    }

    pub fn handle_change_notify(&self, pattern: &str, service_key: &str, change_type: ChangeType) {
        let mut notifications = Vec::new();
        {
            let mut contexts = self.contexts.lock();
            let Some(context) = contexts.get_mut(pattern) else {
                return;
            };

            let changed = match change_type {
                ChangeType::AddService => context.received_keys.insert(service_key.to_string()),
                ChangeType::DeleteService => context.received_keys.remove(service_key),
            };
            if changed && let Some(event) = change_event(service_key, change_type) {
                for watcher in &context.watchers {
                    notifications.push((watcher.clone(), event.clone()));
                }
            }
        }
        deliver(notifications);
    }

    /// Marks every pattern as needing a new watch request.
    pub fn reset_consistence_status(&self) {
        for context in self.contexts.lock().values_mut() {
            context.consistent_with_server = false;
        }
    }

    pub fn patterns(&self) -> Vec<String> {
        self.contexts.lock().keys().cloned().collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.contexts.lock().contains_key(pattern)
    }

    pub fn is_consistent(&self, pattern: &str) -> Option<bool> {
        self.contexts
            .lock()
            .get(pattern)
            .map(|context| context.consistent_with_server)
    }

    pub fn received_keys(&self, pattern: &str) -> HashSet<String> {
        self.contexts
            .lock()
            .get(pattern)
            .map(|context| context.received_keys.clone())
            .unwrap_or_default()
    }

    /// Builds the request that brings `pattern` in line with the server, or
    /// `None` when it already is.
    pub fn build_request(&self, pattern: &str, namespace: &str) -> Option<FuzzyWatchRequest> {
        let contexts = self.contexts.lock();
        let context = contexts.get(pattern)?;
        if context.consistent_with_server {
            return None;
        }

        Some(FuzzyWatchRequest {
            namespace: namespace.to_string(),
            pattern: pattern.to_string(),
            watch_type: context.watch_type(),
            received_keys: context.received_keys.clone(),
            initializing: context.initializing,
        })
    }

    /// Records a successful request. A cancel drops the pattern if nobody
    /// started watching it again in the meantime; a watch only counts if
    /// the pattern still has watchers.
    pub fn complete_request(&self, pattern: &str, watch_type: WatchType) {
        let mut contexts = self.contexts.lock();
        let Some(context) = contexts.get_mut(pattern) else {
            return;
        };

        match watch_type {
            WatchType::CancelWatch => {
                if context.watch_type() == WatchType::CancelWatch {
                    tracing::info!("remove fuzzy watch context for pattern={}", pattern);
                    contexts.remove(pattern);
                }
            }
            WatchType::Watch => {
                if context.watch_type() == WatchType::Watch {
                    context.consistent_with_server = true;
                }
            }
        }
    }
}

/// Periodically sends watch or cancel requests for every pattern that is
/// not consistent with the server.
pub struct FuzzyWatchSyncTask {
    manager: Arc<FuzzyWatchManager>,
    proxy: Arc<dyn NamingClientProxy>,
    delay: Duration,
    last_full_sync: Mutex<Instant>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FuzzyWatchSyncTask {
    pub fn new(
        manager: Arc<FuzzyWatchManager>,
        proxy: Arc<dyn NamingClientProxy>,
        delay: Duration,
    ) -> Self {
        Self {
            manager,
            proxy,
            delay,
            last_full_sync: Mutex::new(Instant::now()),
            task: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(error) = this.run_once().await {
                    tracing::warn!("fuzzy watch sync pass aborted: {}", error);
                }
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// A failed request aborts the rest of the pass.
    pub async fn run_once(&self) -> Result<()> {
        {
            let mut last_full_sync = self.last_full_sync.lock();
            if last_full_sync.elapsed() >= FULL_SYNC_INTERVAL {
                tracing::info!("fuzzy watch full sync, resend every pattern");
                self.manager.reset_consistence_status();
                *last_full_sync = Instant::now();
            }
        }

        let namespace = self.proxy.namespace_id();
        for pattern in self.manager.patterns() {
            while let Some(request) = self.manager.build_request(&pattern, &namespace) {
                if let Err(error) = self.proxy.fuzzy_watch_request(&request).await {
                    tracing::error!(
                        "fuzzy watch request failed, pattern={} watch_type={:?} error={}",
                        pattern,
                        request.watch_type,
                        error
                    );
                    return Err(error);
                }
                self.manager.complete_request(&pattern, request.watch_type);
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::mock::MockProxy;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingWatcher {
        events: Mutex<Vec<FuzzyWatchChangeEvent>>,
    }

    impl FuzzyWatchEventWatcher for RecordingWatcher {
        fn on_event(&self, event: &FuzzyWatchChangeEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn watcher() -> (Arc<RecordingWatcher>, Arc<dyn FuzzyWatchEventWatcher>) {
        let recording = Arc::new(RecordingWatcher::default());
        let dynamic: Arc<dyn FuzzyWatchEventWatcher> = recording.clone();
        (recording, dynamic)
    }

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn pattern_and_service_key_format() {
        let pattern = build_pattern("public", "DEFAULT_GROUP", "order-*");
        assert_eq!(pattern, "public>>DEFAULT_GROUP@@order-*");
        assert_eq!(
            parse_service_key("public>>DEFAULT_GROUP@@order-service"),
            Some(("public", "DEFAULT_GROUP", "order-service"))
        );
        assert_eq!(parse_service_key("order-service"), None);
    }

    #[test]
    fn watch_type_follows_watchers_and_discard() {
        let manager = FuzzyWatchManager::new();
        let (_, watcher) = watcher();
        manager.register_watcher("p", watcher.clone());

        let request = manager.build_request("p", "public").unwrap();
        assert_eq!(request.watch_type, WatchType::Watch);
        assert!(request.initializing);

        manager.complete_request("p", WatchType::Watch);
        assert!(manager.build_request("p", "public").is_none());

        manager.remove_watcher("p", &watcher);
        assert_eq!(manager.is_consistent("p"), Some(false));
        let cancel = manager.build_request("p", "public").unwrap();
        assert_eq!(cancel.watch_type, WatchType::CancelWatch);

        manager.complete_request("p", WatchType::CancelWatch);
        assert!(!manager.contains("p"));
    }

    #[test]
    fn cancel_is_dropped_when_watcher_returns() {
        let manager = FuzzyWatchManager::new();
        let (_, watcher) = watcher();
        manager.register_watcher("p", watcher.clone());
        manager.remove_watcher("p", &watcher);
        manager.register_watcher("p", watcher);

        manager.complete_request("p", WatchType::CancelWatch);
        assert!(manager.contains("p"));
        assert_eq!(
            manager.build_request("p", "public").map(|r| r.watch_type),
            Some(WatchType::Watch)
        );
    }

    #[test]
    fn notifications_reach_watchers() {
        let manager = FuzzyWatchManager::new();
        let (first, first_dyn) = watcher();
        manager.register_watcher("p", first_dyn);

        manager.handle_sync_notify("p", keys(&["public>>G@@a", "public>>G@@b"]));
        assert_eq!(first.events.lock().len(), 2);

        manager.handle_sync_notify("p", keys(&["public>>G@@b", "public>>G@@c"]));
        let events = first.events.lock().clone();
        assert_eq!(events.len(), 4);
        assert!(events[2..].iter().any(|e| e.service_name == "c" && e.change_type == ChangeType::AddService));
        assert!(events[2..].iter().any(|e| e.service_name == "a" && e.change_type == ChangeType::DeleteService));

        manager.handle_change_notify("p", "public>>G@@c", ChangeType::DeleteService);
        manager.handle_change_notify("p", "public>>G@@c", ChangeType::DeleteService);
        assert_eq!(first.events.lock().len(), 5);
        assert_eq!(manager.received_keys("p"), keys(&["public>>G@@b"]));

        let (second, second_dyn) = watcher();
        manager.register_watcher("p", second_dyn);
        let replayed = second.events.lock().clone();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].service_name, "b");
    }

    #[tokio::test]
    async fn sync_task_converges_and_reset_triggers_rewatch() {
        let manager = Arc::new(FuzzyWatchManager::new());
        let proxy = Arc::new(MockProxy::new());
        let task = FuzzyWatchSyncTask::new(manager.clone(), proxy.clone(), Duration::from_secs(3));
        let (_, watcher) = watcher();
        manager.register_watcher("public>>G@@order-*", watcher.clone());

        task.run_once().await.unwrap();
        assert_eq!(proxy.calls(), vec!["fuzzy:Watch:public>>G@@order-*".to_string()]);
        assert_eq!(manager.is_consistent("public>>G@@order-*"), Some(true));

        task.run_once().await.unwrap();
        assert_eq!(proxy.calls().len(), 1);

        manager.reset_consistence_status();
        manager.remove_watcher("public>>G@@order-*", &watcher);
        task.run_once().await.unwrap();
        assert_eq!(
            proxy.calls()[1],
            "fuzzy:CancelWatch:public>>G@@order-*".to_string()
        );
        assert!(!manager.contains("public>>G@@order-*"));
    }

    #[tokio::test]
    async fn failed_request_aborts_the_pass() {
        let manager = Arc::new(FuzzyWatchManager::new());
        let proxy = Arc::new(MockProxy::new());
        let task = FuzzyWatchSyncTask::new(manager.clone(), proxy.clone(), Duration::from_secs(3));
        let (_, watcher) = watcher();
        manager.register_watcher("bad", watcher.clone());
        manager.register_watcher("good", watcher);
        proxy.fail_service("bad");

        assert!(task.run_once().await.is_err());
        assert_eq!(manager.is_consistent("bad"), Some(false));

        proxy.recover_service("bad");
        task.run_once().await.unwrap();
        assert_eq!(manager.is_consistent("bad"), Some(true));
        assert_eq!(manager.is_consistent("good"), Some(true));
    }

    /// Drops the pattern's only watcher while its watch request is in flight.
    struct RemovingProxy {
        manager: Arc<FuzzyWatchManager>,
        watcher: Arc<dyn FuzzyWatchEventWatcher>,
        calls: Mutex<Vec<WatchType>>,
    }

    #[async_trait]
    impl NamingClientProxy for RemovingProxy {
        async fn do_register_service(&self, _service: &str, _group: &str, _instance: &Instance) -> Result<()> {
            Ok(())
        }

        async fn do_batch_register_service(
            &self,
            _service: &str,
            _group: &str,
            _instances: &[Instance],
        ) -> Result<()> {
            Ok(())
        }

        async fn do_deregister_service(&self, _service: &str, _group: &str, _instance: &Instance) -> Result<()> {
            Ok(())
        }

        async fn do_subscribe(&self, _service: &str, _group: &str, _clusters: &str) -> Result<()> {
            Ok(())
        }

        async fn do_unsubscribe(&self, _service: &str, _group: &str, _clusters: &str) -> Result<()> {
            Ok(())
        }

        async fn fuzzy_watch_request(&self, request: &FuzzyWatchRequest) -> Result<()> {
            self.calls.lock().push(request.watch_type);
            if request.watch_type == WatchType::Watch {
                self.manager.remove_watcher(&request.pattern, &self.watcher);
            }
            Ok(())
        }

        fn is_enable(&self) -> bool {
            true
        }

        fn namespace_id(&self) -> String {
            "public".to_string()
        }
    }

    #[tokio::test]
    async fn watcher_removed_during_watch_is_cancelled() {
        let manager = Arc::new(FuzzyWatchManager::new());
        let (_, watcher) = watcher();
        manager.register_watcher("public>>G@@order-*", watcher.clone());
        let proxy = Arc::new(RemovingProxy {
            manager: manager.clone(),
            watcher,
            calls: Mutex::new(Vec::new()),
        });
        let task = FuzzyWatchSyncTask::new(manager.clone(), proxy.clone(), Duration::from_secs(3));

        task.run_once().await.unwrap();
        task.run_once().await.unwrap();

        assert_eq!(
            *proxy.calls.lock(),
            vec![WatchType::Watch, WatchType::CancelWatch]
        );
        assert!(!manager.contains("public>>G@@order-*"));
    }

    #[tokio::test(start_paused = true)]
    async fn consistent_patterns_are_resent_on_full_sync() {
        let manager = Arc::new(FuzzyWatchManager::new());
        let proxy = Arc::new(MockProxy::new());
        let task = FuzzyWatchSyncTask::new(manager.clone(), proxy.clone(), Duration::from_secs(3));
        let (_, watcher) = watcher();
        manager.register_watcher("public>>G@@order-*", watcher);

        task.run_once().await.unwrap();
        tokio::time::advance(FULL_SYNC_INTERVAL - Duration::from_secs(1)).await;
        task.run_once().await.unwrap();
        assert_eq!(proxy.calls().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        task.run_once().await.unwrap();
        assert_eq!(proxy.calls().len(), 2);
        assert_eq!(manager.is_consistent("public>>G@@order-*"), Some(true));

        task.run_once().await.unwrap();
        assert_eq!(proxy.calls().len(), 2);
    }
}
