pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fuzzy;
pub mod instance;
pub mod proxy;
pub mod redo;

#[cfg(test)]
mod mock;

pub use client::NamingClient;
pub use config::NamingClientConfig;
pub use connection::ConnectionEventListener;
pub use error::{NamingError, Result};
pub use fuzzy::{
    ChangeType, FuzzyWatchChangeEvent, FuzzyWatchEventWatcher, FuzzyWatchManager, FuzzyWatchRequest,
    FuzzyWatchSyncTask, WatchType,
};
pub use instance::{DEFAULT_GROUP, Instance, group_or_default, grouped_name, service_info_key};
pub use proxy::NamingClientProxy;
pub use redo::{
    InstancePayload, InstanceRedoData, NamingRedoService, RedoData, RedoScheduledTask, RedoType,
    SubscriberRedoData,
};
