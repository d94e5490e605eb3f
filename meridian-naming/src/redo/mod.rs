//! Redo of registrations and subscriptions after the server link drops.

pub mod data;
pub mod service;
pub mod task;

pub use data::{InstancePayload, InstanceRedoData, RedoData, RedoType, SubscriberRedoData};
pub use service::NamingRedoService;
pub use task::RedoScheduledTask;
