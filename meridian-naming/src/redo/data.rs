use crate::instance::Instance;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedoType {
    /// Registration declared but not confirmed.
    Register,
    /// Removal declared while the remote side still holds the entry.
    Unregister,
    /// Removal confirmed, the entry can be evicted.
    Remove,
    None,
}

/// Desired versus confirmed registration state of one registered entity.
/// A difference between the two is what makes the entry need redo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedoData<T> {
    pub service_name: String,
    pub group_name: String,
    expected_registered: bool,
    registered: bool,
    unregistering: bool,
    pub data: T,
}

impl<T> RedoData<T> {
    /// A fresh entry expecting registration.
    pub fn new(service_name: impl Into<String>, group_name: impl Into<String>, data: T) -> Self {
        Self {
            service_name: service_name.into(),
            group_name: group_name.into(),
            expected_registered: true,
            registered: false,
            unregistering: false,
            data,
        }
    }

    pub fn register(&mut self) {
        self.expected_registered = true;
        self.registered = false;
        self.unregistering = false;
    }

    /// Remote confirmation of a registration.
    pub fn registered(&mut self) {
        self.registered = true;
    }

    pub fn deregister(&mut self) {
        self.expected_registered = false;
        self.unregistering = true;
    }

    /// Remote confirmation of a removal.
    pub fn unregistered(&mut self) {
        self.registered = false;
        self.unregistering = false;
    }

    pub fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_expected_registered(&self) -> bool {
        self.expected_registered
    }

    pub fn is_unregistering(&self) -> bool {
        self.unregistering
    }

    pub fn redo_type(&self) -> RedoType {
        match (self.expected_registered, self.registered) {
            (true, false) => RedoType::Register,
            (false, true) => RedoType::Unregister,
            (false, false) => RedoType::Remove,
            (true, true) => RedoType::None,
        }
    }

    pub fn is_need_redo(&self) -> bool {
        self.redo_type() != RedoType::None
    }
}

/// Instances registered for one service, either one at a time or as a batch
/// that is registered and deregistered as a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InstancePayload {
    Single(Instance),
    Batch(Vec<Instance>),
}

impl InstancePayload {
    pub fn instances(&self) -> &[Instance] {
        match self {
            InstancePayload::Single(instance) => std::slice::from_ref(instance),
            InstancePayload::Batch(instances) => instances,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, InstancePayload::Batch(_))
    }
}

pub type InstanceRedoData = RedoData<InstancePayload>;

/// Subscriber payload is the comma separated cluster list.
pub type SubscriberRedoData = RedoData<String>;

impl InstanceRedoData {
    pub fn single(service_name: &str, group_name: &str, instance: Instance) -> Self {
        Self::new(service_name, group_name, InstancePayload::Single(instance))
    }

    pub fn batch(service_name: &str, group_name: &str, instances: Vec<Instance>) -> Self {
        Self::new(service_name, group_name, InstancePayload::Batch(instances))
    }
}

impl SubscriberRedoData {
    pub fn subscriber(service_name: &str, group_name: &str, clusters: &str) -> Self {
        Self::new(service_name, group_name, clusters.to_string())
    }

    pub fn clusters(&self) -> &str {
        &self.data
    }
}
