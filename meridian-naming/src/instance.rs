use crate::error::{NamingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SERVICE_INFO_SPLITER: &str = "@@";
pub const DEFAULT_CLUSTER_NAME: &str = "DEFAULT";
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    #[serde(default = "default_cluster")]
    pub cluster_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_cluster() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: None,
            ip: ip.into(),
            port,
            weight: default_weight(),
            healthy: true,
            enabled: true,
            ephemeral: true,
            cluster_name: default_cluster(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ip.trim().is_empty() {
            return Err(NamingError::InvalidRequest("instance ip is empty".to_string()));
        }
        if self.weight < 0.0 {
            return Err(NamingError::InvalidRequest(format!(
                "instance {} has negative weight",
                self.address()
            )));
        }
        Ok(())
    }
}

/// An empty group name falls back to `DEFAULT_GROUP`.
pub fn group_or_default(group_name: &str) -> &str {
    if group_name.trim().is_empty() {
        DEFAULT_GROUP
    } else {
        group_name
    }
}

/// `group@@service`, the key instance redo data is stored under.
pub fn grouped_name(service_name: &str, group_name: &str) -> String {
    format!("{}{}{}", group_name, SERVICE_INFO_SPLITER, service_name)
}

/// `group@@service@@cluster`, the key subscriber redo data is stored under.
/// An empty cluster list leaves the grouped name unchanged.
pub fn service_info_key(grouped_name: &str, clusters: &str) -> String {
    if clusters.is_empty() {
        grouped_name.to_string()
    } else {
        format!("{}{}{}", grouped_name, SERVICE_INFO_SPLITER, clusters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_keys() {
        let grouped = grouped_name("order-service", "DEFAULT");
        assert_eq!(grouped, "DEFAULT@@order-service");
        assert_eq!(service_info_key(&grouped, ""), "DEFAULT@@order-service");
        assert_eq!(
            service_info_key(&grouped, "c1,c2"),
            "DEFAULT@@order-service@@c1,c2"
        );
    }

    #[test]
    fn instance_defaults_and_validation() {
        let instance: Instance = serde_json::from_str(r#"{"ip":"10.0.0.1","port":8080}"#).unwrap();
        assert_eq!(instance, Instance::new("10.0.0.1", 8080));
        assert_eq!(instance.cluster_name, DEFAULT_CLUSTER_NAME);
        assert!(instance.validate().is_ok());

        assert!(Instance::new(" ", 80).validate().is_err());
    }

    #[test]
    fn cluster_and_metadata_serialize_camel_case() {
        let instance = Instance::new("10.0.0.1", 8080)
            .with_cluster("c1")
            .with_metadata("zone", "az-1");
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["clusterName"], "c1");
        assert_eq!(json["metadata"]["zone"], "az-1");
        assert_eq!(group_or_default(""), DEFAULT_GROUP);
        assert_eq!(group_or_default("G"), "G");
    }
}
