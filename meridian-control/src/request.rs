use crate::monitor_key::MonitorKey;
use serde::{Deserialize, Serialize};

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An inbound operation asking to pass a tps point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpsCheckRequest {
    pub connection_id: Option<String>,
    pub client_ip: Option<String>,
    pub monitor_keys: Vec<MonitorKey>,
    pub timestamp: i64,
    pub count: i64,
}

impl Default for TpsCheckRequest {
    fn default() -> Self {
        Self {
            connection_id: None,
            client_ip: None,
            monitor_keys: Vec::new(),
            timestamp: now_millis(),
            count: 1,
        }
    }
}

impl TpsCheckRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_monitor_key(mut self, key: MonitorKey) -> Self {
        self.monitor_keys.push(key);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Monitor keys a keyed rule may match: the request's own keys plus a
    /// client ip key when one was only given as `client_ip`. Connection ids
    /// identify the caller and never take part in matching.
    pub fn rate_keys(&self) -> Vec<MonitorKey> {
        let mut keys: Vec<MonitorKey> = self
            .monitor_keys
            .iter()
            .filter(|key| !key.is_connection_id())
            .cloned()
            .collect();

        if let Some(ip) = self.client_ip.as_deref().filter(|ip| !ip.trim().is_empty())
            && !keys.iter().any(MonitorKey::is_client_ip)
        {
            keys.push(MonitorKey::client_ip(ip));
        }

        keys
    }

    pub fn connection_label(&self) -> &str {
        self.connection_id
            .as_deref()
            .or_else(|| {
                self.monitor_keys
                    .iter()
                    .find(|key| key.is_connection_id())
                    .map(|key| key.key.as_str())
            })
            .unwrap_or("-")
    }

    pub fn client_ip_label(&self) -> &str {
        self.client_ip.as_deref().unwrap_or("-")
    }
}

/// The slice of a [`TpsCheckRequest`] one rule barrier evaluates.
#[derive(Debug, Clone)]
pub struct BarrierCheckRequest {
    pub point_name: String,
    pub monitor_key: Option<MonitorKey>,
    pub timestamp: i64,
    pub count: i64,
}

impl BarrierCheckRequest {
    pub fn new(point_name: impl Into<String>, timestamp: i64, count: i64) -> Self {
        Self {
            point_name: point_name.into(),
            monitor_key: None,
            timestamp,
            count,
        }
    }

    pub fn with_monitor_key(mut self, key: MonitorKey) -> Self {
        self.monitor_key = Some(key);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TpsResultCode {
    CheckPass,
    CheckSkip,
    PassByMonitor,
    CheckDeny,
    DenyByPattern,
    DenyByPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpsCheckResponse {
    pub success: bool,
    pub code: TpsResultCode,
    pub message: String,
}

impl TpsCheckResponse {
    pub fn new(success: bool, code: TpsResultCode, message: impl Into<String>) -> Self {
        Self {
            success,
            code,
            message: message.into(),
        }
    }

    pub fn pass() -> Self {
        Self::new(true, TpsResultCode::CheckPass, "")
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(true, TpsResultCode::CheckSkip, message)
    }
}
