use serde::{Deserialize, Serialize};
use std::fmt;

pub const CLIENT_IP_KIND: &str = "clientIp";
pub const CONNECTION_ID_KIND: &str = "connectionId";
pub const ALL_PATTERN: &str = "*";

/// A dimension a keyed rule can match against, rendered as `<kind>:<key>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    pub kind: String,
    pub key: String,
}

impl MonitorKey {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn client_ip(ip: impl Into<String>) -> Self {
        Self::new(CLIENT_IP_KIND, ip)
    }

    pub fn connection_id(connection_id: impl Into<String>) -> Self {
        Self::new(CONNECTION_ID_KIND, connection_id)
    }

    pub fn is_connection_id(&self) -> bool {
        self.kind == CONNECTION_ID_KIND
    }

    pub fn is_client_ip(&self) -> bool {
        self.kind == CLIENT_IP_KIND
    }

    pub fn build(&self) -> String {
        format!("{}:{}", self.kind, self.key)
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Fuzzy,
    NoMatch,
}

impl MatchType {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchType::NoMatch)
    }
}

pub fn is_exact_pattern(pattern: &str) -> bool {
    !pattern.contains(ALL_PATTERN)
}

/// Matches a built monitor key against a pattern where `*` stands for any run
/// of characters.
pub fn match_pattern(pattern: &str, monitor_key: &str) -> MatchType {
    if pattern.is_empty() {
        return MatchType::NoMatch;
    }

    if is_exact_pattern(pattern) {
        return if pattern == monitor_key {
            MatchType::Exact
        } else {
            MatchType::NoMatch
        };
    }

    if wildcard_match(pattern.as_bytes(), monitor_key.as_bytes()) {
        MatchType::Fuzzy
    } else {
        MatchType::NoMatch
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            p += 1;
            resume = t;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|byte| *byte == b'*')
}
