//! Proxy data models

use anyhow::bail;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Latency sentinel for a record that has never been probed
pub const LATENCY_UNMEASURED: i64 = -1;

/// Proxy protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Parse a kind token from a list file, falling back to HTTP for
    /// unknown names.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            _ => bail!("Invalid proxy type: {}. Use: http, https, socks4, socks5", s),
        }
    }
}

/// A single proxy endpoint together with the outcome of its latest check.
///
/// Identity is the host/port/kind triple; the check-outcome fields do not
/// participate in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub kind: ProxyType,
    pub valid: bool,
    pub latency_ms: i64,
    pub error_message: Option<String>,
    pub last_checked: Option<DateTime<Local>>,
    pub anonymous: bool,
}

impl ProxyRecord {
    /// Create an unchecked record.
    pub fn new(host: String, port: u16, kind: ProxyType) -> Self {
        Self {
            host,
            port,
            kind,
            valid: false,
            latency_ms: LATENCY_UNMEASURED,
            error_message: None,
            last_checked: None,
            anonymous: false,
        }
    }

    /// The `host:port` pair, also used as the dedup key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `kind://host:port` form used to build proxy URLs.
    pub fn full_address(&self) -> String {
        format!("{}://{}:{}", self.kind, self.host, self.port)
    }

    /// The `host:port:kind` line written to list files.
    pub fn to_file_format(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.kind)
    }

    /// Human-readable outcome of the latest check.
    pub fn status_string(&self) -> String {
        if self.valid {
            if self.anonymous {
                format!("VALID ({}ms, anonymous)", self.latency_ms)
            } else {
                format!("VALID ({}ms)", self.latency_ms)
            }
        } else {
            match &self.error_message {
                Some(error) => format!("INVALID ({})", error),
                None => "INVALID".to_string(),
            }
        }
    }
}

impl PartialEq for ProxyRecord {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.kind == other.kind
    }
}

impl Eq for ProxyRecord {}

impl Hash for ProxyRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation_defaults() {
        let record = ProxyRecord::new("127.0.0.1".to_string(), 8080, ProxyType::Http);
        assert_eq!(record.host, "127.0.0.1");
        assert_eq!(record.port, 8080);
        assert_eq!(record.kind, ProxyType::Http);
        assert!(!record.valid);
        assert_eq!(record.latency_ms, LATENCY_UNMEASURED);
        assert!(record.error_message.is_none());
        assert!(record.last_checked.is_none());
        assert!(!record.anonymous);
    }

    #[test]
    fn test_record_addresses() {
        let record = ProxyRecord::new("10.0.0.1".to_string(), 1080, ProxyType::Socks5);
        assert_eq!(record.address(), "10.0.0.1:1080");
        assert_eq!(record.full_address(), "socks5://10.0.0.1:1080");
        assert_eq!(record.to_file_format(), "10.0.0.1:1080:socks5");
    }

    #[test]
    fn test_record_equality_is_identity_only() {
        let mut a = ProxyRecord::new("1.2.3.4".to_string(), 80, ProxyType::Http);
        let b = ProxyRecord::new("1.2.3.4".to_string(), 80, ProxyType::Http);
        a.valid = true;
        a.latency_ms = 120;
        a.error_message = Some("stale".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_record_equality_kind_matters() {
        let a = ProxyRecord::new("1.2.3.4".to_string(), 80, ProxyType::Http);
        let b = ProxyRecord::new("1.2.3.4".to_string(), 80, ProxyType::Socks5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_proxy_type_from_str() {
        assert_eq!("HTTP".parse::<ProxyType>().unwrap(), ProxyType::Http);
        assert_eq!("Socks4".parse::<ProxyType>().unwrap(), ProxyType::Socks4);
        assert_eq!("socks5".parse::<ProxyType>().unwrap(), ProxyType::Socks5);
        assert!("ftp".parse::<ProxyType>().is_err());
    }

    #[test]
    fn test_proxy_type_from_name_falls_back_to_http() {
        assert_eq!(ProxyType::from_name("https"), ProxyType::Https);
        assert_eq!(ProxyType::from_name("gopher"), ProxyType::Http);
    }

    #[test]
    fn test_status_string() {
        let mut record = ProxyRecord::new("1.2.3.4".to_string(), 80, ProxyType::Http);
        record.error_message = Some("Connection failed: refused".to_string());
        assert_eq!(record.status_string(), "INVALID (Connection failed: refused)");

        record.valid = true;
        record.error_message = None;
        record.latency_ms = 42;
        assert_eq!(record.status_string(), "VALID (42ms)");

        record.anonymous = true;
        assert_eq!(record.status_string(), "VALID (42ms, anonymous)");
    }
}
