//! Proxy endpoint configuration.
//!
//! Describes where the proxy listens, as far as URL encoding is concerned:
//! the hostname and scheme every proxy URL carries, and the two ports that
//! give the proxy two distinct real origins.

use crate::error::{Result, VeneerError};
use serde::{Deserialize, Serialize};

/// Scheme of the proxy endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
}

impl ProxyProtocol {
    /// Scheme for document and subresource requests.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
        }
    }

    /// Scheme for WebSocket requests.
    #[must_use]
    pub fn web_socket_scheme(self) -> &'static str {
        match self {
            ProxyProtocol::Http => "ws",
            ProxyProtocol::Https => "wss",
        }
    }
}

/// Configuration for the proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Hostname of the proxy (default: localhost)
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Scheme the proxy is reached with (default: http)
    #[serde(default)]
    pub protocol: ProxyProtocol,

    /// Port serving the primary origin (default: 1337)
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,

    /// Port emulating a second origin for cross-domain frames (default: 1338)
    #[serde(default = "default_cross_domain_port")]
    pub cross_domain_port: u16,

    /// Charset written into proxy URLs when a descriptor does not name one.
    #[serde(default)]
    pub charset: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            protocol: ProxyProtocol::default(),
            primary_port: default_primary_port(),
            cross_domain_port: default_cross_domain_port(),
            charset: None,
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_primary_port() -> u16 {
    1337
}

fn default_cross_domain_port() -> u16 {
    1338
}

impl ProxyConfig {
    /// Check the configuration for values the codec cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty()
            || self
                .hostname
                .chars()
                .any(|c| matches!(c, '/' | '?' | '#' | '@' | ':' | ' '))
        {
            return Err(VeneerError::Config(format!(
                "hostname {:?} is not a valid host",
                self.hostname
            )));
        }
        if self.primary_port == 0 || self.cross_domain_port == 0 {
            return Err(VeneerError::Config("proxy ports must be non-zero".into()));
        }
        if self.primary_port == self.cross_domain_port {
            return Err(VeneerError::Config(format!(
                "primary and cross-domain ports must differ (both {})",
                self.primary_port
            )));
        }
        if let Some(ref charset) = self.charset {
            if charset.is_empty() || charset.contains(['!', '/']) {
                return Err(VeneerError::Config(format!(
                    "charset {:?} cannot be embedded in a proxy URL",
                    charset
                )));
            }
        }
        Ok(())
    }

    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ProxyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.protocol, ProxyProtocol::Http);
        assert_eq!(config.primary_port, 1337);
        assert_eq!(config.cross_domain_port, 1338);
        assert!(config.charset.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProxyConfig::from_json(r#"{"primary_port": 2000, "cross_domain_port": 2001}"#)
            .unwrap();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.primary_port, 2000);
        assert_eq!(config.cross_domain_port, 2001);
    }

    #[test]
    fn test_config_serialization() {
        let config = ProxyConfig {
            protocol: ProxyProtocol::Https,
            charset: Some("utf-8".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"https\""));
        let restored = ProxyConfig::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_validate_rejects_equal_ports() {
        let config = ProxyConfig {
            cross_domain_port: 1337,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VeneerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_hostname() {
        let config = ProxyConfig {
            hostname: "proxy:80".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
