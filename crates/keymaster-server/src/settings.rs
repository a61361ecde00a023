//! Process settings read from the environment

use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

use crate::service::nonces::DEFAULT_NONCE_TTL;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Settings for one issuer process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Resource reference to the JSON config snapshot
    pub config_uri: String,
    pub port: u16,
    pub log_level: Level,
    pub nonce_ttl: Duration,
    /// Account used to expand bare role names
    pub aws_account_id: Option<String>,
    pub sts_endpoint: Option<String>,
    pub kms_endpoint: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl ServerSettings {
    /// Read settings from the process environment
    ///
    /// - `KEYMASTER_CONFIG` (required): file path or resource URI
    /// - `KEYMASTER_PORT` (default 8080)
    /// - `KEYMASTER_LOG_LEVEL` (default info)
    /// - `KEYMASTER_NONCE_TTL_SECONDS` (default 900)
    /// - `KEYMASTER_AWS_ACCOUNT_ID`
    /// - `KM_STS_ENDPOINT`, `KM_KMS_ENDPOINT`, `KM_S3_ENDPOINT`
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let config = var("KEYMASTER_CONFIG").ok_or(SettingsError::Missing("KEYMASTER_CONFIG"))?;
        let config_uri = if config.contains("://") {
            config
        } else {
            format!("file://{}", config)
        };

        let port = match var("KEYMASTER_PORT") {
            Some(value) => value.parse().map_err(|_| SettingsError::Invalid {
                name: "KEYMASTER_PORT",
                value,
            })?,
            None => 8080,
        };

        let log_level = var("KEYMASTER_LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        let nonce_ttl = match var("KEYMASTER_NONCE_TTL_SECONDS") {
            Some(value) => match value.parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => {
                    return Err(SettingsError::Invalid {
                        name: "KEYMASTER_NONCE_TTL_SECONDS",
                        value,
                    })
                }
            },
            None => DEFAULT_NONCE_TTL,
        };

        Ok(Self {
            config_uri,
            port,
            log_level,
            nonce_ttl,
            aws_account_id: var("KEYMASTER_AWS_ACCOUNT_ID"),
            sts_endpoint: var("KM_STS_ENDPOINT"),
            kms_endpoint: var("KM_KMS_ENDPOINT"),
            s3_endpoint: var("KM_S3_ENDPOINT"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<ServerSettings, SettingsError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("KEYMASTER_CONFIG", "/etc/keymaster/config.json")]).unwrap();
        assert_eq!(s.config_uri, "file:///etc/keymaster/config.json");
        assert_eq!(s.port, 8080);
        assert_eq!(s.log_level, Level::INFO);
        assert_eq!(s.nonce_ttl, DEFAULT_NONCE_TTL);
        assert_eq!(s.aws_account_id, None);
        assert_eq!(s.sts_endpoint, None);
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("KEYMASTER_CONFIG", "s3://config-bucket/nonprod.json"),
            ("KEYMASTER_PORT", "9000"),
            ("KEYMASTER_LOG_LEVEL", "debug"),
            ("KEYMASTER_NONCE_TTL_SECONDS", "60"),
            ("KEYMASTER_AWS_ACCOUNT_ID", "062921715532"),
            ("KM_STS_ENDPOINT", "http://localhost:4566"),
        ])
        .unwrap();
        assert_eq!(s.config_uri, "s3://config-bucket/nonprod.json");
        assert_eq!(s.port, 9000);
        assert_eq!(s.log_level, Level::DEBUG);
        assert_eq!(s.nonce_ttl, Duration::from_secs(60));
        assert_eq!(s.aws_account_id.as_deref(), Some("062921715532"));
        assert_eq!(s.sts_endpoint.as_deref(), Some("http://localhost:4566"));
    }

    #[test]
    fn test_config_required() {
        assert_eq!(settings(&[]), Err(SettingsError::Missing("KEYMASTER_CONFIG")));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            settings(&[("KEYMASTER_CONFIG", "c.json"), ("KEYMASTER_PORT", "eighty")]),
            Err(SettingsError::Invalid { name: "KEYMASTER_PORT", .. })
        ));
        assert!(matches!(
            settings(&[("KEYMASTER_CONFIG", "c.json"), ("KEYMASTER_NONCE_TTL_SECONDS", "0")]),
            Err(SettingsError::Invalid { name: "KEYMASTER_NONCE_TTL_SECONDS", .. })
        ));
    }
}
