//! Runtime configuration and its TOML file format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{Error, Result};

/// Calibration settings.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Paths probed in order until one succeeds
    pub paths: Vec<String>,
    /// Front origin port
    pub port: u16,
    /// Deadline for a single probe
    pub probe_timeout: Duration,
    /// How long a calibrated template stays valid
    pub cache_ttl: Duration,
    /// Allowed numeric deviation, in percent
    pub tolerance_percent: u8,
    /// Alert history length
    pub max_alerts: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            paths: vec!["/robots.txt".into(), "/favicon.ico".into()],
            port: 443,
            probe_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            tolerance_percent: 10,
            max_alerts: 1024,
        }
    }
}

impl CalibrationConfig {
    /// Template lifetime in milliseconds.
    pub fn cache_ttl_ms(&self) -> u64 {
        self.cache_ttl.as_millis() as u64
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(Error::config("at least one calibration path must be configured"));
        }
        if let Some(path) = self.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::config(format!("calibration path {path:?} must start with '/'")));
        }
        if self.port == 0 {
            return Err(Error::config("port cannot be 0"));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::config("probe_timeout cannot be zero"));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::config("cache_ttl cannot be zero"));
        }
        if self.tolerance_percent > 100 {
            return Err(Error::config("tolerance_percent cannot exceed 100"));
        }
        if self.max_alerts == 0 {
            return Err(Error::config("max_alerts cannot be 0"));
        }
        Ok(())
    }
}

/// Front origin registry settings.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Keys allowed to sign registry entries
    pub trusted_signers: Vec<PublicKey>,
}

impl RegistryConfig {
    /// Trust an additional signer.
    pub fn add_signer(&mut self, key: PublicKey) {
        if !self.trusted_signers.contains(&key) {
            self.trusted_signers.push(key);
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct CloakConfig {
    /// Calibration settings
    pub calibration: CalibrationConfig,
    /// Registry settings
    pub registry: RegistryConfig,
}

impl CloakConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.calibration.validate()
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct CloakConfigFile {
    /// Calibration paths
    pub calibration_paths: Vec<String>,
    /// Front origin port
    pub port: u16,
    /// Probe deadline (seconds)
    pub probe_timeout_secs: u64,
    /// Template lifetime (seconds)
    pub cache_ttl_secs: u64,
    /// Allowed numeric deviation (percent)
    pub tolerance_percent: u8,
    /// Alert history length
    pub max_alerts: usize,
    /// Trusted registry signers (base64)
    #[serde(default)]
    pub trusted_signers_b64: Vec<String>,
}

impl CloakConfigFile {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid config file: {e}")))
    }

    /// Render as TOML text.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<CloakConfig> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let mut registry = RegistryConfig::default();
        for encoded in &self.trusted_signers_b64 {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| Error::config(format!("invalid base64 signer: {e}")))?;
            let key = PublicKey::from_bytes(&bytes)
                .map_err(|e| Error::config(format!("invalid signer key: {e}")))?;
            registry.add_signer(key);
        }

        let config = CloakConfig {
            calibration: CalibrationConfig {
                paths: self.calibration_paths.clone(),
                port: self.port,
                probe_timeout: Duration::from_secs(self.probe_timeout_secs),
                cache_ttl: Duration::from_secs(self.cache_ttl_secs),
                tolerance_percent: self.tolerance_percent,
                max_alerts: self.max_alerts,
            },
            registry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &CloakConfig) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let calibration = &config.calibration;
        Self {
            calibration_paths: calibration.paths.clone(),
            port: calibration.port,
            probe_timeout_secs: calibration.probe_timeout.as_secs(),
            cache_ttl_secs: calibration.cache_ttl.as_secs(),
            tolerance_percent: calibration.tolerance_percent,
            max_alerts: calibration.max_alerts,
            trusted_signers_b64: config
                .registry
                .trusted_signers
                .iter()
                .map(|k| STANDARD.encode(k.as_bytes()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningSecret;

    #[test]
    fn test_defaults() {
        let config = CloakConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calibration.paths, vec!["/robots.txt", "/favicon.ico"]);
        assert_eq!(config.calibration.cache_ttl_ms(), 86_400_000);
        assert_eq!(config.calibration.tolerance_percent, 10);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = CloakConfig::default();
        config.calibration.port = 8443;
        config.registry.add_signer(SigningSecret::random().public_key());

        let text = CloakConfigFile::from_config(&config).to_toml().unwrap();
        let restored = CloakConfigFile::from_toml(&text).unwrap().to_config().unwrap();

        assert_eq!(restored.calibration.port, 8443);
        assert_eq!(restored.calibration.paths, config.calibration.paths);
        assert_eq!(restored.calibration.probe_timeout, config.calibration.probe_timeout);
        assert_eq!(restored.registry.trusted_signers, config.registry.trusted_signers);
    }

    #[test]
    fn test_validation() {
        let mut config = CalibrationConfig::default();
        config.paths.clear();
        assert!(config.validate().is_err());

        let mut config = CalibrationConfig::default();
        config.paths = vec!["robots.txt".into()];
        assert!(config.validate().is_err());

        let mut config = CalibrationConfig::default();
        config.tolerance_percent = 101;
        assert!(config.validate().is_err());

        let mut file = CloakConfigFile::from_config(&CloakConfig::default());
        file.trusted_signers_b64 = vec!["not base64!".into()];
        assert!(matches!(file.to_config(), Err(Error::Config(_))));
    }
}
