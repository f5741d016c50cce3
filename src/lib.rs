//! # dkcloak
//!
//! Verifiable identity and traffic cloaking without a certificate authority.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Traffic Mimic (template overlay, compliance reports)   │
//! ├─────────────────────────────────────────────────────────┤
//! │  Calibration (probes, TemplateID, cache, MITM alerts)   │
//! │  Front Origin Registry (signed entries, overrides)      │
//! ├─────────────────────────────────────────────────────────┤
//! │  Self-Certifying Identity (Ed25519, dk1: names, claims) │
//! ├─────────────────────────────────────────────────────────┤
//! │  Canonical Encoding (deterministic CBOR subset)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every byte string that is hashed or signed comes from the canonical
//! encoder, so equal values always produce equal signatures and
//! fingerprints.
//!
//! ## Design Goals
//!
//! 1. **No authority**: an identity is its public key; its name is checkable offline
//! 2. **No ambiguity**: exactly one valid encoding per value, strictly decoded
//! 3. **Blend in**: outgoing connections follow a real front origin's behavior
//! 4. **Notice interference**: fingerprint drift raises alerts with a diff

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod calibration;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod mimic;
pub mod registry;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

pub use calibration::{
    Calibrator, Prober, ProtocolParameters, SimulatedProber, Template, TemplateChangeAlert,
    TemplateId,
};
pub use config::{CalibrationConfig, CloakConfig, CloakConfigFile, RegistryConfig};
pub use error::{DecodeError, Error, Result};
pub use identity::{Claim, ClaimStatus, Identity, IdentityManager, NodeId};
pub use mimic::{ComplianceReport, MimicParams, TrafficMimic};
pub use registry::{ComplianceProfile, Decision, FrontOriginRegistry, RegistryEntry};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The process-wide stores, wired together.
pub struct Cloak {
    identities: Arc<IdentityManager>,
    calibrator: Arc<Calibrator>,
    registry: Arc<FrontOriginRegistry>,
    mimic: TrafficMimic,
}

impl Cloak {
    /// Build from validated configuration and a probe implementation.
    pub fn new(config: CloakConfig, prober: Arc<dyn Prober>) -> Result<Self> {
        config.validate()?;

        let identities = Arc::new(IdentityManager::new());
        let calibrator = Arc::new(Calibrator::new(config.calibration, prober));
        let registry = Arc::new(FrontOriginRegistry::new(&config.registry));
        let mimic = TrafficMimic::new(calibrator.clone(), registry.clone());

        Ok(Self {
            identities,
            calibrator,
            registry,
            mimic,
        })
    }

    /// Offline instance backed by [`SimulatedProber`].
    pub fn simulated(config: CloakConfig) -> Result<Self> {
        Self::new(config, Arc::new(SimulatedProber::new()))
    }

    /// Identity store.
    pub fn identities(&self) -> &Arc<IdentityManager> {
        &self.identities
    }

    /// Template calibrator.
    pub fn calibrator(&self) -> &Arc<Calibrator> {
        &self.calibrator
    }

    /// Front origin registry.
    pub fn registry(&self) -> &Arc<FrontOriginRegistry> {
        &self.registry
    }

    /// Traffic mimic.
    pub fn mimic(&self) -> &TrafficMimic {
        &self.mimic
    }

    /// Discard private keys, cached fingerprints, alerts and registry entries.
    pub fn emergency_wipe(&self) {
        self.identities.wipe();
        self.calibrator.clear();
        self.registry.clear();
        warn!("emergency wipe completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis() {
        let now = now_millis();
        // After 2020-01-01
        assert!(now > 1_577_836_800_000);
        assert!(now_millis() >= now);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = CloakConfig::default();
        config.calibration.paths.clear();
        assert!(matches!(Cloak::simulated(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_emergency_wipe() {
        let cloak = Cloak::simulated(CloakConfig::default()).unwrap();

        let identity = cloak.identities().create_identity(Some("ops"));
        let template = cloak.calibrator().calibrate("front.test").await.unwrap();
        cloak
            .registry()
            .add_entry(RegistryEntry::new(
                template.template_id,
                "front.test",
                ComplianceProfile::Standard,
                now_millis() + 60_000,
            ))
            .unwrap();
        assert!(cloak.registry().is_allowed(&template.template_id, Some("front.test")).allowed);

        cloak.emergency_wipe();

        assert_eq!(cloak.identities().count(), 0);
        assert!(cloak.identities().get(identity.name()).is_err());
        assert!(cloak.calibrator().template("front.test").is_none());
        assert!(cloak.registry().is_empty());
        assert!(!cloak.registry().is_allowed(&template.template_id, None).allowed);
    }

    #[tokio::test]
    async fn test_end_to_end_signed_front_origin() {
        let cloak = Cloak::simulated(CloakConfig::default()).unwrap();
        let operator = cloak.identities().create_identity(Some("operator"));
        cloak.registry().add_signer(*operator.public_key());

        let template = cloak.calibrator().calibrate("www.front.test").await.unwrap();
        let entry = RegistryEntry::new(
            template.template_id,
            "*.front.test",
            ComplianceProfile::Extended,
            now_millis() + 60_000,
        )
        .sign(&operator)
        .unwrap();
        cloak.registry().add_entry(entry).unwrap();

        let decision = cloak
            .registry()
            .is_allowed(&template.template_id, Some("www.front.test"));
        assert!(decision.allowed);

        let shaped = cloak
            .mimic()
            .apply_template(&template.template_id, &ProtocolParameters::default())
            .await
            .unwrap();
        let report = cloak
            .mimic()
            .compliance_report(&template.template_id, &shaped.to_parameters())
            .unwrap();
        assert!(report.compliant);
    }
}
