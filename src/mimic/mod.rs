//! Traffic mimicry.
//!
//! Overlays a front origin's template onto outgoing connection parameters so
//! the connection looks like ordinary traffic to that origin. Numeric HTTP/2
//! settings are perturbed within the tolerance on every application; a
//! bit-identical value on every connection would itself be a fingerprint.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::calibration::{
    within_tolerance, Calibrator, ProtocolParameters, Template, TemplateId, TlsParameters,
};
use crate::canonical::Value;
use crate::crypto::perturb_within;
use crate::error::{Error, Result};
use crate::registry::{ComplianceProfile, FrontOriginRegistry};

/// Connection parameters shaped after a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MimicParams {
    /// Template the parameters were shaped after
    pub template_id: TemplateId,
    /// TLS parameters, copied from the template
    pub tls: TlsParameters,
    /// HTTP/2 settings after perturbation
    pub http2_settings: BTreeMap<String, u64>,
    /// Perturbation budget applied, in percent
    pub tolerance_percent: u8,
}

impl MimicParams {
    /// View as plain protocol parameters, e.g. for a connection check.
    pub fn to_parameters(&self) -> ProtocolParameters {
        ProtocolParameters {
            tls: self.tls.clone(),
            http2_settings: self.http2_settings.clone(),
        }
    }
}

/// Result of checking parameters against a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    /// Template checked against
    pub template_id: TemplateId,
    /// Profile that decided which checks ran
    pub profile: ComplianceProfile,
    /// No issues found
    pub compliant: bool,
    /// One line per failed check
    pub issues: Vec<String>,
    /// ms since the Unix epoch
    pub checked_at: u64,
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// Applies templates to outgoing connections.
pub struct TrafficMimic {
    calibrator: Arc<Calibrator>,
    registry: Arc<FrontOriginRegistry>,
}

impl TrafficMimic {
    /// Mimic over a shared calibrator and registry.
    pub fn new(calibrator: Arc<Calibrator>, registry: Arc<FrontOriginRegistry>) -> Self {
        Self {
            calibrator,
            registry,
        }
    }

    /// Template for `id`: cached, or calibrated from the host its registry
    /// entry names.
    pub async fn resolve_template(&self, id: &TemplateId) -> Result<Template> {
        if let Some(template) = self.calibrator.find_template(id) {
            return Ok(template);
        }

        let pattern = self
            .registry
            .host_pattern(id)
            .ok_or_else(|| Error::TemplateNotFound(id.to_hex()))?;
        let host = pattern.concrete_host().ok_or_else(|| {
            Error::TemplateNotFound(format!(
                "{id}: pattern {:?} names no host to calibrate",
                pattern.as_str()
            ))
        })?;

        let template = self.calibrator.get_or_calibrate(host).await?;
        if template.template_id != *id {
            return Err(Error::TemplateNotFound(format!(
                "{id}: {host} now calibrates to {}",
                template.template_id
            )));
        }
        Ok(template)
    }

    /// Shape `params` after the template `id`.
    ///
    /// TLS fields are replaced by the template's. HTTP/2 settings named by
    /// the template take its values, each perturbed within the tolerance;
    /// settings only the caller has are kept.
    ///
    /// A kept setting is a key the template lacks, so the result then fails
    /// [`Calibrator::verify_connection`] as a structural mismatch. Pass only
    /// template settings when the output will be verified that way;
    /// [`TrafficMimic::compliance_report`] ignores extra keys.
    pub async fn apply_template(
        &self,
        id: &TemplateId,
        params: &ProtocolParameters,
    ) -> Result<MimicParams> {
        let template = self.resolve_template(id).await?;
        let tolerance_percent = self.calibrator.config().tolerance_percent;

        let mut http2_settings = params.http2_settings.clone();
        for (name, value) in &template.params.http2_settings {
            http2_settings.insert(name.clone(), perturb_within(*value, tolerance_percent));
        }

        debug!(
            template_id = %id,
            hostname = %template.hostname,
            "applied template to connection"
        );

        Ok(MimicParams {
            template_id: template.template_id,
            tls: template.params.tls.clone(),
            http2_settings,
            tolerance_percent,
        })
    }

    /// Check `params` against the cached template `id`.
    ///
    /// The profile comes from the registry entry for `id`, else STANDARD.
    pub fn compliance_report(
        &self,
        id: &TemplateId,
        params: &ProtocolParameters,
    ) -> Result<ComplianceReport> {
        let template = self
            .calibrator
            .find_template(id)
            .ok_or_else(|| Error::TemplateNotFound(id.to_hex()))?;
        let profile = self
            .registry
            .find_entry(id, None)
            .map_or(ComplianceProfile::Standard, |e| e.compliance_profile);
        let tolerance = self.calibrator.config().tolerance_percent;

        let expected = &template.params.tls;
        let actual = &params.tls;
        let mut issues = Vec::new();

        if actual.version != expected.version {
            issues.push(format!(
                "TLS version mismatch: expected {}, got {}",
                expected.version, actual.version
            ));
        }
        if !same_set(&actual.cipher_suites, &expected.cipher_suites) {
            issues.push("cipher suite set mismatch".to_string());
        }

        if profile != ComplianceProfile::Minimal {
            if actual.extensions != expected.extensions {
                issues.push("TLS extension order mismatch".to_string());
            }
            if actual.alpn != expected.alpn {
                issues.push("ALPN mismatch".to_string());
            }
        }

        if profile == ComplianceProfile::Extended {
            if !same_set(&actual.supported_groups, &expected.supported_groups) {
                issues.push("supported groups mismatch".to_string());
            }
            if !same_set(&actual.signature_algorithms, &expected.signature_algorithms) {
                issues.push("signature algorithms mismatch".to_string());
            }
            for (name, want) in &template.params.http2_settings {
                match params.http2_settings.get(name) {
                    None => issues.push(format!("HTTP/2 {name} missing")),
                    Some(got) => {
                        if !within_tolerance(&Value::from(*want), &Value::from(*got), tolerance) {
                            issues.push(format!(
                                "HTTP/2 {name} outside tolerance: expected {want}±{tolerance}%, got {got}"
                            ));
                        }
                    }
                }
            }
        }

        Ok(ComplianceReport {
            template_id: *id,
            profile,
            compliant: issues.is_empty(),
            issues,
            checked_at: crate::now_millis(),
        })
    }
}
