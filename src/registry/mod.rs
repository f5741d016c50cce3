//! Front origin registry.
//!
//! Maps template IDs to the hosts they may be used for, under a compliance
//! profile and an expiry. Entries may be countersigned by a trusted key; the
//! signature covers
//!
//! ```text
//! "BN-FOR1" || canonical({templateId, hostPattern, complianceProfile, expiry})
//! ```
//!
//! Lookups resolve local overrides first, then the registry, and deny
//! everything else.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::TemplateId;
use crate::canonical::{self, Value};
use crate::config::RegistryConfig;
use crate::crypto::{self, PublicKey, Signature};
use crate::error::{Error, Result};
use crate::identity::Identity;

/// Domain separator for entry signatures
const SIGNATURE_CONTEXT: &[u8] = b"BN-FOR1";

/// Persistence format version
const REGISTRY_FORMAT_VERSION: u64 = 1;

/// How strictly traffic must follow its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceProfile {
    /// Protocol version and cipher suites
    Minimal,
    /// Adds extension order and ALPN
    Standard,
    /// Adds groups, signature algorithms and HTTP/2 settings
    Extended,
}

impl ComplianceProfile {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceProfile::Minimal => "MINIMAL",
            ComplianceProfile::Standard => "STANDARD",
            ComplianceProfile::Extended => "EXTENDED",
        }
    }
}

impl FromStr for ComplianceProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MINIMAL" => Ok(ComplianceProfile::Minimal),
            "STANDARD" => Ok(ComplianceProfile::Standard),
            "EXTENDED" => Ok(ComplianceProfile::Extended),
            other => Err(Error::InvalidComplianceProfile(other.to_owned())),
        }
    }
}

impl fmt::Display for ComplianceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hostname glob where `*` matches any run of characters.
#[derive(Debug, Clone)]
pub struct HostPattern {
    pattern: String,
    regex: Regex,
}

impl HostPattern {
    /// Compile a glob where `*` matches any run of characters.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::MissingField("hostPattern"));
        }

        let translated = regex::escape(pattern).replace(r"\*", ".*");
        let regex = RegexBuilder::new(&format!("^{translated}$"))
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
            .map_err(|_| Error::InvalidHostPattern(pattern.to_owned()))?;

        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// Whether `hostname` matches, ignoring case.
    pub fn matches(&self, hostname: &str) -> bool {
        self.regex.is_match(hostname)
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// A concrete host named by the pattern, usable for calibration.
    ///
    /// `www.example.com` names itself; `*.example.com` names `example.com`;
    /// `*` names nothing.
    pub fn concrete_host(&self) -> Option<&str> {
        if !self.pattern.contains('*') {
            return Some(&self.pattern);
        }
        self.pattern
            .split('*')
            .map(|part| part.trim_matches('.'))
            .find(|part| !part.is_empty() && part.contains('.'))
    }
}

/// An approved front origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Template this entry approves
    pub template_id: TemplateId,
    /// Glob of hosts the approval covers
    pub host_pattern: String,
    /// How strictly traffic must follow the template
    pub compliance_profile: ComplianceProfile,
    /// Expiry, ms since the Unix epoch
    pub expiry: u64,
    /// Signature over the `BN-FOR1` pre-image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Key that made `signature`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<PublicKey>,
}

impl RegistryEntry {
    /// An unsigned entry.
    pub fn new(
        template_id: TemplateId,
        host_pattern: impl Into<String>,
        compliance_profile: ComplianceProfile,
        expiry: u64,
    ) -> Self {
        Self {
            template_id,
            host_pattern: host_pattern.into(),
            compliance_profile,
            expiry,
            signature: None,
            signer: None,
        }
    }

    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let payload = Value::map([
            ("templateId", Value::bytes(self.template_id.as_bytes().to_vec())),
            ("hostPattern", Value::from(self.host_pattern.as_str())),
            ("complianceProfile", Value::from(self.compliance_profile.as_str())),
            ("expiry", Value::from(self.expiry)),
        ]);

        let mut bytes = SIGNATURE_CONTEXT.to_vec();
        bytes.extend_from_slice(&canonical::encode(&payload));
        bytes
    }

    /// Countersign with `identity`, which must hold its private key.
    pub fn sign(mut self, identity: &Identity) -> Result<Self> {
        let signature = identity.sign(&self.signing_bytes())?;
        self.signature = Some(signature);
        self.signer = Some(*identity.public_key());
        Ok(self)
    }

    /// Whether a signature and signer are present.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry
    }

    /// Canonical record used for export.
    pub fn to_value(&self) -> Value {
        let mut fields = vec![
            ("templateId", Value::bytes(self.template_id.as_bytes().to_vec())),
            ("hostPattern", Value::from(self.host_pattern.as_str())),
            ("complianceProfile", Value::from(self.compliance_profile.as_str())),
            ("expiry", Value::from(self.expiry)),
        ];
        if let Some(signature) = &self.signature {
            fields.push(("signature", Value::bytes(signature.as_bytes().to_vec())));
        }
        if let Some(signer) = &self.signer {
            fields.push(("signer", Value::bytes(signer.as_bytes().to_vec())));
        }
        Value::map(fields)
    }

    /// Rebuild from [`RegistryEntry::to_value`] output.
    pub fn from_value(value: &Value) -> Result<Self> {
        let signature = value
            .get("signature")
            .map(|v| {
                v.as_bytes()
                    .ok_or_else(|| Error::unexpected("signature"))
                    .and_then(Signature::from_bytes)
            })
            .transpose()?;
        let signer = value
            .get("signer")
            .map(|v| {
                v.as_bytes()
                    .ok_or_else(|| Error::unexpected("signer"))
                    .and_then(PublicKey::from_bytes)
            })
            .transpose()?;

        Ok(Self {
            template_id: TemplateId::from_bytes(value.bytes_field("templateId")?)?,
            host_pattern: value.text_field("hostPattern")?.to_owned(),
            compliance_profile: value.text_field("complianceProfile")?.parse()?,
            expiry: value.u64_field("expiry")?,
            signature,
            signer,
        })
    }
}

/// Which rule decided an [`FrontOriginRegistry::is_allowed`] query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// An operator override
    LocalOverride,
    /// A registry entry matched
    Registry,
    /// Nothing matched
    DefaultDeny,
}

impl DecisionSource {
    /// Snake-case name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::LocalOverride => "local_override",
            DecisionSource::Registry => "registry",
            DecisionSource::DefaultDeny => "default_deny",
        }
    }
}

/// Result of an allow check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the template may be used
    pub allowed: bool,
    /// Rule that decided
    pub source: DecisionSource,
    /// Matching entry, when the registry decided
    pub entry: Option<RegistryEntry>,
}

/// Listing view of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    /// Approved template
    pub template_id: TemplateId,
    /// Glob of hosts
    pub host_pattern: String,
    /// Required compliance profile
    pub compliance_profile: ComplianceProfile,
    /// ms since the Unix epoch
    pub expiry: u64,
    /// ms since the Unix epoch
    pub added: u64,
    /// Whether the entry carries a signature
    pub signed: bool,
}

struct StoredEntry {
    entry: RegistryEntry,
    pattern: HostPattern,
    added: u64,
}

#[derive(Debug, Clone, Copy)]
struct LocalOverride {
    allowed: bool,
    set_at: u64,
}

/// Registry of approved front origins.
pub struct FrontOriginRegistry {
    entries: RwLock<HashMap<TemplateId, StoredEntry>>,
    signers: RwLock<HashSet<PublicKey>>,
    overrides: RwLock<HashMap<TemplateId, LocalOverride>>,
}

impl FrontOriginRegistry {
    /// Create a registry trusting `config`'s signers.
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            signers: RwLock::new(config.trusted_signers.iter().copied().collect()),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Trust `key` to sign entries.
    pub fn add_signer(&self, key: PublicKey) {
        self.signers.write().insert(key);
    }

    /// Stop trusting `key`. Returns whether it was trusted.
    pub fn remove_signer(&self, key: &PublicKey) -> bool {
        self.signers.write().remove(key)
    }

    /// Whether `key` may sign entries.
    pub fn is_trusted_signer(&self, key: &PublicKey) -> bool {
        self.signers.read().contains(key)
    }

    /// Validate an entry and compile its pattern.
    fn admit(&self, entry: &RegistryEntry, now: u64) -> Result<HostPattern> {
        if entry.template_id.is_zero() {
            return Err(Error::MissingField("templateId"));
        }
        if entry.host_pattern.is_empty() {
            return Err(Error::MissingField("hostPattern"));
        }
        if entry.expiry == 0 {
            return Err(Error::MissingField("expiry"));
        }
        if entry.is_expired_at(now) {
            return Err(Error::EntryExpired);
        }

        match (&entry.signature, &entry.signer) {
            (None, None) => {}
            (Some(_), None) => return Err(Error::MissingField("signer")),
            (None, Some(_)) => return Err(Error::MissingField("signature")),
            (Some(signature), Some(signer)) => {
                if !self.is_trusted_signer(signer) {
                    return Err(Error::UntrustedSigner);
                }
                if !crypto::verify(signature, &entry.signing_bytes(), signer) {
                    return Err(Error::InvalidSignature);
                }
            }
        }

        HostPattern::new(&entry.host_pattern)
    }

    /// Admit an entry, replacing any entry for the same template ID.
    pub fn add_entry(&self, entry: RegistryEntry) -> Result<()> {
        self.add_entry_at(entry, crate::now_millis())
    }

    /// [`FrontOriginRegistry::add_entry`] at an explicit time.
    pub fn add_entry_at(&self, entry: RegistryEntry, now: u64) -> Result<()> {
        let pattern = match self.admit(&entry, now) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!(
                    template_id = %entry.template_id,
                    host_pattern = %entry.host_pattern,
                    error = %e,
                    "registry entry rejected"
                );
                return Err(e);
            }
        };

        info!(
            template_id = %entry.template_id,
            host_pattern = %entry.host_pattern,
            profile = %entry.compliance_profile,
            signed = entry.is_signed(),
            "registry entry added"
        );

        self.entries.write().insert(
            entry.template_id,
            StoredEntry {
                entry,
                pattern,
                added: now,
            },
        );
        Ok(())
    }

    /// Live entry for `template_id`, optionally constrained to `hostname`.
    pub fn find_entry(&self, template_id: &TemplateId, hostname: Option<&str>) -> Option<RegistryEntry> {
        self.find_entry_at(template_id, hostname, crate::now_millis())
    }

    /// [`FrontOriginRegistry::find_entry`] at an explicit time.
    pub fn find_entry_at(
        &self,
        template_id: &TemplateId,
        hostname: Option<&str>,
        now: u64,
    ) -> Option<RegistryEntry> {
        {
            let entries = self.entries.read();
            let stored = entries.get(template_id)?;
            if !stored.entry.is_expired_at(now) {
                return match hostname {
                    Some(host) if !stored.pattern.matches(host) => None,
                    _ => Some(stored.entry.clone()),
                };
            }
        }

        let mut entries = self.entries.write();
        if entries
            .get(template_id)
            .map_or(false, |s| s.entry.is_expired_at(now))
        {
            entries.remove(template_id);
            debug!(template_id = %template_id, "registry entry expired");
        }
        None
    }

    /// Host pattern of the live entry for `template_id`.
    pub fn host_pattern(&self, template_id: &TemplateId) -> Option<HostPattern> {
        let now = crate::now_millis();
        self.entries
            .read()
            .get(template_id)
            .filter(|s| !s.entry.is_expired_at(now))
            .map(|s| s.pattern.clone())
    }

    /// Resolve whether `template_id` may be used, for `hostname` if given.
    pub fn is_allowed(&self, template_id: &TemplateId, hostname: Option<&str>) -> Decision {
        self.is_allowed_at(template_id, hostname, crate::now_millis())
    }

    /// [`FrontOriginRegistry::is_allowed`] at an explicit time.
    pub fn is_allowed_at(
        &self,
        template_id: &TemplateId,
        hostname: Option<&str>,
        now: u64,
    ) -> Decision {
        if let Some(o) = self.overrides.read().get(template_id) {
            return Decision {
                allowed: o.allowed,
                source: DecisionSource::LocalOverride,
                entry: None,
            };
        }

        match self.find_entry_at(template_id, hostname, now) {
            Some(entry) => Decision {
                allowed: true,
                source: DecisionSource::Registry,
                entry: Some(entry),
            },
            None => Decision {
                allowed: false,
                source: DecisionSource::DefaultDeny,
                entry: None,
            },
        }
    }

    /// Force an allow or deny for `template_id`, ahead of the registry.
    pub fn set_local_override(&self, template_id: TemplateId, allowed: bool) {
        let set_at = crate::now_millis();
        info!(template_id = %template_id, allowed, "local override set");
        self.overrides
            .write()
            .insert(template_id, LocalOverride { allowed, set_at });
    }

    /// Remove an override. Returns whether one was set.
    pub fn clear_local_override(&self, template_id: &TemplateId) -> bool {
        self.overrides.write().remove(template_id).is_some()
    }

    /// When the override for `template_id` was set.
    pub fn override_set_at(&self, template_id: &TemplateId) -> Option<u64> {
        self.overrides.read().get(template_id).map(|o| o.set_at)
    }

    /// Every stored entry, ordered by host pattern.
    pub fn list_entries(&self) -> Vec<EntrySummary> {
        let mut list: Vec<_> = self
            .entries
            .read()
            .values()
            .map(|s| EntrySummary {
                template_id: s.entry.template_id,
                host_pattern: s.entry.host_pattern.clone(),
                compliance_profile: s.entry.compliance_profile,
                expiry: s.entry.expiry,
                added: s.added,
                signed: s.entry.is_signed(),
            })
            .collect();
        list.sort_by(|a, b| {
            a.host_pattern
                .cmp(&b.host_pattern)
                .then_with(|| a.template_id.as_bytes().cmp(b.template_id.as_bytes()))
        });
        list
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(crate::now_millis())
    }

    /// [`FrontOriginRegistry::cleanup`] at an explicit time.
    pub fn cleanup_at(&self, now: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, s| !s.entry.is_expired_at(now));
        before - entries.len()
    }

    /// Drop every entry and override. Trusted signers are kept.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.overrides.write().clear();
        info!("registry cleared");
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical bytes of every entry, ordered by template ID.
    pub fn export(&self) -> Vec<u8> {
        let entries = self.entries.read();
        let mut sorted: Vec<&RegistryEntry> = entries.values().map(|s| &s.entry).collect();
        sorted.sort_by(|a, b| a.template_id.as_bytes().cmp(b.template_id.as_bytes()));

        canonical::encode(&Value::map([
            ("version", Value::from(REGISTRY_FORMAT_VERSION)),
            (
                "entries",
                Value::Array(sorted.into_iter().map(RegistryEntry::to_value).collect()),
            ),
        ]))
    }

    /// Load entries written by [`FrontOriginRegistry::export`].
    ///
    /// Expired entries are skipped. Every other entry is validated as by
    /// [`FrontOriginRegistry::add_entry`]; one failure rejects the whole
    /// import and nothing is loaded.
    pub fn import(&self, bytes: &[u8]) -> Result<usize> {
        self.import_at(bytes, crate::now_millis())
    }

    /// [`FrontOriginRegistry::import`] at an explicit time.
    pub fn import_at(&self, bytes: &[u8], now: u64) -> Result<usize> {
        let root = canonical::decode(bytes)?;
        if root.u64_field("version")? != REGISTRY_FORMAT_VERSION {
            return Err(Error::unexpected("version"));
        }
        let records = root
            .field("entries")?
            .as_array()
            .ok_or_else(|| Error::unexpected("entries"))?;

        let mut admitted = Vec::with_capacity(records.len());
        for record in records {
            let entry = RegistryEntry::from_value(record)?;
            if entry.is_expired_at(now) {
                continue;
            }
            let pattern = self.admit(&entry, now)?;
            admitted.push(StoredEntry {
                entry,
                pattern,
                added: now,
            });
        }

        let count = admitted.len();
        let mut entries = self.entries.write();
        for stored in admitted {
            entries.insert(stored.entry.template_id, stored);
        }
        debug!(count, "imported registry entries");
        Ok(count)
    }
}

impl Default for FrontOriginRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::browser_profile;

    const NOW: u64 = 1_700_000_000_000;
    const HOUR: u64 = 3_600_000;

    fn template_id() -> TemplateId {
        browser_profile().template_id()
    }

    fn entry(pattern: &str) -> RegistryEntry {
        RegistryEntry::new(template_id(), pattern, ComplianceProfile::Standard, NOW + HOUR)
    }

    #[test]
    fn test_default_deny() {
        let registry = FrontOriginRegistry::default();
        let unknown = TemplateId::from_bytes(&[7u8; 32]).unwrap();

        let decision = registry.is_allowed(&unknown, Some("unknown.test"));
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);
        assert_eq!(decision.source.as_str(), "default_deny");
        assert!(decision.entry.is_none());
    }

    #[test]
    fn test_registry_lookup_with_pattern() {
        let registry = FrontOriginRegistry::default();
        registry.add_entry_at(entry("*.example.com"), NOW).unwrap();

        let decision = registry.is_allowed_at(&template_id(), Some("cdn.example.com"), NOW);
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Registry);
        assert_eq!(decision.entry.unwrap().host_pattern, "*.example.com");

        let decision = registry.is_allowed_at(&template_id(), Some("example.org"), NOW);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);

        // No hostname means any host
        assert!(registry.is_allowed_at(&template_id(), None, NOW).allowed);
    }

    #[test]
    fn test_local_override_wins() {
        let registry = FrontOriginRegistry::default();
        registry.add_entry_at(entry("www.example.com"), NOW).unwrap();
        registry.set_local_override(template_id(), false);

        let decision = registry.is_allowed_at(&template_id(), Some("www.example.com"), NOW);
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::LocalOverride);
        assert!(registry.override_set_at(&template_id()).is_some());

        assert!(registry.clear_local_override(&template_id()));
        let decision = registry.is_allowed_at(&template_id(), Some("www.example.com"), NOW);
        assert_eq!(decision.source, DecisionSource::Registry);
    }

    #[test]
    fn test_validation() {
        let registry = FrontOriginRegistry::default();

        let mut e = entry("");
        assert!(matches!(
            registry.add_entry_at(e.clone(), NOW),
            Err(Error::MissingField("hostPattern"))
        ));

        e.host_pattern = "a.test".into();
        e.expiry = 0;
        assert!(matches!(
            registry.add_entry_at(e.clone(), NOW),
            Err(Error::MissingField("expiry"))
        ));

        e.expiry = NOW - 1;
        assert!(matches!(registry.add_entry_at(e.clone(), NOW), Err(Error::EntryExpired)));

        let zero = RegistryEntry::new(
            TemplateId::from_bytes(&[0u8; 32]).unwrap(),
            "a.test",
            ComplianceProfile::Minimal,
            NOW + HOUR,
        );
        assert!(matches!(
            registry.add_entry_at(zero, NOW),
            Err(Error::MissingField("templateId"))
        ));

        assert!(registry.is_empty());
    }

    #[test]
    fn test_compliance_profile_parsing() {
        assert_eq!("MINIMAL".parse::<ComplianceProfile>().unwrap(), ComplianceProfile::Minimal);
        assert_eq!("EXTENDED".parse::<ComplianceProfile>().unwrap(), ComplianceProfile::Extended);
        assert!(matches!(
            "standard".parse::<ComplianceProfile>(),
            Err(Error::InvalidComplianceProfile(_))
        ));
        assert!("PARANOID".parse::<ComplianceProfile>().is_err());
    }

    #[test]
    fn test_signed_entries() {
        let signer = Identity::generate();
        let registry = FrontOriginRegistry::default();

        let signed = entry("www.example.com").sign(&signer).unwrap();
        assert!(matches!(
            registry.add_entry_at(signed.clone(), NOW),
            Err(Error::UntrustedSigner)
        ));

        registry.add_signer(*signer.public_key());
        registry.add_entry_at(signed.clone(), NOW).unwrap();

        let mut forged = signed.clone();
        forged.host_pattern = "*".into();
        assert!(matches!(
            registry.add_entry_at(forged, NOW),
            Err(Error::InvalidSignature)
        ));

        let mut half = signed;
        half.signer = None;
        assert!(matches!(
            registry.add_entry_at(half, NOW),
            Err(Error::MissingField("signer"))
        ));
    }

    #[test]
    fn test_signing_bytes_are_domain_separated() {
        let bytes = entry("a.test").signing_bytes();
        assert!(bytes.starts_with(b"BN-FOR1"));
        assert_eq!(bytes, entry("a.test").signing_bytes());
    }

    #[test]
    fn test_host_pattern() {
        let pattern = HostPattern::new("*.example.com").unwrap();
        assert!(pattern.matches("www.example.com"));
        assert!(pattern.matches("WWW.Example.COM"));
        assert!(!pattern.matches("example.com"));
        assert!(!pattern.matches("www.example.com.evil.test"));
        assert_eq!(pattern.concrete_host(), Some("example.com"));

        // Dots are literal
        let pattern = HostPattern::new("a.b").unwrap();
        assert!(!pattern.matches("axb"));
        assert_eq!(pattern.concrete_host(), Some("a.b"));

        let any = HostPattern::new("*").unwrap();
        assert!(any.matches("anything.test"));
        assert_eq!(any.concrete_host(), None);
    }

    #[test]
    fn test_lazy_expiry_and_cleanup() {
        let registry = FrontOriginRegistry::default();
        registry.add_entry_at(entry("a.test"), NOW).unwrap();

        assert!(registry.find_entry_at(&template_id(), None, NOW + HOUR - 1).is_some());
        assert!(registry.find_entry_at(&template_id(), None, NOW + HOUR).is_none());
        assert!(registry.is_empty());

        registry.add_entry_at(entry("a.test"), NOW).unwrap();
        assert_eq!(registry.cleanup_at(NOW + HOUR), 1);
    }

    #[test]
    fn test_list_entries() {
        let registry = FrontOriginRegistry::default();
        registry.add_entry_at(entry("b.test"), NOW).unwrap();

        let list = registry.list_entries();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].host_pattern, "b.test");
        assert_eq!(list[0].added, NOW);
        assert!(!list[0].signed);
    }

    #[test]
    fn test_export_import() {
        let signer = Identity::generate();
        let source = FrontOriginRegistry::default();
        source.add_signer(*signer.public_key());
        source
            .add_entry_at(entry("www.example.com").sign(&signer).unwrap(), NOW)
            .unwrap();

        let bytes = source.export();
        assert_eq!(bytes, source.export());

        // Signatures are re-verified on load
        let untrusting = FrontOriginRegistry::default();
        assert!(matches!(
            untrusting.import_at(&bytes, NOW),
            Err(Error::UntrustedSigner)
        ));
        assert!(untrusting.is_empty());

        let target = FrontOriginRegistry::default();
        target.add_signer(*signer.public_key());
        assert_eq!(target.import_at(&bytes, NOW).unwrap(), 1);
        assert_eq!(
            target.find_entry_at(&template_id(), None, NOW),
            source.find_entry_at(&template_id(), None, NOW)
        );

        // Expired entries are dropped on load
        let later = FrontOriginRegistry::default();
        later.add_signer(*signer.public_key());
        assert_eq!(later.import_at(&bytes, NOW + HOUR).unwrap(), 0);
    }

    #[test]
    fn test_entry_json() {
        let json = serde_json::to_value(entry("a.test")).unwrap();
        assert_eq!(json["complianceProfile"], "STANDARD");
        assert_eq!(json["hostPattern"], "a.test");
        assert!(json.get("signature").is_none());

        let parsed: RegistryEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry("a.test"));
    }
}
