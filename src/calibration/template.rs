//! Observed protocol parameters and the templates built from them.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::canonical::{self, Value};
use crate::crypto;
use crate::error::{Error, Result};

/// TLS parameters as seen on the wire.
///
/// Lists keep the order they were observed in; only the fingerprint sorts
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsParameters {
    /// Protocol version label, e.g. `"TLS 1.3"`
    pub version: String,
    /// Cipher suites, in the order offered
    pub cipher_suites: Vec<String>,
    /// Extension names, in wire order
    pub extensions: Vec<String>,
    /// Named groups
    pub supported_groups: Vec<String>,
    /// Signature schemes
    pub signature_algorithms: Vec<String>,
    /// Application protocols
    pub alpn: Vec<String>,
    /// Whether GREASE values were present
    pub grease: bool,
}

/// Everything that goes into a fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolParameters {
    /// TLS handshake parameters
    pub tls: TlsParameters,
    /// HTTP/2 SETTINGS by name
    pub http2_settings: BTreeMap<String, u64>,
}

fn sorted(items: &[String]) -> Value {
    let mut items = items.to_vec();
    items.sort();
    Value::text_array(&items)
}

impl ProtocolParameters {
    /// The canonicalized subset that is hashed into a [`TemplateId`].
    ///
    /// Every list is sorted so probe order never changes the fingerprint.
    pub fn canonical_value(&self) -> Value {
        let tls = &self.tls;
        Value::map([
            (
                "tls",
                Value::map([
                    ("version", Value::from(tls.version.as_str())),
                    ("cipherSuites", sorted(&tls.cipher_suites)),
                    ("extensions", sorted(&tls.extensions)),
                    ("supportedGroups", sorted(&tls.supported_groups)),
                    ("signatureAlgorithms", sorted(&tls.signature_algorithms)),
                    ("alpn", sorted(&tls.alpn)),
                    ("grease", Value::from(tls.grease)),
                ]),
            ),
            (
                "http2",
                Value::map([("settings", self.settings_value())]),
            ),
        ])
    }

    fn settings_value(&self) -> Value {
        Value::map(
            self.http2_settings
                .iter()
                .map(|(k, v)| (k.as_str(), Value::from(*v))),
        )
    }

    /// Fingerprint of these parameters.
    pub fn template_id(&self) -> TemplateId {
        TemplateId(canonical::hash(&self.canonical_value()))
    }

    /// Order-preserving tree form used for persistence.
    pub fn to_value(&self) -> Value {
        let tls = &self.tls;
        Value::map([
            (
                "tls",
                Value::map([
                    ("version", Value::from(tls.version.as_str())),
                    ("cipherSuites", Value::text_array(&tls.cipher_suites)),
                    ("extensions", Value::text_array(&tls.extensions)),
                    ("supportedGroups", Value::text_array(&tls.supported_groups)),
                    ("signatureAlgorithms", Value::text_array(&tls.signature_algorithms)),
                    ("alpn", Value::text_array(&tls.alpn)),
                    ("grease", Value::from(tls.grease)),
                ]),
            ),
            (
                "http2",
                Value::map([("settings", self.settings_value())]),
            ),
        ])
    }

    /// Rebuild from [`ProtocolParameters::to_value`] output.
    pub fn from_value(value: &Value) -> Result<Self> {
        let tls = value.field("tls")?;
        let settings = value
            .field("http2")?
            .field("settings")?
            .as_map()
            .ok_or_else(|| Error::unexpected("http2.settings"))?;

        let http2_settings: BTreeMap<String, u64> = settings
            .iter()
            .map(|(k, v)| {
                v.as_u64()
                    .map(|n| (k.clone(), n))
                    .ok_or_else(|| Error::unexpected(format!("http2.settings.{k}")))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            tls: TlsParameters {
                version: tls.text_field("version")?.to_owned(),
                cipher_suites: tls.text_list_field("cipherSuites")?,
                extensions: tls.text_list_field("extensions")?,
                supported_groups: tls.text_list_field("supportedGroups")?,
                signature_algorithms: tls.text_list_field("signatureAlgorithms")?,
                alpn: tls.text_list_field("alpn")?,
                grease: tls
                    .field("grease")?
                    .as_bool()
                    .ok_or_else(|| Error::unexpected("grease"))?,
            },
            http2_settings,
        })
    }
}

/// Per-phase probe latency in milliseconds.
///
/// Recorded with a template but never hashed; it differs on every probe.
/// The phases are consecutive and do not overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Name resolution
    pub dns_ms: u64,
    /// TCP connect
    pub tcp_ms: u64,
    /// First response byte until the server's handshake flight is complete
    pub tls_ms: u64,
    /// ClientHello sent until the first response byte
    pub ttfb_ms: u64,
}

impl Timing {
    /// Time until the first response byte.
    pub fn first_byte_ms(&self) -> u64 {
        self.dns_ms + self.tcp_ms + self.ttfb_ms
    }

    /// Time until the handshake response was fully received.
    pub fn connection_ms(&self) -> u64 {
        self.first_byte_ms() + self.tls_ms
    }

    fn to_value(self) -> Value {
        Value::map([
            ("dnsMs", Value::from(self.dns_ms)),
            ("tcpMs", Value::from(self.tcp_ms)),
            ("tlsMs", Value::from(self.tls_ms)),
            ("ttfbMs", Value::from(self.ttfb_ms)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            dns_ms: value.u64_field("dnsMs")?,
            tcp_ms: value.u64_field("tcpMs")?,
            tls_ms: value.u64_field("tlsMs")?,
            ttfb_ms: value.u64_field("ttfbMs")?,
        })
    }
}

/// What a single probe saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Parameters the server presented
    pub params: ProtocolParameters,
    /// Phase latencies of the probe
    pub timing: Timing,
}

/// SHA-256 fingerprint of canonicalized protocol parameters.
///
/// Equality runs in constant time.
#[derive(Clone, Copy)]
pub struct TemplateId([u8; 32]);

impl TemplateId {
    /// ID length in bytes
    pub const LENGTH: usize = 32;

    /// Create from 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: Self::LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::unexpected("templateId"))?;
        Self::from_bytes(&bytes)
    }

    /// All-zero IDs are never produced by hashing and mark a missing field.
    pub fn is_zero(&self) -> bool {
        crypto::constant_time_eq(&self.0, &[0u8; 32])
    }
}

impl PartialEq for TemplateId {
    fn eq(&self, other: &Self) -> bool {
        crypto::constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for TemplateId {}

impl Hash for TemplateId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for TemplateId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TemplateId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A calibrated fingerprint of one front origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Lowercase hostname the template was captured from
    pub hostname: String,
    /// Port probed
    pub port: u16,
    /// Calibration path that produced this template
    pub path: String,
    /// Observed parameters; the ID is computed from these
    pub params: ProtocolParameters,
    /// Phase latencies of the probe
    pub timing: Timing,
    /// SHA-256 over the canonical parameter subset
    pub template_id: TemplateId,
    /// Capture time, ms since the Unix epoch
    pub captured: u64,
    /// Expiry time, ms since the Unix epoch
    pub expires: u64,
}

impl Template {
    /// Build a template from a successful probe.
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        observation: Observation,
        captured: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            path: path.into(),
            template_id: observation.params.template_id(),
            params: observation.params,
            timing: observation.timing,
            captured,
            expires: captured.saturating_add(ttl_ms),
        }
    }

    /// Whether the template has outlived its window at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires
    }

    /// Whether the stored ID still matches the parameters.
    pub fn verify_id(&self) -> bool {
        self.params.template_id() == self.template_id
    }

    /// Canonical record used for cache export.
    pub fn to_value(&self) -> Value {
        Value::map([
            ("hostname", Value::from(self.hostname.as_str())),
            ("port", Value::from(self.port)),
            ("path", Value::from(self.path.as_str())),
            ("params", self.params.to_value()),
            ("timing", self.timing.to_value()),
            ("templateId", Value::bytes(self.template_id.as_bytes().to_vec())),
            ("captured", Value::from(self.captured)),
            ("expires", Value::from(self.expires)),
        ])
    }

    /// Rebuild from [`Template::to_value`] output.
    pub fn from_value(value: &Value) -> Result<Self> {
        let port = u16::try_from(value.u64_field("port")?)
            .map_err(|_| Error::unexpected("port"))?;

        Ok(Self {
            hostname: value.text_field("hostname")?.to_owned(),
            port,
            path: value.text_field("path")?.to_owned(),
            params: ProtocolParameters::from_value(value.field("params")?)?,
            timing: Timing::from_value(value.field("timing")?)?,
            template_id: TemplateId::from_bytes(value.bytes_field("templateId")?)?,
            captured: value.u64_field("captured")?,
            expires: value.u64_field("expires")?,
        })
    }
}

/// A typical modern browser-facing front origin.
pub fn browser_profile() -> ProtocolParameters {
    let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    ProtocolParameters {
        tls: TlsParameters {
            version: "TLS 1.3".into(),
            cipher_suites: list(&[
                "TLS_AES_128_GCM_SHA256",
                "TLS_AES_256_GCM_SHA384",
                "TLS_CHACHA20_POLY1305_SHA256",
            ]),
            extensions: list(&[
                "server_name",
                "status_request",
                "supported_groups",
                "ec_point_formats",
                "signature_algorithms",
                "alpn",
                "signed_certificate_timestamp",
                "key_share",
                "psk_key_exchange_modes",
                "supported_versions",
            ]),
            supported_groups: list(&["x25519", "secp256r1", "secp384r1"]),
            signature_algorithms: list(&[
                "ecdsa_secp256r1_sha256",
                "rsa_pss_rsae_sha256",
                "rsa_pkcs1_sha256",
            ]),
            alpn: list(&["h2", "http/1.1"]),
            grease: true,
        },
        http2_settings: [
            ("SETTINGS_HEADER_TABLE_SIZE", 4096),
            ("SETTINGS_ENABLE_PUSH", 0),
            ("SETTINGS_MAX_CONCURRENT_STREAMS", 100),
            ("SETTINGS_INITIAL_WINDOW_SIZE", 65535),
            ("SETTINGS_MAX_FRAME_SIZE", 16384),
            ("SETTINGS_MAX_HEADER_LIST_SIZE", 8192),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_id_ignores_list_order() {
        let a = browser_profile();
        let mut b = browser_profile();
        b.tls.cipher_suites.reverse();
        b.tls.extensions.rotate_left(3);
        b.tls.alpn.reverse();

        assert_eq!(a.template_id(), b.template_id());
        // But the observed order is kept for mimicry
        assert_ne!(a, b);
    }

    #[test]
    fn test_template_id_sensitive_to_values() {
        let a = browser_profile();

        let mut b = browser_profile();
        b.tls.cipher_suites[2] = "TLS_AES_128_CCM_SHA256".into();
        assert_ne!(a.template_id(), b.template_id());

        let mut c = browser_profile();
        c.http2_settings.insert("SETTINGS_INITIAL_WINDOW_SIZE".into(), 65536);
        assert_ne!(a.template_id(), c.template_id());

        let mut d = browser_profile();
        d.tls.version = "TLS 1.2".into();
        assert_ne!(a.template_id(), d.template_id());
    }

    #[test]
    fn test_timing_not_hashed() {
        let obs = |ms| Observation {
            params: browser_profile(),
            timing: Timing { dns_ms: ms, tcp_ms: 2 * ms, tls_ms: 3 * ms, ttfb_ms: 4 * ms },
        };
        let a = Template::new("a.test", 443, "/robots.txt", obs(5), 0, 1000);
        let b = Template::new("a.test", 443, "/robots.txt", obs(10), 0, 1000);
        assert_eq!(a.template_id, b.template_id);
        // Each phase counted once
        assert_eq!(b.timing.first_byte_ms(), 70);
        assert_eq!(b.timing.connection_ms(), 100);
    }

    #[test]
    fn test_canonical_shape() {
        let v = browser_profile().canonical_value();
        let tls = v.get("tls").unwrap();
        assert_eq!(tls.get("version").and_then(Value::as_text), Some("TLS 1.3"));
        let ciphers = tls.get("cipherSuites").and_then(Value::as_array).unwrap();
        assert_eq!(ciphers[0].as_text(), Some("TLS_AES_128_GCM_SHA256"));
        assert_eq!(ciphers[2].as_text(), Some("TLS_CHACHA20_POLY1305_SHA256"));
        assert_eq!(
            v.get("http2")
                .and_then(|h| h.get("settings"))
                .and_then(|s| s.get("SETTINGS_MAX_FRAME_SIZE"))
                .and_then(Value::as_u64),
            Some(16384)
        );
    }

    #[test]
    fn test_template_persistence_form() {
        let t = Template::new(
            "front.test",
            443,
            "/favicon.ico",
            Observation { params: browser_profile(), timing: Timing::default() },
            1_000,
            86_400_000,
        );
        let bytes = canonical::encode(&t.to_value());
        let restored = Template::from_value(&canonical::decode(&bytes).unwrap()).unwrap();
        assert_eq!(restored, t);
        assert!(restored.verify_id());
        assert!(!t.is_expired_at(86_400_999));
        assert!(t.is_expired_at(86_401_000));
    }

    #[test]
    fn test_template_id_hex() {
        let id = browser_profile().template_id();
        assert_eq!(id.to_hex().len(), 64);
        assert_eq!(TemplateId::from_hex(&id.to_hex()).unwrap(), id);
        assert!(!id.is_zero());
        assert!(TemplateId::from_bytes(&[0u8; 32]).unwrap().is_zero());
        assert!(TemplateId::from_hex("abcd").is_err());
    }
}
