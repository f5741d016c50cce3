//! Error types for dkcloak.

use thiserror::Error;

use crate::calibration::TemplateChangeAlert;

/// Result type alias for dkcloak operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a byte string is not a valid canonical encoding.
///
/// Every variant is fatal to the decode call. The decoder never guesses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended in the middle of an item
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// A complete item was followed by more bytes
    #[error("{0} trailing bytes after top-level item")]
    TrailingBytes(usize),

    /// Additional info 31 (streaming items)
    #[error("indefinite-length item at offset {0}")]
    IndefiniteLength(usize),

    /// An integer or length was not written in its shortest form
    #[error("non-shortest-form argument at offset {0}")]
    NonShortestForm(usize),

    /// Additional info 28..=30
    #[error("reserved additional info {info} at offset {offset}")]
    ReservedAdditionalInfo {
        /// Offset of the initial byte
        offset: usize,
        /// The additional info value
        info: u8,
    },

    /// Tagged items have no canonical meaning here
    #[error("unsupported major type {major} at offset {offset}")]
    UnsupportedMajorType {
        /// Offset of the initial byte
        offset: usize,
        /// The major type found
        major: u8,
    },

    /// Half, single or double precision float
    #[error("floating-point value at offset {0}")]
    FloatProhibited(usize),

    /// Simple value other than false/true/null
    #[error("unsupported simple value {value} at offset {offset}")]
    UnsupportedSimpleValue {
        /// Offset of the initial byte
        offset: usize,
        /// The simple value found
        value: u8,
    },

    /// Text string is not valid UTF-8
    #[error("invalid UTF-8 in text string at offset {0}")]
    InvalidUtf8(usize),

    /// Map key is not a text string
    #[error("map key at offset {0} is not a text string")]
    NonTextMapKey(usize),

    /// The same key appears twice in one map
    #[error("duplicate map key {0:?}")]
    DuplicateMapKey(String),

    /// Keys are not in canonical order
    #[error("map key {0:?} is out of canonical order")]
    UnsortedMapKeys(String),

    /// Nesting deeper than the decoder allows
    #[error("nesting depth exceeds {0}")]
    DepthLimitExceeded(usize),

    /// Structurally valid but not the record shape the caller expected
    #[error("unexpected value for {0}")]
    UnexpectedValue(String),
}

/// Errors that can occur during dkcloak operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Canonical decoding failed
    #[error("malformed encoding: {0}")]
    MalformedEncoding(#[from] DecodeError),

    /// Signing requires a private key this identity does not hold
    #[error("identity has no private key")]
    NoPrivateKey,

    /// Signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Identity name does not start with the expected prefix
    #[error("invalid name prefix, expected {0:?}")]
    InvalidPrefix(&'static str),

    /// Identity name contains a character outside the base32 alphabet
    #[error("invalid character {0:?} in name")]
    InvalidCharacter(char),

    /// Decoded name or key has the wrong number of bytes
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length found
        actual: usize,
    },

    /// Unused trailing bits of the name are not zero
    #[error("name is not in canonical form")]
    NonCanonicalName,

    /// Name checksum does not match its node ID
    #[error("invalid name checksum")]
    InvalidChecksum,

    /// Key bytes are not a valid Ed25519 key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Imported identity fields disagree with its public key
    #[error("identity mismatch: {0}")]
    IdentityMismatch(String),

    /// Claim node ID disagrees with issuer or public key
    #[error("node ID mismatch: {0}")]
    NodeIdMismatch(&'static str),

    /// Identity with this name is not managed
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Identity with this name already exists
    #[error("identity already exists: {0}")]
    IdentityExists(String),

    /// Manager holds no default identity
    #[error("no default identity set")]
    NoDefaultIdentity,

    /// Every calibration path failed
    #[error("calibration failed for {hostname} after {attempts} attempts: {reason}")]
    CalibrationFailed {
        /// Host being calibrated
        hostname: String,
        /// Paths tried
        attempts: usize,
        /// Error from the last path
        reason: String,
    },

    /// A single probe failed
    #[error("probe error: {0}")]
    Probe(String),

    /// Probe deadline elapsed
    #[error("probe timeout after {0}ms")]
    Timeout(u64),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Live parameters differ from the cached template beyond tolerance
    #[error("template mismatch for {}: possible interception", .0.hostname)]
    TemplateMismatch(Box<TemplateChangeAlert>),

    /// No template is available for the requested ID
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Registry entry lacks a required field
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Registry entry expiry is in the past
    #[error("entry is already expired")]
    EntryExpired,

    /// Compliance profile is not MINIMAL, STANDARD or EXTENDED
    #[error("invalid compliance profile: {0}")]
    InvalidComplianceProfile(String),

    /// Host pattern could not be compiled
    #[error("invalid host pattern {0:?}")]
    InvalidHostPattern(String),

    /// Registry entry signer is not in the trusted set
    #[error("signer not authorized")]
    UntrustedSigner,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Error::Probe(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a schema-level decode error for a named field
    pub fn unexpected(field: impl Into<String>) -> Self {
        Error::MalformedEncoding(DecodeError::UnexpectedValue(field.into()))
    }

    /// Check if this error should be handled as a security alert
    pub fn is_security_alert(&self) -> bool {
        matches!(
            self,
            Error::TemplateMismatch(_)
                | Error::InvalidSignature
                | Error::UntrustedSigner
                | Error::NodeIdMismatch(_)
        )
    }

    /// Check if this error came from the canonical decoder
    pub fn is_format_error(&self) -> bool {
        matches!(self, Error::MalformedEncoding(_))
    }

    /// Check if a retry against another path may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Probe(_) | Error::Network(_))
    }
}
