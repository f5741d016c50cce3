//! Self-certifying identities.
//!
//! An identity is its Ed25519 public key. Everything else is derived:
//!
//! ```text
//! nodeId   = SHA-256(publicKey)[0..20]
//! checksum = SHA-256("DK-NAME" || nodeId)[0..4]
//! name     = "dk1:" || base32(nodeId || checksum)      (39 symbols)
//! ```
//!
//! No certificate authority is involved; anyone holding a name can check that
//! a presented key belongs to it.

mod base32;
mod claim;
mod manager;

pub use claim::{Claim, ClaimStatus, CLAIM_FRESHNESS_MS};
pub use manager::{BackupEntry, ExportMode, IdentityBackup, IdentityInfo, IdentityManager};

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::canonical::Value;
use crate::crypto::{self, PublicKey, Signature, SigningSecret};
use crate::error::{Error, Result};

/// Length of a node ID in bytes (160 bits)
pub const NODE_ID_LENGTH: usize = 20;

/// Length of the name checksum in bytes
pub const CHECKSUM_LENGTH: usize = 4;

/// Prefix of every identity name
pub const NAME_PREFIX: &str = "dk1:";

/// Domain separator for the name checksum
const CHECKSUM_DOMAIN: &[u8] = b"DK-NAME";

/// A 160-bit identifier derived from a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LENGTH]);

impl NodeId {
    /// Derive from a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = crypto::sha256(public_key.as_bytes());
        let mut id = [0u8; NODE_ID_LENGTH];
        id.copy_from_slice(&digest[..NODE_ID_LENGTH]);
        Self(id)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: NODE_ID_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LENGTH] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn checksum(&self) -> [u8; CHECKSUM_LENGTH] {
        let digest = crypto::sha256_parts(&[CHECKSUM_DOMAIN, &self.0]);
        let mut sum = [0u8; CHECKSUM_LENGTH];
        sum.copy_from_slice(&digest[..CHECKSUM_LENGTH]);
        sum
    }

    /// Human-readable name.
    pub fn to_name(&self) -> String {
        let mut payload = [0u8; NODE_ID_LENGTH + CHECKSUM_LENGTH];
        payload[..NODE_ID_LENGTH].copy_from_slice(&self.0);
        payload[NODE_ID_LENGTH..].copy_from_slice(&self.checksum());
        format!("{NAME_PREFIX}{}", base32::encode(&payload))
    }

    /// Parse a name back to its node ID, verifying the checksum.
    pub fn from_name(name: &str) -> Result<Self> {
        let encoded = name
            .strip_prefix(NAME_PREFIX)
            .ok_or(Error::InvalidPrefix(NAME_PREFIX))?;

        let decoded = base32::decode(encoded)?;
        if decoded.len() != NODE_ID_LENGTH + CHECKSUM_LENGTH {
            return Err(Error::InvalidLength {
                expected: NODE_ID_LENGTH + CHECKSUM_LENGTH,
                actual: decoded.len(),
            });
        }

        let node_id = Self::from_bytes(&decoded[..NODE_ID_LENGTH])?;
        if !crypto::constant_time_eq(&node_id.checksum(), &decoded[NODE_ID_LENGTH..]) {
            return Err(Error::InvalidChecksum);
        }

        Ok(node_id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Decode a name to its node ID.
pub fn parse_node_id(name: &str) -> Result<NodeId> {
    NodeId::from_name(name)
}

/// A self-certifying identity.
///
/// Immutable once created. Verify-only identities carry no secret and fail
/// to sign with [`Error::NoPrivateKey`].
pub struct Identity {
    secret: Option<SigningSecret>,
    public_key: PublicKey,
    node_id: NodeId,
    name: String,
    created: u64,
}

impl Identity {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        Self::from_secret(SigningSecret::random(), crate::now_millis())
    }

    /// Build from an existing signing key.
    pub fn from_secret(secret: SigningSecret, created: u64) -> Self {
        let public_key = secret.public_key();
        let mut identity = Self::from_public_key(public_key, created);
        identity.secret = Some(secret);
        identity
    }

    /// Build a verify-only identity.
    pub fn from_public_key(public_key: PublicKey, created: u64) -> Self {
        let node_id = NodeId::from_public_key(&public_key);
        Self {
            secret: None,
            public_key,
            node_id,
            name: node_id.to_name(),
            created,
        }
    }

    /// Rebuild from an exported record, checking every derived field.
    pub fn from_exported(exported: &ExportedIdentity) -> Result<Self> {
        let public_key = PublicKey::from_hex(&exported.public_key)?;

        let identity = match &exported.private_key {
            Some(private_hex) => {
                let seed = zeroize::Zeroizing::new(
                    hex::decode(private_hex).map_err(|e| Error::InvalidKey(e.to_string()))?,
                );
                let secret = SigningSecret::from_slice(&seed)?;
                if secret.public_key() != public_key {
                    return Err(Error::IdentityMismatch(
                        "private key does not derive public key".into(),
                    ));
                }
                Self::from_secret(secret, exported.created)
            }
            None => Self::from_public_key(public_key, exported.created),
        };

        if identity.node_id.to_hex() != exported.node_id.to_ascii_lowercase() {
            return Err(Error::IdentityMismatch("node ID does not match public key".into()));
        }
        if identity.name != exported.name {
            return Err(Error::IdentityMismatch("name does not match public key".into()));
        }

        Ok(identity)
    }

    /// Sign data.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        let secret = self.secret.as_ref().ok_or(Error::NoPrivateKey)?;
        Ok(secret.sign(data))
    }

    /// Verify a signature made by this identity.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        crypto::verify(signature, data, &self.public_key)
    }

    /// Issue a signed claim over `data`.
    pub fn create_claim(&self, data: Value) -> Result<Claim> {
        Claim::create(self, data)
    }

    /// Ed25519 public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Node ID derived from the public key.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The `dk1:` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time, milliseconds since the Unix epoch.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Whether this identity can sign.
    pub fn has_private_key(&self) -> bool {
        self.secret.is_some()
    }

    /// Export for storage. The private key is only included when asked for.
    pub fn export(&self, include_private: bool) -> ExportedIdentity {
        ExportedIdentity {
            name: self.name.clone(),
            node_id: self.node_id.to_hex(),
            public_key: self.public_key.to_hex(),
            created: self.created,
            private_key: if include_private {
                self.secret.as_ref().map(|s| hex::encode(&*s.to_bytes()))
            } else {
                None
            },
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("has_private_key", &self.has_private_key())
            .field("created", &self.created)
            .finish()
    }
}

/// Serialized identity. Keys are lowercase hex.
///
/// Wiped on drop since it may hold a private key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct ExportedIdentity {
    /// `dk1:` name
    pub name: String,
    /// Node ID, hex
    pub node_id: String,
    /// Ed25519 public key, hex
    pub public_key: String,
    /// ms since the Unix epoch
    pub created: u64,
    /// Ed25519 seed, present only in full exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl fmt::Debug for ExportedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedIdentity")
            .field("name", &self.name)
            .field("private_key", &self.private_key.as_ref().map(|_| ".."))
            .finish()
    }
}
