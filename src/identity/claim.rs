//! Signed, timestamped assertions.

use crate::canonical::{self, Value};
use crate::crypto::{self, PublicKey, SecureRandom, Signature};
use crate::error::{Error, Result};

use super::{Identity, NodeId};

/// Claims older than this verify as stale (24 hours).
pub const CLAIM_FRESHNESS_MS: u64 = 24 * 60 * 60 * 1000;

/// Nonce length in bytes.
const NONCE_LENGTH: usize = 16;

/// Outcome of a successful claim verification.
///
/// Freshness is informational; a stale claim is still authentic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Issued within the freshness window
    Fresh,
    /// Older than the freshness window
    /// Older than the freshness window by `age_ms`
    Stale {
        /// How far past issue time the claim was checked
        age_ms: u64,
    },
}

impl ClaimStatus {
    /// Whether the claim is past its freshness window.
    pub fn is_stale(&self) -> bool {
        matches!(self, ClaimStatus::Stale { .. })
    }
}

/// A signed assertion issued by a self-certifying identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// Issuer name, `dk1:...`
    pub issuer: String,
    /// Issuer node ID
    pub node_id: NodeId,
    /// Issuer public key
    pub public_key: PublicKey,
    /// Claimed payload
    pub data: Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Random, so equal payloads still sign differently
    pub nonce: [u8; NONCE_LENGTH],
    /// Signature over the canonical pre-image
    pub signature: Signature,
}

impl Claim {
    /// Issue a claim now with a fresh random nonce.
    pub fn create(identity: &Identity, data: Value) -> Result<Self> {
        Self::create_at(identity, data, crate::now_millis(), SecureRandom::bytes())
    }

    /// Issue a claim with an explicit timestamp and nonce.
    pub fn create_at(
        identity: &Identity,
        data: Value,
        timestamp: u64,
        nonce: [u8; NONCE_LENGTH],
    ) -> Result<Self> {
        let message = signing_bytes(identity.name(), &data, timestamp, &nonce);
        let signature = identity.sign(&message)?;

        Ok(Self {
            issuer: identity.name().to_owned(),
            node_id: *identity.node_id(),
            public_key: *identity.public_key(),
            data,
            timestamp,
            nonce,
            signature,
        })
    }

    /// Verify against the current clock.
    pub fn verify(&self) -> Result<ClaimStatus> {
        self.verify_at(crate::now_millis())
    }

    /// Verify the claim.
    ///
    /// The issuer name, embedded node ID and embedded public key must all
    /// agree before the signature is even checked, so a valid name cannot be
    /// paired with an unrelated key.
    pub fn verify_at(&self, now: u64) -> Result<ClaimStatus> {
        let named = NodeId::from_name(&self.issuer)?;
        if !crypto::constant_time_eq(named.as_bytes(), self.node_id.as_bytes()) {
            return Err(Error::NodeIdMismatch("issuer name does not match node ID"));
        }

        let derived = NodeId::from_public_key(&self.public_key);
        if !crypto::constant_time_eq(derived.as_bytes(), named.as_bytes()) {
            return Err(Error::NodeIdMismatch("public key does not match node ID"));
        }

        let message = signing_bytes(&self.issuer, &self.data, self.timestamp, &self.nonce);
        if !crypto::verify(&self.signature, &message, &self.public_key) {
            return Err(Error::InvalidSignature);
        }

        let age_ms = now.saturating_sub(self.timestamp);
        if age_ms > CLAIM_FRESHNESS_MS {
            Ok(ClaimStatus::Stale { age_ms })
        } else {
            Ok(ClaimStatus::Fresh)
        }
    }

    /// Canonical tree form.
    pub fn to_value(&self) -> Value {
        Value::map([
            ("issuer", Value::from(self.issuer.as_str())),
            ("nodeId", Value::bytes(self.node_id.as_bytes().to_vec())),
            ("publicKey", Value::bytes(self.public_key.as_bytes().to_vec())),
            ("data", self.data.clone()),
            ("timestamp", Value::from(self.timestamp)),
            ("nonce", Value::bytes(self.nonce.to_vec())),
            ("signature", Value::bytes(self.signature.as_bytes().to_vec())),
        ])
    }

    /// Rebuild from [`Claim::to_value`] output. Does not verify.
    pub fn from_value(value: &Value) -> Result<Self> {
        let nonce = value
            .bytes_field("nonce")?
            .try_into()
            .map_err(|_| Error::unexpected("nonce"))?;

        Ok(Self {
            issuer: value.text_field("issuer")?.to_owned(),
            node_id: NodeId::from_bytes(value.bytes_field("nodeId")?)?,
            public_key: PublicKey::from_bytes(value.bytes_field("publicKey")?)?,
            data: value.field("data")?.clone(),
            timestamp: value.u64_field("timestamp")?,
            nonce,
            signature: Signature::from_bytes(value.bytes_field("signature")?)?,
        })
    }

    /// Canonical wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical::encode(&self.to_value())
    }

    /// Parse canonical wire bytes. Does not verify.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_value(&canonical::decode(bytes)?)
    }
}

/// The signature pre-image: canonical `{issuer, data, timestamp, nonce}`.
fn signing_bytes(issuer: &str, data: &Value, timestamp: u64, nonce: &[u8]) -> Vec<u8> {
    canonical::encode(&Value::map([
        ("issuer", Value::from(issuer)),
        ("data", data.clone()),
        ("timestamp", Value::from(timestamp)),
        ("nonce", Value::bytes(nonce.to_vec())),
    ]))
}
