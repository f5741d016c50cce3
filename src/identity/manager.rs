//! In-memory identity store with one designated default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::{ExportedIdentity, Identity};

/// Backup format version
const BACKUP_VERSION: &str = "1.0";

/// Whether an export carries private keys. There is no implicit default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Public keys only; the backup can verify but not sign
    PublicOnly,
    /// Include private keys
    IncludePrivate,
}

struct ManagedIdentity {
    identity: Arc<Identity>,
    label: String,
    created: u64,
    last_used: AtomicU64,
}

#[derive(Default)]
struct Inner {
    identities: HashMap<String, ManagedIdentity>,
    default: Option<String>,
}

/// Summary of a managed identity (no key material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    /// Identity name
    pub name: String,
    /// Operator label
    pub label: String,
    /// Whether this is the default identity
    pub is_default: bool,
    /// ms since the Unix epoch
    pub created: u64,
    /// Last sign or lookup, ms since the Unix epoch
    pub last_used: u64,
    /// Whether the identity can sign
    pub has_private_key: bool,
}

/// One identity in a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// Identity name
    pub name: String,
    /// Operator label
    pub label: String,
    /// ms since the Unix epoch
    pub created: u64,
    /// ms since the Unix epoch
    pub last_used: u64,
    /// Exported keys
    pub data: ExportedIdentity,
}

/// Whole-manager backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBackup {
    /// Backup format version
    pub version: String,
    /// Name of the default identity
    pub default_identity: Option<String>,
    /// Every managed identity
    pub identities: Vec<BackupEntry>,
}

/// Holds identities by name and tracks the default.
///
/// Reads take a shared lock; `last_used` is updated atomically so lookups
/// never need the write lock.
pub struct IdentityManager {
    inner: RwLock<Inner>,
}

impl IdentityManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Generate and store a new identity. The first identity becomes default.
    pub fn create_identity(&self, label: Option<&str>) -> Arc<Identity> {
        let identity = Arc::new(Identity::generate());
        let now = crate::now_millis();

        let mut inner = self.inner.write();
        let label = label
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Identity {}", inner.identities.len() + 1));

        inner.identities.insert(
            identity.name().to_owned(),
            ManagedIdentity {
                identity: Arc::clone(&identity),
                label,
                created: now,
                last_used: AtomicU64::new(now),
            },
        );
        if inner.default.is_none() {
            inner.default = Some(identity.name().to_owned());
        }

        info!(name = %identity.name(), "created identity");
        identity
    }

    /// Import a single exported identity.
    pub fn import_identity(
        &self,
        exported: &ExportedIdentity,
        label: Option<&str>,
    ) -> Result<Arc<Identity>> {
        let identity = Arc::new(Identity::from_exported(exported)?);
        let now = crate::now_millis();

        let mut inner = self.inner.write();
        if inner.identities.contains_key(identity.name()) {
            return Err(Error::IdentityExists(identity.name().to_owned()));
        }

        inner.identities.insert(
            identity.name().to_owned(),
            ManagedIdentity {
                identity: Arc::clone(&identity),
                label: label
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("Imported {now}")),
                created: identity.created(),
                last_used: AtomicU64::new(now),
            },
        );

        debug!(name = %identity.name(), private = identity.has_private_key(), "imported identity");
        Ok(identity)
    }

    /// Look up an identity, marking it used.
    pub fn get(&self, name: &str) -> Result<Arc<Identity>> {
        let inner = self.inner.read();
        let entry = inner
            .identities
            .get(name)
            .ok_or_else(|| Error::IdentityNotFound(name.to_owned()))?;
        entry.last_used.store(crate::now_millis(), Ordering::Relaxed);
        Ok(Arc::clone(&entry.identity))
    }

    /// The default identity.
    pub fn default_identity(&self) -> Result<Arc<Identity>> {
        let name = self
            .inner
            .read()
            .default
            .clone()
            .ok_or(Error::NoDefaultIdentity)?;
        self.get(&name)
    }

    /// Make `name` the default.
    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.identities.contains_key(name) {
            return Err(Error::IdentityNotFound(name.to_owned()));
        }
        inner.default = Some(name.to_owned());
        Ok(())
    }

    /// Summaries of every identity, oldest first.
    pub fn list(&self) -> Vec<IdentityInfo> {
        let inner = self.inner.read();
        let mut list: Vec<_> = inner
            .identities
            .iter()
            .map(|(name, entry)| IdentityInfo {
                name: name.clone(),
                label: entry.label.clone(),
                is_default: inner.default.as_deref() == Some(name.as_str()),
                created: entry.created,
                last_used: entry.last_used.load(Ordering::Relaxed),
                has_private_key: entry.identity.has_private_key(),
            })
            .collect();
        list.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        list
    }

    /// Remove an identity. If it was the default, the oldest remaining
    /// identity takes over. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.identities.remove(name).is_some();

        if inner.default.as_deref() == Some(name) {
            inner.default = inner
                .identities
                .iter()
                .min_by(|(an, a), (bn, b)| a.created.cmp(&b.created).then_with(|| an.cmp(bn)))
                .map(|(n, _)| n.clone());
        }

        if removed {
            debug!(name, "removed identity");
        }
        removed
    }

    /// Number of managed identities.
    pub fn count(&self) -> usize {
        self.inner.read().identities.len()
    }

    /// Export every identity for backup.
    pub fn export_all(&self, mode: ExportMode) -> IdentityBackup {
        let include_private = mode == ExportMode::IncludePrivate;
        let inner = self.inner.read();

        let mut identities: Vec<_> = inner
            .identities
            .iter()
            .map(|(name, entry)| BackupEntry {
                name: name.clone(),
                label: entry.label.clone(),
                created: entry.created,
                last_used: entry.last_used.load(Ordering::Relaxed),
                data: entry.identity.export(include_private),
            })
            .collect();
        identities.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));

        if include_private {
            warn!(count = identities.len(), "exporting identities with private keys");
        }

        IdentityBackup {
            version: BACKUP_VERSION.to_owned(),
            default_identity: inner.default.clone(),
            identities,
        }
    }

    /// Restore a backup.
    ///
    /// Every record is validated before anything is inserted. Names already
    /// present are left untouched. The backup's default is adopted only when
    /// this manager has none. Returns the number of identities added.
    pub fn import_backup(&self, backup: &IdentityBackup) -> Result<usize> {
        if backup.version != BACKUP_VERSION {
            return Err(Error::config(format!(
                "unsupported backup version {:?}",
                backup.version
            )));
        }

        let mut restored = Vec::with_capacity(backup.identities.len());
        for item in &backup.identities {
            let identity = Identity::from_exported(&item.data)?;
            if identity.name() != item.name {
                return Err(Error::IdentityMismatch(format!(
                    "backup entry {} holds identity {}",
                    item.name,
                    identity.name()
                )));
            }
            restored.push((item, identity));
        }

        let mut inner = self.inner.write();
        let mut added = 0;
        for (item, identity) in restored {
            if inner.identities.contains_key(&item.name) {
                continue;
            }
            inner.identities.insert(
                item.name.clone(),
                ManagedIdentity {
                    identity: Arc::new(identity),
                    label: item.label.clone(),
                    created: item.created,
                    last_used: AtomicU64::new(item.last_used),
                },
            );
            added += 1;
        }

        if inner.default.is_none() {
            if let Some(name) = &backup.default_identity {
                if inner.identities.contains_key(name) {
                    inner.default = Some(name.clone());
                }
            }
        }

        info!(added, total = inner.identities.len(), "imported identity backup");
        Ok(added)
    }

    /// Drop every identity and the default pointer.
    ///
    /// Signing keys zeroize when the last handle to them is dropped.
    pub fn wipe(&self) {
        let mut inner = self.inner.write();
        let count = inner.identities.len();
        inner.identities.clear();
        inner.default = None;
        warn!(count, "identity store wiped");
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}
