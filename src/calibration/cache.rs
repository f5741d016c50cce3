//! RAM-only template cache keyed by hostname.
//!
//! Expiry is checked lazily on lookup; there is no background timer.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::canonical::{self, Value};
use crate::error::{Error, Result};

use super::template::{Template, TemplateId};

/// Persistence format version
const CACHE_FORMAT_VERSION: u64 = 1;

/// Cache key for a hostname: lowercase, without a trailing dot.
pub(crate) fn normalize(hostname: &str) -> String {
    hostname.trim_end_matches('.').to_ascii_lowercase()
}

/// Templates by lowercase hostname.
pub struct TemplateCache {
    templates: RwLock<HashMap<String, Template>>,
}

impl TemplateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// A template that is still valid at `now`. An expired one is evicted.
    pub fn get_valid(&self, hostname: &str, now: u64) -> Option<Template> {
        {
            let templates = self.templates.read();
            match templates.get(hostname) {
                None => return None,
                Some(t) if !t.is_expired_at(now) => return Some(t.clone()),
                Some(_) => {}
            }
        }

        let mut templates = self.templates.write();
        // Re-check: a calibration may have replaced it meanwhile
        if templates.get(hostname).map_or(false, |t| t.is_expired_at(now)) {
            templates.remove(hostname);
            debug!(hostname, "evicted expired template");
        }
        templates.get(hostname).cloned()
    }

    /// Whatever is stored, expired or not.
    pub fn peek(&self, hostname: &str) -> Option<Template> {
        self.templates.read().get(hostname).cloned()
    }

    /// Store a template, returning the one it replaced.
    pub fn insert(&self, template: Template) -> Option<Template> {
        self.templates
            .write()
            .insert(template.hostname.clone(), template)
    }

    /// First valid template carrying `id`.
    pub fn find_by_id(&self, id: &TemplateId, now: u64) -> Option<Template> {
        self.templates
            .read()
            .values()
            .find(|t| !t.is_expired_at(now) && t.template_id == *id)
            .cloned()
    }

    /// Drop the template for `hostname`, if any.
    pub fn remove(&self, hostname: &str) -> Option<Template> {
        self.templates.write().remove(hostname)
    }

    /// Evict everything expired at `now`. Returns how many were removed.
    pub fn cleanup(&self, now: u64) -> usize {
        let mut templates = self.templates.write();
        let before = templates.len();
        templates.retain(|_, t| !t.is_expired_at(now));
        let removed = before - templates.len();
        if removed > 0 {
            debug!(removed, "cleaned up expired templates");
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.templates.write().clear();
    }

    /// Number of stored templates, expired ones included.
    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical bytes of every stored template, sorted by hostname.
    pub fn export(&self) -> Vec<u8> {
        let templates = self.templates.read();
        let mut sorted: Vec<&Template> = templates.values().collect();
        sorted.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let records = sorted.into_iter().map(Template::to_value).collect();

        canonical::encode(&Value::map([
            ("version", Value::from(CACHE_FORMAT_VERSION)),
            ("templates", Value::Array(records)),
        ]))
    }

    /// Load templates exported by [`TemplateCache::export`].
    ///
    /// Records already expired at `now` are dropped. A record whose stored ID
    /// does not match its parameters fails the whole import and nothing is
    /// loaded. Returns the number of templates loaded.
    pub fn import(&self, bytes: &[u8], now: u64) -> Result<usize> {
        let root = canonical::decode(bytes)?;
        if root.u64_field("version")? != CACHE_FORMAT_VERSION {
            return Err(Error::unexpected("version"));
        }

        let records = root
            .field("templates")?
            .as_array()
            .ok_or_else(|| Error::unexpected("templates"))?;

        let mut loaded = Vec::with_capacity(records.len());
        for record in records {
            let mut template = Template::from_value(record)?;
            if !template.verify_id() {
                return Err(Error::unexpected(format!(
                    "templateId for {}",
                    template.hostname
                )));
            }
            if !template.is_expired_at(now) {
                template.hostname = normalize(&template.hostname);
                loaded.push(template);
            }
        }

        let count = loaded.len();
        let mut templates = self.templates.write();
        for template in loaded {
            templates.insert(template.hostname.clone(), template);
        }
        debug!(count, "imported templates");
        Ok(count)
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::template::{browser_profile, Observation, Timing};

    fn template(host: &str, captured: u64) -> Template {
        Template::new(
            host,
            443,
            "/robots.txt",
            Observation { params: browser_profile(), timing: Timing::default() },
            captured,
            1_000,
        )
    }

    #[test]
    fn test_lazy_expiry() {
        let cache = TemplateCache::new();
        cache.insert(template("a.test", 0));

        assert!(cache.get_valid("a.test", 999).is_some());
        assert!(cache.peek("a.test").is_some());
        assert!(cache.get_valid("a.test", 1_000).is_none());
        // Evicted on the expired lookup
        assert!(cache.peek("a.test").is_none());
    }

    #[test]
    fn test_find_by_id_skips_expired() {
        let cache = TemplateCache::new();
        let t = template("a.test", 0);
        let id = t.template_id;
        cache.insert(t);

        assert!(cache.find_by_id(&id, 10).is_some());
        assert!(cache.find_by_id(&id, 5_000).is_none());
    }

    #[test]
    fn test_cleanup() {
        let cache = TemplateCache::new();
        cache.insert(template("old.test", 0));
        cache.insert(template("new.test", 5_000));

        assert_eq!(cache.cleanup(2_000), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.peek("new.test").is_some());
    }

    #[test]
    fn test_export_import() {
        let source = TemplateCache::new();
        source.insert(template("a.test", 0));
        source.insert(template("b.test", 10_000));

        let bytes = source.export();
        // Byte-exact across exports
        assert_eq!(bytes, source.export());

        let target = TemplateCache::new();
        // a.test expires at 1_000 and is dropped on load
        assert_eq!(target.import(&bytes, 5_000).unwrap(), 1);
        assert_eq!(target.peek("b.test"), source.peek("b.test"));
        assert!(target.peek("a.test").is_none());
    }

    #[test]
    fn test_import_normalizes_hostnames() {
        let source = TemplateCache::new();
        source.insert(template("Front.Test.", 0));

        let target = TemplateCache::new();
        assert_eq!(target.import(&source.export(), 10).unwrap(), 1);
        let loaded = target.get_valid("front.test", 10).unwrap();
        assert_eq!(loaded.hostname, "front.test");
        assert!(target.peek("Front.Test.").is_none());
    }

    #[test]
    fn test_import_rejects_tampered_record() {
        let mut tampered = template("a.test", 0);
        tampered.params.tls.cipher_suites.push("TLS_NULL_WITH_NULL_NULL".into());

        let source = TemplateCache::new();
        source.insert(template("b.test", 0));
        source.insert(tampered);

        let target = TemplateCache::new();
        let err = target.import(&source.export(), 0).unwrap_err();
        assert!(err.is_format_error());
        assert!(target.is_empty());
    }
}
