//! Per-host calibration driver.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::error::{Error, Result};

use super::alert::{AlertLog, TemplateChangeAlert};
use super::cache::{normalize, TemplateCache};
use super::diff::{diff, within_tolerance};
use super::prober::Prober;
use super::template::{ProtocolParameters, Template, TemplateId};

/// Where a host is in its calibration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    /// Never calibrated, or evicted
    Uncalibrated,
    /// A probe is in flight
    Calibrating,
    /// A valid template is cached
    Cached,
    /// The cached template has outlived its window
    Expired,
}

/// Outcome of an accepted live connection check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    /// ID of the cached template the connection was checked against
    pub template_id: TemplateId,
    /// ID computed from the live parameters
    pub live_template_id: TemplateId,
    /// IDs matched; false when accepted only within tolerance
    pub exact: bool,
}

/// Marks a host as calibrating for as long as it lives.
struct InFlight<'a> {
    counts: &'a Mutex<HashMap<String, usize>>,
    hostname: String,
}

impl<'a> InFlight<'a> {
    fn enter(counts: &'a Mutex<HashMap<String, usize>>, hostname: &str) -> Self {
        *counts.lock().entry(hostname.to_owned()).or_insert(0) += 1;
        Self {
            counts,
            hostname: hostname.to_owned(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&self.hostname) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.hostname);
            }
        }
    }
}

/// Probes front origins, caches their templates and watches for changes.
///
/// Calibrations of different hosts run concurrently. Calibrations of the
/// same host are serialized so their cache writes never interleave.
pub struct Calibrator {
    config: CalibrationConfig,
    prober: Arc<dyn Prober>,
    cache: TemplateCache,
    alerts: AlertLog,
    host_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Mutex<HashMap<String, usize>>,
}

impl Calibrator {
    /// Create a calibrator that probes through `prober`.
    pub fn new(config: CalibrationConfig, prober: Arc<dyn Prober>) -> Self {
        let alerts = AlertLog::new(config.max_alerts);
        Self {
            config,
            prober,
            cache: TemplateCache::new(),
            alerts,
            host_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn host_lock(&self, hostname: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.host_locks
            .lock()
            .entry(hostname.to_owned())
            .or_default()
            .clone()
    }

    /// Calibrate `hostname` over the configured paths.
    pub async fn calibrate(&self, hostname: &str) -> Result<Template> {
        let paths = self.config.paths.clone();
        self.calibrate_with_paths(hostname, &paths).await
    }

    /// Calibrate `hostname`, trying `paths` in order until one probe succeeds.
    ///
    /// The new template replaces any cached one. If the replaced template was
    /// still valid and its ID differs, a [`TemplateChangeAlert`] is emitted.
    pub async fn calibrate_with_paths(&self, hostname: &str, paths: &[String]) -> Result<Template> {
        let hostname = normalize(hostname);
        let _in_flight = InFlight::enter(&self.in_flight, &hostname);

        let lock = self.host_lock(&hostname);
        let _guard = lock.lock().await;

        info!(hostname = %hostname, paths = paths.len(), "calibrating");

        let timeout = self.config.probe_timeout;
        let mut attempts = 0;
        let mut last_error = None;
        let mut observed = None;

        for path in paths {
            attempts += 1;
            let probe = self.prober.probe(&hostname, self.config.port, path);
            match tokio::time::timeout(timeout, probe).await {
                Ok(Ok(observation)) => {
                    observed = Some((path, observation));
                    break;
                }
                Ok(Err(e)) => {
                    warn!(hostname = %hostname, path = %path, error = %e, "probe failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    let e = Error::Timeout(timeout.as_millis() as u64);
                    warn!(hostname = %hostname, path = %path, "probe timed out");
                    last_error = Some(e);
                }
            }
        }

        let Some((path, observation)) = observed else {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no calibration paths configured".into());
            return Err(Error::CalibrationFailed {
                hostname,
                attempts,
                reason,
            });
        };

        let now = crate::now_millis();
        let template = Template::new(
            &hostname,
            self.config.port,
            path,
            observation,
            now,
            self.config.cache_ttl_ms(),
        );

        if let Some(previous) = self.cache.insert(template.clone()) {
            if !previous.is_expired_at(now) && previous.template_id != template.template_id {
                let changes = diff(
                    &previous.params.canonical_value(),
                    &template.params.canonical_value(),
                );
                self.alerts.emit(TemplateChangeAlert::new(
                    &hostname,
                    previous.template_id,
                    template.template_id,
                    changes,
                    now,
                ));
            }
        }

        info!(
            hostname = %hostname,
            template_id = %template.template_id,
            path = %path,
            attempts,
            "calibrated"
        );
        Ok(template)
    }

    /// Valid cached template for `hostname`.
    pub fn template(&self, hostname: &str) -> Option<Template> {
        self.template_at(hostname, crate::now_millis())
    }

    /// [`Calibrator::template`] at an explicit time.
    pub fn template_at(&self, hostname: &str, now: u64) -> Option<Template> {
        self.cache.get_valid(&normalize(hostname), now)
    }

    /// Cached template, calibrating first on a miss.
    pub async fn get_or_calibrate(&self, hostname: &str) -> Result<Template> {
        match self.template(hostname) {
            Some(template) => Ok(template),
            None => self.calibrate(hostname).await,
        }
    }

    /// Lifecycle state of `hostname` right now.
    pub fn state(&self, hostname: &str) -> CalibrationState {
        self.state_at(hostname, crate::now_millis())
    }

    /// [`Calibrator::state`] at an explicit time.
    pub fn state_at(&self, hostname: &str, now: u64) -> CalibrationState {
        let hostname = normalize(hostname);
        if self.in_flight.lock().contains_key(&hostname) {
            return CalibrationState::Calibrating;
        }
        match self.cache.peek(&hostname) {
            None => CalibrationState::Uncalibrated,
            Some(t) if t.is_expired_at(now) => CalibrationState::Expired,
            Some(_) => CalibrationState::Cached,
        }
    }

    /// Check live connection parameters against the host's template.
    ///
    /// An exact ID match is accepted. Otherwise every numeric setting must be
    /// within the configured tolerance and everything else must be equal.
    /// Anything beyond that emits an alert and fails with
    /// [`Error::TemplateMismatch`].
    pub async fn verify_connection(
        &self,
        hostname: &str,
        live: &ProtocolParameters,
    ) -> Result<ConnectionCheck> {
        let template = self.get_or_calibrate(hostname).await?;
        let live_id = live.template_id();

        if live_id == template.template_id {
            return Ok(ConnectionCheck {
                template_id: template.template_id,
                live_template_id: live_id,
                exact: true,
            });
        }

        let cached = template.params.canonical_value();
        let observed = live.canonical_value();

        if within_tolerance(&cached, &observed, self.config.tolerance_percent) {
            debug!(hostname = %template.hostname, "connection accepted within tolerance");
            return Ok(ConnectionCheck {
                template_id: template.template_id,
                live_template_id: live_id,
                exact: false,
            });
        }

        let alert = TemplateChangeAlert::new(
            &template.hostname,
            template.template_id,
            live_id,
            diff(&cached, &observed),
            crate::now_millis(),
        );
        self.alerts.emit(alert.clone());
        Err(Error::TemplateMismatch(Box::new(alert)))
    }

    /// Valid cached template carrying `id`.
    pub fn find_template(&self, id: &TemplateId) -> Option<Template> {
        self.cache.find_by_id(id, crate::now_millis())
    }

    /// Alerts newer than `since` (milliseconds since the Unix epoch).
    pub fn alerts(&self, since: u64) -> Vec<TemplateChangeAlert> {
        self.alerts.since(since)
    }

    /// Receive alerts as they are raised.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<TemplateChangeAlert> {
        self.alerts.subscribe()
    }

    /// Forget alert history. Subscribers are unaffected.
    pub fn clear_alerts(&self) {
        self.alerts.clear();
    }

    /// Evict expired templates and idle host locks.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(crate::now_millis())
    }

    /// [`Calibrator::cleanup`] at an explicit time.
    pub fn cleanup_at(&self, now: u64) -> usize {
        self.host_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.cache.cleanup(now)
    }

    /// Drop every template and alert.
    pub fn clear(&self) {
        self.cache.clear();
        self.alerts.clear();
        info!("calibration state cleared");
    }

    /// Number of cached templates, expired ones included.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Canonical bytes of the template cache.
    pub fn export_cache(&self) -> Vec<u8> {
        self.cache.export()
    }

    /// Load templates from [`Calibrator::export_cache`] output.
    pub fn import_cache(&self, bytes: &[u8]) -> Result<usize> {
        self.cache.import(bytes, crate::now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::alert::Severity;
    use crate::calibration::prober::SimulatedProber;
    use crate::calibration::template::browser_profile;
    use std::time::Duration;

    fn setup() -> (Arc<SimulatedProber>, Arc<Calibrator>) {
        let prober = Arc::new(SimulatedProber::new());
        let calibrator = Arc::new(Calibrator::new(CalibrationConfig::default(), prober.clone()));
        (prober, calibrator)
    }

    fn with_ciphers(ciphers: &[&str]) -> ProtocolParameters {
        let mut params = browser_profile();
        params.tls.cipher_suites = ciphers.iter().map(|c| c.to_string()).collect();
        params
    }

    #[tokio::test]
    async fn test_calibrate_and_cache() {
        let (_, calibrator) = setup();
        assert_eq!(calibrator.state("front.test"), CalibrationState::Uncalibrated);

        let template = calibrator.calibrate("Front.Test").await.unwrap();
        assert_eq!(template.hostname, "front.test");
        assert_eq!(template.path, "/robots.txt");
        assert_eq!(template.expires - template.captured, 86_400_000);
        assert_eq!(calibrator.state("front.test"), CalibrationState::Cached);
        assert_eq!(calibrator.template("front.test"), Some(template.clone()));
        assert_eq!(calibrator.find_template(&template.template_id), Some(template));
    }

    #[tokio::test]
    async fn test_template_stability() {
        let (_, calibrator) = setup();
        let first = calibrator.calibrate("static.test").await.unwrap();
        let second = calibrator.calibrate("static.test").await.unwrap();

        assert_eq!(first.template_id, second.template_id);
        assert!(calibrator.alerts(0).is_empty());
    }

    #[tokio::test]
    async fn test_mitm_detection() {
        let (prober, calibrator) = setup();
        let mut rx = calibrator.subscribe_alerts();

        prober.set_profile("example.test", with_ciphers(&["A", "B", "C"]));
        let original = calibrator.calibrate("example.test").await.unwrap();

        prober.set_profile("example.test", with_ciphers(&["A", "B", "D"]));
        let tampered = calibrator.calibrate("example.test").await.unwrap();

        let alerts = calibrator.alerts(0);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.hostname, "example.test");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.old_template_id, original.template_id);
        assert_eq!(alert.new_template_id, tampered.template_id);
        assert_eq!(alert.changed_paths(), vec!["tls.cipherSuites"]);

        assert_eq!(rx.recv().await.unwrap(), *alert);

        calibrator.clear_alerts();
        assert!(calibrator.alerts(0).is_empty());
    }

    #[tokio::test]
    async fn test_path_fallback() {
        let (prober, calibrator) = setup();
        prober.fail_path("flaky.test", "/robots.txt");

        let template = calibrator.calibrate("flaky.test").await.unwrap();
        assert_eq!(template.path, "/favicon.ico");
        assert_eq!(prober.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_all_paths_fail() {
        let (prober, calibrator) = setup();
        prober.fail_path("down.test", "/robots.txt");
        prober.fail_path("down.test", "/favicon.ico");

        match calibrator.calibrate("down.test").await {
            Err(Error::CalibrationFailed { hostname, attempts, .. }) => {
                assert_eq!(hostname, "down.test");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calibrator.state("down.test"), CalibrationState::Uncalibrated);

        match calibrator.calibrate_with_paths("down.test", &[]).await {
            Err(Error::CalibrationFailed { attempts, reason, .. }) => {
                assert_eq!(attempts, 0);
                assert_eq!(reason, "no calibration paths configured");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout() {
        let (prober, calibrator) = setup();
        prober.set_latency(Some(Duration::from_secs(30)));

        let err = calibrator.calibrate("slow.test").await.unwrap_err();
        match err {
            Error::CalibrationFailed { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(reason, "probe timeout after 10000ms");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(calibrator.template("slow.test").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_while_calibrating() {
        let (prober, calibrator) = setup();
        prober.set_latency(Some(Duration::from_secs(1)));

        let task = {
            let calibrator = calibrator.clone();
            tokio::spawn(async move { calibrator.calibrate("busy.test").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(calibrator.state("busy.test"), CalibrationState::Calibrating);

        task.await.unwrap().unwrap();
        assert_eq!(calibrator.state("busy.test"), CalibrationState::Cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_calibrations_serialize() {
        let (prober, calibrator) = setup();
        prober.set_latency(Some(Duration::from_millis(100)));

        let a = {
            let calibrator = calibrator.clone();
            tokio::spawn(async move { calibrator.calibrate("shared.test").await })
        };
        let b = {
            let calibrator = calibrator.clone();
            tokio::spawn(async move { calibrator.calibrate("shared.test").await })
        };
        let other = calibrator.calibrate("other.test");

        let (a, b, other) = tokio::join!(a, b, other);
        assert_eq!(
            a.unwrap().unwrap().template_id,
            b.unwrap().unwrap().template_id
        );
        other.unwrap();
        assert_eq!(calibrator.cached_count(), 2);
        assert_eq!(prober.probe_count(), 3);
    }

    #[tokio::test]
    async fn test_expiry_and_cleanup() {
        let (_, calibrator) = setup();
        let template = calibrator.calibrate("old.test").await.unwrap();

        assert_eq!(
            calibrator.state_at("old.test", template.expires),
            CalibrationState::Expired
        );
        assert!(calibrator.template_at("old.test", template.expires - 1).is_some());
        assert_eq!(calibrator.cleanup_at(template.expires), 1);
        assert_eq!(calibrator.state("old.test"), CalibrationState::Uncalibrated);
        assert!(calibrator.host_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_verify_connection_exact() {
        let (_, calibrator) = setup();
        let check = calibrator
            .verify_connection("front.test", &browser_profile())
            .await
            .unwrap();
        assert!(check.exact);
        assert_eq!(check.template_id, check.live_template_id);
    }

    #[tokio::test]
    async fn test_verify_connection_tolerance_boundary() {
        let (_, calibrator) = setup();
        calibrator.calibrate("front.test").await.unwrap();

        let mut live = browser_profile();
        live.http2_settings
            .insert("SETTINGS_MAX_CONCURRENT_STREAMS".into(), 110);
        let check = calibrator.verify_connection("front.test", &live).await.unwrap();
        assert!(!check.exact);

        live.http2_settings
            .insert("SETTINGS_MAX_CONCURRENT_STREAMS".into(), 111);
        let err = calibrator.verify_connection("front.test", &live).await.unwrap_err();
        assert!(err.is_security_alert());

        let alerts = calibrator.alerts(0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(
            alerts[0].changed_paths(),
            vec!["http2.settings.SETTINGS_MAX_CONCURRENT_STREAMS"]
        );
    }

    #[tokio::test]
    async fn test_verify_connection_rejects_structural_change() {
        let (_, calibrator) = setup();
        let mut live = browser_profile();
        live.tls.version = "TLS 1.2".into();

        match calibrator.verify_connection("front.test", &live).await {
            Err(Error::TemplateMismatch(alert)) => {
                assert_eq!(alert.changed_paths(), vec!["tls.version"]);
                assert_eq!(alert.severity, Severity::High);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cache_export_import_and_clear() {
        let (_, calibrator) = setup();
        calibrator.calibrate("a.test").await.unwrap();
        calibrator.calibrate("b.test").await.unwrap();

        let bytes = calibrator.export_cache();
        calibrator.clear();
        assert_eq!(calibrator.cached_count(), 0);

        assert_eq!(calibrator.import_cache(&bytes).unwrap(), 2);
        assert_eq!(calibrator.state("a.test"), CalibrationState::Cached);
        assert!(calibrator.template("A.Test.").is_some());
    }
}
