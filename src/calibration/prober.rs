//! Probes that observe a front origin's protocol behavior.
//!
//! [`Prober`] is the seam between calibration logic and the network.
//! [`SimulatedProber`] is deterministic and scriptable; [`HandshakeProber`]
//! talks to the real server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::crypto;
use crate::error::{Error, Result};

use super::handshake::{
    self, ClientHelloBuilder, ServerHelloParser, MAX_RECORD_LEN, RECORD_HEADER_LEN,
};
use super::template::{browser_profile, Observation, ProtocolParameters, Timing, TlsParameters};

/// Observes one front origin over one calibration path.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `hostname:port` using `path`.
    async fn probe(&self, hostname: &str, port: u16, path: &str) -> Result<Observation>;
}

/// Deterministic prober for tests and offline use.
///
/// Every host answers with [`browser_profile`] unless a profile was set for
/// it. Individual `(host, path)` pairs can be made to fail, and an artificial
/// latency can be added to every probe.
pub struct SimulatedProber {
    profiles: RwLock<HashMap<String, ProtocolParameters>>,
    failing: RwLock<HashSet<(String, String)>>,
    latency: Mutex<Option<Duration>>,
    attempts: Mutex<Vec<(String, String)>>,
    probes: AtomicUsize,
}

impl SimulatedProber {
    /// Every host answers with the default browser profile.
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            latency: Mutex::new(None),
            attempts: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    /// Answer probes for `hostname` with `params`.
    pub fn set_profile(&self, hostname: &str, params: ProtocolParameters) {
        self.profiles
            .write()
            .insert(hostname.to_ascii_lowercase(), params);
    }

    /// Revert `hostname` to the default profile.
    pub fn clear_profile(&self, hostname: &str) {
        self.profiles.write().remove(&hostname.to_ascii_lowercase());
    }

    /// Make probes of `path` on `hostname` fail.
    pub fn fail_path(&self, hostname: &str, path: &str) {
        self.failing
            .write()
            .insert((hostname.to_ascii_lowercase(), path.to_owned()));
    }

    /// Make every path succeed again.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    /// Delay every probe by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of probes issued so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    /// Every `(host, path)` probed, in order.
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().clone()
    }

    /// Stable pseudo-latency derived from the hostname.
    fn timing_for(hostname: &str) -> Timing {
        let seed = crypto::sha256(hostname.as_bytes());
        Timing {
            dns_ms: 5 + u64::from(seed[0] % 20),
            tcp_ms: 10 + u64::from(seed[1] % 40),
            tls_ms: 20 + u64::from(seed[2] % 60),
            ttfb_ms: 30 + u64::from(seed[3] % 90),
        }
    }
}

impl Default for SimulatedProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for SimulatedProber {
    async fn probe(&self, hostname: &str, _port: u16, path: &str) -> Result<Observation> {
        let host = hostname.to_ascii_lowercase();
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.attempts.lock().push((host.clone(), path.to_owned()));

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.read().contains(&(host.clone(), path.to_owned())) {
            return Err(Error::probe(format!("simulated failure for {host}{path}")));
        }

        let params = self
            .profiles
            .read()
            .get(&host)
            .cloned()
            .unwrap_or_else(browser_profile);

        Ok(Observation {
            params,
            timing: Self::timing_for(&host),
        })
    }
}

/// Probes a real server with a TLS 1.3 ClientHello and records its
/// ServerHello.
///
/// Only the cleartext first flight is observable, so the resulting template
/// carries the negotiated version, the selected cipher suite, the server's
/// extension order and its key share group. ALPN, signature algorithms and
/// HTTP/2 SETTINGS travel encrypted and are left empty. The calibration path
/// is not requested; no HTTP is spoken.
pub struct HandshakeProber {
    alpn: Vec<String>,
}

impl HandshakeProber {
    /// Advertise `h2` and `http/1.1`.
    pub fn new() -> Self {
        Self {
            alpn: vec!["h2".into(), "http/1.1".into()],
        }
    }

    /// Advertise a different ALPN list.
    pub fn with_alpn(alpn: Vec<String>) -> Self {
        Self { alpn }
    }
}

impl Default for HandshakeProber {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[async_trait]
impl Prober for HandshakeProber {
    async fn probe(&self, hostname: &str, port: u16, path: &str) -> Result<Observation> {
        let start = Instant::now();
        let addr = tokio::net::lookup_host((hostname, port))
            .await?
            .next()
            .ok_or_else(|| Error::probe(format!("no address for {hostname}")))?;
        let dns_ms = elapsed_ms(start);

        let start = Instant::now();
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let tcp_ms = elapsed_ms(start);

        let hello = ClientHelloBuilder::new(hostname, self.alpn.clone()).build();

        let start = Instant::now();
        stream.write_all(&hello).await?;

        let mut header = [0u8; RECORD_HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let ttfb_ms = elapsed_ms(start);

        let start = Instant::now();
        let length = usize::from(u16::from_be_bytes([header[3], header[4]]));
        if length > MAX_RECORD_LEN {
            return Err(Error::probe("record too large"));
        }
        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + length);
        record.extend_from_slice(&header);
        record.resize(RECORD_HEADER_LEN + length, 0);
        stream.read_exact(&mut record[RECORD_HEADER_LEN..]).await?;
        let tls_ms = elapsed_ms(start);

        let hello = ServerHelloParser::parse(&record)?;
        debug!(
            hostname,
            path,
            cipher_suite = hello.cipher_suite,
            extensions = hello.extensions.len(),
            "received ServerHello"
        );

        let params = ProtocolParameters {
            tls: TlsParameters {
                version: handshake::version_name(hello.version()),
                cipher_suites: vec![handshake::cipher_suite_name(hello.cipher_suite)],
                extensions: hello
                    .extensions
                    .iter()
                    .map(|e| handshake::extension_name(*e))
                    .collect(),
                supported_groups: hello
                    .key_share_group
                    .map(handshake::group_name)
                    .into_iter()
                    .collect(),
                signature_algorithms: Vec::new(),
                alpn: Vec::new(),
                grease: false,
            },
            http2_settings: Default::default(),
        };

        Ok(Observation {
            params,
            timing: Timing {
                dns_ms,
                tcp_ms,
                tls_ms,
                ttfb_ms,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_simulated_default_profile() {
        let prober = SimulatedProber::new();
        let a = prober.probe("Front.Test", 443, "/robots.txt").await.unwrap();
        let b = prober.probe("front.test", 443, "/favicon.ico").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.params, browser_profile());
        assert_eq!(prober.probe_count(), 2);
        assert_eq!(
            prober.attempts(),
            vec![
                ("front.test".to_string(), "/robots.txt".to_string()),
                ("front.test".to_string(), "/favicon.ico".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_simulated_overrides_and_failures() {
        let prober = SimulatedProber::new();
        let mut custom = browser_profile();
        custom.tls.alpn = vec!["http/1.1".into()];
        prober.set_profile("a.test", custom.clone());
        prober.fail_path("a.test", "/robots.txt");

        assert!(prober.probe("a.test", 443, "/robots.txt").await.is_err());
        let obs = prober.probe("a.test", 443, "/favicon.ico").await.unwrap();
        assert_eq!(obs.params, custom);

        prober.clear_profile("a.test");
        prober.clear_failures();
        let obs = prober.probe("a.test", 443, "/robots.txt").await.unwrap();
        assert_eq!(obs.params, browser_profile());
    }

    #[tokio::test]
    async fn test_handshake_prober_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 5];
            socket.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await.unwrap();

            // ServerHello: TLS_AES_256_GCM_SHA384, key_share x25519, supported_versions 1.3
            let mut ext = Vec::new();
            ext.extend_from_slice(&[0x00, 0x33, 0x00, 0x24, 0x00, 0x1d, 0x00, 0x20]);
            ext.extend_from_slice(&[0x44; 32]);
            ext.extend_from_slice(&[0x00, 0x2b, 0x00, 0x02, 0x03, 0x04]);

            let mut sh = vec![0x03, 0x03];
            sh.extend_from_slice(&[0x55; 32]);
            sh.push(0);
            sh.extend_from_slice(&[0x13, 0x02, 0x00]);
            sh.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            sh.extend_from_slice(&ext);

            let mut hs = vec![0x02, 0x00];
            hs.extend_from_slice(&(sh.len() as u16).to_be_bytes());
            hs.extend_from_slice(&sh);

            let mut record = vec![0x16, 0x03, 0x03];
            record.extend_from_slice(&(hs.len() as u16).to_be_bytes());
            record.extend_from_slice(&hs);

            // Stall before the first byte and again inside the record.
            tokio::time::sleep(Duration::from_millis(100)).await;
            socket.write_all(&record[..5]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            socket.write_all(&record[5..]).await.unwrap();
        });

        let prober = HandshakeProber::new();
        let obs = prober.probe("127.0.0.1", port, "/robots.txt").await.unwrap();

        assert_eq!(obs.params.tls.version, "TLS 1.3");
        assert_eq!(obs.params.tls.cipher_suites, vec!["TLS_AES_256_GCM_SHA384"]);
        assert_eq!(obs.params.tls.extensions, vec!["key_share", "supported_versions"]);
        assert_eq!(obs.params.tls.supported_groups, vec!["x25519"]);
        assert!(obs.params.http2_settings.is_empty());

        // The two stalls land in separate phases.
        assert!(obs.timing.ttfb_ms >= 100);
        assert!(obs.timing.tls_ms >= 100);
        assert!(obs.timing.tls_ms < 200, "{:?}", obs.timing);
        assert!(obs.timing.connection_ms() >= 200);
    }

    #[tokio::test]
    async fn test_handshake_prober_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = HandshakeProber::new()
            .probe("127.0.0.1", port, "/")
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
