//! Front origin calibration.
//!
//! A [`Calibrator`] probes a reference server through a [`Prober`], reduces
//! what it observed to [`ProtocolParameters`] and fingerprints them as a
//! [`TemplateId`]: the SHA-256 of their canonical encoding with every list
//! sorted. Templates are cached per host for a fixed window.
//!
//! Recalibrating a host whose fingerprint changed, or presenting live
//! parameters that drift past the tolerance, raises a
//! [`TemplateChangeAlert`] with a structural diff. That is the interception
//! detector.
//!
//! ```text
//!   UNCALIBRATED ──calibrate──▶ CALIBRATING ──probe ok──▶ CACHED
//!        ▲                          │                       │
//!        └──────all paths fail──────┘                  ttl elapsed
//!                                                           ▼
//!                                                        EXPIRED
//! ```

mod alert;
mod cache;
mod calibrator;
mod diff;
mod handshake;
mod prober;
mod template;

pub use alert::{Severity, TemplateChangeAlert};
pub use cache::TemplateCache;
pub use calibrator::{CalibrationState, Calibrator, ConnectionCheck};
pub use diff::{diff, within_tolerance, Change, ChangeKind};
pub use handshake::{ClientHelloBuilder, ParsedServerHello, ServerHelloParser};
pub use prober::{HandshakeProber, Prober, SimulatedProber};
pub use template::{
    browser_profile, Observation, ProtocolParameters, Template, TemplateId, Timing,
    TlsParameters,
};

/// Template validity window (24 hours)
pub const DEFAULT_CACHE_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default numeric tolerance for live connection checks
pub const DEFAULT_TOLERANCE_PERCENT: u8 = 10;
