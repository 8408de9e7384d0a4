//! Best-effort collection metadata: device class, fingerprint and IP.
//!
//! Nothing in here may fail a submission. The worst case for the address
//! is `"unknown"`.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Deserialize;

use crate::{
    config::Config,
    models::response::{DeviceType, ResponseMetadata},
};

/// Sentinel recorded when no strategy produced an address.
pub const UNKNOWN_IP: &str = "unknown";

/// Request-derived facts about the caller.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: String,
    /// `X-Forwarded-For` (first hop) or `X-Real-IP`.
    pub forwarded_for: Option<String>,
    pub peer: Option<IpAddr>,
}

/// Signals the browser reports for fingerprinting. All optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ClientSignals {
    #[garde(length(max = 512))]
    pub canvas: Option<String>,
    #[garde(length(max = 64))]
    pub language: Option<String>,
    #[garde(length(max = 64))]
    pub platform: Option<String>,
    #[garde(range(max = 4096))]
    pub hardware_concurrency: Option<u32>,
    /// e.g. `1920x1080x24`
    #[garde(length(max = 64))]
    pub screen: Option<String>,
    #[garde(length(max = 64))]
    pub timezone: Option<String>,
    #[garde(length(max = 256))]
    pub renderer: Option<String>,
    /// Address the browser learned from its own lookup.
    #[garde(length(max = 64))]
    pub reported_ip: Option<String>,
}

const TABLET_MARKERS: &[&str] = &["tablet", "ipad", "playbook", "silk"];
const MOBILE_MARKERS: &[&str] = &[
    "mobile",
    "iphone",
    "ipod",
    "android",
    "blackberry",
    "iemobile",
    "kindle",
    "webos",
    "hpwos",
    "opera mini",
    "opera mobi",
];

/// Classifies a user agent. Tablet markers win over mobile ones.
pub fn device_type(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();

    let tablet = TABLET_MARKERS.iter().any(|m| ua.contains(m))
        || (ua.contains("android") && !ua.contains("mobi"));

    if tablet {
        DeviceType::Tablet
    } else if MOBILE_MARKERS.iter().any(|m| ua.contains(m)) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

/// Folds the user agent and browser signals into a 16-hex-char digest.
/// Low entropy by construction; it is a hint for abuse analysis, not an ID.
pub fn fingerprint(user_agent: &str, signals: &ClientSignals) -> String {
    let concurrency = signals.hardware_concurrency.map(|n| n.to_string());
    let parts = [
        Some(user_agent),
        signals.canvas.as_deref(),
        signals.language.as_deref(),
        signals.platform.as_deref(),
        concurrency.as_deref(),
        signals.screen.as_deref(),
        signals.timezone.as_deref(),
        signals.renderer.as_deref(),
    ];

    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.unwrap_or_default().as_bytes());
        hasher.update(b"|");
    }
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// One way of learning the participant's address.
///
/// Only sources that describe the participant belong here. Anything resolved
/// from the server's own vantage point (outbound lookups, interface addresses)
/// would record the server's address instead.
#[derive(Debug, Clone)]
pub enum IpStrategy {
    /// First hop of `X-Forwarded-For` / `X-Real-IP`. Only offered when the
    /// service sits behind a trusted proxy.
    ForwardedHeader(Option<String>),
    PeerAddress(Option<IpAddr>),
    /// Address the browser learned from its own lookup services.
    ClientReported(Option<String>),
}

impl IpStrategy {
    fn name(&self) -> &'static str {
        match self {
            IpStrategy::ForwardedHeader(_) => "forwarded-header",
            IpStrategy::PeerAddress(_) => "peer-address",
            IpStrategy::ClientReported(_) => "client-reported",
        }
    }

    fn address(&self) -> Option<IpAddr> {
        match self {
            IpStrategy::ForwardedHeader(header) => header
                .as_deref()
                .and_then(|h| h.split(',').next())
                .and_then(parse_ip),
            IpStrategy::PeerAddress(peer) => *peer,
            IpStrategy::ClientReported(reported) => reported.as_deref().and_then(parse_ip),
        }
    }
}

/// Runs `strategies` in order; the first address found wins, otherwise
/// [`UNKNOWN_IP`].
pub fn resolve_ip(strategies: &[IpStrategy]) -> String {
    for strategy in strategies {
        match strategy.address() {
            Some(ip) => return ip.to_string(),
            None => tracing::debug!("IP strategy {} found nothing", strategy.name()),
        }
    }
    tracing::debug!("No IP strategy succeeded, recording '{}'", UNKNOWN_IP);
    UNKNOWN_IP.to_string()
}

/// Seconds between form load and submission, if the client told us when it
/// started and the clock values are sane.
pub fn completion_seconds(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    let elapsed = (now - started_at?).num_seconds();
    (elapsed >= 0).then_some(elapsed)
}

/// Assembles [`ResponseMetadata`] for one submission.
#[derive(Clone, Copy)]
pub struct MetadataCollector {
    trust_forwarded: bool,
}

impl MetadataCollector {
    pub fn new(config: &Config) -> Self {
        Self {
            trust_forwarded: config.trust_forwarded,
        }
    }

    /// The ordered IP strategy list for one request.
    pub fn strategies(&self, client: &ClientContext, signals: &ClientSignals) -> Vec<IpStrategy> {
        let mut strategies = Vec::with_capacity(3);
        if self.trust_forwarded {
            strategies.push(IpStrategy::ForwardedHeader(client.forwarded_for.clone()));
        }
        strategies.push(IpStrategy::PeerAddress(client.peer));
        strategies.push(IpStrategy::ClientReported(signals.reported_ip.clone()));
        strategies
    }

    /// Never fails: every field has a fallback.
    pub fn collect(
        &self,
        client: &ClientContext,
        signals: &ClientSignals,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ResponseMetadata {
        let ip = resolve_ip(&self.strategies(client, signals));

        ResponseMetadata {
            ip,
            user_agent: client.user_agent.clone(),
            fingerprint: fingerprint(&client.user_agent, signals),
            device_type: device_type(&client.user_agent),
            started_at,
            completion_time_seconds: completion_seconds(started_at, now),
        }
    }
}
