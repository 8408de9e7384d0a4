use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use tower_cookies::Cookies;

use crate::{
    config::Config,
    error::AppError,
    services::identity::{is_well_formed, ANON_COOKIE},
    state::AppState,
};

/// Extracts the client address used for throttling.
///
/// # Arguments
///
/// * `req` - The incoming request.
/// * `trust_forwarded` - Whether the first `X-Forwarded-For` hop names the client.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>, trust_forwarded: bool) -> String {
    let forwarded = trust_forwarded
        .then(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .flatten();

    forwarded.unwrap_or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

fn participant_id(cookies: &Cookies) -> Option<String> {
    cookies
        .get(ANON_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|id| is_well_formed(id))
}

/// The Redis key counting failed code attempts from one address.
pub fn address_attempt_key(ip: &str) -> String {
    format!("rate_limit:access:ip:{}", ip)
}

/// The Redis key counting failed code attempts from one browser.
pub fn participant_attempt_key(anonymous_id: &str) -> String {
    format!("rate_limit:access:participant:{}", anonymous_id)
}

/// Only "no such code" is a guess; a real code that is closed is not.
pub fn counts_as_failure(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
}

/// Which counter tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptScope {
    Participant,
    Address,
}

/// Failed attempts seen so far in the current window.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptCounts {
    pub participant: Option<u32>,
    pub address: Option<u32>,
}

/// Two budgets: a tight one per browser and a loose one per address, so a
/// classroom sharing one NAT is not locked out by a few typos while a
/// guesser rotating cookies is still bounded by the address.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPolicy {
    pub participant_limit: u32,
    pub address_limit: u32,
}

impl AttemptPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            participant_limit: config.access_attempt_limit,
            address_limit: config.access_attempt_ip_limit,
        }
    }

    pub fn blocked_by(&self, counts: AttemptCounts) -> Option<AttemptScope> {
        if counts.participant.is_some_and(|n| n >= self.participant_limit) {
            Some(AttemptScope::Participant)
        } else if counts.address.is_some_and(|n| n >= self.address_limit) {
            Some(AttemptScope::Address)
        } else {
            None
        }
    }
}

async fn attempt_count(redis: &ConnectionManager, key: &str) -> Option<u32> {
    redis::cmd("GET")
        .arg(key)
        .query_async(&mut redis.clone())
        .await
        .unwrap_or(None)
}

async fn record_failure(redis: &ConnectionManager, key: &str, window_secs: u64) {
    let _: () = redis::cmd("INCR")
        .arg(key)
        .query_async(&mut redis.clone())
        .await
        .unwrap_or(());

    let _: () = redis::cmd("EXPIRE")
        .arg(key)
        .arg(window_secs)
        .query_async(&mut redis.clone())
        .await
        .unwrap_or(());
}

/// A middleware that throttles access-code guessing.
///
/// Only attempts that end in "not found" are counted, and counters are never
/// cleared early: they expire with the window. Submission deduplication
/// never looks at addresses; this guards the code space, not the response set.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or 429 once a budget is spent.
pub async fn rate_limit_access(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(redis) = state.redis.clone() else {
        return next.run(req).await;
    };

    let policy = AttemptPolicy::from_config(&state.config);
    let window = state.config.access_attempt_window_secs;
    let cookies = req.extensions().get::<Cookies>().cloned();

    let address_key = address_attempt_key(&extract_real_ip(&req, state.config.trust_forwarded));
    let participant_key = cookies
        .as_ref()
        .and_then(participant_id)
        .map(|id| participant_attempt_key(&id));

    let counts = AttemptCounts {
        participant: match &participant_key {
            Some(key) => attempt_count(&redis, key).await,
            None => None,
        },
        address: attempt_count(&redis, &address_key).await,
    };

    if let Some(scope) = policy.blocked_by(counts) {
        let key = match scope {
            AttemptScope::Participant => participant_key.as_deref().unwrap_or(address_key.as_str()),
            AttemptScope::Address => address_key.as_str(),
        };
        let ttl: Option<i64> = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut redis.clone())
            .await
            .unwrap_or(None);

        return AppError::RateLimitExceeded(format!(
            "Too many incorrect access codes. Try again in {} minutes",
            ttl.unwrap_or(0).max(60) / 60
        ))
        .into_response();
    }

    let response = next.run(req).await;

    if counts_as_failure(response.status()) {
        // the handler may just have issued the cookie
        let participant_key = participant_key.or_else(|| {
            cookies
                .as_ref()
                .and_then(participant_id)
                .map(|id| participant_attempt_key(&id))
        });
        if let Some(key) = participant_key {
            record_failure(&redis, &key, window).await;
        }
        record_failure(&redis, &address_key, window).await;
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AttemptPolicy {
        AttemptPolicy {
            participant_limit: 10,
            address_limit: 200,
        }
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(address_attempt_key("203.0.113.9"), "rate_limit:access:ip:203.0.113.9");
        assert_eq!(
            participant_attempt_key("student_abc_123456"),
            "rate_limit:access:participant:student_abc_123456"
        );
    }

    #[test]
    fn only_unknown_codes_count() {
        assert!(counts_as_failure(StatusCode::NOT_FOUND));
        assert!(!counts_as_failure(StatusCode::OK));
        assert!(!counts_as_failure(StatusCode::FORBIDDEN));
        assert!(!counts_as_failure(StatusCode::GONE));
        assert!(!counts_as_failure(StatusCode::CONFLICT));
    }

    #[test]
    fn one_browser_is_cut_off_at_its_own_limit() {
        let counts = AttemptCounts {
            participant: Some(10),
            address: Some(10),
        };
        assert_eq!(policy().blocked_by(counts), Some(AttemptScope::Participant));

        let under = AttemptCounts {
            participant: Some(9),
            address: Some(9),
        };
        assert_eq!(policy().blocked_by(under), None);
    }

    #[test]
    fn shared_address_tolerates_a_classroom_of_typos() {
        // thirty students, one typo each, one NAT
        let fresh_student = AttemptCounts {
            participant: None,
            address: Some(30),
        };
        assert_eq!(policy().blocked_by(fresh_student), None);
    }

    #[test]
    fn rotating_cookies_is_bounded_by_the_address() {
        let counts = AttemptCounts {
            participant: Some(1),
            address: Some(200),
        };
        assert_eq!(policy().blocked_by(counts), Some(AttemptScope::Address));
    }

    #[test]
    fn exhausted_budget_renders_429() {
        let response = AppError::RateLimitExceeded("Try again in 15 minutes".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn address_comes_from_the_socket_unless_proxy_is_trusted() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_real_ip(&req, false), "unknown");

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 5000))));
        assert_eq!(extract_real_ip(&req, false), "198.51.100.4");
        assert_eq!(extract_real_ip(&req, true), "203.0.113.9");
    }
}
