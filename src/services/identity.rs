use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;
use tower_cookies::{
    cookie::{time::Duration, SameSite},
    Cookie, Cookies,
};

/// Cookie holding the participant's anonymous ID.
pub const ANON_COOKIE: &str = "anon_id";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_FRAGMENT_LEN: usize = 6;

/// Supplies the pseudo-identity of the current browser instance.
///
/// Implementations persist the ID wherever the client keeps state; the
/// service never maps it to a person.
pub trait AnonymousIdentityProvider {
    /// Returns the stored ID, generating and persisting a new one if absent.
    fn get_or_create(&self) -> String;
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Generates `student_<base36 millis>_<6 random base36 chars>`.
pub fn generate_anonymous_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let random: String = (0..RANDOM_FRAGMENT_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    format!("student_{}_{}", to_base36(millis), random)
}

/// Whether `id` has the shape produced by [`generate_anonymous_id`].
pub fn is_well_formed(id: &str) -> bool {
    let is_base36 = |s: &str| !s.is_empty() && s.bytes().all(|b| BASE36.contains(&b));

    let mut parts = id.split('_');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("student"), Some(time), Some(random), None)
            if is_base36(time) && time.len() <= 13
                && random.len() == RANDOM_FRAGMENT_LEN && is_base36(random)
    )
}

/// Keeps the anonymous ID in a long-lived HttpOnly cookie, which is the
/// browser-local storage available to an HTTP service.
pub struct CookieIdentity {
    cookies: Cookies,
    max_age_days: i64,
    secure: bool,
}

impl CookieIdentity {
    pub fn new(cookies: Cookies, max_age_days: i64, secure: bool) -> Self {
        Self {
            cookies,
            max_age_days,
            secure,
        }
    }

    fn persist(&self, id: &str) {
        let mut cookie = Cookie::new(ANON_COOKIE, id.to_string());
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(Duration::days(self.max_age_days));
        cookie.set_path("/");
        self.cookies.add(cookie);
    }
}

impl AnonymousIdentityProvider for CookieIdentity {
    fn get_or_create(&self) -> String {
        if let Some(cookie) = self.cookies.get(ANON_COOKIE) {
            if is_well_formed(cookie.value()) {
                return cookie.value().to_string();
            }
            tracing::debug!("Discarding malformed anonymous ID cookie");
        }

        let id = generate_anonymous_id();
        self.persist(&id);
        tracing::debug!("🆕 Issued anonymous participant ID");
        id
    }
}

/// In-memory provider for tests and non-browser callers.
#[derive(Default)]
pub struct MemoryIdentity {
    stored: Mutex<Option<String>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the stored ID, as clearing browser storage would.
    pub fn clear(&self) {
        if let Ok(mut stored) = self.stored.lock() {
            *stored = None;
        }
    }
}

impl AnonymousIdentityProvider for MemoryIdentity {
    fn get_or_create(&self) -> String {
        match self.stored.lock() {
            Ok(mut stored) => stored.get_or_insert_with(generate_anonymous_id).clone(),
            // a poisoned lock still yields a usable, if unsaved, identity
            Err(_) => generate_anonymous_id(),
        }
    }
}
