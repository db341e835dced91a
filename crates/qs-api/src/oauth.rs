//! Outstanding OAuth `state` values
//!
//! Each login issues one; the callback consumes it. Entries expire after a
//! fixed lifetime and the registry never holds more than a fixed number, so
//! abandoned logins cannot grow it without bound.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// How long a login may take between `/auth/login` and the callback
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on outstanding states
pub const MAX_STATES: usize = 256;

pub struct OAuthStates {
    ttl: Duration,
    capacity: usize,
    issued: Mutex<HashMap<String, Instant>>,
}

impl Default for OAuthStates {
    fn default() -> Self {
        Self::new(STATE_TTL, MAX_STATES)
    }
}

impl OAuthStates {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Remember a freshly issued state, evicting expired entries and, when
    /// still full, the oldest one
    pub async fn issue(&self, state: String) {
        let now = Instant::now();
        let mut issued = self.issued.lock().await;
        issued.retain(|_, at| now.duration_since(*at) < self.ttl);

        while issued.len() >= self.capacity {
            let Some(oldest) = issued
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(state, _)| state.clone())
            else {
                break;
            };
            debug!("Evicting oldest outstanding OAuth state");
            issued.remove(&oldest);
        }
        issued.insert(state, now);
    }

    /// Remove `state`; `true` only if it was issued and has not expired
    pub async fn consume(&self, state: &str) -> bool {
        let removed = self.issued.lock().await.remove(state);
        removed.is_some_and(|at| at.elapsed() < self.ttl)
    }

    pub async fn outstanding(&self) -> usize {
        self.issued.lock().await.len()
    }
}
