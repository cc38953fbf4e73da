// Pending authorization requests
// Each consent redirect carries a one-time `state` that the callback must return

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a login may take between redirect and callback
pub const PENDING_STATE_TTL: Duration = Duration::from_secs(600);

/// One-time `state` values issued by `/auth/login`
pub struct PendingAuthorizations {
    /// Issue time indexed by state value
    entries: DashMap<String, Instant>,

    ttl: Duration,
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh state value, pruning expired ones
    pub fn issue(&self) -> String {
        let ttl = self.ttl;
        self.entries.retain(|_, issued| issued.elapsed() <= ttl);

        let state = Uuid::new_v4().simple().to_string();
        self.entries.insert(state.clone(), Instant::now());
        state
    }

    /// Accept a state value once; unknown or expired values are rejected
    pub fn consume(&self, state: &str) -> bool {
        match self.entries.remove(state) {
            Some((_, issued)) => issued.elapsed() <= self.ttl,
            None => false,
        }
    }

    /// Number of outstanding states, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(PENDING_STATE_TTL)
    }
}
