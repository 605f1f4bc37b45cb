//! Shared attempts-counter-plus-ban-window bookkeeping.
//!
//! Channel pairing (`cowork-channels`) and the Control Plane's per-remote-
//! address auth failures (`cowork-gateway::control_plane`) are both "count
//! failures against a key, ban the key once it crosses a threshold" — this
//! is that one mechanism, keyed generically so both call sites share it
//! instead of each re-deriving the same counter-plus-timestamp struct.

use dashmap::DashMap;
use std::hash::Hash;

#[derive(Clone, Debug)]
struct Entry {
    attempts: u32,
    banned_until: Option<chrono::DateTime<chrono::Utc>>,
}

/// Tracks failed attempts per key and bans a key once it crosses
/// `max_attempts`, for `ban_duration`.
pub struct LockoutTracker<K: Eq + Hash + Clone> {
    entries: DashMap<K, Entry>,
    max_attempts: u32,
    ban_duration: chrono::Duration,
}

impl<K: Eq + Hash + Clone> LockoutTracker<K> {
    pub fn new(max_attempts: u32, ban_duration: chrono::Duration) -> Self {
        Self { entries: DashMap::new(), max_attempts, ban_duration }
    }

    /// `Some(remaining)` if `key` is currently banned, `None` otherwise.
    pub fn banned_for(&self, key: &K) -> Option<chrono::Duration> {
        let entry = self.entries.get(key)?;
        let until = entry.banned_until?;
        let now = chrono::Utc::now();
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn is_banned(&self, key: &K) -> bool {
        self.banned_for(key).is_some()
    }

    /// Record a failed attempt, banning the key if it crosses the threshold.
    /// Returns `true` if this call is what triggered the ban.
    pub fn record_failure(&self, key: &K) -> bool {
        let mut entry = self.entries.entry(key.clone()).or_insert(Entry { attempts: 0, banned_until: None });
        entry.attempts += 1;
        if entry.attempts >= self.max_attempts && entry.banned_until.is_none() {
            entry.banned_until = Some(chrono::Utc::now() + self.ban_duration);
            true
        } else {
            false
        }
    }

    /// Clear a key's record entirely, e.g. on a successful attempt.
    pub fn reset(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn attempts(&self, key: &K) -> u32 {
        self.entries.get(key).map(|e| e.attempts).unwrap_or(0)
    }
}
