//! Reputation & Counter Store (C2, §4.2).
//!
//! A process-local, concurrent keyed store with per-entry TTL, used for the
//! blacklist set, the fixed-window rate limiter, IP reputation, and the
//! verdict cache. Every operation here is the in-process equivalent of the
//! distilled source's Redis-backed store (`redis_client.py`) — `REDIS_HOST`
//! et al. describe the external deployment topology this core stands in for,
//! but no network hop happens on the hot path; entries live in `DashMap`s the
//! same way the teacher keeps `dedup`/`rl_key`/`rl_geo` state (see
//! `examples/burakkonte-sinyalist/backend/src/main.rs`).
//!
//! Failure policy (§4.2): every read/write here is infallible by
//! construction (no network, no I/O), so the fail-open-on-store-error
//! language in the spec has no fault to recover from in this
//! implementation — it is preserved as the contract callers rely on, should
//! a networked backend replace this one later.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::model::IpReputation;

struct RateCounterEntry {
    count: u32,
    window_started_at: Instant,
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

pub struct CounterStore {
    blacklist: DashMap<String, Instant>,
    rate_limit: DashMap<String, RateCounterEntry>,
    reputation: DashMap<String, Expiring<IpReputation>>,
    verdict_cache: DashMap<String, Expiring<f64>>,
}

impl Default for CounterStore {
    fn default() -> Self {
        CounterStore {
            blacklist: DashMap::new(),
            rate_limit: DashMap::new(),
            reputation: DashMap::new(),
            verdict_cache: DashMap::new(),
        }
    }
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constant-time existence check against the blacklist set.
    pub fn is_blacklisted(&self, ip: &str) -> bool {
        match self.blacklist.get(ip) {
            Some(entry) => *entry > Instant::now(),
            None => false,
        }
    }

    pub fn blacklist(&self, ip: &str, ttl: Duration) {
        self.blacklist.insert(ip.to_string(), Instant::now() + ttl);
    }

    pub fn whitelist(&self, ip: &str) {
        self.blacklist.remove(ip);
    }

    /// Fixed-window counter (§4.2). Returns `false` iff the post-increment
    /// count exceeds `limit`. A first observation in a window seeds the
    /// counter at 1; the window resets once `window` has elapsed since it
    /// started. Known weakness: a race between the read and the increment
    /// can double-admit one request at a window boundary — acceptable, see
    /// §9.
    pub fn check_rate_limit(&self, ip: &str, limit: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut entry = self
            .rate_limit
            .entry(ip.to_string())
            .or_insert_with(|| RateCounterEntry {
                count: 0,
                window_started_at: now,
            });

        if now.duration_since(entry.window_started_at) > window {
            entry.count = 1;
            entry.window_started_at = now;
            return true;
        }

        entry.count += 1;
        entry.count <= limit
    }

    pub fn get_reputation(&self, ip: &str) -> Option<IpReputation> {
        self.reputation.get(ip).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value)
            } else {
                None
            }
        })
    }

    pub fn set_reputation(&self, ip: &str, rep: IpReputation, ttl: Duration) {
        self.reputation.insert(
            ip.to_string(),
            Expiring {
                value: rep,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn get_verdict_cache(&self, digest: &str) -> Option<f64> {
        self.verdict_cache.get(digest).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value)
            } else {
                None
            }
        })
    }

    pub fn set_verdict_cache(&self, digest: &str, score: f64, ttl: Duration) {
        self.verdict_cache.insert(
            digest.to_string(),
            Expiring {
                value: score,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drops expired entries from every map. Intended to run on a background
    /// interval (see `main.rs`), not on the hot path.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.blacklist.retain(|_, expires_at| *expires_at > now);
        self.reputation.retain(|_, e| e.expires_at > now);
        self.verdict_cache.retain(|_, e| e.expires_at > now);
        // Rate-limit entries age out naturally the next time their window is
        // checked, but a sweep keeps memory bounded for IPs that stop
        // sending traffic entirely.
        self.rate_limit
            .retain(|_, e| now.duration_since(e.window_started_at) < Duration::from_secs(3600));
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_round_trip() {
        let s = CounterStore::new();
        assert!(!s.is_blacklisted("1.2.3.4"));
        s.blacklist("1.2.3.4", Duration::from_secs(60));
        assert!(s.is_blacklisted("1.2.3.4"));
        s.whitelist("1.2.3.4");
        assert!(!s.is_blacklisted("1.2.3.4"));
    }

    #[test]
    fn rate_limit_boundary() {
        let s = CounterStore::new();
        let window = Duration::from_secs(60);
        for _ in 0..5 {
            assert!(s.check_rate_limit("9.9.9.9", 5, window));
        }
        // 6th request in the same window is over the limit.
        assert!(!s.check_rate_limit("9.9.9.9", 5, window));
    }

    #[test]
    fn verdict_cache_round_trip() {
        let s = CounterStore::new();
        assert_eq!(s.get_verdict_cache("abc"), None);
        s.set_verdict_cache("abc", 0.42, Duration::from_secs(300));
        assert_eq!(s.get_verdict_cache("abc"), Some(0.42));
    }

    #[test]
    fn reputation_defaults_are_caller_responsibility() {
        let s = CounterStore::new();
        assert_eq!(s.get_reputation("5.5.5.5"), None);
        s.set_reputation("5.5.5.5", IpReputation::default(), Duration::from_secs(3600));
        assert_eq!(s.get_reputation("5.5.5.5"), Some(IpReputation::default()));
    }
}
