//! C9 State Store: sticky sessions, target cooldowns, and model health.
//!
//! Three independently-locked maps (§5): no single request ever needs more
//! than one of them at a time, so there is no risk of lock-ordering
//! deadlocks. Each uses `dashmap` for sharded concurrent access — the same
//! crate the teacher already depends on for its rate limiter.
//!
//! Expiry is lazy: readers check `expires_at` against now and remove an
//! expired entry on the spot ("lock → check → delete → return none", §5).
//! Background sweepers additionally walk each map on a timer so memory is
//! reclaimed even for keys nobody reads again.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::TargetIdentity;

/// Sweep interval for sticky-session entries (§4.8).
pub const STICKY_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Sweep interval for cooldown entries (§4.8).
pub const COOLDOWN_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Sweep interval for model-health entries (§4.8).
pub const HEALTH_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Fraction of sticky entries evicted in bulk when an insert would exceed
/// `max_sticky_keys` (§4.8): oldest-first, roughly a fifth of capacity.
const STICKY_EVICTION_FRACTION: f64 = 0.2;

/// Why a target is cooling down, carried for log/decision-tag purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Auth,
    Validation,
    Quota,
    Transient,
    TransientHeavy,
    Signature,
    Other,
}

#[derive(Debug, Clone)]
struct CooldownEntry {
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct StickyEntry {
    target: TargetIdentity,
    thinking_locked: bool,
    expires_at: Instant,
    inserted_at: Instant,
}

/// §3: `{ failure_streak, success_streak, updated_at }`, keyed by
/// `(session_key_hash|"anon", requested_alias)`.
#[derive(Debug, Clone, Default)]
struct HealthEntry {
    failure_streak: u64,
    success_streak: u64,
    expires_at: Option<Instant>,
}

/// Shared, concurrency-safe store for sticky sessions, cooldowns, and model
/// health, backing C9. Cheap to clone (wraps `Arc`-free `DashMap`s directly —
/// intended to be held behind a single `Arc<StateStore>` in `RouterState`).
#[derive(Debug, Default)]
pub struct StateStore {
    /// Key: `(session_key, alias)` (§3).
    sticky: DashMap<(String, String), StickyEntry>,
    /// Key: `(alias, target_identity)` (§3).
    cooldowns: DashMap<(String, TargetIdentity), CooldownEntry>,
    /// Key: `(session_key_hash|"anon", requested_alias)` (§3).
    health: DashMap<(String, String), HealthEntry>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sticky sessions ────────────────────────────────────────────────

    /// Look up the sticky target for a `(session_key, alias)` pair, if
    /// present and unexpired.
    pub fn get_sticky(&self, session_key: &str, alias: &str) -> Option<(TargetIdentity, bool)> {
        let now = Instant::now();
        let key = (session_key.to_string(), alias.to_string());
        if let Some(entry) = self.sticky.get(&key) {
            if entry.expires_at > now {
                return Some((entry.target.clone(), entry.thinking_locked));
            }
        }
        self.sticky.remove(&key);
        None
    }

    /// Cross-model thinking-lock pre-step (§4.4): scan every alias's sticky
    /// slot for this session and return the first live, thinking-locked
    /// entry, ignoring cooldown entirely. Iteration order over the
    /// underlying map isn't significant in practice since at most one
    /// thinking-locked entry is ever live per session (a session locks onto
    /// a single signature group for its lifetime).
    pub fn find_thinking_locked_sticky(&self, session_key: &str) -> Option<(String, TargetIdentity)> {
        let now = Instant::now();
        self.sticky.iter().find_map(|entry| {
            let (key_session, key_alias) = entry.key();
            if key_session == session_key && entry.value().thinking_locked && entry.value().expires_at > now {
                Some((key_alias.clone(), entry.value().target.clone()))
            } else {
                None
            }
        })
    }

    /// Record (or refresh) a sticky-session binding, enforcing `max_sticky_keys`.
    pub fn set_sticky(
        &self,
        session_key: String,
        alias: String,
        target: TargetIdentity,
        thinking_locked: bool,
        ttl: Duration,
        max_keys: usize,
    ) {
        let now = Instant::now();
        let key = (session_key, alias);
        if self.sticky.len() >= max_keys && !self.sticky.contains_key(&key) {
            self.evict_oldest_sticky(max_keys);
        }
        self.sticky.insert(
            key,
            StickyEntry {
                target,
                thinking_locked,
                expires_at: now + ttl,
                inserted_at: now,
            },
        );
    }

    /// Invalidate the sticky binding for a `(session_key, alias)` pair, used
    /// by classifier-driven clear-sticky decisions (§4.7).
    pub fn clear_sticky(&self, session_key: &str, alias: &str) {
        self.sticky.remove(&(session_key.to_string(), alias.to_string()));
    }

    fn evict_oldest_sticky(&self, max_keys: usize) {
        let to_evict = ((max_keys as f64) * STICKY_EVICTION_FRACTION).ceil() as usize;
        let mut entries: Vec<((String, String), Instant)> = self
            .sticky
            .iter()
            .map(|e| (e.key().clone(), e.value().inserted_at))
            .collect();
        entries.sort_by_key(|(_, inserted_at)| *inserted_at);
        for (key, _) in entries.into_iter().take(to_evict.max(1)) {
            self.sticky.remove(&key);
        }
    }

    pub fn sweep_sticky(&self) {
        let now = Instant::now();
        self.sticky.retain(|_, entry| entry.expires_at > now);
    }

    pub fn sticky_len(&self) -> usize {
        self.sticky.len()
    }

    // ── Cooldowns ───────────────────────────────────────────────────────

    /// True if `(alias, target)` is currently cooling down (and not yet expired).
    pub fn is_cooling_down(&self, alias: &str, target: &TargetIdentity) -> bool {
        let now = Instant::now();
        let key = (alias.to_string(), target.clone());
        if let Some(entry) = self.cooldowns.get(&key) {
            if entry.expires_at > now {
                return true;
            }
        }
        self.cooldowns.remove(&key);
        false
    }

    pub fn set_cooldown(&self, alias: &str, target: TargetIdentity, _kind: CooldownKind, duration: Duration) {
        self.cooldowns.insert(
            (alias.to_string(), target),
            CooldownEntry {
                expires_at: Instant::now() + duration,
            },
        );
    }

    pub fn clear_cooldown(&self, alias: &str, target: &TargetIdentity) {
        self.cooldowns.remove(&(alias.to_string(), target.clone()));
    }

    pub fn sweep_cooldowns(&self) {
        let now = Instant::now();
        self.cooldowns.retain(|_, entry| entry.expires_at > now);
    }

    pub fn cooldown_len(&self) -> usize {
        self.cooldowns.len()
    }

    // ── Model health ────────────────────────────────────────────────────

    /// `health_key` is `session_key_hash` or the literal `"anon"` for
    /// unauthenticated/keyless sessions (§3). Resets `failure_streak` to
    /// zero and bumps `success_streak`.
    pub fn record_success(&self, health_key: &str, alias: &str, ttl: Duration) {
        let key = (health_key.to_string(), alias.to_string());
        let mut entry = self.health.entry(key).or_default();
        entry.success_streak += 1;
        entry.failure_streak = 0;
        entry.expires_at = Some(Instant::now() + ttl);
    }

    /// Resets `success_streak` to zero and bumps `failure_streak`.
    pub fn record_failure(&self, health_key: &str, alias: &str, ttl: Duration) {
        let key = (health_key.to_string(), alias.to_string());
        let mut entry = self.health.entry(key).or_default();
        entry.failure_streak += 1;
        entry.success_streak = 0;
        entry.expires_at = Some(Instant::now() + ttl);
    }

    /// `(failure_streak, success_streak)` for a health key, if the entry
    /// hasn't expired. Absent data reads as `(0, 0)`, equivalent to healthy.
    pub fn health_status(&self, health_key: &str, alias: &str) -> (u64, u64) {
        let now = Instant::now();
        let key = (health_key.to_string(), alias.to_string());
        if let Some(entry) = self.health.get(&key) {
            if entry.expires_at.map(|e| e > now).unwrap_or(true) {
                return (entry.failure_streak, entry.success_streak);
            }
        }
        self.health.remove(&key);
        (0, 0)
    }

    pub fn sweep_health(&self) {
        let now = Instant::now();
        self.health.retain(|_, entry| entry.expires_at.map(|e| e > now).unwrap_or(true));
    }

    pub fn health_len(&self) -> usize {
        self.health.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(n: &str) -> TargetIdentity {
        TargetIdentity {
            provider_instance: n.to_string(),
            backend_url: format!("https://{n}"),
            upstream_model: "m".to_string(),
        }
    }

    #[test]
    fn sticky_round_trip() {
        let store = StateStore::new();
        store.set_sticky(
            "session-1".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_secs(60),
            500,
        );
        let (t, locked) = store.get_sticky("session-1", "auto").expect("should be present");
        assert_eq!(t, target("a"));
        assert!(!locked);
    }

    #[test]
    fn sticky_is_scoped_per_alias() {
        let store = StateStore::new();
        store.set_sticky(
            "session-1".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_secs(60),
            500,
        );
        assert!(store.get_sticky("session-1", "strong").is_none());
    }

    #[test]
    fn sticky_expires() {
        let store = StateStore::new();
        store.set_sticky(
            "session-1".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_millis(1),
            500,
        );
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.get_sticky("session-1", "auto").is_none());
    }

    #[test]
    fn sticky_clear_removes_binding() {
        let store = StateStore::new();
        store.set_sticky(
            "session-1".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_secs(60),
            500,
        );
        store.clear_sticky("session-1", "auto");
        assert!(store.get_sticky("session-1", "auto").is_none());
    }

    #[test]
    fn sticky_eviction_on_overflow() {
        let store = StateStore::new();
        for i in 0..10 {
            store.set_sticky(
                format!("session-{i}"),
                "auto".to_string(),
                target("a"),
                false,
                Duration::from_secs(60),
                10,
            );
        }
        assert_eq!(store.sticky_len(), 10);
        store.set_sticky(
            "session-new".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_secs(60),
            10,
        );
        assert!(store.sticky_len() < 11, "overflow insert should trigger bulk eviction");
        assert!(store.get_sticky("session-new", "auto").is_some());
    }

    #[test]
    fn cooldown_round_trip_and_clear() {
        let store = StateStore::new();
        let t = target("a");
        assert!(!store.is_cooling_down("auto", &t));
        store.set_cooldown("auto", t.clone(), CooldownKind::Auth, Duration::from_secs(60));
        assert!(store.is_cooling_down("auto", &t));
        store.clear_cooldown("auto", &t);
        assert!(!store.is_cooling_down("auto", &t));
    }

    #[test]
    fn cooldown_is_scoped_per_alias() {
        let store = StateStore::new();
        let t = target("a");
        store.set_cooldown("auto", t.clone(), CooldownKind::Auth, Duration::from_secs(60));
        assert!(!store.is_cooling_down("strong", &t));
    }

    #[test]
    fn cooldown_expires_lazily() {
        let store = StateStore::new();
        let t = target("a");
        store.set_cooldown("auto", t.clone(), CooldownKind::Transient, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!store.is_cooling_down("auto", &t));
        assert_eq!(store.cooldown_len(), 0);
    }

    #[test]
    fn health_tracks_independent_streaks() {
        let store = StateStore::new();
        store.record_failure("anon", "auto", Duration::from_secs(60));
        store.record_failure("anon", "auto", Duration::from_secs(60));
        assert_eq!(store.health_status("anon", "auto"), (2, 0));

        store.record_success("anon", "auto", Duration::from_secs(60));
        assert_eq!(store.health_status("anon", "auto"), (0, 1));
    }

    #[test]
    fn health_expires() {
        let store = StateStore::new();
        store.record_failure("anon", "auto", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.health_status("anon", "auto"), (0, 0));
    }

    #[test]
    fn sweepers_remove_expired_entries() {
        let store = StateStore::new();
        store.set_sticky(
            "s".to_string(),
            "auto".to_string(),
            target("a"),
            false,
            Duration::from_millis(1),
            500,
        );
        store.set_cooldown("auto", target("b"), CooldownKind::Auth, Duration::from_millis(1));
        store.record_failure("anon", "auto", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));

        store.sweep_sticky();
        store.sweep_cooldowns();
        store.sweep_health();

        assert_eq!(store.sticky_len(), 0);
        assert_eq!(store.cooldown_len(), 0);
        assert_eq!(store.health_len(), 0);
    }
}
