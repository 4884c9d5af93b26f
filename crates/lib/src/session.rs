//! In-flight session bookkeeping.
//!
//! At most one entry exists per (chat, user) pair. While it exists, further messages for the
//! same pair must not start another agent invocation. Entries are removed on release or by the
//! periodic sweep; nothing is persisted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Identity of one conversation thread: (chat id, user id).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionKey {
    pub chat_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub last_activity: Instant,
    pub in_flight: bool,
}

/// Map of in-flight sessions. acquire, release and sweep all take the same lock and never
/// await while holding it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<SessionKey, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionEntry>> {
        // Poisoning is ignored: no critical section leaves the map half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an entry for `key` if none exists. Returns false when one is already in flight.
    pub fn try_acquire(&self, key: &SessionKey) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &SessionKey, now: Instant) -> bool {
        let mut g = self.entries();
        if g.contains_key(key) {
            return false;
        }
        g.insert(
            key.clone(),
            SessionEntry {
                last_activity: now,
                in_flight: true,
            },
        );
        true
    }

    /// Acquire `key` and return a lease that releases it when dropped.
    pub fn try_lease(self: &Arc<Self>, key: SessionKey) -> Option<SessionLease> {
        if self.try_acquire(&key) {
            Some(SessionLease {
                registry: Arc::clone(self),
                key,
            })
        } else {
            None
        }
    }

    /// Remove the entry for `key`, whatever state it is in.
    pub fn release(&self, key: &SessionKey) {
        self.entries().remove(key);
    }

    /// Remove entries idle for longer than `ttl` as of `now`. Returns how many were removed.
    pub fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let mut g = self.entries();
        let before = g.len();
        g.retain(|_, e| now.saturating_duration_since(e.last_activity) <= ttl);
        before - g.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.entries().contains_key(key)
    }
}

/// An acquired session. Dropping it releases the entry, including during a panic unwind.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
}

impl SessionLease {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn the periodic sweep. Runs every `ttl` (at most daily), removing entries idle for longer
/// than `ttl`.
pub fn spawn_sweeper(registry: Arc<SessionRegistry>, ttl: Duration) -> JoinHandle<()> {
    // Capped so interval arithmetic stays in range for very large TTLs.
    let period = if ttl.is_zero() {
        Duration::from_secs(1)
    } else {
        ttl.min(MAX_SWEEP_PERIOD)
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep(Instant::now(), ttl);
            if removed > 0 {
                log::info!("sessions: swept {} stale entries", removed);
            }
        }
    })
}
