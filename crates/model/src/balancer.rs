//! Credential-set load balancing.
//!
//! Rotation starts from an atomic round-robin cursor; a set that just
//! failed with a rotatable error is excluded from selection for the
//! cooldown window. Time is read through [`Clock`] so cooldown expiry can
//! be driven by a fake clock in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Time source for cooldown bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Tracks per-credential-set cooldowns and the round-robin cursor.
pub struct LoadBalancer {
    /// When each set entered cooldown (None = available).
    cooldowns: Mutex<Vec<Option<Instant>>>,
    cursor: AtomicUsize,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl LoadBalancer {
    pub fn new(sets: usize, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldowns: Mutex::new(vec![None; sets]),
            cursor: AtomicUsize::new(0),
            cooldown,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.cooldowns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The order to try credential sets this invocation: every index once,
    /// starting at the advancing round-robin cursor.
    pub fn rotation_order(&self) -> Vec<usize> {
        let n = self.len();
        if n == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        (0..n).map(|i| (start + i) % n).collect()
    }

    /// Whether a set is still inside its cooldown window. An expired
    /// window is cleared as a side effect.
    pub fn in_cooldown(&self, index: usize) -> bool {
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock();
        match cooldowns.get(index).copied().flatten() {
            Some(since) if now.duration_since(since) < self.cooldown => true,
            Some(_) => {
                cooldowns[index] = None;
                false
            }
            None => false,
        }
    }

    /// Exclude a set from selection for the cooldown window.
    pub fn mark_cooldown(&self, index: usize) {
        let now = self.clock.now();
        let mut cooldowns = self.cooldowns.lock();
        if let Some(slot) = cooldowns.get_mut(index) {
            *slot = Some(now);
        }
        tracing::warn!(credential_set = index, "credential set entered cooldown");
    }
}
