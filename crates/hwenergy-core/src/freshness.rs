// ── Freshness cache ──
//
// Single-slot store for the latest value of a continuously updated
// quantity. Reads fail once the value is older than the configured
// window, and "never written" reads the same as "expired".

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CoreError;

/// A value together with the instant it was written.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub value: T,
    pub written_at: Instant,
}

/// Latest-value cache with a fixed max-age.
///
/// Backed by a `watch` channel: writes replace the slot atomically, reads
/// clone out under the channel's lock, and renderers can subscribe to be
/// woken on every write.
#[derive(Debug)]
pub struct FreshnessCache<T> {
    slot: watch::Sender<Option<Stamped<T>>>,
    max_age: Duration,
}

impl<T: Clone> FreshnessCache<T> {
    pub fn new(max_age: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Store `value`, stamped with the current instant.
    pub fn set(&self, value: T) {
        self.slot.send_replace(Some(Stamped {
            value,
            written_at: Instant::now(),
        }));
    }

    /// The stored value, if written no longer than `max_age` ago.
    pub fn get(&self) -> Result<T, CoreError> {
        let slot = self.slot.borrow();
        match slot.as_ref() {
            Some(stamped) if stamped.written_at.elapsed() <= self.max_age => {
                Ok(stamped.value.clone())
            }
            _ => Err(CoreError::Stale {
                max_age: self.max_age,
            }),
        }
    }

    /// Time since the last write, if any.
    pub fn age(&self) -> Option<Duration> {
        self.slot
            .borrow()
            .as_ref()
            .map(|stamped| stamped.written_at.elapsed())
    }

    /// Receiver notified on every write.
    pub fn subscribe(&self) -> watch::Receiver<Option<Stamped<T>>> {
        self.slot.subscribe()
    }
}
