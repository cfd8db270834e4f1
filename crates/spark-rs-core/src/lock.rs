//! Storage-backed generation lock.
//!
//! Foreground and background triggers share no memory, so mutual exclusion
//! is a timestamped row in the durable store. A row is abandoned (stale)
//! when its timestamp is in the future, falls on a different local day, or
//! is older than the staleness window. Writes use the store's
//! compare-and-swap so two contexts racing on the same row cannot both win.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use spark_rs_store::{LockRecord, SparkStore, StoreError};
use std::sync::Arc;

/// Why an existing lock row is treated as abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    FutureTimestamp,
    PriorDay,
    Expired,
}

/// Evaluation of the lock row for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held { acquired_at: DateTime<Utc> },
    Stale {
        acquired_at: DateTime<Utc>,
        reason: StaleReason,
    },
}

/// Advisory per-user generation lock.
#[derive(Clone)]
pub struct GenerationLock {
    store: Arc<dyn SparkStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl GenerationLock {
    pub fn new(store: Arc<dyn SparkStore>, clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            store,
            clock,
            stale_after,
        }
    }

    /// Classify a lock row relative to `now`.
    pub fn evaluate(&self, record: Option<LockRecord>, now: DateTime<Utc>) -> LockState {
        let Some(record) = record else {
            return LockState::Free;
        };
        let acquired_at = record.acquired_at;
        let reason = if acquired_at > now {
            Some(StaleReason::FutureTimestamp)
        } else if self.clock.local_date(acquired_at) != self.clock.local_date(now) {
            Some(StaleReason::PriorDay)
        } else if now - acquired_at > self.stale_after {
            Some(StaleReason::Expired)
        } else {
            None
        };
        match reason {
            Some(reason) => LockState::Stale {
                acquired_at,
                reason,
            },
            None => LockState::Held { acquired_at },
        }
    }

    /// Current state of the user's lock.
    pub async fn state(&self, user_id: &str) -> Result<LockState, StoreError> {
        let record = self.store.read_lock(user_id).await?;
        Ok(self.evaluate(record, self.clock.now()))
    }

    /// Try to take the lock. Returns false while another holder is fresh.
    pub async fn acquire(&self, user_id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let existing = self.store.read_lock(user_id).await?;
        let fresh = LockRecord { acquired_at: now };

        let acquired = match self.evaluate(existing, now) {
            LockState::Free => self.store.swap_lock(user_id, None, fresh).await?,
            LockState::Held { acquired_at } => {
                debug!(
                    "generation lock held (user_id={user_id}, age_secs={})",
                    (now - acquired_at).num_seconds()
                );
                false
            }
            LockState::Stale {
                acquired_at,
                reason,
            } => {
                warn!(
                    "reclaiming stale generation lock (user_id={user_id}, reason={reason:?}, acquired_at={acquired_at})"
                );
                self.store.swap_lock(user_id, existing, fresh).await?
            }
        };

        if acquired {
            info!("generation lock acquired (user_id={user_id})");
        }
        Ok(acquired)
    }

    /// Drop the lock. Failures are logged; staleness reclaims the row later.
    pub async fn release(&self, user_id: &str) {
        match self.store.delete_lock(user_id).await {
            Ok(()) => debug!("generation lock released (user_id={user_id})"),
            Err(err) => warn!("failed to release generation lock (user_id={user_id}): {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::day_window_in;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use spark_rs_store::{DayWindow, SqliteSparkStore};

    struct TestClock {
        now: Mutex<DateTime<Utc>>,
        tz: FixedOffset,
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }

        fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
            instant.with_timezone(&self.tz).date_naive()
        }

        fn day_window(&self, date: NaiveDate) -> DayWindow {
            day_window_in(&self.tz, date)
        }
    }

    fn setup(now: DateTime<Utc>) -> (GenerationLock, Arc<SqliteSparkStore>, Arc<TestClock>) {
        let store = Arc::new(SqliteSparkStore::open_in_memory().expect("store"));
        let clock = Arc::new(TestClock {
            now: Mutex::new(now),
            tz: FixedOffset::east_opt(0).expect("utc"),
        });
        let lock = GenerationLock::new(store.clone(), clock.clone(), Duration::minutes(5));
        (lock, store, clock)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0)
            .single()
            .expect("noon")
    }

    #[tokio::test]
    async fn acquire_then_block_then_release() {
        let (lock, _, _) = setup(noon());
        assert!(lock.acquire("u1").await.expect("first"));
        assert!(!lock.acquire("u1").await.expect("second"));
        assert!(lock.acquire("u2").await.expect("other user"));
        lock.release("u1").await;
        assert!(lock.acquire("u1").await.expect("after release"));
    }

    #[tokio::test]
    async fn six_minute_old_lock_is_reclaimed() {
        let (lock, store, _) = setup(noon());
        let old = LockRecord {
            acquired_at: noon() - Duration::minutes(6),
        };
        store.swap_lock("u1", None, old).await.expect("seed");

        assert!(lock.acquire("u1").await.expect("reclaim"));
        let record = store.read_lock("u1").await.expect("read");
        assert_eq!(record, Some(LockRecord { acquired_at: noon() }));
    }

    #[tokio::test]
    async fn four_minute_old_lock_blocks() {
        let (lock, store, _) = setup(noon());
        let recent = LockRecord {
            acquired_at: noon() - Duration::minutes(4),
        };
        store.swap_lock("u1", None, recent).await.expect("seed");

        assert!(!lock.acquire("u1").await.expect("blocked"));
        assert_eq!(
            lock.state("u1").await.expect("state"),
            LockState::Held {
                acquired_at: recent.acquired_at
            }
        );
    }

    #[tokio::test]
    async fn future_and_prior_day_locks_are_stale() {
        let (lock, _, _) = setup(noon());
        let future = LockRecord {
            acquired_at: noon() + Duration::minutes(1),
        };
        assert!(matches!(
            lock.evaluate(Some(future), noon()),
            LockState::Stale {
                reason: StaleReason::FutureTimestamp,
                ..
            }
        ));

        let midnight = Utc
            .with_ymd_and_hms(2026, 5, 5, 0, 1, 0)
            .single()
            .expect("after midnight");
        let yesterday = LockRecord {
            acquired_at: midnight - Duration::minutes(2),
        };
        assert!(matches!(
            lock.evaluate(Some(yesterday), midnight),
            LockState::Stale {
                reason: StaleReason::PriorDay,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn concurrent_acquire_has_one_winner() {
        let (lock, _, _) = setup(noon());
        let (a, b) = tokio::join!(lock.acquire("u1"), lock.acquire("u1"));
        let wins = [a.expect("a"), b.expect("b")]
            .iter()
            .filter(|won| **won)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn clock_advance_makes_lock_stale() {
        let (lock, _, clock) = setup(noon());
        assert!(lock.acquire("u1").await.expect("first"));
        *clock.now.lock() = noon() + Duration::minutes(5) + Duration::seconds(1);
        assert!(lock.acquire("u1").await.expect("after staleness window"));
    }
}
