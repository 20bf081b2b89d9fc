//! Keyed trailing-edge debouncer.
//!
//! Each call for a key cancels the timer scheduled by the previous call and
//! schedules its own job. When a key stays quiet for the full delay, the last
//! job runs once and every caller from the burst receives its result.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The scheduled job panicked or was dropped before producing a result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("debounced job did not complete")]
pub struct DebounceCancelled;

struct Slot<T> {
    generation: u64,
    timer: JoinHandle<()>,
    waiters: Vec<oneshot::Sender<T>>,
}

pub struct Debouncer<K, T> {
    delay: Duration,
    slots: Arc<Mutex<HashMap<K, Slot<T>>>>,
    next_generation: Arc<AtomicU64>,
}

impl<K, T> Clone for Debouncer<K, T> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            slots: Arc::clone(&self.slots),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<K, T> fmt::Debug for Debouncer<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("pending", &self.slots.lock().len())
            .finish()
    }
}

impl<K, T> Debouncer<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Keys with a timer still waiting to fire.
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }

    /// Schedule `job` for `key` and wait for the result of whichever job ends
    /// up running for this burst.
    ///
    /// Must be called from inside a Tokio runtime.
    ///
    /// # Errors
    /// [`DebounceCancelled`] if the job that would have answered never finished.
    pub async fn call<F, Fut>(&self, key: K, job: F) -> Result<T, DebounceCancelled>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let mut slots = self.slots.lock();
            let mut waiters = match slots.remove(&key) {
                Some(previous) => {
                    // Still in the map, so the timer has not claimed the slot.
                    previous.timer.abort();
                    previous.waiters
                }
                None => Vec::new(),
            };
            waiters.push(sender);

            let timer = tokio::spawn(Self::fire(
                Arc::clone(&self.slots),
                key.clone(),
                generation,
                self.delay,
                job,
            ));
            slots.insert(
                key,
                Slot {
                    generation,
                    timer,
                    waiters,
                },
            );
        }

        receiver.await.map_err(|_| DebounceCancelled)
    }

    async fn fire<F, Fut>(
        slots: Arc<Mutex<HashMap<K, Slot<T>>>>,
        key: K,
        generation: u64,
        delay: Duration,
        job: F,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        tokio::time::sleep(delay).await;

        let waiters = {
            let mut slots = slots.lock();
            if slots.get(&key).map(|slot| slot.generation) != Some(generation) {
                return;
            }
            slots.remove(&key).map(|slot| slot.waiters).unwrap_or_default()
        };

        let result = job().await;
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_last_job_once() {
        let debouncer: Debouncer<&'static str, u32> = Debouncer::new(Duration::from_millis(300));
        let runs = Arc::new(AtomicUsize::new(0));

        let job = |value: u32| {
            let runs = Arc::clone(&runs);
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                value
            }
        };

        let first = debouncer.call("feb", job(1));
        let second = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            debouncer.call("feb", job(2)).await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, Ok(2));
        assert_eq!(second, Ok(2));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_quiet_period() {
        let debouncer: Debouncer<u8, ()> = Debouncer::new(Duration::from_millis(300));
        let started = tokio::time::Instant::now();

        debouncer.call(1, || async {}).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer: Debouncer<u8, u8> = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = |value: u8| {
            let runs = Arc::clone(&runs);
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                value
            }
        };

        let (a, b) = tokio::join!(debouncer.call(1, counted(10)), debouncer.call(2, counted(20)));

        assert_eq!((a, b), (Ok(10), Ok(20)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_reports_cancellation() {
        let debouncer: Debouncer<u8, u8> = Debouncer::new(Duration::from_millis(10));

        let fail = true;
        let result = debouncer
            .call(1, move || async move {
                assert!(!fail, "job failed");
                0
            })
            .await;

        assert_eq!(result, Err(DebounceCancelled));
    }
}
