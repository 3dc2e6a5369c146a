//! A bounded counting permit with FIFO fairness among waiters.
//!
//! `tokio::sync::Semaphore` would cover the happy path, but the container
//! needs the exact fairness contract spelled out for it: a permit released
//! while waiters are queued must go to the oldest waiter, never to a task
//! that calls `acquire` afterwards, even if that task's acquire lands in
//! the same poll. Hand-rolling the queue on top of a `Mutex<VecDeque<_>>`
//! and `oneshot` channels (the same channel primitive the visibility
//! timeout heartbeat uses to signal shutdown) makes that contract explicit
//! rather than relying on an implementation detail of a library semaphore.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

struct PermitState {
    permits: usize,
    max: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A bounded counting permit. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct ConcurrencyPermit {
    state: Arc<Mutex<PermitState>>,
}

impl ConcurrencyPermit {
    /// Creates a new permit with `max` permits immediately available.
    ///
    /// # Panics
    ///
    /// Panics if `max == 0`; a container with zero concurrency can never
    /// dispatch a message, which is always a configuration mistake.
    pub fn new(max: usize) -> Self {
        assert!(max > 0, "ConcurrencyPermit requires max >= 1");
        ConcurrencyPermit {
            state: Arc::new(Mutex::new(PermitState {
                permits: max,
                max,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Acquires one permit, suspending until one becomes available.
    ///
    /// Returns a guard that releases the permit back to the pool (or hands
    /// it directly to the oldest waiter) when dropped.
    pub async fn acquire(&self) -> PermitGuard {
        let rx = {
            let mut state = self.state.lock().await;
            // The fast path only fires when no waiter is already queued:
            // otherwise a fresh acquire could jump ahead of a task that has
            // been waiting since an earlier, busier moment.
            if state.permits > 0 && state.waiters.is_empty() {
                state.permits -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // The sender side is dropped only by `release`, which always
            // sends before dropping, so a recv error here would indicate
            // the permit itself was dropped while we were queued.
            let _ = rx.await;
        }

        PermitGuard {
            state: self.state.clone(),
            released: false,
        }
    }

    /// Returns the number of permits currently available (not counting
    /// queued waiters). Exposed for tests.
    pub async fn available(&self) -> usize {
        self.state.lock().await.permits
    }

    /// Returns the number of tasks currently queued waiting for a permit.
    /// Exposed for tests.
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.waiters.len()
    }

    async fn release(&self) {
        let mut state = self.state.lock().await;
        if let Some(waiter) = state.waiters.pop_front() {
            // Hand the permit directly to the oldest waiter: no increment,
            // so a concurrent acquire can't observe a spare permit in
            // between.
            let _ = waiter.send(());
        } else if state.permits < state.max {
            state.permits += 1;
        }
        // A release with no waiters and permits already at the cap is a
        // spurious double-release; it's idempotent rather than an error.
    }
}

/// RAII guard returned by [`ConcurrencyPermit::acquire`]. Releases the
/// permit on drop, so an early return or panic inside a message task still
/// frees the slot for the next waiter.
pub struct PermitGuard {
    state: Arc<Mutex<PermitState>>,
    released: bool,
}

impl PermitGuard {
    /// Releases the permit immediately instead of waiting for drop.
    pub async fn release(mut self) {
        self.released = true;
        let permit = ConcurrencyPermit { state: self.state.clone() };
        permit.release().await;
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let state = self.state.clone();
        // Dropping from a non-async context (e.g. task cancellation):
        // spawn the release so the waiter queue is still serviced even
        // though we can't `.await` inside `Drop`.
        tokio::spawn(async move {
            let permit = ConcurrencyPermit { state };
            permit.release().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test_log::test(tokio::test)]
    async fn acquire_and_release_round_trip() {
        let permit = ConcurrencyPermit::new(2);
        assert_eq!(permit.available().await, 2);

        let g1 = permit.acquire().await;
        assert_eq!(permit.available().await, 1);
        let g2 = permit.acquire().await;
        assert_eq!(permit.available().await, 0);

        g1.release().await;
        assert_eq!(permit.available().await, 1);
        g2.release().await;
        assert_eq!(permit.available().await, 2);
    }

    #[test_log::test(tokio::test)]
    async fn never_exceeds_max_outstanding() {
        let max = 3usize;
        let permit = ConcurrencyPermit::new(max);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let permit = permit.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let guard = permit.acquire().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                guard.release().await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= max);
    }

    #[test_log::test(tokio::test)]
    async fn waiters_resume_in_fifo_order() {
        let permit = ConcurrencyPermit::new(1);
        let held = permit.acquire().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            // Stagger spawns slightly so the waiter queue order is
            // deterministic for the assertion below.
            tokio::time::sleep(Duration::from_millis(2)).await;
            let permit = permit.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let guard = permit.acquire().await;
                order.lock().await.push(i);
                guard.release().await;
            }));
        }

        // Give every waiter a chance to enqueue before releasing the
        // initially-held permit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await;

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[test_log::test(tokio::test)]
    async fn release_without_waiters_is_capped_at_max() {
        let permit = ConcurrencyPermit::new(1);
        let guard = permit.acquire().await;
        guard.release().await;
        // Spurious extra release (simulated by acquiring and immediately
        // releasing again) must not push permits above max.
        let guard2 = permit.acquire().await;
        guard2.release().await;
        assert_eq!(permit.available().await, 1);
    }
}
