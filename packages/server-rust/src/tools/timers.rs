//! Cancellable background timers keyed by connection id or entry name.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use nsmesh_core::Context;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug)]
struct Slot {
    generation: u64,
    token: CancellationToken,
}

/// Handed to a timer callback: identifies the arming that fired and stays
/// cancellable, so long-running callbacks (refresh loops) can wait again.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub generation: u64,
    token: CancellationToken,
}

impl Ticket {
    /// Sleeps for `delay`. Returns `false` if the timer was cancelled or
    /// replaced meanwhile.
    pub async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Resolves once the timer is cancelled or replaced.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Timer arena owned by one element.
///
/// Each key holds at most one pending timer. Arming a key replaces its
/// timer; a callback that wakes up after being replaced finds its
/// generation stale via [`TimerSet::take_if_current`] and does nothing.
/// Every timer runs in a child scope of the element's context and is
/// tracked, so [`TimerSet::shutdown`] stops them all deterministically.
#[derive(Debug)]
pub struct TimerSet {
    scope: Context,
    tracker: TaskTracker,
    slots: DashMap<String, Slot>,
    generation: AtomicU64,
}

impl TimerSet {
    #[must_use]
    pub fn new(scope: &Context) -> Self {
        Self {
            scope: scope.child(),
            tracker: TaskTracker::new(),
            slots: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Context background work should run under.
    #[must_use]
    pub fn scope(&self) -> &Context {
        &self.scope
    }

    /// Replaces the timer for `key` with one firing after `delay`.
    /// `on_fire` receives the ticket to check with `take_if_current`.
    pub fn arm<F, Fut>(&self, key: &str, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(Ticket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.scope.token().child_token();
        if let Some(previous) = self.slots.insert(
            key.to_string(),
            Slot {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }
        let ticket = Ticket { generation, token };
        self.tracker.spawn(async move {
            if ticket.sleep(delay).await {
                on_fire(ticket).await;
            }
        });
        generation
    }

    /// Runs `task` under the tracker without a slot, for follow-up work
    /// that must still be awaited on shutdown.
    pub fn spawn<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Cancels the pending timer for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some((_, slot)) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the slot for `key` if `generation` still owns it.
    pub fn take_if_current(&self, key: &str, generation: u64) -> bool {
        self.slots
            .remove_if(key, |_, slot| slot.generation == generation)
            .is_some()
    }

    #[must_use]
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.generation == generation)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cancels every timer and waits for running callbacks to finish.
    pub async fn shutdown(&self) {
        self.scope.cancel();
        self.slots.clear();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
