//! Synchronization helpers shared by the lifecycle managers.

pub mod keyed_lock;
pub mod timers;

pub use keyed_lock::{KeyedLock, KeyedLockGuard};
pub use timers::{Ticket, TimerSet};
