//! Deduplicating work queue of pending instance keys.
//!
//! A key is queued at most once. A key re-added while a worker processes it
//! is held back until [`PendingQueue::done`] and then queued again, so one
//! instance is never scheduled by two passes at once.
//!
//! Keys that found no feasible fleet are parked in an unschedulable set and
//! returned to the queue by [`PendingQueue::move_unschedulable_to_active`]
//! when fleet capacity may have changed. Each such move bumps a cycle
//! counter; a pass that read the counter before a move and parks its key
//! afterwards gets the key re-queued instead, so no move is missed.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    order: VecDeque<String>,
    /// Keys waiting to be processed (queued or held back).
    dirty: HashSet<String>,
    processing: HashSet<String>,
    unschedulable: HashSet<String>,
    /// Bumped by every `move_unschedulable_to_active`.
    move_cycle: u64,
    shut_down: bool,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("pending queue lock poisoned")
    }

    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if Self::activate(&mut state, key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Mark `key` dirty and queue it unless a worker holds it. Returns true
    /// when the key was pushed onto the queue.
    fn activate(state: &mut QueueState, key: &str) -> bool {
        if state.shut_down {
            return false;
        }
        state.unschedulable.remove(key);
        if !state.dirty.insert(key.to_string()) {
            return false;
        }
        if state.processing.contains(key) {
            return false;
        }
        state.order.push_back(key.to_string());
        true
    }

    /// Queue `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(instance = %key, "re-queueing after delay");
            queue.add(&key);
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.order.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shut_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a popped key as processed, re-queueing it if it was added again
    /// in the meantime.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.order.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop every trace of `key`.
    pub fn forget(&self, key: &str) {
        let mut state = self.lock();
        if state.dirty.remove(key) {
            state.order.retain(|k| k != key);
        }
        state.unschedulable.remove(key);
    }

    /// Current move cycle. A pass reads it before looking at fleet capacity
    /// and hands it back to [`PendingQueue::mark_unschedulable`].
    pub fn move_cycle(&self) -> u64 {
        self.lock().move_cycle
    }

    /// Park a key that found no feasible fleet. `seen_cycle` is the move
    /// cycle read when the pass started; if a move happened since, the key
    /// is re-queued instead of parked. Returns true when parked.
    pub fn mark_unschedulable(&self, key: &str, seen_cycle: u64) -> bool {
        let mut state = self.lock();
        if state.shut_down {
            return false;
        }
        if state.move_cycle != seen_cycle {
            let pushed = Self::activate(&mut state, key);
            drop(state);
            if pushed {
                self.notify.notify_one();
            }
            debug!(instance = %key, "fleets changed during pass, re-queued");
            return false;
        }
        state.unschedulable.insert(key.to_string());
        true
    }

    /// Re-queue every parked key. Returns how many were moved.
    pub fn move_unschedulable_to_active(&self) -> usize {
        let mut state = self.lock();
        state.move_cycle += 1;
        let parked: Vec<String> = state.unschedulable.drain().collect();
        let mut pushed = 0;
        for key in &parked {
            if Self::activate(&mut state, key) {
                pushed += 1;
            }
        }
        drop(state);
        for _ in 0..pushed {
            self.notify.notify_one();
        }
        if !parked.is_empty() {
            debug!(count = parked.len(), "unschedulable instances re-queued");
        }
        parked.len()
    }

    /// Stop accepting keys and wake every waiting worker.
    pub fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Keys waiting to be popped.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unschedulable_len(&self) -> usize {
        self.lock().unschedulable.len()
    }
}
