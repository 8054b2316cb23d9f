//! Deduplicating work queue of request keys.
//!
//! A key is handed to at most one worker at a time. Adding a key that is already
//! queued is a no-op; adding a key that is being processed marks it dirty, and it is
//! queued again once the worker calls [`WorkQueue::done`]. Delayed adds keep only
//! the earliest pending ready time per key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use courier_common::types::ObjectKey;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys that need a pass: queued, or re-added while processing.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    /// Earliest scheduled ready time of each delayed key.
    delayed: HashMap<ObjectKey, Instant>,
    shutting_down: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    ///
    /// A key already scheduled at or before the new ready time is left alone; an
    /// earlier ready time supersedes the pending one.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready = Instant::now() + delay;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.shutting_down {
                return;
            }
            if state.delayed.get(&key).is_some_and(|pending| *pending <= ready) {
                return;
            }
            state.delayed.insert(key.clone(), ready);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(ready).await;
            let due = {
                let mut state = queue.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.delayed.get(&key) == Some(&ready) {
                    state.delayed.remove(&key);
                    true
                } else {
                    false
                }
            };
            if due {
                queue.add(key);
            }
        });
    }

    /// Number of keys waiting on a delayed add.
    pub fn delayed_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .delayed
            .len()
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished; re-queue it if it was added meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys; blocked `get` calls return `None`.
    pub fn shutdown(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
