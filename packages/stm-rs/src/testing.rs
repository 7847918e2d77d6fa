//! Testing utilities for stm machines.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! stm = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Using `Recorder` to Observe Updates
//!
//! ```ignore
//! use stm::testing::Recorder;
//!
//! struct Recording {
//!     seen: Arc<Recorder<Msg>>,
//! }
//!
//! impl State<Msg> for Recording {
//!     fn update(self: Box<Self>, msg: Msg) -> Transition<Msg> {
//!         self.seen.record(msg);
//!         (self, None)
//!     }
//! }
//!
//! machine.send(batch([to_cmd(Msg::A), to_cmd(Msg::B)]));
//! recorder.wait_for(2).await;
//! ```
//!
//! # Using `MessageLatch` for Fan-Out Tests
//!
//! ```ignore
//! let latch = shared_latch(3);
//! // each update calls latch.dec()
//! latch.await_zero().await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// A countdown latch for waiting on an exact number of updates.
///
/// Tests should wait for meaning, not time. For tests that might hang, wrap
/// the wait in `tokio::time::timeout`.
#[derive(Debug)]
pub struct MessageLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl MessageLatch {
    /// Create a latch expecting `expected` messages.
    pub fn new(expected: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        }
    }

    /// Count one message.
    ///
    /// # Panics
    ///
    /// Panics if called more times than expected.
    pub fn dec(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("MessageLatch decremented below zero - more messages than expected");
        }
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait for the count to reach zero.
    pub async fn await_zero(&self) {
        loop {
            // Register before checking, notify_waiters is edge-triggered
            let notified = self.notify.notified();

            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Messages still expected.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Check if the latch has reached zero.
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

/// Arc-wrapped latch for sharing between a state and the test body.
pub type SharedMessageLatch = Arc<MessageLatch>;

/// Convenience for `Arc::new(MessageLatch::new(expected))`.
pub fn shared_latch(expected: usize) -> SharedMessageLatch {
    Arc::new(MessageLatch::new(expected))
}

/// Records every message a state receives, in arrival order.
#[derive(Debug)]
pub struct Recorder<M> {
    seen: Mutex<Vec<M>>,
    notify: Notify,
}

impl<M> Recorder<M> {
    /// Create an empty, shareable recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    /// Record one message and wake waiters.
    pub fn record(&self, msg: M) {
        self.lock().push(msg);
        self.notify.notify_waiters();
    }

    /// Number of messages recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` messages have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();

            if self.len() >= count {
                return;
            }

            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<M>> {
        // A panicking test thread must not hide what was recorded
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<M: Clone> Recorder<M> {
    /// Everything recorded so far, in arrival order.
    pub fn messages(&self) -> Vec<M> {
        self.lock().clone()
    }
}
