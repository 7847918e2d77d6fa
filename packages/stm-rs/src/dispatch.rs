//! Command dispatcher and message queue.
//!
//! The `Dispatcher` is responsible for:
//! 1. Running every command on its own task, never on the scheduler loop
//! 2. Unrolling batches, one task per member
//! 3. Delivering produced messages into the bounded queue
//!
//! # Backpressure
//!
//! Delivery into a full queue suspends the command's task, not the caller of
//! `send` and not the scheduler loop. That is the only backpressure in the
//! engine: the number of command tasks is unbounded.
//!
//! # After Cancellation
//!
//! Cancellation never retracts a running command. When the scheduler loop
//! stops, it parks its receiver here instead of dropping it, so late messages
//! still fill the queue and are never consumed. Once the queue is full, a late
//! delivery stays suspended for as long as the machine exists. Such tasks stay
//! counted in [`Dispatcher::inflight`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::cmd::{Cmd, Output};

/// Spawns commands and funnels their messages into the machine's queue.
pub(crate) struct Dispatcher<M> {
    tx: mpsc::Sender<M>,
    runtime: Handle,
    inflight: AtomicUsize,
    /// The loop's receiver once the loop has stopped.
    parked: Mutex<Option<mpsc::Receiver<M>>>,
    machine_id: Uuid,
}

impl<M: Send + 'static> Dispatcher<M> {
    /// Create a dispatcher and the receiving end of its queue.
    pub(crate) fn new(
        capacity: usize,
        runtime: Handle,
        machine_id: Uuid,
    ) -> (Arc<Self>, mpsc::Receiver<M>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dispatcher = Self {
            tx,
            runtime,
            inflight: AtomicUsize::new(0),
            parked: Mutex::new(None),
            machine_id,
        };
        (Arc::new(dispatcher), rx)
    }

    /// Send a command for execution. `None` is a no-op.
    pub(crate) fn send(self: &Arc<Self>, cmd: Option<Cmd<M>>) {
        match cmd {
            Some(cmd) => self.dispatch(cmd),
            None => trace!(machine_id = %self.machine_id, "ignoring absent command"),
        }
    }

    /// Run `cmd` on a new task and deliver whatever it yields.
    pub(crate) fn dispatch(self: &Arc<Self>, cmd: Cmd<M>) {
        let guard = InflightGuard::new(self.clone());
        let dispatcher = self.clone();

        trace!(machine_id = %self.machine_id, "dispatching command");

        self.runtime.spawn(async move {
            let _guard = guard;

            match cmd.invoke().await {
                None => {}
                Some(Output::Batch(cmds)) => {
                    debug!(
                        machine_id = %dispatcher.machine_id,
                        batch_size = cmds.len(),
                        "unrolling command batch"
                    );
                    for cmd in cmds {
                        dispatcher.dispatch(cmd);
                    }
                }
                Some(Output::Msg(msg)) => {
                    // Only fails if the loop died without parking its receiver
                    if dispatcher.tx.send(msg).await.is_err() {
                        debug!(
                            machine_id = %dispatcher.machine_id,
                            "message queue closed, dropping message"
                        );
                    }
                }
            }
        });
    }

    /// Keep the loop's receiver alive after the loop stops.
    pub(crate) fn park(&self, rx: mpsc::Receiver<M>) {
        let mut slot = match self.parked.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(machine_id = %self.machine_id, "parked queue mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *slot = Some(rx);
    }

    /// Number of command tasks that have not finished yet.
    pub(crate) fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Number of delivered messages waiting in the queue.
    pub(crate) fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Capacity of the queue.
    pub(crate) fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Counts a command task for as long as it lives, including on panic.
struct InflightGuard<M> {
    dispatcher: Arc<Dispatcher<M>>,
}

impl<M> InflightGuard<M> {
    fn new(dispatcher: Arc<Dispatcher<M>>) -> Self {
        dispatcher.inflight.fetch_add(1, Ordering::AcqRel);
        Self { dispatcher }
    }
}

impl<M> Drop for InflightGuard<M> {
    fn drop(&mut self) {
        self.dispatcher.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}
