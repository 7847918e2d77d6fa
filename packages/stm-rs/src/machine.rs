//! The machine: scheduler loop, lifecycle, and the send entry points.
//!
//! A machine holds one current state and a bounded message queue. A single
//! scheduler loop task consumes the queue; every command runs on its own task
//! and reports back by delivering a message.
//!
//! ```text
//! send(cmd) ──► Dispatcher ──► task: cmd.invoke()
//!                  ▲                 │
//!                  │                 ├─ Msg ───► queue ──► loop: state.update(msg)
//!                  │                 │                          │
//!                  │                 └─ Batch ─► send(each)     │
//!                  │                                            │
//!                  └──────────────── Some(cmd) ◄────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! The loop starts as soon as the machine is built and runs until its
//! cancellation token fires. Cancellation stops consumption for good; it does
//! not retract commands that are already running.
//!
//! The initial state's `init` is **not** run at start. Send it yourself if
//! you want it:
//!
//! ```ignore
//! let initial = Idle::new();
//! let init = initial.init();
//! let machine = Machine::new(cancel, initial);
//! machine.send(init);
//! ```

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};
use uuid::Uuid;

use crate::cmd::Cmd;
use crate::config::MachineConfig;
use crate::dispatch::Dispatcher;
use crate::error::StmError;
use crate::state::State;

/// Something commands can be sent to.
///
/// Hand this out to producers that should be able to feed a machine without
/// owning it.
pub trait Sender<M>: Send + Sync {
    /// Run `cmd` in the background and deliver its result. `None` is a no-op.
    fn send_cmd(&self, cmd: Option<Cmd<M>>);
}

/// A running state machine.
///
/// # Example
///
/// ```ignore
/// use tokio_util::sync::CancellationToken;
/// use stm::{to_cmd, Machine};
///
/// let cancel = CancellationToken::new();
/// let machine = Machine::new(cancel.clone(), Idle);
///
/// machine.send(to_cmd(Msg::Ping));
///
/// // Later
/// cancel.cancel();
/// machine.join().await?;
/// ```
pub struct Machine<M> {
    id: Uuid,
    name: &'static str,
    dispatcher: Arc<Dispatcher<M>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl<M: Send + 'static> Machine<M> {
    /// Start a machine with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. Use
    /// [`MachineBuilder::with_runtime`] to start from other threads.
    pub fn new<S: State<M>>(cancel: CancellationToken, initial: S) -> Self {
        MachineBuilder::new(initial).start(cancel)
    }

    /// Create a machine builder.
    pub fn builder<S: State<M>>(initial: S) -> MachineBuilder<M> {
        MachineBuilder::new(initial)
    }

    /// Run `cmd` in the background and deliver its result to the machine.
    ///
    /// Returns immediately. `None` is a no-op. Safe to call from many tasks or
    /// threads at once.
    pub fn send(&self, cmd: impl Into<Option<Cmd<M>>>) {
        self.dispatcher.send(cmd.into());
    }

    /// A cloneable, send-only handle to this machine.
    pub fn handle(&self) -> MachineHandle<M> {
        MachineHandle {
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Unique id of this machine, as used in log fields.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable name for debugging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of command tasks that have not finished yet.
    ///
    /// After cancellation, tasks stuck delivering into a full queue never
    /// finish and stay counted here.
    pub fn inflight(&self) -> usize {
        self.dispatcher.inflight()
    }

    /// Number of messages waiting to be consumed.
    pub fn queued(&self) -> usize {
        self.dispatcher.queued()
    }

    /// Capacity of the message queue.
    pub fn capacity(&self) -> usize {
        self.dispatcher.capacity()
    }

    /// Stop the scheduler loop.
    ///
    /// Only this machine's token is cancelled; the token it was started with
    /// is left alone.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the scheduler loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the scheduler loop to exit.
    ///
    /// Does not cancel anything by itself. Returns
    /// [`StmError::LoopPanicked`] if a state's `update` panicked.
    pub async fn join(self) -> Result<(), StmError> {
        self.handle.await?;
        Ok(())
    }
}

impl<M: Send + 'static> Sender<M> for Machine<M> {
    fn send_cmd(&self, cmd: Option<Cmd<M>>) {
        self.dispatcher.send(cmd);
    }
}

impl<M> std::fmt::Debug for Machine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stopped", &self.handle.is_finished())
            .finish_non_exhaustive()
    }
}

/// Cloneable, send-only handle to a running machine.
pub struct MachineHandle<M> {
    dispatcher: Arc<Dispatcher<M>>,
}

impl<M: Send + 'static> MachineHandle<M> {
    /// See [`Machine::send`].
    pub fn send(&self, cmd: impl Into<Option<Cmd<M>>>) {
        self.dispatcher.send(cmd.into());
    }
}

impl<M: Send + 'static> Sender<M> for MachineHandle<M> {
    fn send_cmd(&self, cmd: Option<Cmd<M>>) {
        self.dispatcher.send(cmd);
    }
}

impl<M> Clone for MachineHandle<M> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<M> std::fmt::Debug for MachineHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineHandle").finish_non_exhaustive()
    }
}

/// Builder for configuring a machine before it starts.
///
/// # Example
///
/// ```ignore
/// let machine = MachineBuilder::new(Idle)
///     .with_name("checkout")
///     .with_message_buffer_size(64)
///     .start(cancel.clone());
/// ```
pub struct MachineBuilder<M> {
    initial: Box<dyn State<M>>,
    config: MachineConfig,
    runtime: Option<Handle>,
    name: &'static str,
}

impl<M: Send + 'static> MachineBuilder<M> {
    /// Create a builder around the initial state.
    ///
    /// The name defaults to the initial state's type name.
    pub fn new<S: State<M>>(initial: S) -> Self {
        Self {
            initial: Box::new(initial),
            config: MachineConfig::default(),
            runtime: None,
            name: std::any::type_name::<S>(),
        }
    }

    /// Replace the queue capacity (default 10).
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero. Use `try_with_message_buffer_size` for a
    /// non-panicking version.
    pub fn with_message_buffer_size(self, size: usize) -> Self {
        self.try_with_message_buffer_size(size)
            .unwrap_or_else(|e| panic!("{}", e))
    }

    /// Replace the queue capacity, returning an error if it is zero.
    pub fn try_with_message_buffer_size(self, size: usize) -> Result<Self, StmError> {
        self.try_with_config(MachineConfig {
            message_buffer_size: size,
        })
    }

    /// Apply a whole configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. Use `try_with_config` for a
    /// non-panicking version.
    pub fn with_config(self, config: MachineConfig) -> Self {
        self.try_with_config(config).unwrap_or_else(|e| panic!("{}", e))
    }

    /// Apply a whole configuration, returning an error if it is invalid.
    pub fn try_with_config(mut self, config: MachineConfig) -> Result<Self, StmError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Spawn the loop and all command tasks on this runtime.
    ///
    /// Without it, `start` uses the runtime it is called from.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the name used in log fields.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Start the scheduler loop and return the running machine.
    ///
    /// The loop stops when `cancel` (or [`Machine::cancel`]) fires.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was given and this is called outside a tokio
    /// runtime.
    pub fn start(self, cancel: CancellationToken) -> Machine<M> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let id = Uuid::new_v4();
        let (dispatcher, rx) =
            Dispatcher::new(self.config.message_buffer_size, runtime.clone(), id);
        let cancel = cancel.child_token();

        let scheduler = SchedulerLoop {
            id,
            name: self.name,
            state: self.initial,
            rx,
            dispatcher: dispatcher.clone(),
            cancel: cancel.clone(),
        };
        let handle = runtime.spawn(scheduler.run());

        Machine {
            id,
            name: self.name,
            dispatcher,
            cancel,
            handle,
        }
    }
}

impl<M> std::fmt::Debug for MachineBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The single serial consumer of a machine's queue.
///
/// Sole owner of the current state.
struct SchedulerLoop<M> {
    id: Uuid,
    name: &'static str,
    state: Box<dyn State<M>>,
    rx: mpsc::Receiver<M>,
    dispatcher: Arc<Dispatcher<M>>,
    cancel: CancellationToken,
}

impl<M: Send + 'static> SchedulerLoop<M> {
    async fn run(self) {
        let SchedulerLoop {
            id,
            name,
            mut state,
            mut rx,
            dispatcher,
            cancel,
        } = self;

        info!(
            machine = name,
            machine_id = %id,
            buffer_size = dispatcher.capacity(),
            "stm scheduler loop starting"
        );

        loop {
            tokio::select! {
                // A fired token wins over queued messages
                biased;

                _ = cancel.cancelled() => break,

                Some(msg) = rx.recv() => {
                    trace!(machine = name, machine_id = %id, "applying message");

                    let (next, cmd) = state.update(msg);
                    state = next;

                    if let Some(cmd) = cmd {
                        dispatcher.dispatch(cmd);
                    }
                }
            }
        }

        // Late deliveries land here and are never consumed
        dispatcher.park(rx);

        info!(
            machine = name,
            machine_id = %id,
            inflight = dispatcher.inflight(),
            "stm scheduler loop stopped"
        );
    }
}
