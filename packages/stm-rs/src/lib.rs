//! # stm
//!
//! A message-driven state machine engine: one actor holds one current state,
//! consumes messages serially, and reacts with a new state plus an optional
//! command that runs in the background.
//!
//! ## Core Concepts
//!
//! - [`State`] = behavior (what to do with the next message)
//! - [`Cmd`] = effect (deferred work that reports back with a message)
//!
//! States never do IO and commands never touch state. The only way a command
//! talks to the machine is by returning a message.
//!
//! ## Architecture
//!
//! ```text
//! caller ─► send(cmd)
//!              │
//!              ▼
//!         Dispatcher ── one task per command ──┐
//!              ▲                               │
//!              │                     Msg       ▼     Batch
//!              │              queue ◄──── cmd.invoke() ────► send(each member)
//!              │                │
//!              │                ▼
//!              │         Scheduler loop (single consumer)
//!              │                │
//!              │                ▼
//!              └─ Some(cmd) ◄─ state.update(msg) ─► next state
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One current state** - owned by the scheduler loop, never shared
//! 2. **Serial updates** - `update` sees messages one at a time, in queue order
//! 3. **Commands run concurrently** - each on its own task, no ordering between them
//! 4. **Backpressure, not loss** - a full queue suspends the delivering task
//! 5. **Cancellation stops consumption only** - running commands are not retracted
//!
//! ## Known Limitations
//!
//! - The initial state's `init` is not run when a machine starts; only
//!   [`transition_to`] runs `init`.
//! - The number of command tasks is unbounded. After cancellation, a command
//!   that finishes into a full queue stays suspended for as long as the
//!   machine exists; [`Machine::inflight`] shows such tasks.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stm::{timer, to_cmd, transition_to, Cmd, Machine, State, Transition};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum Msg {
//!     Ping,
//!     Pong,
//!     Start,
//!     Tick,
//! }
//!
//! struct Idle;
//! struct Running { ticks: u32 }
//!
//! impl State<Msg> for Idle {
//!     fn update(self: Box<Self>, msg: Msg) -> Transition<Msg> {
//!         match msg {
//!             Msg::Ping => (self, Some(to_cmd(Msg::Pong))),
//!             Msg::Start => transition_to(Running { ticks: 0 }, []),
//!             _ => (self, None),
//!         }
//!     }
//! }
//!
//! impl State<Msg> for Running {
//!     fn update(mut self: Box<Self>, msg: Msg) -> Transition<Msg> {
//!         if let Msg::Tick = msg {
//!             self.ticks += 1;
//!         }
//!         (self, Some(timer(Duration::from_secs(1), Msg::Tick)))
//!     }
//!
//!     fn init(&self) -> Option<Cmd<Msg>> {
//!         Some(to_cmd(Msg::Tick))
//!     }
//! }
//!
//! let cancel = CancellationToken::new();
//! let machine = Machine::new(cancel.clone(), Idle);
//! machine.send(to_cmd(Msg::Start));
//!
//! // ...
//! cancel.cancel();
//! machine.join().await?;
//! ```

// Core modules
mod cmd;
mod config;
mod dispatch;
mod error;
mod machine;
mod state;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;

// Re-export command types and constructors
pub use crate::cmd::{batch, timer, timer_at, timer_delta, to_cmd, to_cmd_opt, Cmd, Output};

// Re-export state types
pub use crate::state::{transition_to, State, Transition};

// Re-export machine types
pub use crate::machine::{Machine, MachineBuilder, MachineHandle, Sender};

// Re-export configuration
pub use crate::config::{MachineConfig, DEFAULT_MESSAGE_BUFFER_SIZE};

// Re-export error types
pub use crate::error::StmError;

// Re-export commonly used external types
pub use tokio_util::sync::CancellationToken;
