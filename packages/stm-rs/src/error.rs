//! Structured error types for stm.
//!
//! The engine itself has almost no failure paths: absent commands and absent
//! messages are no-ops, a full queue suspends the producer, and cancellation is
//! a graceful stop. `StmError` only covers configuration and lifecycle
//! operations that can genuinely fail.
//!
//! # Example
//!
//! ```ignore
//! use stm::{MachineBuilder, StmError};
//!
//! match MachineBuilder::new(Idle).try_with_message_buffer_size(0) {
//!     Ok(builder) => { /* ... */ }
//!     Err(StmError::InvalidBufferSize { size }) => {
//!         eprintln!("bad capacity: {}", size);
//!     }
//!     Err(e) => eprintln!("other stm error: {}", e),
//! }
//! ```

use thiserror::Error;
use tokio::task::JoinError;

/// Pattern-matchable errors returned by stm.
#[derive(Debug, Error)]
pub enum StmError {
    /// The message queue needs room for at least one message.
    #[error("invalid message buffer size {size}: capacity must be at least 1")]
    InvalidBufferSize {
        /// The rejected capacity.
        size: usize,
    },

    /// A state's `update` panicked and took the scheduler loop down with it.
    #[error("scheduler loop panicked: {message}")]
    LoopPanicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The scheduler loop task was aborted (usually a runtime shutdown).
    #[error("scheduler loop was aborted before it stopped")]
    LoopAborted,
}

impl From<JoinError> for StmError {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return StmError::LoopAborted;
        }

        let payload = err.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        StmError::LoopPanicked { message }
    }
}
