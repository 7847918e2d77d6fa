//! Machine configuration.
//!
//! `MachineConfig` is plain data so host applications can embed it in their
//! own config files. [`MachineBuilder`](crate::MachineBuilder) applies it.
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct AppConfig {
//!     #[serde(default)]
//!     machine: stm::MachineConfig,
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StmError;

/// Default capacity of a machine's message queue.
pub const DEFAULT_MESSAGE_BUFFER_SIZE: usize = 10;

/// Tunables for a single machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// How many delivered messages may wait for the scheduler loop before
    /// producers start suspending.
    pub message_buffer_size: usize,
}

impl MachineConfig {
    /// Check that the configuration can back a running machine.
    pub fn validate(&self) -> Result<(), StmError> {
        if self.message_buffer_size == 0 {
            return Err(StmError::InvalidBufferSize {
                size: self.message_buffer_size,
            });
        }
        Ok(())
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            message_buffer_size: DEFAULT_MESSAGE_BUFFER_SIZE,
        }
    }
}
