//! Asynchronous execution channel: registry, command pipeline, worker, and
//! eviction engine.

mod buffer;
mod channel;
pub mod command;
mod tensor_info;
mod worker;

pub use channel::{Channel, TensorStats};
pub use tensor_info::{EvictType, TensorHandle};

/// Process-wide entry point that vends execution channels.
pub struct Interpreter {
    _priv: (),
}

static INTERPRETER: Interpreter = Interpreter { _priv: () };

impl Interpreter {
    /// Returns the process-wide interpreter instance.
    pub fn inst() -> &'static Interpreter {
        &INTERPRETER
    }

    /// Creates an independent execution channel with its own worker thread.
    pub fn create_channel(&self) -> Channel {
        Channel::new()
    }
}
