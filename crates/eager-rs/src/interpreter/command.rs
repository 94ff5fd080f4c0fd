//! Closed command family exchanged between the channel front end and worker.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::tensor_info::TensorHandle;
use crate::ops::OpDef;
use crate::tensor::HostTensor;

/// Handle list carried by a single command.
pub type HandleList = SmallVec<[TensorHandle; 4]>;

/// One element of the tagged command stream.
///
/// Commands refer to tensor records by handle; the registry keeps every
/// referenced record alive until the command is consumed, even when the user
/// has already deleted the handle.
pub enum Command {
    /// Materialize a host value into `dest`.
    Put {
        dest: TensorHandle,
        value: HostTensor,
        no_cache: bool,
    },
    /// Execute `op` over `inputs`, publishing into `outputs`. Records in
    /// `dels` are freed right after input references are forwarded into the
    /// kernel, enabling inplace execution of last-use inputs.
    ApplyOp {
        op: Arc<dyn OpDef>,
        inputs: HandleList,
        outputs: HandleList,
        dels: HandleList,
    },
    /// Free the record behind `dest`.
    Del { dest: TensorHandle },
    /// Realize the host-readable value of `dest` and wake its waiter.
    GetValue { dest: TensorHandle },
    /// Restore a swap-evicted tensor from its host backup.
    SwapIn { dest: TensorHandle },
    /// Evict `dest` to host memory.
    SwapOut { dest: TensorHandle },
    /// Evict `dest`, relying on its recompute path for recovery.
    Drop { dest: TensorHandle },
    /// Drive buffer flushing up to the producer of `dest`, or fully when
    /// `dest` is absent. No worker action.
    Flush { dest: Option<TensorHandle> },
    /// Re-home the materialized value of `src` into `dest`, freeing `src`.
    Move {
        dest: TensorHandle,
        src: TensorHandle,
    },
    /// No action; exists to drive buffer flushing.
    Nop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Put {
                dest, no_cache, ..
            } => write!(f, "Put {{ dest: {dest:?}, no_cache: {no_cache} }}"),
            Command::ApplyOp {
                op,
                inputs,
                outputs,
                dels,
            } => write!(
                f,
                "ApplyOp {{ op: {}, inputs: {inputs:?}, outputs: {outputs:?}, dels: {dels:?} }}",
                op.name()
            ),
            Command::Del { dest } => write!(f, "Del {{ dest: {dest:?} }}"),
            Command::GetValue { dest } => write!(f, "GetValue {{ dest: {dest:?} }}"),
            Command::SwapIn { dest } => write!(f, "SwapIn {{ dest: {dest:?} }}"),
            Command::SwapOut { dest } => write!(f, "SwapOut {{ dest: {dest:?} }}"),
            Command::Drop { dest } => write!(f, "Drop {{ dest: {dest:?} }}"),
            Command::Flush { dest } => write!(f, "Flush {{ dest: {dest:?} }}"),
            Command::Move { dest, src } => {
                write!(f, "Move {{ dest: {dest:?}, src: {src:?} }}")
            }
            Command::Nop => write!(f, "Nop"),
        }
    }
}
