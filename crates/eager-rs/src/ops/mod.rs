//! Operator seam consumed by the execution channel.
//!
//! The channel never interprets operator semantics itself: shape inference
//! and kernel execution are delegated through [`OpDef`]. Reference CPU
//! implementations live in the `eager-rs-ops-ref-cpu` crate.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

use crate::tensor::{TensorDesc, TensorValue};

/// Shared pointer to a materialized tensor value.
///
/// The strong count is meaningful to kernels: an input whose count is one at
/// kernel entry is a last use and its storage may be reused in place.
pub type TensorPtr = Arc<TensorValue>;

/// Operator input/output value list.
pub type TensorPtrList = SmallVec<[TensorPtr; 4]>;

/// Operator input/output descriptor list.
pub type TensorDescList = SmallVec<[TensorDesc; 4]>;

/// Structured failure reported by operator inference or execution.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("operator {op} expected {expected} inputs, got {actual}")]
    ArityMismatch {
        op: String,
        expected: usize,
        actual: usize,
    },
    #[error("operator {op} input shapes are incompatible: {detail}")]
    ShapeMismatch { op: String, detail: String },
    #[error("operator {op} does not support dtype {detail}")]
    DTypeMismatch { op: String, detail: String },
    #[error("operator {op} failed during execution: {detail}")]
    Execution { op: String, detail: String },
}

/// Convenience alias for results returned by operator routines.
pub type OpResult<T> = Result<T, OpError>;

/// Classifies operators whose enqueue must flush the whole command buffer.
///
/// These kinds either carry side effects ordered against external peers
/// (remote transfers, collectives, I/O callbacks) or expand into command
/// sequences of their own (backward graphs), so no command may be buffered
/// behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Regular,
    RemoteSend,
    RemoteRecv,
    CollectiveComm,
    InputCallback,
    OutputCallback,
    BackwardGraph,
}

impl OpKind {
    /// Reports whether enqueueing an operator of this kind forces a full
    /// command-buffer flush.
    pub fn forces_flush(self) -> bool {
        !matches!(self, OpKind::Regular)
    }
}

/// Definition of a single operator as the channel sees it.
pub trait OpDef: Send + Sync {
    /// Human-readable operator name used in diagnostics.
    fn name(&self) -> &str;

    /// Returns the scheduling class of this operator.
    fn kind(&self) -> OpKind {
        OpKind::Regular
    }

    /// Infers output descriptors from input descriptors.
    ///
    /// The boolean is `true` when every returned layout is fully validated;
    /// `false` signals that shapes may be unreliable and strict async levels
    /// must fall back to synchronous execution.
    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)>;

    /// Executes the operator on materialized tensors.
    ///
    /// Inputs are moved in so kernels observe true ownership: dropping the
    /// list is what releases the last duplicated references.
    fn apply_on_physical_tensor(&self, inputs: TensorPtrList) -> OpResult<TensorPtrList>;
}

impl fmt::Debug for dyn OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpDef({})", self.name())
    }
}
