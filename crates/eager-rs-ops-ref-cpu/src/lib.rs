//! Reference CPU operators for the eager-rs execution channel.
//!
//! These implementations favour clarity over throughput: dense `f32`
//! kernels that honour the channel's ownership contract (an input whose
//! strong count is one at kernel entry may be mutated in place).

pub mod comm;
pub mod elemwise;

pub use comm::{RemoteRecv, RemoteSend};
pub use elemwise::{Elemwise, ElemwiseMode};
