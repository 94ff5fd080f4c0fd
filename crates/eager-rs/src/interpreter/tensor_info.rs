//! Registry records tracked per live tensor handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::ops::OpDef;
use crate::tensor::{HostTensor, TensorDesc, TensorValue};

/// Opaque identity of a tensor tracked by the channel.
///
/// Handles are allocated from a monotonically increasing counter and never
/// reused, so a stale handle held in a recompute relation is detected by
/// registry lookup instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorHandle(pub(crate) u64);

/// Eviction state of a tensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictType {
    None,
    Swap,
    Drop,
}

/// Recomputation record: how to rebuild this tensor after a drop.
///
/// `op` and `inputs` form the forward relation (this tensor is recomputed by
/// running `op` over `inputs`); `outputs` lists the sibling outputs of that
/// op so a single regeneration can republish all of them. `dep_outputs` is
/// the backward relation on an *input*: every output recorded as recomputable
/// from it. All relations are handles resolved by registry lookup, so freeing
/// one end never leaves the other dangling.
#[derive(Default)]
pub(crate) struct RecomputePath {
    pub(crate) op: Option<Arc<dyn OpDef>>,
    pub(crate) inputs: Vec<TensorHandle>,
    pub(crate) outputs: Vec<TensorHandle>,
    pub(crate) dep_outputs: Vec<TensorHandle>,
}

/// Per-tensor registry record.
pub(crate) struct TensorInfo {
    pub(crate) desc: TensorDesc,
    pub(crate) ptr: Option<Arc<TensorValue>>,
    pub(crate) value_fetched: bool,
    pub(crate) invalid: bool,
    pub(crate) evict_type: EvictType,
    pub(crate) h_value: Option<HostTensor>,
    pub(crate) recompute_times: usize,
    pub(crate) allow_delete: bool,
    pub(crate) path: RecomputePath,
}

impl Default for TensorInfo {
    fn default() -> Self {
        TensorInfo {
            desc: TensorDesc::default(),
            ptr: None,
            value_fetched: false,
            invalid: false,
            evict_type: EvictType::None,
            h_value: None,
            recompute_times: 0,
            allow_delete: true,
            path: RecomputePath::default(),
        }
    }
}

/// Mutable channel state guarded by the channel mutex.
///
/// Owns every live [`TensorInfo`], the user-visible valid-handle set, the
/// single blocking-query waiter slot, and the stored worker exception.
pub(crate) struct ChannelState {
    next_handle: u64,
    pub(crate) st: HashMap<TensorHandle, TensorInfo>,
    pub(crate) valid: HashSet<TensorHandle>,
    pub(crate) waitee: Option<TensorHandle>,
    pub(crate) worker_exc: Option<anyhow::Error>,
}

impl ChannelState {
    pub(crate) fn new() -> Self {
        ChannelState {
            next_handle: 0,
            st: HashMap::new(),
            valid: HashSet::new(),
            waitee: None,
            worker_exc: None,
        }
    }

    /// Allocates a fresh record with zeroed fields and registers it.
    pub(crate) fn alloc(&mut self) -> TensorHandle {
        let handle = TensorHandle(self.next_handle);
        self.next_handle += 1;
        self.st.insert(handle, TensorInfo::default());
        handle
    }

    pub(crate) fn info(&self, handle: TensorHandle) -> Option<&TensorInfo> {
        self.st.get(&handle)
    }

    pub(crate) fn info_mut(&mut self, handle: TensorHandle) -> Option<&mut TensorInfo> {
        self.st.get_mut(&handle)
    }

    /// Takes the stored worker exception, surfacing it to the caller.
    ///
    /// One stored exception is consumed per observation.
    pub(crate) fn check_worker_exc(&mut self) -> Result<()> {
        match self.worker_exc.take() {
            Some(exc) => Err(exc),
            None => Ok(()),
        }
    }

    /// Looks up a record that a queued command refers to.
    ///
    /// Commands keep their records registered until consumed, so a miss here
    /// is a pipeline invariant violation, not a user error.
    pub(crate) fn expect_info(&self, handle: TensorHandle) -> Result<&TensorInfo> {
        self.st
            .get(&handle)
            .ok_or_else(|| anyhow!("tensor record {handle:?} freed before its command was consumed"))
    }
}
