//! The asynchronous tensor execution channel.
//!
//! The channel decouples operation issuance from execution. Public methods
//! allocate registry records, stage commands through the command buffer, and
//! (for blocking queries) wait on the channel condition variable; a single
//! background worker drains the task queue, materializes tensors, and
//! implements swap/drop eviction with on-demand regeneration.
//!
//! ## Locking
//!
//! One mutex guards all registry and per-tensor state shared between client
//! threads and the worker. Client threads acquire state before the command
//! buffer, and the worker only ever takes the state mutex, so the order is
//! acyclic. Blocking queries park on the condition variable with the state
//! lock released; the worker signals it whenever it publishes a value the
//! current waiter cares about, or when it captures a failure.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use anyhow::{anyhow, ensure, Result};
use smallvec::smallvec;

use super::buffer::CommandBuffer;
use super::command::{Command, HandleList};
use super::tensor_info::{ChannelState, EvictType, TensorHandle, TensorInfo};
use super::worker::{TaskHandler, TaskQueue};
use crate::env;
use crate::ops::{OpDef, TensorPtrList};
use crate::tensor::{CompNode, DType, DeviceTensor, HostTensor, TensorValue};

/// Snapshot of a tensor record, exposed for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorStats {
    /// A materialized value is currently resident.
    pub materialized: bool,
    /// The host-readable value has been realized.
    pub value_fetched: bool,
    /// A worker failure poisoned this tensor.
    pub invalid: bool,
    /// Current eviction state.
    pub evict_type: EvictType,
    /// A host backup from a swap-out is held.
    pub has_host_backup: bool,
    /// How often this tensor has been regenerated.
    pub recompute_times: usize,
    /// A recompute path to rebuild this tensor is still recorded.
    pub recomputable: bool,
}

/// Client-facing handle to one execution channel.
///
/// All methods may be called from any thread; at most one blocking query
/// (`get_value`, `get_shape`, `get_dev_tensor`) may be in flight at a time.
pub struct Channel {
    inner: Arc<ChannelInner>,
    buffer: Mutex<CommandBuffer>,
    worker: TaskQueue<Command>,
}

pub(crate) struct ChannelInner {
    state: Mutex<ChannelState>,
    cv: Condvar,
    swap_enabled: AtomicBool,
    drop_enabled: AtomicBool,
    async_level: AtomicU8,
    max_recompute: usize,
}

impl Channel {
    pub(crate) fn new() -> Self {
        let inner = Arc::new(ChannelInner {
            state: Mutex::new(ChannelState::new()),
            cv: Condvar::new(),
            swap_enabled: AtomicBool::new(false),
            drop_enabled: AtomicBool::new(false),
            async_level: AtomicU8::new(env::default_async_level()),
            max_recompute: env::max_recompute_limit(),
        });
        let worker = TaskQueue::spawn("eager-channel-worker", Arc::clone(&inner));
        Channel {
            inner,
            buffer: Mutex::new(CommandBuffer::new(env::default_buffer_length())),
            worker,
        }
    }

    /// Registers a host value and schedules its materialization.
    ///
    /// With `no_cache` the value is always uploaded into a fresh, uniquely
    /// owned tensor; otherwise small constants may resolve to a shared cached
    /// tensor (which also disqualifies them from inplace reuse).
    pub fn put(&self, value: &HostTensor, no_cache: bool) -> TensorHandle {
        let handle = {
            let mut state = self.inner.lock_state();
            let handle = state.alloc();
            let info = state.info_mut(handle).expect("freshly allocated record");
            info.desc.layout = value.layout().clone();
            info.desc.comp_node = value.comp_node().clone();
            info.desc.value = Some(value.proxy_to_default_cpu());
            state.valid.insert(handle);
            handle
        };
        self.enqueue(Command::Put {
            dest: handle,
            value: value.clone(),
            no_cache,
        });
        handle
    }

    /// Registers an already materialized device tensor.
    ///
    /// No command is issued; the value is resident immediately.
    pub fn put_device(&self, data: &DeviceTensor) -> TensorHandle {
        let mut state = self.inner.lock_state();
        let handle = state.alloc();
        let info = state.info_mut(handle).expect("freshly allocated record");
        info.desc.layout = data.layout().clone();
        info.desc.comp_node = data.comp_node().clone();
        info.ptr = Some(Arc::new(TensorValue::from_device(data.clone())));
        state.valid.insert(handle);
        handle
    }

    /// Invalidates a handle and schedules its record for deletion.
    ///
    /// The record stays alive until every already-issued command referring to
    /// it has been consumed; the deletion itself may be fused into the
    /// operation consuming the tensor last.
    pub fn del(&self, handle: TensorHandle) -> Result<()> {
        {
            let mut state = self.inner.lock_state();
            ensure!(state.valid.remove(&handle), "invalid handle: {handle:?}");
        }
        self.enqueue(Command::Del { dest: handle });
        Ok(())
    }

    /// Schedules a swap-evicted tensor to be restored from its host backup.
    /// No-op unless swap eviction is enabled.
    pub fn swap_in(&self, handle: TensorHandle) -> Result<()> {
        if !self.inner.swap_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.check_handle(handle)?;
        self.enqueue(Command::SwapIn { dest: handle });
        Ok(())
    }

    /// Schedules eviction of a tensor to host memory. No-op unless swap
    /// eviction is enabled.
    pub fn swap_out(&self, handle: TensorHandle) -> Result<()> {
        if !self.inner.swap_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.check_handle(handle)?;
        self.enqueue(Command::SwapOut { dest: handle });
        Ok(())
    }

    /// Schedules eviction of a tensor that can be rebuilt through its
    /// recompute path. No-op unless drop eviction is enabled.
    pub fn drop(&self, handle: TensorHandle) -> Result<()> {
        if !self.inner.drop_enabled.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.check_handle(handle)?;
        self.enqueue(Command::Drop { dest: handle });
        Ok(())
    }

    /// Applies an operator to input handles, returning handles for its
    /// outputs.
    ///
    /// Output descriptors come from fallible shape inference; execution is
    /// scheduled on the worker. How strictly this call blocks is governed by
    /// the async level:
    ///
    /// - `0`: synchronize after enqueue, then synchronize every output's
    ///   compute node so device errors surface here.
    /// - `1`: synchronize only when inference returned unvalidated shapes.
    /// - `2`: never block.
    pub fn apply_op(
        &self,
        op: Arc<dyn OpDef>,
        inputs: &[TensorHandle],
    ) -> Result<Vec<TensorHandle>> {
        let drop_enabled = self.inner.drop_enabled.load(Ordering::Relaxed);
        let mut input_descs = Vec::with_capacity(inputs.len());
        {
            let state = self.inner.lock_state();
            for &input in inputs {
                ensure!(state.valid.contains(&input), "invalid handle: {input:?}");
            }
            for &input in inputs {
                let info = state.info(input).expect("valid handle has a record");
                ensure!(!info.invalid, "invalid tensor, unable to apply_op");
                input_descs.push(info.desc.clone());
            }
        }

        let (output_descs, validated) = op.infer_output_attrs_fallible(&input_descs)?;
        let mut outputs = Vec::with_capacity(output_descs.len());
        let mut validated_bkp = true;
        {
            let mut state = self.inner.lock_state();
            for desc in output_descs {
                if desc.layout.is_unknown() {
                    validated_bkp = false;
                }
                let handle = state.alloc();
                state.info_mut(handle).expect("freshly allocated record").desc = desc;
                state.valid.insert(handle);
                outputs.push(handle);
            }
            if drop_enabled {
                for &out in &outputs {
                    let info = state.info_mut(out).expect("freshly allocated record");
                    info.path.op = Some(Arc::clone(&op));
                    info.path.outputs = outputs.clone();
                    info.path.inputs = inputs.to_vec();
                }
                for &input in inputs {
                    let info = state.info_mut(input).expect("valid handle has a record");
                    info.path.dep_outputs.extend(outputs.iter().copied());
                }
            }
        }

        self.enqueue(Command::ApplyOp {
            op,
            inputs: inputs.iter().copied().collect(),
            outputs: outputs.iter().copied().collect(),
            dels: HandleList::new(),
        });

        let level = self.inner.async_level.load(Ordering::Relaxed);
        if !(validated && validated_bkp) && level == 1 {
            self.sync()?;
        } else if level == 0 {
            self.sync()?;
            let nodes: Vec<CompNode> = {
                let state = self.inner.lock_state();
                outputs
                    .iter()
                    .filter_map(|&out| {
                        state
                            .info(out)
                            .and_then(|info| info.ptr.as_ref())
                            .map(|ptr| ptr.comp_node().clone())
                    })
                    .collect()
            };
            for node in nodes {
                node.sync()?;
            }
        }
        Ok(outputs)
    }

    /// Fetches the host-readable value of a tensor, blocking until the worker
    /// realizes it.
    pub fn get_value(&self, handle: TensorHandle) -> Result<HostTensor> {
        let mut state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        state.check_worker_exc()?;
        if !state.expect_info(handle)?.value_fetched {
            ensure!(
                !state.expect_info(handle)?.invalid,
                "invalid tensor, unable to get_value"
            );
            state = self.wait_on(state, handle, Command::GetValue { dest: handle }, |info| {
                info.value_fetched
            })?;
        }
        let ptr = state
            .expect_info(handle)?
            .ptr
            .clone()
            .ok_or_else(|| anyhow!("tensor {handle:?} lost its value after a fetch"))?;
        drop(state);
        Ok(ptr.get_value())
    }

    /// Returns the shape of a tensor, blocking only while the shape is still
    /// unknown (output of a not-yet-inferable op).
    pub fn get_shape(&self, handle: TensorHandle) -> Result<Vec<usize>> {
        let mut state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        state.check_worker_exc()?;
        {
            let info = state.expect_info(handle)?;
            if !info.desc.layout.is_unknown() {
                return Ok(info.desc.layout.dims().to_vec());
            }
        }
        state = self.wait_on(
            state,
            handle,
            Command::Flush {
                dest: Some(handle),
            },
            |info| info.ptr.is_some(),
        )?;
        let info = state.expect_info(handle)?;
        let ptr = info.ptr.as_ref().expect("wait predicate held");
        let dims = ptr.layout().dims().to_vec();
        ensure!(!dims.is_empty(), "materialized tensor has an unknown shape");
        Ok(dims)
    }

    /// Returns the dtype recorded for a tensor. Never blocks.
    pub fn get_dtype(&self, handle: TensorHandle) -> Result<DType> {
        let state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        Ok(state.expect_info(handle)?.desc.layout.dtype())
    }

    /// Returns the compute node recorded for a tensor. Never blocks.
    pub fn get_device(&self, handle: TensorHandle) -> Result<CompNode> {
        let state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        Ok(state.expect_info(handle)?.desc.comp_node.clone())
    }

    /// Returns the device tensor behind a handle, blocking until it is
    /// materialized.
    pub fn get_dev_tensor(&self, handle: TensorHandle) -> Result<DeviceTensor> {
        let mut state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        state.check_worker_exc()?;
        state = self.wait_on(
            state,
            handle,
            Command::Flush {
                dest: Some(handle),
            },
            |info| info.ptr.is_some(),
        )?;
        let info = state.expect_info(handle)?;
        let ptr = info.ptr.as_ref().expect("wait predicate held");
        Ok(ptr.dev_tensor())
    }

    /// Blocks until the command buffer drains and all worker tasks complete,
    /// then surfaces any captured worker failure.
    pub fn sync(&self) -> Result<()> {
        {
            let mut buffer = self.buffer.lock().expect("command buffer poisoned");
            if !buffer.is_empty() {
                buffer.enqueue(Command::Flush { dest: None }, &mut |cmd| {
                    self.worker.add_task(cmd)
                });
            }
        }
        self.worker.wait_all_task_finish();
        let mut state = self.inner.lock_state();
        state.check_worker_exc()
    }

    /// Drains the channel; identical to [`Channel::sync`].
    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    /// Selects how strictly `apply_op` blocks. Levels outside `0..=2` are a
    /// programming error.
    pub fn config_async_level(&self, level: u8) {
        assert!(level <= 2, "async_level should be 0, 1 or 2");
        self.inner.async_level.store(level, Ordering::Relaxed);
    }

    /// Returns the current async level.
    pub fn get_async_level(&self) -> u8 {
        self.inner.async_level.load(Ordering::Relaxed)
    }

    /// Enables or disables swap eviction.
    pub fn set_swap_flag(&self, flag: bool) {
        self.inner.swap_enabled.store(flag, Ordering::Relaxed);
    }

    /// Enables or disables drop eviction.
    pub fn set_drop_flag(&self, flag: bool) {
        self.inner.drop_enabled.store(flag, Ordering::Relaxed);
    }

    /// Reconfigures the command-buffer capacity.
    pub fn set_buffer_length(&self, length: usize) {
        self.buffer
            .lock()
            .expect("command buffer poisoned")
            .set_capacity(length);
    }

    /// Returns the number of commands currently staged in the buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().expect("command buffer poisoned").len()
    }

    /// Reports the registry's view of one tensor record.
    pub fn tensor_stats(&self, handle: TensorHandle) -> Result<TensorStats> {
        let state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        let info = state.expect_info(handle)?;
        Ok(TensorStats {
            materialized: info.ptr.is_some(),
            value_fetched: info.value_fetched,
            invalid: info.invalid,
            evict_type: info.evict_type,
            has_host_backup: info.h_value.is_some(),
            recompute_times: info.recompute_times,
            recomputable: info.path.op.is_some(),
        })
    }

    fn check_handle(&self, handle: TensorHandle) -> Result<()> {
        let state = self.inner.lock_state();
        ensure!(state.valid.contains(&handle), "invalid handle: {handle:?}");
        Ok(())
    }

    fn enqueue(&self, cmd: Command) {
        let mut buffer = self.buffer.lock().expect("command buffer poisoned");
        buffer.enqueue(cmd, &mut |cmd| self.worker.add_task(cmd));
    }

    /// Parks the calling thread until `pred` holds for the record behind
    /// `handle`, staging `cmd` first. The single waiter slot serializes
    /// blocking queries; a captured worker failure wakes the waiter and is
    /// returned instead.
    fn wait_on<'a>(
        &'a self,
        mut state: MutexGuard<'a, ChannelState>,
        handle: TensorHandle,
        cmd: Command,
        pred: impl Fn(&TensorInfo) -> bool,
    ) -> Result<MutexGuard<'a, ChannelState>> {
        assert!(
            state.waitee.is_none(),
            "only one blocking query may be in flight"
        );
        state.waitee = Some(handle);
        self.enqueue(cmd);
        let result = loop {
            if let Err(exc) = state.check_worker_exc() {
                break Err(exc);
            }
            match state.info(handle) {
                Some(info) if pred(info) => break Ok(()),
                Some(_) => {}
                None => break Err(anyhow!("tensor record freed while a query was waiting")),
            }
            state = self.inner.cv.wait(state).expect("channel state poisoned");
        };
        state.waitee = None;
        match result {
            Ok(()) => Ok(state),
            Err(exc) => Err(exc),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

impl TaskHandler for ChannelInner {
    type Task = Command;

    fn process(&self, cmd: Command) {
        self.process_one_task(cmd);
    }
}

impl ChannelInner {
    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().expect("channel state poisoned")
    }

    fn evict_enabled(&self) -> bool {
        self.swap_enabled.load(Ordering::Relaxed) || self.drop_enabled.load(Ordering::Relaxed)
    }

    /// Executes one command, capturing any failure: result tensors are marked
    /// invalid, the error is stored for the next client observation, and all
    /// waiters are woken.
    fn process_one_task(&self, cmd: Command) {
        let fail_targets: HandleList = match &cmd {
            Command::ApplyOp { outputs, .. } => outputs.clone(),
            Command::Put { dest, .. } => smallvec![*dest],
            _ => HandleList::new(),
        };
        if let Err(exc) = self.execute(cmd) {
            let mut state = self.lock_state();
            for handle in fail_targets {
                if let Some(info) = state.info_mut(handle) {
                    info.invalid = true;
                }
            }
            state.worker_exc = Some(exc);
            self.cv.notify_all();
        }
    }

    fn execute(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Put {
                dest,
                value,
                no_cache,
            } => {
                let produced = if no_cache {
                    Arc::new(TensorValue::from_host(&value))
                } else {
                    TensorValue::make(&value)
                };
                let mut state = self.lock_state();
                self.produce_tensor(&mut state, dest, produced, true)
            }
            Command::ApplyOp {
                op,
                inputs,
                outputs,
                dels,
            } => self.execute_apply(op, &inputs, &outputs, &dels),
            Command::Del { dest } => {
                let mut state = self.lock_state();
                self.free(&mut state, dest)
            }
            Command::GetValue { dest } => self.execute_get_value(dest),
            Command::SwapIn { dest } => {
                let mut state = self.lock_state();
                self.do_swap_in(&mut state, dest)
            }
            Command::SwapOut { dest } => {
                let mut state = self.lock_state();
                self.do_swap_out(&mut state, dest);
                Ok(())
            }
            Command::Drop { dest } => {
                let mut state = self.lock_state();
                self.do_drop(&mut state, dest);
                Ok(())
            }
            Command::Move { dest, src } => {
                let mut state = self.lock_state();
                let ptr = state
                    .expect_info(src)?
                    .ptr
                    .clone()
                    .ok_or_else(|| anyhow!("move source {src:?} is not materialized"))?;
                self.produce_tensor(&mut state, dest, ptr, true)?;
                self.free(&mut state, src)
            }
            Command::Flush { .. } | Command::Nop => Ok(()),
        }
    }

    fn execute_apply(
        &self,
        op: Arc<dyn OpDef>,
        inputs: &[TensorHandle],
        outputs: &[TensorHandle],
        dels: &[TensorHandle],
    ) -> Result<()> {
        let evict_enabled = self.evict_enabled();
        let mut tensor_inputs = TensorPtrList::with_capacity(inputs.len());
        {
            let mut state = self.lock_state();
            for &input in inputs {
                if evict_enabled
                    && state.expect_info(input)?.evict_type != EvictType::None
                    && state.expect_info(input)?.ptr.is_none()
                {
                    self.regenerate(&mut state, input, false)?;
                }
                let ptr = state
                    .expect_info(input)?
                    .ptr
                    .clone()
                    .ok_or_else(|| anyhow!("input tensor {input:?} has no materialized value"))?;
                tensor_inputs.push(ptr);
            }
            // Dropping the registry reference here is what lets a fused
            // last-use input reach the kernel with a unique strong count.
            for &del in dels {
                self.free(&mut state, del)?;
            }
        }
        let tensor_outputs = op.apply_on_physical_tensor(tensor_inputs)?;
        ensure!(
            tensor_outputs.len() == outputs.len(),
            "operator {} produced {} outputs, expected {}",
            op.name(),
            tensor_outputs.len(),
            outputs.len()
        );
        let mut state = self.lock_state();
        for (&handle, value) in outputs.iter().zip(tensor_outputs) {
            self.produce_tensor(&mut state, handle, value, true)?;
        }
        Ok(())
    }

    fn execute_get_value(&self, dest: TensorHandle) -> Result<()> {
        let ptr = {
            let mut state = self.lock_state();
            if self.evict_enabled()
                && state.expect_info(dest)?.evict_type != EvictType::None
                && state.expect_info(dest)?.ptr.is_none()
            {
                self.regenerate(&mut state, dest, false)?;
            }
            state
                .expect_info(dest)?
                .ptr
                .clone()
                .ok_or_else(|| anyhow!("tensor {dest:?} has no materialized value"))?
        };
        ptr.fetch_value();
        let mut state = self.lock_state();
        if let Some(info) = state.info_mut(dest) {
            info.value_fetched = true;
        }
        if state.waitee == Some(dest) {
            self.cv.notify_all();
        }
        Ok(())
    }

    /// Publishes a materialized value into a record, mirroring layout and
    /// placement into its descriptor. With `notice` the current waiter is
    /// woken when it matches `dest`.
    fn produce_tensor(
        &self,
        state: &mut ChannelState,
        dest: TensorHandle,
        value: Arc<TensorValue>,
        notice: bool,
    ) -> Result<()> {
        let waitee = state.waitee;
        let info = state
            .info_mut(dest)
            .ok_or_else(|| anyhow!("tensor record {dest:?} freed before its producer ran"))?;
        info.value_fetched = value.value_fetched();
        info.desc.layout = value.layout().clone();
        info.desc.comp_node = value.comp_node().clone();
        info.ptr = Some(value);
        if notice && waitee == Some(dest) {
            self.cv.notify_all();
        }
        Ok(())
    }

    /// Removes a record from the registry. Live drop-recoverable dependents
    /// are regenerated and severed from the graph first, so the record never
    /// disappears out from under a recompute path.
    fn free(&self, state: &mut ChannelState, handle: TensorHandle) -> Result<()> {
        if !state.expect_info(handle)?.path.dep_outputs.is_empty() {
            self.remove_dep(state, handle)?;
        }
        let info = state.st.remove(&handle).expect("record checked above");
        assert!(
            info.allow_delete,
            "tensor record freed while references remain"
        );
        Ok(())
    }

    fn remove_dep(&self, state: &mut ChannelState, handle: TensorHandle) -> Result<()> {
        let deps = state.expect_info(handle)?.path.dep_outputs.clone();
        for out in deps {
            if state.st.contains_key(&out) {
                self.regenerate(state, out, true)?;
            }
        }
        Ok(())
    }

    /// Restores an evicted tensor: swap-evicted records reload their host
    /// backup, drop-evicted records re-execute the recorded producer op
    /// (recursively regenerating evicted inputs first). With `must_drop` the
    /// record is additionally severed from the recompute graph; that variant
    /// runs when one of its inputs is about to be freed, so the same
    /// regeneration can never be triggered again with a missing input.
    fn regenerate(
        &self,
        state: &mut ChannelState,
        handle: TensorHandle,
        must_drop: bool,
    ) -> Result<()> {
        let (needs_restore, evict_type) = {
            let info = state.expect_info(handle)?;
            (
                info.ptr.is_none() && info.evict_type != EvictType::None,
                info.evict_type,
            )
        };
        if needs_restore {
            match evict_type {
                EvictType::Swap => self.do_swap_in(state, handle)?,
                EvictType::Drop => self.recompute(state, handle, must_drop)?,
                EvictType::None => unreachable!("needs_restore implies an eviction state"),
            }
        }
        if must_drop {
            if let Some(info) = state.info_mut(handle) {
                if info.path.op.is_some() {
                    info.path.op = None;
                    info.path.inputs.clear();
                    if info.evict_type == EvictType::Drop {
                        info.evict_type = EvictType::None;
                    }
                }
            }
        }
        Ok(())
    }

    fn recompute(
        &self,
        state: &mut ChannelState,
        handle: TensorHandle,
        must_drop: bool,
    ) -> Result<()> {
        let (path_op, path_inputs, path_outputs) = {
            let info = state.expect_info(handle)?;
            let op = info
                .path
                .op
                .clone()
                .ok_or_else(|| anyhow!("recomputation path for {handle:?} not found"))?;
            (op, info.path.inputs.clone(), info.path.outputs.clone())
        };
        let mut inputs = TensorPtrList::with_capacity(path_inputs.len());
        for &input in &path_inputs {
            ensure!(
                state.st.contains_key(&input),
                "recompute input {input:?} is no longer alive"
            );
            if state.expect_info(input)?.ptr.is_none() {
                self.regenerate(state, input, must_drop)?;
            }
            let ptr = state
                .expect_info(input)?
                .ptr
                .clone()
                .ok_or_else(|| anyhow!("recompute input {input:?} failed to materialize"))?;
            inputs.push(ptr);
        }
        let outputs = path_op.apply_on_physical_tensor(inputs)?;
        for (index, value) in outputs.into_iter().enumerate() {
            let Some(&out) = path_outputs.get(index) else {
                continue;
            };
            let should_publish = match state.info_mut(out) {
                Some(info) => {
                    info.recompute_times += 1;
                    info.ptr.is_none() && info.evict_type == EvictType::Drop
                }
                None => continue,
            };
            if should_publish {
                self.produce_tensor(state, out, value, false)?;
            }
        }
        Ok(())
    }

    fn do_swap_in(&self, state: &mut ChannelState, dest: TensorHandle) -> Result<()> {
        let h_value = {
            let Some(info) = state.info_mut(dest) else {
                return Ok(());
            };
            if info.ptr.is_some() {
                return Ok(());
            }
            match info.h_value.clone() {
                Some(h_value) => h_value,
                None => {
                    log::error!("backup of tensor {dest:?} not found");
                    return Ok(());
                }
            }
        };
        let value = TensorValue::make(&h_value);
        self.produce_tensor(state, dest, value, false)?;
        if let Some(info) = state.info_mut(dest) {
            info.evict_type = EvictType::None;
        }
        Ok(())
    }

    fn do_swap_out(&self, state: &mut ChannelState, dest: TensorHandle) {
        let Some(info) = state.info_mut(dest) else {
            return;
        };
        if info.evict_type == EvictType::Drop {
            log::warn!("tensor {dest:?} is DROP-evicted; ignoring this swap-out");
            return;
        }
        let Some(ptr) = info.ptr.clone() else {
            return;
        };
        info.evict_type = EvictType::Swap;
        info.value_fetched = false;
        // TODO: overlap the device-to-host copy with subsequent worker commands
        info.h_value = Some(HostTensor::copy_from(&ptr.dev_tensor()));
        info.ptr = None;
    }

    fn do_drop(&self, state: &mut ChannelState, dest: TensorHandle) {
        let Some(info) = state.info_mut(dest) else {
            return;
        };
        if info.evict_type == EvictType::Swap {
            log::warn!("tensor {dest:?} is SWAP-evicted; ignoring this drop");
            return;
        }
        if info.path.op.is_none() {
            log::warn!(
                "an input that produced tensor {dest:?} has been deleted; ignoring this drop"
            );
            return;
        }
        if info.recompute_times >= self.max_recompute {
            log::warn!("recomputation budget for tensor {dest:?} is exhausted; ignoring this drop");
            return;
        }
        if info.ptr.is_none() {
            return;
        }
        info.evict_type = EvictType::Drop;
        info.value_fetched = false;
        info.ptr = None;
    }
}
