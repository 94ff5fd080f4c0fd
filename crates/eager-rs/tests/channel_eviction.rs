use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use eager_rs::{
    Channel, EvictType, HostTensor, Interpreter, OpDef, OpResult, TensorDesc, TensorDescList,
    TensorHandle, TensorPtrList,
};
use eager_rs_ops_ref_cpu::{Elemwise, ElemwiseMode};

/// Counts kernel executions so tests can observe recomputation.
struct CountingAdd {
    inner: Elemwise,
    runs: AtomicUsize,
}

impl CountingAdd {
    fn new() -> Self {
        CountingAdd {
            inner: Elemwise::new(ElemwiseMode::Add),
            runs: AtomicUsize::new(0),
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl OpDef for CountingAdd {
    fn name(&self) -> &str {
        "CountingAdd"
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        self.inner.infer_output_attrs_fallible(inputs)
    }

    fn apply_on_physical_tensor(&self, inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.apply_on_physical_tensor(inputs)
    }
}

fn drop_recoverable_sum(channel: &Channel, op: Arc<CountingAdd>) -> Result<TensorHandle> {
    let a = channel.put(&HostTensor::ones([2, 2]), true);
    let b = channel.put(&HostTensor::ones([2, 2]), true);
    let outputs = channel.apply_op(op as Arc<dyn OpDef>, &[a, b])?;
    channel.sync()?;
    Ok(outputs[0])
}

#[test]
fn swap_round_trip_restores_original_bytes() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_swap_flag(true);
    let data = vec![1.0, -2.5, 3.25, 0.0];
    let handle = channel.put(&HostTensor::from_vec([4], data.clone())?, true);
    channel.sync()?;

    channel.swap_out(handle)?;
    channel.sync()?;
    let stats = channel.tensor_stats(handle)?;
    assert!(!stats.materialized);
    assert!(stats.has_host_backup);
    assert_eq!(stats.evict_type, EvictType::Swap);

    // Fetch triggers the swap-in.
    assert_eq!(channel.get_value(handle)?.data(), data.as_slice());
    let stats = channel.tensor_stats(handle)?;
    assert!(stats.materialized);
    assert_eq!(stats.evict_type, EvictType::None);
    Ok(())
}

#[test]
fn swap_commands_are_noops_while_disabled() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    let handle = channel.put(&HostTensor::ones([2]), true);
    channel.sync()?;

    channel.swap_out(handle)?;
    channel.sync()?;
    let stats = channel.tensor_stats(handle)?;
    assert!(stats.materialized);
    assert_eq!(stats.evict_type, EvictType::None);
    Ok(())
}

#[test]
fn drop_and_regenerate_recomputes_through_recorded_op() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_drop_flag(true);
    let op = Arc::new(CountingAdd::new());
    let sum = drop_recoverable_sum(&channel, Arc::clone(&op))?;
    assert_eq!(op.runs(), 1);

    channel.drop(sum)?;
    channel.sync()?;
    let stats = channel.tensor_stats(sum)?;
    assert!(!stats.materialized);
    assert_eq!(stats.evict_type, EvictType::Drop);

    let value = channel.get_value(sum)?;
    assert!(value.data().iter().all(|&v| v == 2.0));
    assert_eq!(op.runs(), 2);
    let stats = channel.tensor_stats(sum)?;
    assert!(stats.materialized);
    assert_eq!(stats.recompute_times, 1);

    // The default recomputation budget is spent; further drops are ignored.
    channel.drop(sum)?;
    channel.sync()?;
    assert!(channel.tensor_stats(sum)?.materialized);
    assert_eq!(op.runs(), 2);
    Ok(())
}

#[test]
fn freeing_an_input_regenerates_and_severs_dependents() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_drop_flag(true);
    let op = Arc::new(CountingAdd::new());

    let a = channel.put(&HostTensor::ones([2, 2]), true);
    let b = channel.put(&HostTensor::ones([2, 2]), true);
    let sum = channel.apply_op(Arc::clone(&op) as Arc<dyn OpDef>, &[a, b])?[0];
    channel.sync()?;

    channel.drop(sum)?;
    channel.sync()?;
    assert!(!channel.tensor_stats(sum)?.materialized);

    // Deleting a recompute input forces the dependent back to life first,
    // then severs it from the graph.
    channel.del(a)?;
    channel.sync()?;
    let stats = channel.tensor_stats(sum)?;
    assert!(stats.materialized);
    assert!(!stats.recomputable);
    assert_eq!(stats.evict_type, EvictType::None);
    assert_eq!(stats.recompute_times, 1);
    assert_eq!(op.runs(), 2);

    // Without a recompute path the drop is ignored.
    channel.drop(sum)?;
    channel.sync()?;
    assert!(channel.tensor_stats(sum)?.materialized);

    let value = channel.get_value(sum)?;
    assert!(value.data().iter().all(|&v| v == 2.0));
    assert_eq!(op.runs(), 2);
    Ok(())
}

#[test]
fn conflicting_eviction_requests_are_ignored() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_swap_flag(true);
    channel.set_drop_flag(true);
    let op = Arc::new(CountingAdd::new());

    // DROP first, SWAP request ignored.
    let dropped = drop_recoverable_sum(&channel, Arc::clone(&op))?;
    channel.drop(dropped)?;
    channel.sync()?;
    channel.swap_out(dropped)?;
    channel.sync()?;
    let stats = channel.tensor_stats(dropped)?;
    assert_eq!(stats.evict_type, EvictType::Drop);
    assert!(!stats.has_host_backup);

    // SWAP first, DROP request ignored.
    let swapped = drop_recoverable_sum(&channel, Arc::new(CountingAdd::new()))?;
    channel.swap_out(swapped)?;
    channel.sync()?;
    channel.drop(swapped)?;
    channel.sync()?;
    let stats = channel.tensor_stats(swapped)?;
    assert_eq!(stats.evict_type, EvictType::Swap);
    assert!(stats.has_host_backup);
    Ok(())
}

#[test]
fn dropping_a_put_tensor_is_ignored() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_drop_flag(true);
    let handle = channel.put(&HostTensor::ones([2]), true);
    channel.sync()?;

    // A put tensor has no producer op recorded.
    channel.drop(handle)?;
    channel.sync()?;
    assert!(channel.tensor_stats(handle)?.materialized);
    Ok(())
}

#[test]
fn regenerate_walks_evicted_inputs_recursively() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_drop_flag(true);
    let first = Arc::new(CountingAdd::new());
    let second = Arc::new(CountingAdd::new());

    let a = channel.put(&HostTensor::ones([2]), true);
    let b = channel.put(&HostTensor::ones([2]), true);
    let mid = channel.apply_op(Arc::clone(&first) as Arc<dyn OpDef>, &[a, b])?[0];
    let out = channel.apply_op(Arc::clone(&second) as Arc<dyn OpDef>, &[mid, b])?[0];
    channel.sync()?;

    channel.drop(out)?;
    channel.drop(mid)?;
    channel.sync()?;
    assert!(!channel.tensor_stats(mid)?.materialized);
    assert!(!channel.tensor_stats(out)?.materialized);

    // Rebuilding `out` first has to rebuild `mid`.
    let value = channel.get_value(out)?;
    assert!(value.data().iter().all(|&v| v == 3.0));
    assert_eq!(first.runs(), 2);
    assert_eq!(second.runs(), 2);
    assert_eq!(channel.tensor_stats(mid)?.recompute_times, 1);
    assert_eq!(channel.tensor_stats(out)?.recompute_times, 1);
    Ok(())
}
