use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use eager_rs::{
    HostTensor, Interpreter, OpDef, OpResult, TensorDesc, TensorDescList, TensorPtrList,
};
use eager_rs_ops_ref_cpu::{Elemwise, ElemwiseMode, RemoteSend};

/// Records the strong count of its input at kernel entry before delegating.
struct InplaceProbe {
    inner: Elemwise,
    entry_refcount: AtomicUsize,
    ran: AtomicBool,
}

impl InplaceProbe {
    fn relu() -> Self {
        InplaceProbe {
            inner: Elemwise::new(ElemwiseMode::Relu),
            entry_refcount: AtomicUsize::new(0),
            ran: AtomicBool::new(false),
        }
    }
}

impl OpDef for InplaceProbe {
    fn name(&self) -> &str {
        "ProbedRelu"
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        self.inner.infer_output_attrs_fallible(inputs)
    }

    fn apply_on_physical_tensor(&self, inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        self.entry_refcount
            .store(Arc::strong_count(&inputs[0]), Ordering::SeqCst);
        self.ran.store(true, Ordering::SeqCst);
        self.inner.apply_on_physical_tensor(inputs)
    }
}

#[test]
fn fused_del_makes_input_uniquely_owned() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_buffer_length(8);
    let probe = Arc::new(InplaceProbe::relu());

    let x = channel.put(&HostTensor::from_vec([3], vec![-1.0, 0.5, 2.0])?, true);
    let outputs = channel.apply_op(Arc::clone(&probe) as Arc<dyn OpDef>, &[x])?;
    assert_eq!(channel.buffer_len(), 2);

    // The deletion fuses into the pending ApplyOp instead of appending.
    channel.del(x)?;
    assert_eq!(channel.buffer_len(), 2);

    channel.sync()?;
    assert!(probe.ran.load(Ordering::SeqCst));
    assert_eq!(probe.entry_refcount.load(Ordering::SeqCst), 1);
    assert_eq!(channel.get_value(outputs[0])?.data(), &[0.0, 0.5, 2.0]);
    Ok(())
}

#[test]
fn del_with_later_use_is_not_fused() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_buffer_length(8);
    let probe = Arc::new(InplaceProbe::relu());

    let x = channel.put(&HostTensor::from_vec([2], vec![1.0, -2.0])?, true);
    let first = channel.apply_op(Arc::clone(&probe) as Arc<dyn OpDef>, &[x])?;
    let second = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Neg)), &[x])?;
    let before = channel.buffer_len();

    channel.del(x)?;
    assert_eq!(channel.buffer_len(), before + 1);

    channel.sync()?;
    // The probed op saw a shared input: the registry still held its record
    // for the later consumer.
    assert!(probe.entry_refcount.load(Ordering::SeqCst) > 1);
    assert_eq!(channel.get_value(first[0])?.data(), &[1.0, 0.0]);
    assert_eq!(channel.get_value(second[0])?.data(), &[-1.0, 2.0]);
    Ok(())
}

#[test]
fn fusion_does_not_change_observable_values() -> Result<()> {
    fn run(del_before_flush: bool) -> Result<Vec<f32>> {
        let channel = Interpreter::inst().create_channel();
        channel.config_async_level(2);
        channel.set_buffer_length(8);
        let x = channel.put(&HostTensor::from_vec([4], vec![-2.0, -0.5, 0.5, 2.0])?, true);
        let y = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Relu)), &[x])?;
        if del_before_flush {
            channel.del(x)?;
            channel.sync()?;
        } else {
            channel.sync()?;
            channel.del(x)?;
        }
        Ok(channel.get_value(y[0])?.data().to_vec())
    }

    assert_eq!(run(true)?, run(false)?);
    Ok(())
}

#[test]
fn distinguished_op_flushes_the_whole_buffer() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_buffer_length(8);

    let a = channel.put(&HostTensor::ones([2]), false);
    let b = channel.put(&HostTensor::ones([2]), false);
    let sum = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Add)), &[a, b])?;
    assert!(channel.buffer_len() > 0);

    let sent = channel.apply_op(Arc::new(RemoteSend::new("peer0")), &[sum[0]])?;
    assert_eq!(channel.buffer_len(), 0);

    channel.sync()?;
    assert_eq!(channel.get_value(sent[0])?.data(), &[2.0, 2.0]);
    Ok(())
}

#[test]
fn overflow_flushes_keep_buffer_within_capacity() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_buffer_length(2);

    for i in 0..5 {
        channel.put(&HostTensor::scalar(i as f32), true);
        assert!(channel.buffer_len() <= 2);
    }
    channel.sync()?;
    Ok(())
}

#[test]
fn get_value_drains_the_buffer() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_buffer_length(8);

    let a = channel.put(&HostTensor::ones([2]), false);
    let b = channel.put(&HostTensor::ones([2]), false);
    let sum = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Add)), &[a, b])?;
    assert!(channel.buffer_len() > 0);

    assert_eq!(channel.get_value(sum[0])?.data(), &[2.0, 2.0]);
    assert_eq!(channel.buffer_len(), 0);
    Ok(())
}
