use std::sync::Arc;

use anyhow::Result;
use eager_rs::{
    HostTensor, Interpreter, OpDef, OpError, OpResult, TensorDesc, TensorDescList, TensorPtrList,
};
use eager_rs_ops_ref_cpu::{Elemwise, ElemwiseMode};

/// Passes inference, then fails in the kernel.
struct FailingOp;

impl OpDef for FailingOp {
    fn name(&self) -> &str {
        "FailingOp"
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        Elemwise::new(ElemwiseMode::Relu).infer_output_attrs_fallible(inputs)
    }

    fn apply_on_physical_tensor(&self, _inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        Err(OpError::Execution {
            op: "FailingOp".to_string(),
            detail: "injected kernel failure".to_string(),
        })
    }
}

#[test]
fn kernel_failure_surfaces_at_sync_and_poisons_outputs() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    let input = channel.put(&HostTensor::ones([2]), true);
    let outputs = channel.apply_op(Arc::new(FailingOp), &[input])?;

    let err = channel.sync().unwrap_err();
    assert!(err.to_string().contains("injected kernel failure"));

    // The captured failure is consumed exactly once.
    channel.sync()?;

    let stats = channel.tensor_stats(outputs[0])?;
    assert!(stats.invalid);
    assert!(!stats.materialized);

    let err = channel.get_value(outputs[0]).unwrap_err();
    assert!(err.to_string().contains("invalid tensor"));

    let err = channel
        .apply_op(
            Arc::new(Elemwise::new(ElemwiseMode::Neg)),
            &[outputs[0]],
        )
        .unwrap_err();
    assert!(err.to_string().contains("invalid tensor"));
    Ok(())
}

#[test]
fn kernel_failure_wakes_a_blocked_fetch() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    let input = channel.put(&HostTensor::ones([2]), true);
    let outputs = channel.apply_op(Arc::new(FailingOp), &[input])?;

    // The fetch parks until the worker captures the failure and wakes it.
    let err = channel.get_value(outputs[0]).unwrap_err();
    assert!(!err.to_string().is_empty());
    assert!(channel.tensor_stats(outputs[0])?.invalid);

    // The trailing GetValue command may have failed against the poisoned
    // record as well; drain whatever is stored, then the channel is clean.
    let _ = channel.sync();
    channel.sync()?;
    Ok(())
}

#[test]
fn async_level_zero_surfaces_failures_synchronously() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(0);
    let input = channel.put(&HostTensor::ones([2]), true);

    let err = channel
        .apply_op(Arc::new(FailingOp), &[input])
        .unwrap_err();
    assert!(err.to_string().contains("injected kernel failure"));
    Ok(())
}

#[test]
fn healthy_commands_after_a_failure_still_execute() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    let input = channel.put(&HostTensor::ones([2]), true);
    let _poisoned = channel.apply_op(Arc::new(FailingOp), &[input])?;
    let _ = channel.sync();

    let a = channel.put(&HostTensor::ones([2]), true);
    let b = channel.put(&HostTensor::ones([2]), true);
    let sum = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Add)), &[a, b])?;
    assert_eq!(channel.get_value(sum[0])?.data(), &[2.0, 2.0]);
    Ok(())
}
