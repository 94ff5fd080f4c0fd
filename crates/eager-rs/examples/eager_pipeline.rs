use std::sync::Arc;

use anyhow::Result;
use eager_rs::{HostTensor, Interpreter};
use eager_rs_ops_ref_cpu::{Elemwise, ElemwiseMode};

fn main() -> Result<()> {
    let channel = Interpreter::inst().create_channel();
    channel.config_async_level(2);
    channel.set_drop_flag(true);

    let a = channel.put(&HostTensor::ones([2, 2]), true);
    let b = channel.put(&HostTensor::ones([2, 2]), true);
    let sum = channel.apply_op(Arc::new(Elemwise::new(ElemwiseMode::Add)), &[a, b])?[0];
    println!("sum: {:?}", channel.get_value(sum)?.data());

    // Evict the sum and let the channel rebuild it on demand.
    channel.drop(sum)?;
    channel.sync()?;
    println!("after drop: {:?}", channel.tensor_stats(sum)?);
    println!("regenerated: {:?}", channel.get_value(sum)?.data());
    println!("stats: {:?}", channel.tensor_stats(sum)?);

    channel.close()?;
    Ok(())
}
