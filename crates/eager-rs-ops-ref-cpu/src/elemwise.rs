//! Dense element-wise operators over `f32` tensors.

use std::sync::Arc;

use eager_rs::{
    DType, DeviceTensor, Layout, OpDef, OpError, OpResult, TensorDesc, TensorDescList, TensorPtr,
    TensorPtrList, TensorValue,
};
use smallvec::smallvec;

/// Element-wise operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemwiseMode {
    Add,
    Sub,
    Mul,
    Relu,
    Neg,
}

impl ElemwiseMode {
    fn name(self) -> &'static str {
        match self {
            ElemwiseMode::Add => "Add",
            ElemwiseMode::Sub => "Sub",
            ElemwiseMode::Mul => "Mul",
            ElemwiseMode::Relu => "Relu",
            ElemwiseMode::Neg => "Neg",
        }
    }

    fn arity(self) -> usize {
        match self {
            ElemwiseMode::Add | ElemwiseMode::Sub | ElemwiseMode::Mul => 2,
            ElemwiseMode::Relu | ElemwiseMode::Neg => 1,
        }
    }

    fn eval_binary(self, a: f32, b: f32) -> f32 {
        match self {
            ElemwiseMode::Add => a + b,
            ElemwiseMode::Sub => a - b,
            ElemwiseMode::Mul => a * b,
            _ => unreachable!("unary mode evaluated as binary"),
        }
    }

    fn eval_unary(self, a: f32) -> f32 {
        match self {
            ElemwiseMode::Relu => a.max(0.0),
            ElemwiseMode::Neg => -a,
            _ => unreachable!("binary mode evaluated as unary"),
        }
    }
}

/// Element-wise operator definition.
///
/// Kernels reuse the first input's storage when it is uniquely owned at
/// entry, which is exactly the state the channel arranges for fused last-use
/// inputs.
#[derive(Debug, Clone, Copy)]
pub struct Elemwise {
    mode: ElemwiseMode,
}

impl Elemwise {
    pub fn new(mode: ElemwiseMode) -> Self {
        Elemwise { mode }
    }

    fn check_arity(&self, actual: usize) -> OpResult<()> {
        let expected = self.mode.arity();
        if actual != expected {
            return Err(OpError::ArityMismatch {
                op: self.mode.name().to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn check_layout(&self, layout: &Layout) -> OpResult<()> {
        if layout.dtype() != DType::F32 {
            return Err(OpError::DTypeMismatch {
                op: self.mode.name().to_string(),
                detail: format!("{:?}", layout.dtype()),
            });
        }
        Ok(())
    }

    fn execution_error(&self, detail: impl ToString) -> OpError {
        OpError::Execution {
            op: self.mode.name().to_string(),
            detail: detail.to_string(),
        }
    }

    fn apply_binary(&self, lhs: TensorPtr, rhs: TensorPtr) -> OpResult<TensorPtr> {
        if lhs.layout() != rhs.layout() {
            return Err(OpError::ShapeMismatch {
                op: self.mode.name().to_string(),
                detail: format!("{:?} vs {:?}", lhs.layout().dims(), rhs.layout().dims()),
            });
        }
        self.check_layout(lhs.layout())?;
        match Arc::try_unwrap(lhs) {
            Ok(value) => {
                let mut dev = value.into_dev_tensor();
                if let Some(dst) = dev.try_data_mut() {
                    for (a, b) in dst.iter_mut().zip(rhs.dev().data()) {
                        *a = self.mode.eval_binary(*a, *b);
                    }
                    return Ok(Arc::new(TensorValue::from_device(dev)));
                }
                self.binary_out_of_place(&dev, &rhs)
            }
            Err(shared) => self.binary_out_of_place(shared.dev(), &rhs),
        }
    }

    fn binary_out_of_place(&self, lhs: &DeviceTensor, rhs: &TensorPtr) -> OpResult<TensorPtr> {
        let out: Vec<f32> = lhs
            .data()
            .iter()
            .zip(rhs.dev().data())
            .map(|(&a, &b)| self.mode.eval_binary(a, b))
            .collect();
        let dev = DeviceTensor::from_vec(lhs.layout().dims(), out, lhs.comp_node().clone())
            .map_err(|err| self.execution_error(err))?;
        Ok(Arc::new(TensorValue::from_device(dev)))
    }

    fn apply_unary(&self, input: TensorPtr) -> OpResult<TensorPtr> {
        self.check_layout(input.layout())?;
        match Arc::try_unwrap(input) {
            Ok(value) => {
                let mut dev = value.into_dev_tensor();
                if let Some(dst) = dev.try_data_mut() {
                    for a in dst.iter_mut() {
                        *a = self.mode.eval_unary(*a);
                    }
                    return Ok(Arc::new(TensorValue::from_device(dev)));
                }
                self.unary_out_of_place(&dev)
            }
            Err(shared) => self.unary_out_of_place(shared.dev()),
        }
    }

    fn unary_out_of_place(&self, input: &DeviceTensor) -> OpResult<TensorPtr> {
        let out: Vec<f32> = input
            .data()
            .iter()
            .map(|&a| self.mode.eval_unary(a))
            .collect();
        let dev = DeviceTensor::from_vec(input.layout().dims(), out, input.comp_node().clone())
            .map_err(|err| self.execution_error(err))?;
        Ok(Arc::new(TensorValue::from_device(dev)))
    }
}

impl OpDef for Elemwise {
    fn name(&self) -> &str {
        self.mode.name()
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        self.check_arity(inputs.len())?;
        for input in inputs {
            if !input.layout.is_unknown() {
                self.check_layout(&input.layout)?;
            }
        }
        let first = &inputs[0];
        let all_known = inputs.iter().all(|input| !input.layout.is_unknown());
        if !all_known {
            let desc = TensorDesc::new(
                Layout::unknown(first.layout.dtype()),
                first.comp_node.clone(),
            );
            return Ok((smallvec![desc], false));
        }
        if let Some(other) = inputs
            .iter()
            .find(|input| input.layout.dims() != first.layout.dims())
        {
            return Err(OpError::ShapeMismatch {
                op: self.mode.name().to_string(),
                detail: format!(
                    "{:?} vs {:?}",
                    first.layout.dims(),
                    other.layout.dims()
                ),
            });
        }
        let desc = TensorDesc::new(first.layout.clone(), first.comp_node.clone());
        Ok((smallvec![desc], true))
    }

    fn apply_on_physical_tensor(&self, mut inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        self.check_arity(inputs.len())?;
        let out = match self.mode.arity() {
            2 => {
                let rhs = inputs.pop().expect("arity checked");
                let lhs = inputs.pop().expect("arity checked");
                self.apply_binary(lhs, rhs)?
            }
            _ => {
                let input = inputs.pop().expect("arity checked");
                self.apply_unary(input)?
            }
        };
        Ok(smallvec![out])
    }
}
