//! Loopback stand-ins for the distinguished communication operators.
//!
//! Real deployments wire these to a transport; the channel only cares that
//! their kind forces a full command-buffer flush so no command stays staged
//! behind an externally ordered transfer.

use std::sync::Arc;

use eager_rs::{
    CompNode, DType, HostTensor, Layout, OpDef, OpError, OpKind, OpResult, TensorDesc,
    TensorDescList, TensorPtrList, TensorValue,
};
use smallvec::smallvec;

/// Sends a tensor to a named peer; the loopback version passes it through.
#[derive(Debug, Clone)]
pub struct RemoteSend {
    key: String,
}

impl RemoteSend {
    pub fn new(key: impl Into<String>) -> Self {
        RemoteSend { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl OpDef for RemoteSend {
    fn name(&self) -> &str {
        "RemoteSend"
    }

    fn kind(&self) -> OpKind {
        OpKind::RemoteSend
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        if inputs.len() != 1 {
            return Err(OpError::ArityMismatch {
                op: "RemoteSend".to_string(),
                expected: 1,
                actual: inputs.len(),
            });
        }
        let input = &inputs[0];
        let desc = TensorDesc::new(input.layout.clone(), input.comp_node.clone());
        Ok((smallvec![desc], !input.layout.is_unknown()))
    }

    fn apply_on_physical_tensor(&self, mut inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        if inputs.len() != 1 {
            return Err(OpError::ArityMismatch {
                op: "RemoteSend".to_string(),
                expected: 1,
                actual: inputs.len(),
            });
        }
        let input = inputs.pop().expect("arity checked");
        Ok(smallvec![input])
    }
}

/// Receives a tensor of a known layout from a named peer; the loopback
/// version yields zeros.
#[derive(Debug, Clone)]
pub struct RemoteRecv {
    key: String,
    dims: Vec<usize>,
    comp_node: CompNode,
}

impl RemoteRecv {
    pub fn new(key: impl Into<String>, dims: Vec<usize>, comp_node: CompNode) -> Self {
        RemoteRecv {
            key: key.into(),
            dims,
            comp_node,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl OpDef for RemoteRecv {
    fn name(&self) -> &str {
        "RemoteRecv"
    }

    fn kind(&self) -> OpKind {
        OpKind::RemoteRecv
    }

    fn infer_output_attrs_fallible(
        &self,
        inputs: &[TensorDesc],
    ) -> OpResult<(TensorDescList, bool)> {
        if !inputs.is_empty() {
            return Err(OpError::ArityMismatch {
                op: "RemoteRecv".to_string(),
                expected: 0,
                actual: inputs.len(),
            });
        }
        let desc = TensorDesc::new(
            Layout::new(DType::F32, self.dims.clone()),
            self.comp_node.clone(),
        );
        Ok((smallvec![desc], true))
    }

    fn apply_on_physical_tensor(&self, inputs: TensorPtrList) -> OpResult<TensorPtrList> {
        if !inputs.is_empty() {
            return Err(OpError::ArityMismatch {
                op: "RemoteRecv".to_string(),
                expected: 0,
                actual: inputs.len(),
            });
        }
        let host = HostTensor::zeros(self.dims.clone());
        Ok(smallvec![Arc::new(TensorValue::from_host(&host))])
    }
}
