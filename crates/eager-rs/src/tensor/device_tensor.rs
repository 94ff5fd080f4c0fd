//! Device-side tensor storage with layout and placement metadata.

use std::sync::Arc;

use anyhow::{bail, Result};

use super::host_tensor::{bytes_as_slice, bytes_as_slice_mut, vec_into_bytes, HostTensor};
use super::{comp_node::CompNode, dtype::DType, layout::Layout};

/// Dense tensor resident in device memory.
///
/// Storage is reference-counted; clones share the same buffer, which is what
/// makes handing out views cheap and lets kernels detect exclusive ownership
/// before mutating in place.
#[derive(Debug, Clone)]
pub struct DeviceTensor {
    layout: Layout,
    comp_node: CompNode,
    bytes: Arc<Vec<u8>>,
}

impl DeviceTensor {
    /// Transfers a host tensor into a freshly allocated device buffer.
    pub fn from_host(host: &HostTensor) -> Self {
        let bytes = match host.layout().dtype() {
            DType::F32 => vec_into_bytes(host.data().to_vec()),
            DType::I32 => vec_into_bytes(host.data_i32().to_vec()),
            other => panic!("device upload is not supported for dtype {other:?}"),
        };
        DeviceTensor {
            layout: host.layout().clone(),
            comp_node: host.comp_node().clone(),
            bytes: Arc::new(bytes),
        }
    }

    /// Constructs an `F32` device tensor from raw values.
    pub fn from_vec(
        dims: impl Into<Vec<usize>>,
        data: Vec<f32>,
        comp_node: CompNode,
    ) -> Result<Self> {
        let layout = Layout::new(DType::F32, dims);
        if data.len() != layout.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                layout.dims()
            );
        }
        Ok(DeviceTensor {
            layout,
            comp_node,
            bytes: Arc::new(vec_into_bytes(data)),
        })
    }

    /// Provides access to the tensor layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the compute node owning the storage.
    pub fn comp_node(&self) -> &CompNode {
        &self.comp_node
    }

    /// Borrows the underlying `f32` data slice, panicking if the dtype differs.
    pub fn data(&self) -> &[f32] {
        match self.layout.dtype() {
            DType::F32 => bytes_as_slice::<f32>(&self.bytes),
            _ => panic!("tensor data is not stored as f32"),
        }
    }

    /// Borrows the underlying `i32` data slice, panicking if the dtype differs.
    pub fn data_i32(&self) -> &[i32] {
        match self.layout.dtype() {
            DType::I32 => bytes_as_slice::<i32>(&self.bytes),
            _ => panic!("tensor data is not stored as i32"),
        }
    }

    /// Mutably borrows the `f32` data when this tensor is the sole owner of
    /// its storage; returns `None` if the buffer is shared.
    pub fn try_data_mut(&mut self) -> Option<&mut [f32]> {
        if self.layout.dtype() != DType::F32 {
            return None;
        }
        Arc::get_mut(&mut self.bytes).map(|bytes| bytes_as_slice_mut::<f32>(bytes))
    }

    /// Reports whether this tensor is the sole owner of its storage.
    pub fn storage_unique(&self) -> bool {
        Arc::strong_count(&self.bytes) == 1
    }
}
