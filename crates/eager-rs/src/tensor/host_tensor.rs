//! Host-backed tensor used for literals, value fetches, and swap backups.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem::{size_of, ManuallyDrop};
use std::sync::Arc;

use anyhow::{bail, Result};

use super::{comp_node::CompNode, device_tensor::DeviceTensor, dtype::DType, layout::Layout};

/// Immutable host-memory tensor.
///
/// Storage is reference-counted, so clones and [`HostTensor::proxy_to_default_cpu`]
/// share bytes instead of copying them.
#[derive(Debug, Clone)]
pub struct HostTensor {
    layout: Layout,
    comp_node: CompNode,
    bytes: Arc<Vec<u8>>,
}

impl HostTensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(dims: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        let layout = Layout::new(DType::F32, dims);
        if data.len() != layout.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                layout.dims()
            );
        }
        Ok(HostTensor {
            layout,
            comp_node: CompNode::default_cpu(),
            bytes: Arc::new(vec_into_bytes(data)),
        })
    }

    /// Constructs an `I32` tensor, ensuring the payload matches the expected element count.
    pub fn from_i32(dims: impl Into<Vec<usize>>, data: Vec<i32>) -> Result<Self> {
        let layout = Layout::new(DType::I32, dims);
        if data.len() != layout.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                layout.dims()
            );
        }
        Ok(HostTensor {
            layout,
            comp_node: CompNode::default_cpu(),
            bytes: Arc::new(vec_into_bytes(data)),
        })
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(dims: impl Into<Vec<usize>>) -> Self {
        let layout = Layout::new(DType::F32, dims);
        let len = layout.num_elements();
        HostTensor {
            layout,
            comp_node: CompNode::default_cpu(),
            bytes: Arc::new(vec_into_bytes(vec![0.0f32; len])),
        }
    }

    /// Returns a one-initialized `F32` tensor of the requested shape.
    pub fn ones(dims: impl Into<Vec<usize>>) -> Self {
        let layout = Layout::new(DType::F32, dims);
        let len = layout.num_elements();
        HostTensor {
            layout,
            comp_node: CompNode::default_cpu(),
            bytes: Arc::new(vec_into_bytes(vec![1.0f32; len])),
        }
    }

    /// Returns a rank-1 scalar wrapper around a single `f32`.
    pub fn scalar(value: f32) -> Self {
        HostTensor::from_vec([1], vec![value]).expect("scalar layout is always valid")
    }

    /// Reads a device tensor back into host memory, blocking until the copy completes.
    pub fn copy_from(dev: &DeviceTensor) -> Self {
        let bytes = match dev.layout().dtype() {
            DType::F32 => vec_into_bytes(dev.data().to_vec()),
            DType::I32 => vec_into_bytes(dev.data_i32().to_vec()),
            other => panic!("host readback is not supported for dtype {other:?}"),
        };
        HostTensor {
            layout: dev.layout().clone(),
            comp_node: dev.comp_node().clone(),
            bytes: Arc::new(bytes),
        }
    }

    /// Provides access to the tensor layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the compute node the value is tagged with.
    pub fn comp_node(&self) -> &CompNode {
        &self.comp_node
    }

    /// Borrows the raw dimension slice.
    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.layout.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
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

    /// Borrows the raw byte payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns a view of the same storage re-tagged to the default CPU node.
    pub fn proxy_to_default_cpu(&self) -> HostTensor {
        HostTensor {
            layout: self.layout.clone(),
            comp_node: CompNode::default_cpu(),
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// Hashes layout and contents into a key usable for constant caching.
    pub fn content_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.layout.dtype().hash(&mut hasher);
        self.layout.dims().hash(&mut hasher);
        self.comp_node.hash(&mut hasher);
        self.bytes.hash(&mut hasher);
        hasher.finish()
    }
}

/// Converts an owned vector into a raw byte buffer without copying.
pub(crate) fn vec_into_bytes<T>(data: Vec<T>) -> Vec<u8> {
    let mut data = ManuallyDrop::new(data);
    let ptr = data.as_mut_ptr() as *mut u8;
    let len = data.len() * size_of::<T>();
    let cap = data.capacity() * size_of::<T>();
    unsafe { Vec::from_raw_parts(ptr, len, cap) }
}

/// Views a byte slice as a typed slice, asserting that the layout matches.
pub(crate) fn bytes_as_slice<T>(bytes: &[u8]) -> &[T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    assert_eq!(
        bytes.as_ptr() as usize % std::mem::align_of::<T>(),
        0,
        "byte buffer is not aligned for the element type"
    );
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, bytes.len() / size_of::<T>()) }
}

/// Views a mutable byte slice as a typed mutable slice, asserting the layout.
pub(crate) fn bytes_as_slice_mut<T>(bytes: &mut [u8]) -> &mut [T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    assert_eq!(
        bytes.as_ptr() as usize % std::mem::align_of::<T>(),
        0,
        "byte buffer is not aligned for the element type"
    );
    unsafe {
        std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut T, bytes.len() / size_of::<T>())
    }
}
