//! Tensor layout: a scalar dtype paired with logical dimensions.

use super::dtype::DType;

/// Stores the dtype and logical dimensions of a tensor.
///
/// A layout with zero dimensions means the shape is not yet known: the
/// operator that produces the tensor could not infer it ahead of execution.
/// Such layouts are replaced once the worker materializes the tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    dtype: DType,
    dims: Vec<usize>,
}

impl Layout {
    /// Constructs a layout with a known shape.
    ///
    /// Panics if `dims` is empty; use [`Layout::unknown`] for the
    /// deferred-shape state.
    pub fn new(dtype: DType, dims: impl Into<Vec<usize>>) -> Self {
        let dims = dims.into();
        assert!(!dims.is_empty(), "layout must have at least one dimension");
        Layout { dtype, dims }
    }

    /// Constructs a layout whose shape has not been inferred yet.
    pub fn unknown(dtype: DType) -> Self {
        Layout {
            dtype,
            dims: Vec::new(),
        }
    }

    /// Returns the scalar dtype.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Borrows the raw dimension slice; empty when the shape is unknown.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the layout.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Reports whether the shape is still unknown.
    pub fn is_unknown(&self) -> bool {
        self.dims.is_empty()
    }

    /// Computes the total number of elements implied by the layout.
    pub fn num_elements(&self) -> usize {
        if self.is_unknown() {
            return 0;
        }
        self.dims.iter().product()
    }

    /// Computes the byte size of a dense tensor with this layout.
    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }
}
