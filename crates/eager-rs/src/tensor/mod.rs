//! Tensor value types consumed and produced by the execution channel.

mod comp_node;
mod device_tensor;
mod dtype;
mod host_tensor;
mod layout;
mod value;

pub use comp_node::CompNode;
pub use device_tensor::DeviceTensor;
pub use dtype::DType;
pub use host_tensor::HostTensor;
pub use layout::Layout;
pub use value::TensorValue;

/// Logical descriptor of a tensor handle: layout, placement, and an optional
/// cached host value recorded at put time.
#[derive(Debug, Clone)]
pub struct TensorDesc {
    pub layout: Layout,
    pub comp_node: CompNode,
    pub value: Option<HostTensor>,
}

impl TensorDesc {
    /// Builds a descriptor with a known layout and no cached value.
    pub fn new(layout: Layout, comp_node: CompNode) -> Self {
        TensorDesc {
            layout,
            comp_node,
            value: None,
        }
    }
}

impl Default for TensorDesc {
    fn default() -> Self {
        TensorDesc {
            layout: Layout::unknown(DType::F32),
            comp_node: CompNode::default_cpu(),
            value: None,
        }
    }
}
