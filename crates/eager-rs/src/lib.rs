mod env;
pub mod interpreter;
pub mod ops;
pub mod tensor;

pub use interpreter::{Channel, EvictType, Interpreter, TensorHandle, TensorStats};
pub use ops::{OpDef, OpError, OpKind, OpResult, TensorDescList, TensorPtr, TensorPtrList};
pub use tensor::{CompNode, DType, DeviceTensor, HostTensor, Layout, TensorDesc, TensorValue};
