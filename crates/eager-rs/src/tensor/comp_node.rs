//! Compute-node identity used to tag tensor placement.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

/// Identifies the compute node (device) a tensor lives on.
///
/// Nodes are compared by name. The reference runtime backs every node with
/// host memory and completes work inline, so [`CompNode::sync`] has nothing
/// left to wait for; it exists so callers can surface device errors at the
/// point the channel's async contract requires.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CompNode(Arc<str>);

impl CompNode {
    /// Builds a compute node from its name, e.g. `"cpu0"` or `"gpu1"`.
    pub fn new(name: impl Into<String>) -> Self {
        CompNode(Arc::<str>::from(name.into()))
    }

    /// Returns the default CPU node.
    pub fn default_cpu() -> Self {
        CompNode::new("cpu0")
    }

    /// Returns the node name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Blocks until all work queued on this node has completed.
    pub fn sync(&self) -> Result<()> {
        Ok(())
    }
}

impl Default for CompNode {
    fn default() -> Self {
        CompNode::default_cpu()
    }
}

impl fmt::Debug for CompNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompNode({})", self.0)
    }
}

impl fmt::Display for CompNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
