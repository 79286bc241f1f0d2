use crate::errors::SfResult;
use crate::graph::{Graph, NodeRef};
use crate::types::TensorValue;

/// A physical device known to the execution engine.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: String,
    pub memory_bytes: u64,
}

/// Trait defining the physical execution of a lowered graph.
/// This is the seam where a CPU interpreter can be swapped for an
/// accelerator-backed engine.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Evaluates `fetches` (and runs `targets` for effect) against the
    /// graph, with `feeds` overriding the named ports. Each node is
    /// evaluated at most once per call.
    fn execute(
        &self,
        graph: &Graph,
        feeds: &[(NodeRef, TensorValue)],
        fetches: &[NodeRef],
        targets: &[NodeRef],
    ) -> SfResult<Vec<TensorValue>>;

    fn devices(&self) -> SfResult<Vec<DeviceInfo>>;
}

pub mod cpu;
