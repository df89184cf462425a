// id.rs — Stable identifiers for scheduler artifacts
//
// All ids are dense indices into the arena that owns the referenced item:
// `OpId` into a region's dependence graph, `EdgeId` into its edge list,
// `UnitId`/`BusId`/`RegFileId` into the resource model. Allocated in program
// (or declaration) order so every iteration over them is deterministic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Program-order index of an operation within its region.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OpId(pub u32);

/// Index of a dependence edge within its graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

/// Index of a function unit in the resource model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnitId(pub u32);

/// Index of a transport bus in the resource model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BusId(pub u32);

/// Index of a register file in the resource model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegFileId(pub u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl UnitId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BusId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RegFileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocator for operation and edge ids. Produces monotonically increasing
/// ids in allocation order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_op: u32,
    next_edge: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_op(&mut self) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;
        id
    }

    pub fn alloc_edge(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        id
    }
}
