// priority.rs — Critical-path priorities shared by the list schedulers
//
// height(n): longest latency-weighted path from n to any exit, counting the
//            exit's own latency; the list-scheduling priority.
// depth(n):  earliest start of n on an unbounded machine.
// The critical path max(depth + height) is a lower bound on schedule length.
//
// Preconditions: none; cyclic graphs are rejected.
// Postconditions: height(src) >= latency(e) + height(dst) for every edge.
// Failure modes: `UnschedulableRegion` when the graph has a cycle.
// Side effects: none.

use crate::ddg::DependenceGraph;
use crate::error::{SchedError, SchedResult};
use crate::id::OpId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Priorities {
    pub height: Vec<u32>,
    pub depth: Vec<u32>,
    pub critical_path: u32,
    /// Topological order the priorities were computed over.
    pub order: Vec<OpId>,
}

impl Priorities {
    pub fn compute(graph: &DependenceGraph) -> SchedResult<Self> {
        let order = graph.topological_order().map_err(|e| match e {
            SchedError::CyclicDependence { region, nodes } => SchedError::UnschedulableRegion {
                region,
                reason: format!("dependence cycle through operations {nodes:?}"),
            },
            other => other,
        })?;

        let n = graph.len();
        let mut depth = vec![0u32; n];
        for &id in &order {
            for e in graph.successors(id) {
                let d = depth[id.index()] + e.latency;
                let slot = &mut depth[e.dst.index()];
                *slot = (*slot).max(d);
            }
        }

        let mut height = vec![0u32; n];
        for &id in order.iter().rev() {
            let own = graph.node(id).latency;
            let via_succ = graph
                .successors(id)
                .map(|e| e.latency + height[e.dst.index()])
                .max()
                .unwrap_or(0);
            height[id.index()] = own.max(via_succ);
        }

        let critical_path = (0..n).map(|i| depth[i] + height[i]).max().unwrap_or(0);

        Ok(Priorities {
            height,
            depth,
            critical_path,
            order,
        })
    }

    pub fn height(&self, id: OpId) -> u32 {
        self.height[id.index()]
    }

    pub fn depth(&self, id: OpId) -> u32 {
        self.depth[id.index()]
    }

    /// depth + height: length of the longest path through `id`.
    pub fn slack_free_length(&self, id: OpId) -> u32 {
        self.depth(id) + self.height(id)
    }
}
