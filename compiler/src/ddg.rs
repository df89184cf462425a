// ddg.rs — Per-region data dependence graph
//
// Index arena of operation nodes and dependence edges for one scheduling
// region, with adjacency lists, entry/exit sets and the def-use values used
// by the register-pressure mode. Also defines the serializable dump used as
// a diagnostic artifact and for reloading graphs in tests.
//
// Preconditions: node ids are dense and equal to their program-order index;
//                edge endpoints name existing nodes.
// Postconditions: the graph is immutable once built; iteration order over
//                 nodes, edges and adjacency is deterministic.
// Failure modes: `topological_order` reports dependence cycles;
//                `from_dump` rejects inconsistent dumps.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DdgDumpError, SchedError, SchedResult};
use crate::id::{EdgeId, OpId};
use crate::machine::MemoryAccess;

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandRole {
    Read,
    Write,
    /// Read and written by the same operation.
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandValue {
    Reg(String),
    Imm(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub role: OperandRole,
    pub value: OperandValue,
}

impl Operand {
    pub fn register(&self) -> Option<&str> {
        match &self.value {
            OperandValue::Reg(r) => Some(r),
            OperandValue::Imm(_) => None,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self.role, OperandRole::Read | OperandRole::ReadWrite)
    }

    pub fn is_write(&self) -> bool {
        matches!(self.role, OperandRole::Write | OperandRole::ReadWrite)
    }
}

/// One IR operation of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpNode {
    pub id: OpId,
    pub opcode: String,
    pub operands: Vec<Operand>,
    /// Declared latency (slowest implementing unit).
    pub latency: u32,
    pub control: bool,
    #[serde(default)]
    pub memory: MemoryAccess,
    #[serde(default)]
    pub side_effects: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Proven independent of the preceding control transfer.
    #[serde(default)]
    pub safe: bool,
}

impl OpNode {
    /// Registers read by this operation, in operand order.
    pub fn reads(&self) -> impl Iterator<Item = &str> {
        self.operands
            .iter()
            .filter(|o| o.is_read())
            .filter_map(Operand::register)
    }

    /// Registers written by this operation, in operand order.
    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.operands
            .iter()
            .filter(|o| o.is_write())
            .filter_map(Operand::register)
    }

    pub fn is_memory(&self) -> bool {
        self.memory != MemoryAccess::None
    }
}

impl fmt::Display for OpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dests: Vec<&str> = self
            .operands
            .iter()
            .filter(|o| o.role == OperandRole::Write)
            .filter_map(Operand::register)
            .collect();
        if !dests.is_empty() {
            write!(f, "{} = ", dests.join(", "))?;
        }
        write!(f, "{}", self.opcode)?;
        let srcs: Vec<String> = self
            .operands
            .iter()
            .filter(|o| o.role != OperandRole::Write)
            .map(|o| match (&o.role, &o.value) {
                (OperandRole::ReadWrite, OperandValue::Reg(r)) => format!("&{r}"),
                (_, OperandValue::Reg(r)) => r.clone(),
                (_, OperandValue::Imm(v)) => v.to_string(),
            })
            .collect();
        if !srcs.is_empty() {
            write!(f, " {}", srcs.join(", "))?;
        }
        Ok(())
    }
}

// ── Edges ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    True,
    Anti,
    Output,
    Memory,
    Control,
    /// Never materialized; resource conflicts live in the reservation table.
    Resource,
}

impl DepKind {
    pub const ALL: [DepKind; 6] = [
        DepKind::True,
        DepKind::Anti,
        DepKind::Output,
        DepKind::Memory,
        DepKind::Control,
        DepKind::Resource,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DepKind::True => "true",
            DepKind::Anti => "anti",
            DepKind::Output => "output",
            DepKind::Memory => "memory",
            DepKind::Control => "control",
            DepKind::Resource => "resource",
        }
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `cycle(dst) >= cycle(src) + latency` must hold in every schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEdge {
    pub id: EdgeId,
    pub src: OpId,
    pub dst: OpId,
    pub kind: DepKind,
    pub latency: u32,
}

// ── Values (register pressure) ──────────────────────────────────────────────

/// One definition of a register and the operations reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub register: String,
    /// `None` for a live-in value.
    pub def: Option<OpId>,
    /// Distinct readers, in program order.
    pub uses: Vec<OpId>,
    pub live_out: bool,
}

impl ValueInfo {
    /// A value nobody reads and nobody needs after the region.
    pub fn is_dead(&self) -> bool {
        self.uses.is_empty() && !self.live_out
    }
}

// ── Graph ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DependenceGraph {
    region: String,
    nodes: Vec<OpNode>,
    edges: Vec<DepEdge>,
    succs: Vec<Vec<EdgeId>>,
    preds: Vec<Vec<EdgeId>>,
    live_in: Vec<String>,
    live_out: Vec<String>,
    values: Vec<ValueInfo>,
    values_used: Vec<Vec<usize>>,
    values_defined: Vec<Vec<usize>>,
}

impl DependenceGraph {
    /// Assemble a graph from already-validated parts.
    pub fn new(
        region: impl Into<String>,
        nodes: Vec<OpNode>,
        edges: Vec<DepEdge>,
        live_in: Vec<String>,
        live_out: Vec<String>,
    ) -> Self {
        let n = nodes.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for e in &edges {
            succs[e.src.index()].push(e.id);
            preds[e.dst.index()].push(e.id);
        }

        let (values, values_used, values_defined) = compute_values(&nodes, &live_in, &live_out);

        DependenceGraph {
            region: region.into(),
            nodes,
            edges,
            succs,
            preds,
            live_in,
            live_out,
            values,
            values_used,
            values_defined,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[OpNode] {
        &self.nodes
    }

    pub fn node(&self, id: OpId) -> &OpNode {
        &self.nodes[id.index()]
    }

    pub fn edges(&self) -> &[DepEdge] {
        &self.edges
    }

    pub fn edge(&self, id: EdgeId) -> &DepEdge {
        &self.edges[id.index()]
    }

    pub fn successors(&self, id: OpId) -> impl Iterator<Item = &DepEdge> {
        self.succs[id.index()].iter().map(|&e| self.edge(e))
    }

    pub fn predecessors(&self, id: OpId) -> impl Iterator<Item = &DepEdge> {
        self.preds[id.index()].iter().map(|&e| self.edge(e))
    }

    pub fn in_degree(&self, id: OpId) -> usize {
        self.preds[id.index()].len()
    }

    pub fn out_degree(&self, id: OpId) -> usize {
        self.succs[id.index()].len()
    }

    /// True when any edge joins `a` and `b`, in either direction.
    pub fn connected(&self, a: OpId, b: OpId) -> bool {
        self.successors(a).any(|e| e.dst == b) || self.successors(b).any(|e| e.dst == a)
    }

    /// Nodes without predecessors, in program order.
    pub fn entries(&self) -> Vec<OpId> {
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| self.in_degree(id) == 0)
            .collect()
    }

    /// Nodes without successors, in program order.
    pub fn exits(&self) -> Vec<OpId> {
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| self.out_degree(id) == 0)
            .collect()
    }

    pub fn live_in(&self) -> &[String] {
        &self.live_in
    }

    pub fn live_out(&self) -> &[String] {
        &self.live_out
    }

    pub fn values(&self) -> &[ValueInfo] {
        &self.values
    }

    /// Indices into `values()` read by `id`.
    pub fn values_used_by(&self, id: OpId) -> &[usize] {
        &self.values_used[id.index()]
    }

    /// Indices into `values()` defined by `id`.
    pub fn values_defined_by(&self, id: OpId) -> &[usize] {
        &self.values_defined[id.index()]
    }

    /// Kahn's algorithm, lowest ready index first.
    ///
    /// Fails with `CyclicDependence` listing every node left unsorted.
    pub fn topological_order(&self) -> SchedResult<Vec<OpId>> {
        let mut in_deg: Vec<usize> = self.preds.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<OpId> = self
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| in_deg[id.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for e in self.successors(id) {
                let d = &mut in_deg[e.dst.index()];
                *d -= 1;
                if *d == 0 {
                    ready.insert(e.dst);
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let nodes = (0..self.nodes.len() as u32)
                .filter(|&i| in_deg[i as usize] > 0)
                .collect();
            Err(SchedError::CyclicDependence {
                region: self.region.clone(),
                nodes,
            })
        }
    }

    // ── Dump ──

    pub fn to_dump(&self) -> DdgDump {
        DdgDump {
            region: self.region.clone(),
            live_in: self.live_in.clone(),
            live_out: self.live_out.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Rebuild a graph from a dump. Cycles are not rejected here; the
    /// strategies report them as unschedulable.
    pub fn from_dump(dump: DdgDump) -> Result<Self, DdgDumpError> {
        let inconsistent = |reason: String| DdgDumpError::Inconsistent {
            region: dump.region.clone(),
            reason,
        };
        for (i, node) in dump.nodes.iter().enumerate() {
            if node.id.index() != i {
                return Err(inconsistent(format!(
                    "node at position {} has id {}",
                    i, node.id
                )));
            }
        }
        for (i, edge) in dump.edges.iter().enumerate() {
            if edge.id.index() != i {
                return Err(inconsistent(format!(
                    "edge at position {} has id {}",
                    i, edge.id.0
                )));
            }
            if edge.src.index() >= dump.nodes.len() || edge.dst.index() >= dump.nodes.len() {
                return Err(inconsistent(format!(
                    "edge {} joins unknown operations {} -> {}",
                    edge.id.0, edge.src, edge.dst
                )));
            }
        }
        Ok(DependenceGraph::new(
            dump.region,
            dump.nodes,
            dump.edges,
            dump.live_in,
            dump.live_out,
        ))
    }

    pub fn to_json(&self) -> String {
        self.to_dump().to_json()
    }

    pub fn from_json(text: &str) -> Result<Self, DdgDumpError> {
        let dump: DdgDump = serde_json::from_str(text)?;
        Self::from_dump(dump)
    }
}

/// Serializable form of a dependence graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdgDump {
    pub region: String,
    #[serde(default)]
    pub live_in: Vec<String>,
    #[serde(default)]
    pub live_out: Vec<String>,
    pub nodes: Vec<OpNode>,
    pub edges: Vec<DepEdge>,
}

impl DdgDump {
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

type ValueTables = (Vec<ValueInfo>, Vec<Vec<usize>>, Vec<Vec<usize>>);

/// Program-order walk splitting every register into its def-use values.
fn compute_values(nodes: &[OpNode], live_in: &[String], live_out: &[String]) -> ValueTables {
    let mut values: Vec<ValueInfo> = Vec::new();
    let mut current: HashMap<&str, usize> = HashMap::new();
    let mut used = vec![Vec::new(); nodes.len()];
    let mut defined = vec![Vec::new(); nodes.len()];

    for reg in live_in {
        if current.contains_key(reg.as_str()) {
            continue;
        }
        current.insert(reg, values.len());
        values.push(ValueInfo {
            register: reg.clone(),
            def: None,
            uses: Vec::new(),
            live_out: false,
        });
    }

    for node in nodes {
        let i = node.id.index();
        for reg in node.reads() {
            if let Some(&v) = current.get(reg) {
                if values[v].uses.last() != Some(&node.id) {
                    values[v].uses.push(node.id);
                    used[i].push(v);
                }
            }
        }
        for reg in node.writes() {
            if let Some(&v) = current.get(reg) {
                if values[v].def == Some(node.id) {
                    continue;
                }
            }
            current.insert(reg, values.len());
            defined[i].push(values.len());
            values.push(ValueInfo {
                register: reg.to_string(),
                def: Some(node.id),
                uses: Vec::new(),
                live_out: false,
            });
        }
    }

    for reg in live_out {
        if let Some(&v) = current.get(reg.as_str()) {
            values[v].live_out = true;
        }
    }

    (values, used, defined)
}

// ── Tests ───────────────────────────────────────────────────────────────────
