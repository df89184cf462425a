// ddg_builder.rs — Build the dependence graph of one region
//
// Walks the region in program order keeping, per register, the most recent
// writer and the readers since that write. Emits true, anti and output
// register edges, memory edges as directed by the alias oracle, and control
// edges around control transfers. Resource conflicts are left to the
// reservation table and never become edges.
//
// Edge latencies:
//   true     writer's declared latency
//   anti     0
//   output   max(1, lat(first) - minlat(second) + 1), where minlat is the
//            fastest unit of the second writer, so results land in program
//            order whichever units are picked
//   memory   earlier operation's declared latency
//   control  branch → later op: delay slots + 1; earlier op → branch: 0
//
// Preconditions: `region` comes from the parser; `model` is validated.
// Postconditions: node ids equal program-order indices; at most one edge per
//                 (src, dst, kind), keeping the largest latency; the graph is
//                 acyclic.
// Failure modes: `MalformedRegion` naming the offending operation,
//                `CyclicDependence`.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::alias::{AliasAnswer, AliasOracle};
use crate::ast::{AttrValue, OpStmt, OperandExpr, Region};
use crate::ddg::{DepEdge, DepKind, DependenceGraph, OpNode, Operand, OperandRole, OperandValue};
use crate::error::{OpLocation, SchedError, SchedResult};
use crate::id::{IdAllocator, OpId};
use crate::machine::{MemoryAccess, ResourceModel};

/// Build the dependence graph of `region`.
pub fn build(
    region: &Region,
    model: &ResourceModel,
    oracle: &dyn AliasOracle,
) -> SchedResult<DependenceGraph> {
    let mut b = Builder {
        region: &region.name.name,
        model,
        ids: IdAllocator::new(),
        nodes: Vec::with_capacity(region.ops.len()),
        edges: Vec::new(),
        edge_index: HashMap::new(),
    };

    let live_in = b.header_registers(&region.live_in)?;
    let live_out = b.header_registers(&region.live_out)?;

    for stmt in &region.ops {
        let node = b.lower_op(stmt)?;
        b.nodes.push(node);
    }

    b.register_edges(&live_in, &live_out)?;
    b.memory_edges(oracle);
    b.control_edges();

    let Builder {
        region: name,
        nodes,
        edges,
        ..
    } = b;
    let graph = DependenceGraph::new(name, nodes, edges, live_in, live_out);
    graph.topological_order()?;

    log::debug!(
        "region '{}': {} operations, {} dependence edges",
        graph.region(),
        graph.len(),
        graph.edges().len()
    );
    Ok(graph)
}

struct Builder<'a> {
    region: &'a str,
    model: &'a ResourceModel,
    ids: IdAllocator,
    nodes: Vec<OpNode>,
    edges: Vec<DepEdge>,
    edge_index: HashMap<(OpId, OpId, DepKind), usize>,
}

impl Builder<'_> {
    fn malformed(&self, at: OpLocation, reason: String) -> SchedError {
        SchedError::MalformedRegion {
            region: self.region.to_string(),
            at,
            reason,
        }
    }

    fn at_node(&self, id: OpId) -> OpLocation {
        OpLocation::Op {
            index: id.0,
            opcode: self.nodes[id.index()].opcode.clone(),
        }
    }

    fn header_registers(&self, regs: &[crate::ast::Ident]) -> SchedResult<Vec<String>> {
        let mut out = Vec::with_capacity(regs.len());
        for r in regs {
            if self.model.register_file_of(&r.name).is_none() {
                return Err(self.malformed(
                    OpLocation::Header,
                    format!("register '{}' does not belong to any register file", r.name),
                ));
            }
            if !out.contains(&r.name) {
                out.push(r.name.clone());
            }
        }
        Ok(out)
    }

    // ── Node construction ──

    fn lower_op(&mut self, stmt: &OpStmt) -> SchedResult<OpNode> {
        let id = self.ids.alloc_op();
        let opcode = stmt.opcode.name.clone();
        let at = OpLocation::Op {
            index: id.0,
            opcode: opcode.clone(),
        };

        let Some(latency) = self.model.latency(&opcode) else {
            return Err(self.malformed(
                at,
                format!("opcode '{opcode}' is not implemented by any function unit"),
            ));
        };

        let mut operands = Vec::with_capacity(stmt.dests.len() + stmt.operands.len());
        for d in &stmt.dests {
            operands.push(Operand {
                role: OperandRole::Write,
                value: OperandValue::Reg(d.name.clone()),
            });
        }
        for o in &stmt.operands {
            operands.push(match o {
                OperandExpr::Reg(r) => Operand {
                    role: OperandRole::Read,
                    value: OperandValue::Reg(r.name.clone()),
                },
                OperandExpr::InOut(r) => Operand {
                    role: OperandRole::ReadWrite,
                    value: OperandValue::Reg(r.name.clone()),
                },
                OperandExpr::Imm(v, _) => Operand {
                    role: OperandRole::Read,
                    value: OperandValue::Imm(*v),
                },
            });
        }
        for reg in operands.iter().filter_map(Operand::register) {
            if self.model.register_file_of(reg).is_none() {
                return Err(self.malformed(
                    at,
                    format!("register '{reg}' does not belong to any register file"),
                ));
            }
        }

        let mut space = None;
        let mut tag = None;
        let mut safe = false;
        for attr in &stmt.attrs {
            match (attr.key.name.as_str(), &attr.value) {
                ("space", Some(AttrValue::Number(n, _))) => space = Some(*n),
                ("tag", Some(AttrValue::Ident(t))) => tag = Some(t.name.clone()),
                ("tag", Some(AttrValue::Number(n, _))) => tag = Some(n.to_string()),
                ("safe", None) => safe = true,
                (key, _) => {
                    return Err(self.malformed(at, format!("unsupported attribute '{key}'")));
                }
            }
        }

        let info = self.model.operation_info(&opcode);
        let side_effects =
            info.side_effects || info.control || info.memory == MemoryAccess::Store;

        Ok(OpNode {
            id,
            opcode,
            operands,
            latency,
            control: info.control,
            memory: info.memory,
            side_effects,
            space,
            tag,
            safe,
        })
    }

    // ── Edges ──

    fn add_edge(&mut self, src: OpId, dst: OpId, kind: DepKind, latency: u32) {
        if src == dst {
            return;
        }
        match self.edge_index.get(&(src, dst, kind)) {
            Some(&i) => {
                let e = &mut self.edges[i];
                e.latency = e.latency.max(latency);
            }
            None => {
                self.edge_index.insert((src, dst, kind), self.edges.len());
                self.edges.push(DepEdge {
                    id: self.ids.alloc_edge(),
                    src,
                    dst,
                    kind,
                    latency,
                });
            }
        }
    }

    fn register_edges(&mut self, live_in: &[String], live_out: &[String]) -> SchedResult<()> {
        let mut last_writer: HashMap<String, OpId> = HashMap::new();
        let mut readers: HashMap<String, Vec<OpId>> = HashMap::new();
        let mut defined: HashSet<String> = live_in.iter().cloned().collect();

        for i in 0..self.nodes.len() {
            let id = self.nodes[i].id;
            let reads: Vec<String> = self.nodes[i].reads().map(str::to_string).collect();
            let writes: Vec<String> = self.nodes[i].writes().map(str::to_string).collect();
            let fastest = self
                .model
                .min_latency(&self.nodes[i].opcode)
                .unwrap_or(self.nodes[i].latency);

            for reg in &reads {
                if !defined.contains(reg) {
                    return Err(self.malformed(
                        self.at_node(id),
                        format!("register '{reg}' is read before any definition"),
                    ));
                }
                if let Some(&w) = last_writer.get(reg) {
                    let lat = self.nodes[w.index()].latency;
                    self.add_edge(w, id, DepKind::True, lat);
                }
                readers.entry(reg.clone()).or_default().push(id);
            }

            for reg in &writes {
                for r in readers.remove(reg).unwrap_or_default() {
                    self.add_edge(r, id, DepKind::Anti, 0);
                }
                if let Some(&w) = last_writer.get(reg) {
                    let prev = self.nodes[w.index()].latency;
                    let lat = (prev as i64 - fastest as i64 + 1).max(1) as u32;
                    self.add_edge(w, id, DepKind::Output, lat);
                }
                last_writer.insert(reg.clone(), id);
                defined.insert(reg.clone());
            }
        }

        for reg in live_out {
            if !defined.contains(reg) {
                return Err(self.malformed(
                    OpLocation::Header,
                    format!("live-out register '{reg}' is never defined"),
                ));
            }
        }
        Ok(())
    }

    fn memory_edges(&mut self, oracle: &dyn AliasOracle) {
        let mut earlier: Vec<OpId> = Vec::new();
        for i in 0..self.nodes.len() {
            if !self.nodes[i].is_memory() {
                continue;
            }
            let id = self.nodes[i].id;
            for &p in &earlier {
                let (prev, cur) = (&self.nodes[p.index()], &self.nodes[i]);
                if prev.memory == MemoryAccess::Load && cur.memory == MemoryAccess::Load {
                    continue;
                }
                match oracle.may_alias(prev, cur) {
                    AliasAnswer::No => {}
                    AliasAnswer::Yes | AliasAnswer::Unknown => {
                        let lat = prev.latency;
                        self.add_edge(p, id, DepKind::Memory, lat);
                    }
                }
            }
            earlier.push(id);
        }
    }

    fn control_edges(&mut self) {
        let branch_latency = self.model.delay_slots + 1;
        let mut controls: Vec<OpId> = Vec::new();
        let mut block_start = 0;

        for i in 0..self.nodes.len() {
            let id = self.nodes[i].id;
            if !self.nodes[i].safe {
                for &c in &controls {
                    self.add_edge(c, id, DepKind::Control, branch_latency);
                }
            }
            if self.nodes[i].control {
                for j in block_start..i {
                    let before = self.nodes[j].id;
                    self.add_edge(before, id, DepKind::Control, 0);
                }
                controls.push(id);
                block_start = i + 1;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{AddressSpaceAnalysis, Conservative, OracleChain, WorkItemAliasFacts};
    use crate::machine::tests::{minimal_model, mixed_model};

    fn region(source: &str) -> Region {
        let result = crate::parser::parse(source);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.program.unwrap().regions.remove(0)
    }

    fn build_src(source: &str) -> SchedResult<DependenceGraph> {
        build(&region(source), &minimal_model(), &Conservative)
    }

    fn edges_of(g: &DependenceGraph) -> Vec<(u32, u32, DepKind, u32)> {
        g.edges()
            .iter()
            .map(|e| (e.src.0, e.dst.0, e.kind, e.latency))
            .collect()
    }

    const EXAMPLE: &str = "region bb0 in(r0) {\n\
                           \x20   r1 = load r0\n\
                           \x20   r2 = add r1, r1\n\
                           \x20   store r2, r0\n\
                           \x20   branch\n\
                           }\n";

    #[test]
    fn four_operation_example() {
        let g = build_src(EXAMPLE).unwrap();
        assert_eq!(g.len(), 4);
        assert_eq!(
            edges_of(&g),
            vec![
                (0, 1, DepKind::True, 2),
                (1, 2, DepKind::True, 1),
                (0, 2, DepKind::Memory, 2),
                (0, 3, DepKind::Control, 0),
                (1, 3, DepKind::Control, 0),
                (2, 3, DepKind::Control, 0),
            ]
        );
        assert!(g.node(OpId(3)).control);
        assert!(g.node(OpId(2)).side_effects);
        assert_eq!(g.entries(), vec![OpId(0)]);
        assert_eq!(g.exits(), vec![OpId(3)]);
    }

    #[test]
    fn anti_and_output_edges() {
        let g = build_src(
            "region b in(r0) {\n r1 = mul r0, r0\n r2 = add r1, r0\n r1 = add r0, 1\n}",
        )
        .unwrap();
        assert_eq!(
            edges_of(&g),
            vec![
                (0, 1, DepKind::True, 3),
                (1, 2, DepKind::Anti, 0),
                (0, 2, DepKind::Output, 3),
            ]
        );
    }

    #[test]
    fn output_edge_covers_faster_second_writer() {
        // add may run on the 1-cycle unit while mul takes 3
        let src = "region b in(r0) {\n r1 = mul r0, r0\n r1 = add r0, 1\n}";
        let g = build(&region(src), &mixed_model(), &Conservative).unwrap();
        assert_eq!(edges_of(&g), vec![(0, 1, DepKind::Output, 3)]);
    }

    #[test]
    fn duplicate_reads_produce_one_edge() {
        let g = build_src("region b in(r0) {\n r1 = add r0, r0\n r2 = add r1, r1\n}").unwrap();
        assert_eq!(edges_of(&g), vec![(0, 1, DepKind::True, 1)]);
    }

    #[test]
    fn load_pairs_are_unordered() {
        let g = build_src("region b in(r0) {\n r1 = load r0\n r2 = load r0\n}").unwrap();
        assert!(g.edges().is_empty());
    }

    #[test]
    fn disjoint_address_spaces_drop_memory_edges() {
        let src = "region b in(r0, r1) {\n store r1, r0 [space=1]\n r2 = load r0 [space=2]\n}";
        let with_edge = build_src(src).unwrap();
        assert_eq!(edges_of(&with_edge), vec![(0, 1, DepKind::Memory, 1)]);

        let chain = OracleChain::new().with(AddressSpaceAnalysis);
        let without = build(&region(src), &minimal_model(), &chain).unwrap();
        assert!(without.edges().is_empty());
    }

    #[test]
    fn alias_facts_drop_memory_edges() {
        let facts = WorkItemAliasFacts::from_json(r#"{ "no_alias": [["a", "b"]] }"#).unwrap();
        let src = "region b in(r0, r1) {\n store r1, r0 [tag=a]\n store r1, r0 [tag=b]\n}";
        let g = build(&region(src), &minimal_model(), &facts).unwrap();
        assert!(g.edges().is_empty());
    }

    #[test]
    fn safe_operations_skip_control_edge() {
        let g = build_src(
            "region b in(r0) {\n branch\n r1 = add r0, 1 [safe]\n r2 = add r0, 2\n}",
        )
        .unwrap();
        assert_eq!(edges_of(&g), vec![(0, 2, DepKind::Control, 2)]);
    }

    #[test]
    fn read_before_definition_is_malformed() {
        let err = build_src("region b {\n r1 = add r0, 1\n}").unwrap_err();
        match err {
            SchedError::MalformedRegion { at, reason, .. } => {
                assert_eq!(
                    at,
                    OpLocation::Op {
                        index: 0,
                        opcode: "add".into()
                    }
                );
                assert!(reason.contains("r0"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let err = build_src("region b in(r0) {\n r1 = add r0, 1\n r2 = fdiv r1, r0\n}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed region 'b' at operation #1 (fdiv): opcode 'fdiv' is not implemented by any function unit"
        );
    }

    #[test]
    fn unknown_register_and_attribute_are_malformed() {
        assert!(build_src("region b in(x0) {\n}").is_err());
        assert!(build_src("region b in(r0) {\n r1 = add r0, q7\n}").is_err());
        assert!(build_src("region b in(r0) {\n r1 = add r0, 1 [fast]\n}").is_err());
    }

    #[test]
    fn undefined_live_out_is_malformed() {
        let err = build_src("region b in(r0) out(r5) {\n r1 = add r0, 1\n}").unwrap_err();
        assert!(matches!(
            err,
            SchedError::MalformedRegion {
                at: OpLocation::Header,
                ..
            }
        ));
    }

    #[test]
    fn empty_region_builds() {
        let g = build_src("region b {\n}").unwrap();
        assert!(g.is_empty());
    }
}
