// dot.rs — Graphviz DOT output for dependence graphs
//
// Renders one or more region DDGs, each in its own cluster, suitable for
// `dot` or other Graphviz layout engines. Edge style encodes the dependence
// kind and the label carries the latency.
//
// Preconditions: every graph is a fully constructed DependenceGraph.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::ddg::{DepKind, DependenceGraph, OpNode};

/// Emit the dependence graphs as a Graphviz DOT string.
pub fn emit_dot(graphs: &[&DependenceGraph]) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, graphs);
    buf
}

fn write_dot(buf: &mut String, graphs: &[&DependenceGraph]) -> fmt::Result {
    writeln!(buf, "digraph ddg {{")?;
    writeln!(buf, "    rankdir=TB;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    for (index, graph) in graphs.iter().enumerate() {
        let cluster = format!("r{}_{}", index, sanitize(graph.region()));
        writeln!(buf)?;
        writeln!(buf, "    subgraph cluster_{cluster} {{")?;
        writeln!(buf, "        label=\"region: {}\";", escape(graph.region()))?;
        writeln!(buf, "        style=rounded;")?;
        writeln!(buf, "        color=gray50;")?;

        for node in graph.nodes() {
            writeln!(
                buf,
                "        {}_n{} [{}];",
                cluster,
                node.id.0,
                node_attrs(node)
            )?;
        }

        if !graph.edges().is_empty() {
            writeln!(buf)?;
        }
        for edge in graph.edges() {
            writeln!(
                buf,
                "        {c}_n{} -> {c}_n{} [label=\"{}:{}\"{}];",
                edge.src.0,
                edge.dst.0,
                edge.kind.as_str(),
                edge.latency,
                edge_style(edge.kind),
                c = cluster,
            )?;
        }
        writeln!(buf, "    }}")?;
    }

    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Shape by operation class, fill by side effects.
fn node_attrs(node: &OpNode) -> String {
    let shape = if node.control {
        "diamond"
    } else if node.is_memory() {
        "cylinder"
    } else {
        "box"
    };
    let color = if node.side_effects {
        "lightsalmon"
    } else {
        "lightblue"
    };
    let label = escape(&format!("#{} {}", node.id.0, node));
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

fn edge_style(kind: DepKind) -> &'static str {
    match kind {
        DepKind::True => "",
        DepKind::Anti => ", style=dashed, color=gray50",
        DepKind::Output => ", style=dotted, color=gray50",
        DepKind::Memory => ", style=bold, color=darkorange",
        DepKind::Control => ", style=dashed, color=red",
        DepKind::Resource => ", color=blue",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Conservative;
    use crate::machine::tests::minimal_model;
    use std::collections::HashSet;

    fn graphs(source: &str) -> Vec<DependenceGraph> {
        let model = minimal_model();
        let program = crate::parser::parse(source).program.expect("parse failed");
        program
            .regions
            .iter()
            .map(|r| crate::ddg_builder::build(r, &model, &Conservative).unwrap())
            .collect()
    }

    const EXAMPLE: &str =
        "region bb0 in(r0) {\n r1 = load r0\n r2 = add r1, r1\n store r2, r0\n branch\n}";

    #[test]
    fn valid_dot_structure() {
        let gs = graphs(EXAMPLE);
        let dot = emit_dot(&gs.iter().collect::<Vec<_>>());
        assert!(dot.starts_with("digraph ddg {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("subgraph cluster_r0_bb0 {"));
        assert!(dot.contains("label=\"region: bb0\""));
    }

    #[test]
    fn shapes_and_edge_kinds() {
        let gs = graphs(EXAMPLE);
        let dot = emit_dot(&gs.iter().collect::<Vec<_>>());
        assert!(dot.contains("shape=cylinder"), "missing memory shape");
        assert!(dot.contains("shape=diamond"), "missing control shape");
        assert!(dot.contains("shape=box"), "missing plain shape");
        assert!(dot.contains("r0_bb0_n0 -> r0_bb0_n1 [label=\"true:2\"];"));
        assert!(dot.contains("label=\"memory:2\", style=bold"));
        assert!(dot.contains("label=\"control:0\", style=dashed, color=red"));
    }

    #[test]
    fn unique_node_ids_across_regions() {
        let gs = graphs(concat!(
            "region a in(r0) {\n r1 = add r0, 1\n}\n",
            "region b in(r0) {\n r1 = add r0, 2\n}\n",
        ));
        let dot = emit_dot(&gs.iter().collect::<Vec<_>>());
        let ids: Vec<&str> = dot
            .lines()
            .filter(|l| l.contains("shape="))
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        let unique: HashSet<&&str> = ids.iter().collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.len(), unique.len(), "duplicate node IDs: {ids:?}");
    }

    #[test]
    fn deterministic_output() {
        let gs = graphs(EXAMPLE);
        let refs: Vec<_> = gs.iter().collect();
        assert_eq!(emit_dot(&refs), emit_dot(&refs));
    }
}
