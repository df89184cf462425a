// patterns.rs — Instruction pattern statistics over dependence graphs
//
// Read-only observer of built DDGs: how often each opcode occurs, which
// producer → consumer opcode pairs are joined by true dependences, and how
// many edges of each kind the regions carry. Reports from several regions
// merge into one.
//
// Preconditions: graphs are fully built.
// Postconditions: counts are exact; iteration and printing order is sorted.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::ddg::{DepKind, DependenceGraph};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternReport {
    pub regions: usize,
    pub operations: usize,
    /// Opcode → occurrences.
    pub opcodes: BTreeMap<String, usize>,
    /// (producer opcode, consumer opcode) → true edges between them.
    pub pairs: BTreeMap<(String, String), usize>,
    pub edge_kinds: BTreeMap<DepKind, usize>,
    /// Operations whose result feeds more than one consumer.
    pub multi_use_results: usize,
}

// ── Analysis ────────────────────────────────────────────────────────────────

impl PatternReport {
    /// Statistics for a single region.
    pub fn of(graph: &DependenceGraph) -> Self {
        let mut report = PatternReport {
            regions: 1,
            operations: graph.len(),
            ..Default::default()
        };
        for node in graph.nodes() {
            *report.opcodes.entry(node.opcode.clone()).or_default() += 1;
            let consumers = graph
                .successors(node.id)
                .filter(|e| e.kind == DepKind::True)
                .count();
            if consumers > 1 {
                report.multi_use_results += 1;
            }
        }
        for edge in graph.edges() {
            *report.edge_kinds.entry(edge.kind).or_default() += 1;
            if edge.kind == DepKind::True {
                let key = (
                    graph.node(edge.src).opcode.clone(),
                    graph.node(edge.dst).opcode.clone(),
                );
                *report.pairs.entry(key).or_default() += 1;
            }
        }
        report
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &PatternReport) {
        self.regions += other.regions;
        self.operations += other.operations;
        self.multi_use_results += other.multi_use_results;
        for (op, n) in &other.opcodes {
            *self.opcodes.entry(op.clone()).or_default() += n;
        }
        for (pair, n) in &other.pairs {
            *self.pairs.entry(pair.clone()).or_default() += n;
        }
        for (kind, n) in &other.edge_kinds {
            *self.edge_kinds.entry(*kind).or_default() += n;
        }
    }

    /// Report over every graph.
    pub fn collect<'g>(graphs: impl IntoIterator<Item = &'g DependenceGraph>) -> Self {
        let mut total = PatternReport::default();
        for g in graphs {
            total.merge(&PatternReport::of(g));
        }
        total
    }

    /// Producer → consumer pairs, most frequent first (ties by name).
    pub fn top_pairs(&self, limit: usize) -> Vec<(&(String, String), usize)> {
        let mut pairs: Vec<_> = self.pairs.iter().map(|(k, &n)| (k, n)).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        pairs.truncate(limit);
        pairs
    }
}

impl fmt::Display for PatternReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "patterns: {} region(s), {} operation(s)",
            self.regions, self.operations
        )?;
        writeln!(f, "opcodes:")?;
        for (op, n) in &self.opcodes {
            writeln!(f, "  {op:<12} {n}")?;
        }
        writeln!(f, "true-dependence pairs:")?;
        for ((src, dst), n) in self.top_pairs(usize::MAX) {
            writeln!(f, "  {:<24} {}", format!("{src} -> {dst}"), n)?;
        }
        writeln!(f, "edges:")?;
        for kind in DepKind::ALL {
            if let Some(n) = self.edge_kinds.get(&kind) {
                writeln!(f, "  {:<12} {}", kind.as_str(), n)?;
            }
        }
        write!(f, "multi-use results: {}", self.multi_use_results)
    }
}
