// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the scheduler's passes, their dependency edges, and the artifacts
// they produce. Used by the pipeline runner to compute minimal pass subsets
// for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass of the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Parse,
    BuildDdg,
    Schedule,
    FillDelaySlots,
    BuildPlugin,
    AnalyzePatterns,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the per-region or per-run result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Program,  // ast::Program
    Ddg,      // DependenceGraph
    Schedule, // Schedule
    Plugin,   // ArtifactHandle
    Patterns, // PatternReport
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions, echoed in trace output.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Parse => PassDescriptor {
            name: "parse",
            inputs: &[],
            outputs: &[ArtifactId::Program],
            invalidation_key: "source text",
            invariants: "region names unique",
        },
        PassId::BuildDdg => PassDescriptor {
            name: "build_ddg",
            inputs: &[PassId::Parse],
            outputs: &[ArtifactId::Ddg],
            invalidation_key: "region + machine + alias oracles",
            invariants: "graph acyclic, node ids in program order",
        },
        PassId::Schedule => PassDescriptor {
            name: "schedule",
            inputs: &[PassId::BuildDdg],
            outputs: &[ArtifactId::Schedule],
            invalidation_key: "ddg + machine + strategy + pressure options",
            invariants: "latency, capacity and result-order obligations hold",
        },
        PassId::FillDelaySlots => PassDescriptor {
            name: "fill_delay_slots",
            inputs: &[PassId::Schedule],
            outputs: &[ArtifactId::Schedule],
            invalidation_key: "schedule + ddg + machine",
            invariants: "schedule still valid, length not increased",
        },
        PassId::BuildPlugin => PassDescriptor {
            name: "build_plugin",
            inputs: &[],
            outputs: &[ArtifactId::Plugin],
            invalidation_key: "machine fingerprint",
            invariants: "at most one build per fingerprint",
        },
        PassId::AnalyzePatterns => PassDescriptor {
            name: "analyze_patterns",
            inputs: &[PassId::BuildDdg],
            outputs: &[ArtifactId::Patterns],
            invalidation_key: "ddg",
            invariants: "read-only over graphs",
        },
    }
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    /// True when every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Parse,
    PassId::BuildDdg,
    PassId::Schedule,
    PassId::FillDelaySlots,
    PassId::BuildPlugin,
    PassId::AnalyzePatterns,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

/// The last pass in execution order that produces `artifact`, so a later
/// refinement (delay-slot filling over a schedule) wins over its input.
pub fn producer(artifact: ArtifactId) -> PassId {
    ALL_PASSES
        .iter()
        .rev()
        .copied()
        .find(|&p| descriptor(p).outputs.contains(&artifact))
        .unwrap_or(PassId::Parse)
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
