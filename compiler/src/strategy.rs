// strategy.rs — Scheduling strategy interface and registry
//
// Every strategy is a list scheduler behind the `Strategy` trait. Strategies
// are looked up by `StrategyKind` through a static table; `Best` runs the
// three concrete strategies and keeps the shortest result.
//
// Preconditions: the graph was built against `model`.
// Postconditions: returned schedules cover every node and satisfy all edge
//                 latencies and machine capacities; results are a pure
//                 function of (graph, model, options).
// Failure modes: `UnschedulableRegion` on a dependence cycle or when an
//                operation cannot issue even on an idle machine.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bottom_up::BottomUp;
use crate::bubblefish::BubbleFish;
use crate::ddg::DependenceGraph;
use crate::error::{SchedError, SchedResult};
use crate::machine::ResourceModel;
use crate::resource::fits_empty_machine;
use crate::schedule::Schedule;
use crate::top_down::TopDown;

// ── Strategy selection ──────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    BottomUp,
    TopDown,
    BubbleFish,
    /// Run every strategy and keep the shortest schedule.
    Best,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::BottomUp => "bottom-up",
            StrategyKind::TopDown => "top-down",
            StrategyKind::BubbleFish => "bubble-fish",
            StrategyKind::Best => "best",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        STRATEGIES
            .iter()
            .map(|(kind, _)| *kind)
            .find(|k| k.name() == name)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Knobs shared by all strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Register-pressure-conservative mode.
    pub conservative: bool,
    /// Live-value limit in conservative mode; defaults to the machine's
    /// total register count.
    pub pressure_threshold: Option<usize>,
}

impl ScheduleOptions {
    /// Effective live-value limit, or `None` when pressure is ignored.
    pub fn threshold(&self, model: &ResourceModel) -> Option<usize> {
        self.conservative
            .then(|| self.pressure_threshold.unwrap_or_else(|| model.total_registers()))
    }

    /// Strategy used when none is requested.
    pub fn default_strategy(&self) -> StrategyKind {
        if self.conservative {
            StrategyKind::TopDown
        } else {
            StrategyKind::BottomUp
        }
    }
}

// ── Strategy trait and table ────────────────────────────────────────────────

pub trait Strategy: Sync {
    fn kind(&self) -> StrategyKind;

    fn schedule(
        &self,
        graph: &DependenceGraph,
        model: &ResourceModel,
        options: &ScheduleOptions,
    ) -> SchedResult<Schedule>;
}

/// Runs all concrete strategies; ties go to the earlier table entry.
pub struct Best;

static STRATEGIES: [(StrategyKind, &(dyn Strategy + 'static)); 4] = [
    (StrategyKind::BottomUp, &BottomUp),
    (StrategyKind::TopDown, &TopDown),
    (StrategyKind::BubbleFish, &BubbleFish),
    (StrategyKind::Best, &Best),
];

pub fn strategy_for(kind: StrategyKind) -> &'static dyn Strategy {
    STRATEGIES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, s)| *s)
        .unwrap_or(&BottomUp)
}

/// Schedule `graph` with the strategy named by `kind`.
pub fn run(
    kind: StrategyKind,
    graph: &DependenceGraph,
    model: &ResourceModel,
    options: &ScheduleOptions,
) -> SchedResult<Schedule> {
    let schedule = strategy_for(kind).schedule(graph, model, options)?;
    log::debug!(
        "region '{}': {} scheduled {} operations in {} cycles",
        graph.region(),
        schedule.strategy,
        graph.len(),
        schedule.length
    );
    Ok(schedule)
}

impl Strategy for Best {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Best
    }

    fn schedule(
        &self,
        graph: &DependenceGraph,
        model: &ResourceModel,
        options: &ScheduleOptions,
    ) -> SchedResult<Schedule> {
        let mut best: Option<Schedule> = None;
        for kind in [StrategyKind::BottomUp, StrategyKind::TopDown, StrategyKind::BubbleFish] {
            let candidate = strategy_for(kind).schedule(graph, model, options)?;
            log::trace!(
                "region '{}': {} candidate has {} cycles",
                graph.region(),
                kind,
                candidate.length
            );
            if best.as_ref().is_none_or(|b| candidate.length < b.length) {
                best = Some(candidate);
            }
        }
        best.ok_or_else(|| SchedError::UnschedulableRegion {
            region: graph.region().to_string(),
            reason: "no strategy produced a schedule".into(),
        })
    }
}

// ── Shared helpers ──────────────────────────────────────────────────────────

/// Reject operations that cannot issue even on an idle machine, which would
/// otherwise stall a list scheduler forever.
pub(crate) fn check_feasible(graph: &DependenceGraph, model: &ResourceModel) -> SchedResult<()> {
    for node in graph.nodes() {
        if !fits_empty_machine(model, node) {
            return Err(SchedError::UnschedulableRegion {
                region: graph.region().to_string(),
                reason: format!(
                    "operation {} ({}) does not fit any function unit and bus assignment of machine '{}'",
                    node.id, node.opcode, model.name
                ),
            });
        }
    }
    Ok(())
}

/// Upper bound on cycles a list scheduler may advance before giving up.
pub(crate) fn cycle_budget(graph: &DependenceGraph, model: &ResourceModel) -> i64 {
    let max_latency = graph.nodes().iter().map(|n| n.latency).max().unwrap_or(0) as i64;
    let edge_latency: i64 = graph.edges().iter().map(|e| e.latency as i64).sum();
    (graph.len() as i64 + 1) * (max_latency + model.delay_slots as i64 + 2) + edge_latency
}

pub(crate) fn stalled(graph: &DependenceGraph) -> SchedError {
    SchedError::UnschedulableRegion {
        region: graph.region().to_string(),
        reason: "scheduler made no progress within the cycle budget".into(),
    }
}
