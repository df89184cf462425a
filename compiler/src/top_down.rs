// top_down.rs — Top-down list scheduling (and the shared forward engine)
//
// Cycles advance from 0. A node is ready once every predecessor is placed
// and may issue at max(cycle(pred) + latency). Within a cycle the ready node
// with the highest priority is tried first; ties go to the lowest program
// index. Nodes losing a cycle to a resource conflict age: their priority
// boost grows by one.
//
// Preconditions: graph built against `model`.
// Postconditions: see `strategy::Strategy`.
// Failure modes: `UnschedulableRegion` (cycle, infeasible op, stall).
// Side effects: none.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::ddg::DependenceGraph;
use crate::error::SchedResult;
use crate::id::OpId;
use crate::machine::ResourceModel;
use crate::pressure::{Direction, PressureTracker};
use crate::priority::Priorities;
use crate::resource::{Reservation, ReservationTable};
use crate::schedule::Schedule;
use crate::strategy::{
    check_feasible, cycle_budget, stalled, ScheduleOptions, Strategy, StrategyKind,
};

pub struct TopDown;

impl Strategy for TopDown {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TopDown
    }

    fn schedule(
        &self,
        graph: &DependenceGraph,
        model: &ResourceModel,
        options: &ScheduleOptions,
    ) -> SchedResult<Schedule> {
        schedule_forward(graph, model, options, StrategyKind::TopDown, |s, id| {
            (s.prio.height(id) + s.boost[id.index()], Reverse(id))
        })
    }
}

/// Scheduler state visible to priority functions of forward strategies.
pub(crate) struct ForwardState<'p> {
    pub prio: &'p Priorities,
    pub cycle: i64,
    /// Aging boost per node.
    pub boost: Vec<u32>,
    /// Length lower bound: critical path, raised by every placement to
    /// `cycle + height`.
    pub lower_bound: i64,
}

/// Forward list scheduler; `key` ranks ready nodes, largest first.
pub(crate) fn schedule_forward<K: Ord>(
    graph: &DependenceGraph,
    model: &ResourceModel,
    options: &ScheduleOptions,
    kind: StrategyKind,
    key: impl Fn(&ForwardState<'_>, OpId) -> K,
) -> SchedResult<Schedule> {
    check_feasible(graph, model)?;
    let prio = Priorities::compute(graph)?;
    let n = graph.len();

    let threshold = options.threshold(model);
    let mut pressure = threshold.map(|_| PressureTracker::new(graph, Direction::Forward));
    let mut force = false;

    let mut table = ReservationTable::new(model);
    let mut placed: Vec<Option<(i64, Reservation)>> = vec![None; n];
    let mut waiting: Vec<usize> = graph.nodes().iter().map(|nd| graph.in_degree(nd.id)).collect();
    let mut earliest = vec![0i64; n];
    let mut ready: BTreeSet<OpId> = graph.entries().into_iter().collect();
    let mut state = ForwardState {
        prio: &prio,
        cycle: 0,
        boost: vec![0; n],
        lower_bound: prio.critical_path as i64,
    };
    let budget = cycle_budget(graph, model);
    let mut done = 0;

    while done < n {
        if state.cycle > budget {
            return Err(stalled(graph));
        }
        let mut tried: BTreeSet<OpId> = BTreeSet::new();
        let mut lost_resources: Vec<OpId> = Vec::new();
        let mut pressure_blocked = false;
        let mut issued = 0;

        loop {
            let pick = ready
                .iter()
                .copied()
                .filter(|id| earliest[id.index()] <= state.cycle && !tried.contains(id))
                .max_by_key(|&id| key(&state, id));
            let Some(id) = pick else { break };
            tried.insert(id);

            let over = match (threshold, pressure.as_ref()) {
                (Some(t), Some(p)) => p.would_exceed(id, t),
                _ => false,
            };
            if over && !force {
                pressure_blocked = true;
                continue;
            }

            let node = graph.node(id);
            let Some(r) = table.try_reserve(state.cycle, node) else {
                lost_resources.push(id);
                continue;
            };
            if over {
                log::trace!(
                    "region '{}': {} admitted over the pressure threshold at cycle {}",
                    graph.region(),
                    id,
                    state.cycle
                );
                force = false;
            }
            if let Some(p) = pressure.as_mut() {
                p.issue(id);
            }

            placed[id.index()] = Some((state.cycle, r));
            ready.remove(&id);
            issued += 1;
            done += 1;
            state.lower_bound = state
                .lower_bound
                .max(state.cycle + prio.height(id) as i64);

            for e in graph.successors(id) {
                let d = e.dst.index();
                earliest[d] = earliest[d].max(state.cycle + e.latency as i64);
                waiting[d] -= 1;
                if waiting[d] == 0 {
                    ready.insert(e.dst);
                }
            }
        }

        for id in lost_resources {
            state.boost[id.index()] += 1;
        }
        if issued == 0 && pressure_blocked {
            force = true;
        }
        state.cycle += 1;
    }

    let placed: Vec<(i64, Reservation)> = placed
        .into_iter()
        .collect::<Option<_>>()
        .ok_or_else(|| stalled(graph))?;
    Ok(Schedule::assemble(graph, model, kind, placed))
}
