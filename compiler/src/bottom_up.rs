// bottom_up.rs — Bottom-up list scheduling
//
// Schedules from the exits toward the entries, counting cycles backward from
// 0; the finished schedule is shifted so its first cycle is 0. A node is
// ready once all of its successors are placed and may issue no later than
// min(cycle(succ) - latency). Priority is the longest latency-weighted path
// to the exit plus the aging boost; ties go to the highest program index.
//
// Preconditions: graph built against `model`.
// Postconditions: see `strategy::Strategy`.
// Failure modes: `UnschedulableRegion` (cycle, infeasible op, stall).
// Side effects: none.

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

pub struct BottomUp;

impl Strategy for BottomUp {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BottomUp
    }

    fn schedule(
        &self,
        graph: &DependenceGraph,
        model: &ResourceModel,
        options: &ScheduleOptions,
    ) -> SchedResult<Schedule> {
        check_feasible(graph, model)?;
        let prio = Priorities::compute(graph)?;
        let n = graph.len();

        let threshold = options.threshold(model);
        let mut pressure = threshold.map(|_| PressureTracker::new(graph, Direction::Backward));
        let mut force = false;

        let mut table = ReservationTable::new(model);
        let mut placed: Vec<Option<(i64, Reservation)>> = vec![None; n];
        let mut waiting: Vec<usize> =
            graph.nodes().iter().map(|nd| graph.out_degree(nd.id)).collect();
        let mut latest: Vec<Option<i64>> = vec![None; n];
        let mut ready: BTreeSet<OpId> = graph.exits().into_iter().collect();
        let mut boost = vec![0u32; n];
        let budget = cycle_budget(graph, model);
        let mut cycle: i64 = 0;
        let mut done = 0;

        while done < n {
            if -cycle > budget {
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
                    .filter(|id| {
                        latest[id.index()].is_none_or(|l| l >= cycle) && !tried.contains(id)
                    })
                    .max_by_key(|&id| (prio.height(id) + boost[id.index()], id));
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

                let Some(r) = table.try_reserve(cycle, graph.node(id)) else {
                    lost_resources.push(id);
                    continue;
                };
                if over {
                    log::trace!(
                        "region '{}': {} admitted over the pressure threshold at cycle {}",
                        graph.region(),
                        id,
                        cycle
                    );
                    force = false;
                }
                if let Some(p) = pressure.as_mut() {
                    p.issue(id);
                }

                placed[id.index()] = Some((cycle, r));
                ready.remove(&id);
                issued += 1;
                done += 1;

                for e in graph.predecessors(id) {
                    let s = e.src.index();
                    let bound = cycle - e.latency as i64;
                    latest[s] = Some(latest[s].map_or(bound, |l| l.min(bound)));
                    waiting[s] -= 1;
                    if waiting[s] == 0 {
                        ready.insert(e.src);
                    }
                }
            }

            for id in lost_resources {
                boost[id.index()] += 1;
            }
            if issued == 0 && pressure_blocked {
                force = true;
            }
            cycle -= 1;
        }

        let placed: Vec<(i64, Reservation)> = placed
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| stalled(graph))?;
        Ok(Schedule::assemble(graph, model, StrategyKind::BottomUp, placed))
    }
}
