// bubblefish.rs — Bubble-fish list scheduling
//
// Single forward pass that uses both priority computations. Among the ready
// nodes of a cycle it first issues the one whose deferral by a cycle would
// push the length lower bound (critical path, raised by what is already
// placed) up the most; then the one with the longest path through it; then
// program order.

use std::cmp::Reverse;

use crate::ddg::DependenceGraph;
use crate::error::SchedResult;
use crate::machine::ResourceModel;
use crate::schedule::Schedule;
use crate::strategy::{ScheduleOptions, Strategy, StrategyKind};
use crate::top_down::schedule_forward;

pub struct BubbleFish;

impl Strategy for BubbleFish {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BubbleFish
    }

    fn schedule(
        &self,
        graph: &DependenceGraph,
        model: &ResourceModel,
        options: &ScheduleOptions,
    ) -> SchedResult<Schedule> {
        schedule_forward(graph, model, options, StrategyKind::BubbleFish, |s, id| {
            let deferred_end = s.cycle + 1 + s.prio.height(id) as i64;
            let increase = (deferred_end - s.lower_bound).max(0);
            let through = s.prio.slack_free_length(id) + s.boost[id.index()];
            (increase, through, Reverse(id))
        })
    }
}
