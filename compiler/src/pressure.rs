// pressure.rs — Live-value accounting for register-pressure-conservative mode
//
// A value is live from its definition until its last use, or to the end of
// the region when it is live-out. Live-in values are live from the start.
// Forward trackers serve the top-down and bubble-fish strategies; backward
// trackers serve bottom-up, where a value comes alive at its last use and
// dies at its definition.
//
// Preconditions: every node is issued at most once.
// Postconditions: `live()` equals the number of values live after the
//                 operations issued so far.
// Failure modes: none.
// Side effects: none.

use crate::ddg::DependenceGraph;
use crate::id::OpId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone)]
pub struct PressureTracker<'g> {
    graph: &'g DependenceGraph,
    direction: Direction,
    live: usize,
    /// Forward: uses not yet issued. Backward: unused.
    remaining_uses: Vec<usize>,
    /// Backward: value already brought alive by a later use or live-out.
    alive: Vec<bool>,
}

impl<'g> PressureTracker<'g> {
    pub fn new(graph: &'g DependenceGraph, direction: Direction) -> Self {
        let values = graph.values();
        let remaining_uses: Vec<usize> = values.iter().map(|v| v.uses.len()).collect();
        let (live, alive) = match direction {
            Direction::Forward => {
                let live = values
                    .iter()
                    .filter(|v| v.def.is_none() && !v.is_dead())
                    .count();
                (live, Vec::new())
            }
            Direction::Backward => {
                let alive: Vec<bool> = values.iter().map(|v| v.live_out).collect();
                (alive.iter().filter(|&&a| a).count(), alive)
            }
        };
        PressureTracker {
            graph,
            direction,
            live,
            remaining_uses,
            alive,
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Change in live values if `id` were issued next.
    pub fn delta(&self, id: OpId) -> isize {
        let values = self.graph.values();
        match self.direction {
            Direction::Forward => {
                let born = self
                    .graph
                    .values_defined_by(id)
                    .iter()
                    .filter(|&&v| !values[v].is_dead())
                    .count() as isize;
                let killed = self
                    .graph
                    .values_used_by(id)
                    .iter()
                    .filter(|&&v| self.remaining_uses[v] == 1 && !values[v].live_out)
                    .count() as isize;
                born - killed
            }
            Direction::Backward => {
                let born = self
                    .graph
                    .values_used_by(id)
                    .iter()
                    .filter(|&&v| !self.alive[v])
                    .count() as isize;
                let killed = self
                    .graph
                    .values_defined_by(id)
                    .iter()
                    .filter(|&&v| self.alive[v])
                    .count() as isize;
                born - killed
            }
        }
    }

    /// True when issuing `id` would raise pressure above `threshold`.
    pub fn would_exceed(&self, id: OpId, threshold: usize) -> bool {
        let delta = self.delta(id);
        delta > 0 && self.live as isize + delta > threshold as isize
    }

    pub fn issue(&mut self, id: OpId) {
        let delta = self.delta(id);
        self.live = (self.live as isize + delta).max(0) as usize;
        match self.direction {
            Direction::Forward => {
                for &v in self.graph.values_used_by(id) {
                    self.remaining_uses[v] = self.remaining_uses[v].saturating_sub(1);
                }
            }
            Direction::Backward => {
                for &v in self.graph.values_used_by(id) {
                    self.alive[v] = true;
                }
                for &v in self.graph.values_defined_by(id) {
                    self.alive[v] = false;
                }
            }
        }
    }
}
