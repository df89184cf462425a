// schedule.rs — Region schedule representation and verification
//
// A schedule maps every operation of a region to an issue cycle, a function
// unit and the buses carrying its operand and result transports, and records
// the delay slots following each control transfer.
//
// Preconditions: `assemble` receives one reservation per node of the graph.
// Postconditions: cycles are normalized so the first issue cycle is 0;
//                 length = max(issue + 1, control issue + delay slots + 1).
// Failure modes: `verify_schedule` reports violated obligations in a
//                `ScheduleCert`; nothing here panics on bad input.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ddg::{DepKind, DependenceGraph};
use crate::id::{BusId, OpId, UnitId};
use crate::machine::ResourceModel;
use crate::resource::{Reservation, ReservationTable};
use crate::strategy::StrategyKind;

// ── Public types ────────────────────────────────────────────────────────────

/// Issue cycle and resources of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub op: OpId,
    pub cycle: u32,
    pub unit: UnitId,
    pub operand_buses: Vec<BusId>,
    pub result_buses: Vec<BusId>,
}

impl Placement {
    pub fn reservation(&self) -> Reservation {
        Reservation {
            unit: self.unit,
            operand_buses: self.operand_buses.clone(),
            result_buses: self.result_buses.clone(),
        }
    }
}

/// Slot `slot` (1-based) after control transfer `branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelaySlot {
    pub branch: OpId,
    pub slot: u32,
    pub cycle: u32,
    /// Operation moved into this slot by the delay-slot filler.
    pub filler: Option<OpId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub region: String,
    pub strategy: StrategyKind,
    /// Indexed by `OpId`.
    pub placements: Vec<Placement>,
    pub delay_slots: Vec<DelaySlot>,
    pub length: u32,
}

impl Schedule {
    /// Build a schedule from raw (possibly negative) cycles and reservations,
    /// one per node in id order.
    pub fn assemble(
        graph: &DependenceGraph,
        model: &ResourceModel,
        strategy: StrategyKind,
        placed: Vec<(i64, Reservation)>,
    ) -> Schedule {
        let base = placed.iter().map(|(c, _)| *c).min().unwrap_or(0);
        let placements: Vec<Placement> = placed
            .into_iter()
            .enumerate()
            .map(|(i, (cycle, r))| Placement {
                op: OpId(i as u32),
                cycle: (cycle - base) as u32,
                unit: r.unit,
                operand_buses: r.operand_buses,
                result_buses: r.result_buses,
            })
            .collect();

        let mut delay_slots = Vec::new();
        for node in graph.nodes().iter().filter(|n| n.control) {
            let c = placements[node.id.index()].cycle;
            for slot in 1..=model.delay_slots {
                delay_slots.push(DelaySlot {
                    branch: node.id,
                    slot,
                    cycle: c + slot,
                    filler: None,
                });
            }
        }

        let mut s = Schedule {
            region: graph.region().to_string(),
            strategy,
            placements,
            delay_slots,
            length: 0,
        };
        s.recompute_length();
        s
    }

    /// Length = one past the last issue cycle or delay slot.
    pub fn recompute_length(&mut self) {
        let issue_end = self.placements.iter().map(|p| p.cycle + 1).max().unwrap_or(0);
        let slot_end = self.delay_slots.iter().map(|d| d.cycle + 1).max().unwrap_or(0);
        self.length = issue_end.max(slot_end);
    }

    pub fn cycle_of(&self, op: OpId) -> u32 {
        self.placements[op.index()].cycle
    }

    /// Operations issued at `cycle`, in program order.
    pub fn ops_at(&self, cycle: u32) -> Vec<OpId> {
        self.placements
            .iter()
            .filter(|p| p.cycle == cycle)
            .map(|p| p.op)
            .collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for schedule postconditions.
#[derive(Debug, Clone)]
pub struct ScheduleCert {
    /// Exactly one placement per node, in id order.
    pub coverage: bool,
    /// `cycle(dst) >= cycle(src) + latency` for every edge.
    pub latency: bool,
    /// Issue width, unit slots, buses and register file ports respected.
    pub capacity: bool,
    /// Writers of the same register deliver their results in program order
    /// on the units they were placed on.
    pub result_order: bool,
    /// First few violations, for diagnostics.
    pub violations: Vec<String>,
}

impl crate::pass::StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.coverage && self.latency && self.capacity && self.result_order
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("coverage", self.coverage),
            ("latency", self.latency),
            ("capacity", self.capacity),
            ("result_order", self.result_order),
        ]
    }
}

const MAX_REPORTED: usize = 8;

/// Check a finished schedule against its graph and machine.
pub fn verify_schedule(
    schedule: &Schedule,
    graph: &DependenceGraph,
    model: &ResourceModel,
) -> ScheduleCert {
    let mut violations = Vec::new();

    let coverage = schedule.placements.len() == graph.len()
        && schedule
            .placements
            .iter()
            .enumerate()
            .all(|(i, p)| p.op.index() == i);
    if !coverage {
        violations.push(format!(
            "{} placements for {} operations",
            schedule.placements.len(),
            graph.len()
        ));
        return ScheduleCert {
            coverage,
            latency: false,
            capacity: false,
            result_order: false,
            violations,
        };
    }

    let mut latency = true;
    for e in graph.edges() {
        let (s, d) = (schedule.cycle_of(e.src), schedule.cycle_of(e.dst));
        if (d as u64) < s as u64 + e.latency as u64 {
            latency = false;
            if violations.len() < MAX_REPORTED {
                violations.push(format!(
                    "{} edge {} -> {} needs {} cycle(s), got {} -> {}",
                    e.kind, e.src, e.dst, e.latency, s, d
                ));
            }
        }
    }

    let mut capacity = true;
    let mut table = ReservationTable::new(model);
    for p in &schedule.placements {
        if let Err(why) = table.reserve_exact(p.cycle as i64, graph.node(p.op), &p.reservation()) {
            capacity = false;
            if violations.len() < MAX_REPORTED {
                violations.push(why);
            }
        }
    }

    // cycle at which a placed operation's result becomes visible
    let lands = |op: OpId| {
        let p = &schedule.placements[op.index()];
        let node = graph.node(op);
        p.cycle as u64 + model.unit_latency(p.unit, &node.opcode).unwrap_or(node.latency) as u64
    };
    let mut result_order = true;
    for e in graph.edges().iter().filter(|e| e.kind == DepKind::Output) {
        let (first, second) = (lands(e.src), lands(e.dst));
        if second <= first {
            result_order = false;
            if violations.len() < MAX_REPORTED {
                violations.push(format!(
                    "output edge {} -> {}: results land at {} and {}",
                    e.src, e.dst, first, second
                ));
            }
        }
    }

    ScheduleCert {
        coverage,
        latency,
        capacity,
        result_order,
        violations,
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

/// Schedule listing bound to its graph and machine for names.
pub struct Listing<'a> {
    pub schedule: &'a Schedule,
    pub graph: &'a DependenceGraph,
    pub model: &'a ResourceModel,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.schedule;
        writeln!(
            f,
            "region {} ({}, {} cycles)",
            s.region,
            s.strategy.name(),
            s.length
        )?;
        for cycle in 0..s.length {
            let ops = s.ops_at(cycle);
            let slots: Vec<String> = s
                .delay_slots
                .iter()
                .filter(|d| d.cycle == cycle)
                .map(|d| format!("delay slot {} of {}", d.slot, d.branch))
                .collect();
            write!(f, "  {cycle:>3}:")?;
            if ops.is_empty() {
                write!(f, " nop")?;
            }
            for (i, op) in ops.iter().enumerate() {
                let p = &s.placements[op.index()];
                let sep = if i == 0 { " " } else { " | " };
                write!(
                    f,
                    "{sep}{} {} @{}",
                    op,
                    self.graph.node(*op),
                    self.model.unit(p.unit).name
                )?;
            }
            if !slots.is_empty() {
                write!(f, "  ; {}", slots.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Conservative;
    use crate::machine::tests::{minimal_model, mixed_model};
    use crate::pass::StageCert;

    const EXAMPLE: &str = "region bb0 in(r0) {\n\
                           \x20   r1 = load r0\n\
                           \x20   r2 = add r1, r1\n\
                           \x20   store r2, r0\n\
                           \x20   branch\n\
                           }\n";

    fn example_graph(model: &ResourceModel) -> DependenceGraph {
        let region = crate::parser::parse(EXAMPLE).program.unwrap().regions.remove(0);
        crate::ddg_builder::build(&region, model, &Conservative).unwrap()
    }

    /// load@0, add@2, store@3, branch@3, placed by hand.
    fn hand_schedule(model: &ResourceModel, graph: &DependenceGraph) -> Schedule {
        let mut table = ReservationTable::new(model);
        let placed = [0i64, 2, 3, 3]
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let r = table.try_reserve(c, graph.node(OpId(i as u32))).unwrap();
                (c, r)
            })
            .collect();
        Schedule::assemble(graph, model, StrategyKind::TopDown, placed)
    }

    #[test]
    fn length_includes_delay_slots() {
        let m = minimal_model();
        let g = example_graph(&m);
        let s = hand_schedule(&m, &g);
        assert_eq!(s.length, 5);
        assert_eq!(
            s.delay_slots,
            vec![DelaySlot {
                branch: OpId(3),
                slot: 1,
                cycle: 4,
                filler: None
            }]
        );
        assert_eq!(s.ops_at(3), vec![OpId(2), OpId(3)]);
    }

    #[test]
    fn negative_cycles_are_normalized() {
        let m = minimal_model();
        let g = example_graph(&m);
        let mut table = ReservationTable::new(&m);
        let placed = [-3i64, -1, 0, 0]
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, table.try_reserve(c, g.node(OpId(i as u32))).unwrap()))
            .collect();
        let s = Schedule::assemble(&g, &m, StrategyKind::BottomUp, placed);
        let cycles: Vec<u32> = s.placements.iter().map(|p| p.cycle).collect();
        assert_eq!(cycles, vec![0, 2, 3, 3]);
    }

    #[test]
    fn verify_accepts_valid_schedule() {
        let m = minimal_model();
        let g = example_graph(&m);
        let cert = verify_schedule(&hand_schedule(&m, &g), &g, &m);
        assert!(cert.all_pass(), "{:?}", cert.violations);
        assert_eq!(cert.obligations().len(), 4);
    }

    #[test]
    fn verify_reports_latency_violation() {
        let m = minimal_model();
        let g = example_graph(&m);
        let mut s = hand_schedule(&m, &g);
        s.placements[1].cycle = 1;
        let cert = verify_schedule(&s, &g, &m);
        assert!(!cert.latency);
        assert!(cert.violations[0].starts_with("true edge #0 -> #1"));
    }

    #[test]
    fn verify_checks_result_order_on_placed_units() {
        let m = mixed_model();
        let src = "region b in(r0) {\n r1 = mul r0, r0\n r1 = add r0, 1\n}";
        let region = crate::parser::parse(src).program.unwrap().regions.remove(0);
        let g = crate::ddg_builder::build(&region, &m, &Conservative).unwrap();
        let place = |add_at: i64| {
            let mut table = ReservationTable::new(&m);
            let placed = vec![
                (0, table.try_reserve(0, g.node(OpId(0))).unwrap()),
                (add_at, table.try_reserve(add_at, g.node(OpId(1))).unwrap()),
            ];
            Schedule::assemble(&g, &m, StrategyKind::TopDown, placed)
        };

        // mul lands at 3 on the slow unit, add on the fast one at 4
        let cert = verify_schedule(&place(3), &g, &m);
        assert!(cert.all_pass(), "{:?}", cert.violations);

        // add issued at 2 would overwrite r1 before mul's result arrives
        let cert = verify_schedule(&place(2), &g, &m);
        assert!(!cert.result_order);
        assert!(cert
            .violations
            .iter()
            .any(|v| v == "output edge #0 -> #1: results land at 3 and 3"));
    }

    #[test]
    fn verify_reports_missing_placement() {
        let m = minimal_model();
        let g = example_graph(&m);
        let mut s = hand_schedule(&m, &g);
        s.placements.pop();
        let cert = verify_schedule(&s, &g, &m);
        assert!(!cert.coverage);
        assert!(!cert.all_pass());
    }

    #[test]
    fn listing() {
        let m = minimal_model();
        let g = example_graph(&m);
        let s = hand_schedule(&m, &g);
        let text = Listing {
            schedule: &s,
            graph: &g,
            model: &m,
        }
        .to_string();
        insta::assert_snapshot!(text, @r"
        region bb0 (top-down, 5 cycles)
            0: #0 r1 = load r0 @lsu
            1: nop
            2: #1 r2 = add r1, r1 @alu
            3: #2 store r2, r0 @lsu | #3 branch @gcu
            4: nop  ; delay slot 1 of #3
        ");
    }
}
