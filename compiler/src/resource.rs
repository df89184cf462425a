// resource.rs — Cycle-indexed reservation table
//
// Tracks, per cycle, the machine resources consumed by placed operations:
// issue slots of the instruction word, function-unit slots, transport buses
// and register file ports. An operation issued at cycle `c` on unit `u`
// moves each operand over a bus at `c` (reading a register file port when
// the operand is a register) and each result over a bus at `c + lat(u)`
// (writing a register file port).
//
// Cycles are signed so the bottom-up scheduler can count backward from 0.
//
// Preconditions: nodes come from a graph built against the same model.
// Postconditions: per-cycle usage never exceeds any capacity of the model.
// Failure modes: `plan` returns `None` when no unit/bus assignment fits.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ddg::{OpNode, Operand};
use crate::id::{BusId, RegFileId, UnitId};
use crate::machine::{Endpoint, ResourceModel};

/// Unit and buses assigned to one placed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub unit: UnitId,
    /// One bus per operand, in operand order.
    pub operand_buses: Vec<BusId>,
    /// One bus per result, in operand order.
    pub result_buses: Vec<BusId>,
}

#[derive(Debug, Clone)]
struct CycleUsage {
    issued: u32,
    unit_slots: Vec<u32>,
    buses: Vec<bool>,
    rf_reads: Vec<u32>,
    rf_writes: Vec<u32>,
}

impl CycleUsage {
    fn new(model: &ResourceModel) -> Self {
        CycleUsage {
            issued: 0,
            unit_slots: vec![0; model.units().len()],
            buses: vec![false; model.buses().len()],
            rf_reads: vec![0; model.register_files().len()],
            rf_writes: vec![0; model.register_files().len()],
        }
    }

    fn is_empty(&self) -> bool {
        self.issued == 0
            && self.buses.iter().all(|b| !b)
            && self.rf_reads.iter().all(|&r| r == 0)
            && self.rf_writes.iter().all(|&w| w == 0)
    }
}

/// One bus transfer an operation needs.
#[derive(Debug, Clone, Copy)]
struct Move {
    /// Register file read (operand) or written (result); `None` for immediates.
    rf: Option<RegFileId>,
}

#[derive(Debug, Clone)]
pub struct ReservationTable<'m> {
    model: &'m ResourceModel,
    cycles: BTreeMap<i64, CycleUsage>,
}

impl<'m> ReservationTable<'m> {
    pub fn new(model: &'m ResourceModel) -> Self {
        ReservationTable {
            model,
            cycles: BTreeMap::new(),
        }
    }

    pub fn model(&self) -> &'m ResourceModel {
        self.model
    }

    /// Operations issued at `cycle`.
    pub fn issued_at(&self, cycle: i64) -> u32 {
        self.cycles.get(&cycle).map_or(0, |u| u.issued)
    }

    fn usage(&self, cycle: i64) -> CycleUsage {
        self.cycles
            .get(&cycle)
            .cloned()
            .unwrap_or_else(|| CycleUsage::new(self.model))
    }

    fn moves(&self, node: &OpNode) -> (Vec<Move>, Vec<Move>) {
        let rf_of = |o: &Operand| o.register().and_then(|r| self.model.register_file_of(r));
        let operands = node
            .operands
            .iter()
            .filter(|o| o.is_read())
            .map(|o| Move { rf: rf_of(o) })
            .collect();
        let results = node
            .operands
            .iter()
            .filter(|o| o.is_write())
            .map(|o| Move { rf: rf_of(o) })
            .collect();
        (operands, results)
    }

    /// Greedy lowest-index bus assignment of `moves` to or from `unit`.
    fn assign_buses(
        &self,
        usage: &mut CycleUsage,
        unit: UnitId,
        moves: &[Move],
        result: bool,
    ) -> Option<Vec<BusId>> {
        let mut assigned = Vec::with_capacity(moves.len());
        for m in moves {
            if let Some(rf) = m.rf {
                let rfd = self.model.register_file(rf);
                let (used, cap) = if result {
                    (&mut usage.rf_writes[rf.index()], rfd.write_ports)
                } else {
                    (&mut usage.rf_reads[rf.index()], rfd.read_ports)
                };
                if *used >= cap {
                    return None;
                }
                *used += 1;
            }
            let bus = self.model.buses().iter().find(|b| {
                !usage.buses[b.id.index()]
                    && b.connects(Endpoint::Unit(unit))
                    && m.rf.is_none_or(|rf| b.connects(Endpoint::RegFile(rf)))
            })?;
            usage.buses[bus.id.index()] = true;
            assigned.push(bus.id);
        }
        Some(assigned)
    }

    /// Find a unit and buses for `node` at `cycle` without reserving them.
    pub fn plan(&self, cycle: i64, node: &OpNode) -> Option<Reservation> {
        let issue = self.usage(cycle);
        if issue.issued >= self.model.issue_width {
            return None;
        }
        let (operands, results) = self.moves(node);

        for &unit in self.model.units_for(&node.opcode) {
            if issue.unit_slots[unit.index()] >= self.model.unit(unit).slots {
                continue;
            }
            let Some(latency) = self.model.unit_latency(unit, &node.opcode) else {
                continue;
            };

            let mut at_issue = issue.clone();
            let Some(operand_buses) = self.assign_buses(&mut at_issue, unit, &operands, false)
            else {
                continue;
            };
            let mut at_result = self.usage(cycle + latency as i64);
            let Some(result_buses) = self.assign_buses(&mut at_result, unit, &results, true)
            else {
                continue;
            };
            return Some(Reservation {
                unit,
                operand_buses,
                result_buses,
            });
        }
        None
    }

    /// Plan and reserve in one step.
    pub fn try_reserve(&mut self, cycle: i64, node: &OpNode) -> Option<Reservation> {
        let r = self.plan(cycle, node)?;
        self.commit(cycle, node, &r);
        Some(r)
    }

    /// Record a reservation returned by `plan` for the same cycle and node.
    pub fn commit(&mut self, cycle: i64, node: &OpNode, r: &Reservation) {
        self.apply(cycle, node, r, true);
    }

    /// Undo a previous `commit`.
    pub fn release(&mut self, cycle: i64, node: &OpNode, r: &Reservation) {
        self.apply(cycle, node, r, false);
    }

    fn apply(&mut self, cycle: i64, node: &OpNode, r: &Reservation, take: bool) {
        let model = self.model;
        let latency = model.unit_latency(r.unit, &node.opcode).unwrap_or(1) as i64;
        let (operands, results) = self.moves(node);
        let bump = |v: &mut u32| {
            if take {
                *v += 1;
            } else {
                *v = v.saturating_sub(1);
            }
        };

        let issue = self
            .cycles
            .entry(cycle)
            .or_insert_with(|| CycleUsage::new(model));
        bump(&mut issue.issued);
        bump(&mut issue.unit_slots[r.unit.index()]);
        for (m, bus) in operands.iter().zip(&r.operand_buses) {
            issue.buses[bus.index()] = take;
            if let Some(rf) = m.rf {
                bump(&mut issue.rf_reads[rf.index()]);
            }
        }
        if !take && issue.is_empty() {
            self.cycles.remove(&cycle);
        }

        if results.is_empty() {
            return;
        }
        let at = cycle + latency;
        let result = self
            .cycles
            .entry(at)
            .or_insert_with(|| CycleUsage::new(model));
        for (m, bus) in results.iter().zip(&r.result_buses) {
            result.buses[bus.index()] = take;
            if let Some(rf) = m.rf {
                bump(&mut result.rf_writes[rf.index()]);
            }
        }
        if !take && result.is_empty() {
            self.cycles.remove(&at);
        }
    }

    /// Reserve an externally chosen assignment, checking every capacity.
    ///
    /// Used to verify finished schedules; nothing is reserved on failure.
    pub fn reserve_exact(&mut self, cycle: i64, node: &OpNode, r: &Reservation) -> Result<(), String> {
        let unit = self.model.units().get(r.unit.index()).ok_or_else(|| {
            format!("{} assigned to unknown unit {}", node.id, r.unit.0)
        })?;
        let latency = unit.latencies.get(&node.opcode).copied().ok_or_else(|| {
            format!("{} ({}) is not implemented by unit '{}'", node.id, node.opcode, unit.name)
        })?;
        let (operands, results) = self.moves(node);
        if operands.len() != r.operand_buses.len() || results.len() != r.result_buses.len() {
            return Err(format!("{} has a wrong number of transports", node.id));
        }

        let issue = self.usage(cycle);
        if issue.issued >= self.model.issue_width {
            return Err(format!("issue width exceeded at cycle {cycle}"));
        }
        if issue.unit_slots[r.unit.index()] >= unit.slots {
            return Err(format!("unit '{}' oversubscribed at cycle {cycle}", unit.name));
        }
        self.check_transports(&issue, r.unit, &operands, &r.operand_buses, false, cycle)?;
        let result_cycle = cycle + latency as i64;
        let result = self.usage(result_cycle);
        self.check_transports(&result, r.unit, &results, &r.result_buses, true, result_cycle)?;

        self.commit(cycle, node, r);
        Ok(())
    }

    fn check_transports(
        &self,
        usage: &CycleUsage,
        unit: UnitId,
        moves: &[Move],
        buses: &[BusId],
        result: bool,
        cycle: i64,
    ) -> Result<(), String> {
        let mut usage = usage.clone();
        for (m, &bus) in moves.iter().zip(buses) {
            let b = self
                .model
                .buses()
                .get(bus.index())
                .ok_or_else(|| format!("unknown bus {}", bus.0))?;
            if usage.buses[bus.index()] {
                return Err(format!("bus '{}' used twice at cycle {cycle}", b.name));
            }
            if !b.connects(Endpoint::Unit(unit)) {
                return Err(format!("bus '{}' does not reach unit {}", b.name, unit.0));
            }
            usage.buses[bus.index()] = true;
            if let Some(rf) = m.rf {
                let rfd = self.model.register_file(rf);
                if !b.connects(Endpoint::RegFile(rf)) {
                    return Err(format!("bus '{}' does not reach '{}'", b.name, rfd.name));
                }
                let (used, cap) = if result {
                    (&mut usage.rf_writes[rf.index()], rfd.write_ports)
                } else {
                    (&mut usage.rf_reads[rf.index()], rfd.read_ports)
                };
                if *used >= cap {
                    return Err(format!("'{}' ports exhausted at cycle {cycle}", rfd.name));
                }
                *used += 1;
            }
        }
        Ok(())
    }
}

/// Check that `node` can be issued on an otherwise idle machine.
pub fn fits_empty_machine(model: &ResourceModel, node: &OpNode) -> bool {
    ReservationTable::new(model).plan(0, node).is_some()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddg::tests::{node, reg};
    use crate::ddg::OperandRole::*;
    use crate::machine::tests::{minimal_desc, minimal_model};

    fn add(id: u32, dst: &str, a: &str, b: &str) -> OpNode {
        node(id, "add", vec![reg(Write, dst), reg(Read, a), reg(Read, b)], 1)
    }

    #[test]
    fn result_moves_land_after_latency() {
        let m = minimal_model();
        let mut t = ReservationTable::new(&m);
        let r = t.try_reserve(0, &add(0, "r1", "r2", "r3")).unwrap();
        assert_eq!(r.unit, UnitId(0));
        assert_eq!(r.operand_buses, vec![BusId(0), BusId(1)]);
        // result at cycle 1 gets the lowest bus again
        assert_eq!(r.result_buses, vec![BusId(0)]);
        assert_eq!(t.issued_at(0), 1);
    }

    #[test]
    fn unit_slot_conflict() {
        let m = minimal_model();
        let mut t = ReservationTable::new(&m);
        assert!(t.try_reserve(0, &add(0, "r1", "r2", "r3")).is_some());
        // single ALU slot
        assert!(t.plan(0, &add(1, "r4", "r5", "r6")).is_none());
        assert!(t.plan(1, &add(1, "r4", "r5", "r6")).is_some());
    }

    #[test]
    fn register_file_read_ports_limit() {
        let m = minimal_model();
        let mut t = ReservationTable::new(&m);
        let store = node(0, "store", vec![reg(Read, "r1"), reg(Read, "r2")], 1);
        assert!(t.try_reserve(0, &store).is_some());
        // both read ports are taken at cycle 0, the add needs two more
        assert!(t.plan(0, &add(1, "r4", "r5", "r6")).is_none());
    }

    #[test]
    fn bus_topology_restricts_assignment() {
        let mut desc = minimal_desc();
        desc.buses[0].connects = vec!["lsu".into(), "rf".into()];
        let m = ResourceModel::new(&desc).unwrap();
        let t = ReservationTable::new(&m);
        let r = t.plan(0, &add(0, "r1", "r2", "r3")).unwrap();
        assert_eq!(r.operand_buses, vec![BusId(1), BusId(2)]);
    }

    #[test]
    fn release_restores_capacity() {
        let m = minimal_model();
        let mut t = ReservationTable::new(&m);
        let a = add(0, "r1", "r2", "r3");
        let r = t.try_reserve(0, &a).unwrap();
        t.release(0, &a, &r);
        assert_eq!(t.issued_at(0), 0);
        assert!(t.plan(0, &add(1, "r4", "r5", "r6")).is_some());
    }

    #[test]
    fn reserve_exact_rejects_double_booked_bus() {
        let m = minimal_model();
        let mut t = ReservationTable::new(&m);
        let load = node(0, "load", vec![reg(Write, "r1"), reg(Read, "r0")], 2);
        let r = Reservation {
            unit: UnitId(1),
            operand_buses: vec![BusId(0)],
            result_buses: vec![BusId(0)],
        };
        t.reserve_exact(0, &load, &r).unwrap();
        let a = add(1, "r4", "r5", "r6");
        let clash = Reservation {
            unit: UnitId(0),
            operand_buses: vec![BusId(0), BusId(1)],
            result_buses: vec![BusId(0)],
        };
        let err = t.reserve_exact(0, &a, &clash).unwrap_err();
        assert!(err.contains("used twice"));
    }

    #[test]
    fn operation_needing_too_many_buses_never_fits() {
        let mut desc = minimal_desc();
        desc.buses.truncate(1);
        let m = ResourceModel::new(&desc).unwrap();
        assert!(!fits_empty_machine(&m, &add(0, "r1", "r2", "r3")));
        let load = node(0, "load", vec![reg(Write, "r1"), reg(Read, "r0")], 2);
        assert!(fits_empty_machine(&m, &load));
    }
}
