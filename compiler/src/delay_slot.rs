// delay_slot.rs — Fill empty delay slots after control transfers
//
// For a control transfer issued at cycle C, slots C+1 .. C+d are examined in
// order. A slot is open when nothing issues in it. A candidate moved into an
// open slot must:
//   - follow the branch in program order and currently issue after the slot,
//   - share no edge with the branch or with any operation issued in an
//     earlier slot of the same branch,
//   - have no side effects and not be a control transfer,
//   - see every predecessor's latency satisfied at the slot cycle,
//   - fit the slot's free resources.
// The lowest program index wins. Sweeps repeat until nothing moves, so a
// filled schedule is a fixed point.
//
// Preconditions: `schedule` is a valid schedule of `graph` on `model`.
// Postconditions: the result is valid, no longer than the input, and
//                 `fill(fill(s)) == fill(s)`.
// Failure modes: none; a schedule whose resources cannot be replayed is
//                returned unchanged.
// Side effects: none.

use crate::ddg::DependenceGraph;
use crate::id::OpId;
use crate::machine::ResourceModel;
use crate::resource::ReservationTable;
use crate::schedule::Schedule;

pub fn fill(
    schedule: &Schedule,
    graph: &DependenceGraph,
    model: &ResourceModel,
    delay_slot_count: u32,
) -> Schedule {
    let mut out = schedule.clone();
    if delay_slot_count == 0 || out.delay_slots.is_empty() {
        return out;
    }

    let mut table = ReservationTable::new(model);
    for p in &out.placements {
        if table
            .reserve_exact(p.cycle as i64, graph.node(p.op), &p.reservation())
            .is_err()
        {
            log::warn!(
                "region '{}': schedule resources do not replay, delay slots left unfilled",
                out.region
            );
            return out;
        }
    }

    let mut moved = 0;
    while sweep(&mut out, &mut table, graph, delay_slot_count) {
        moved += 1;
    }
    if moved > 0 {
        out.recompute_length();
        log::debug!(
            "region '{}': filled {} delay slot(s), length {} -> {}",
            out.region,
            out.delay_slots.iter().filter(|d| d.filler.is_some()).count(),
            schedule.length,
            out.length
        );
    }
    out
}

/// One pass over every open slot; returns true when an operation moved.
fn sweep(
    s: &mut Schedule,
    table: &mut ReservationTable<'_>,
    graph: &DependenceGraph,
    delay_slot_count: u32,
) -> bool {
    for i in 0..s.delay_slots.len() {
        let slot = s.delay_slots[i].clone();
        if slot.slot > delay_slot_count || !s.ops_at(slot.cycle).is_empty() {
            continue;
        }

        let earlier_slot_ops: Vec<OpId> = (1..slot.slot)
            .flat_map(|k| s.ops_at(s.cycle_of(slot.branch) + k))
            .collect();
        let fillers: Vec<OpId> = s.delay_slots.iter().filter_map(|d| d.filler).collect();

        for cand in graph.nodes() {
            let id = cand.id;
            if id <= slot.branch
                || s.cycle_of(id) <= slot.cycle
                || cand.side_effects
                || cand.control
                || fillers.contains(&id)
                || graph.connected(id, slot.branch)
                || earlier_slot_ops.iter().any(|&o| graph.connected(id, o))
            {
                continue;
            }
            let preds_ready = graph
                .predecessors(id)
                .all(|e| s.cycle_of(e.src) as u64 + e.latency as u64 <= slot.cycle as u64);
            if !preds_ready {
                continue;
            }

            let old = s.placements[id.index()].clone();
            table.release(old.cycle as i64, cand, &old.reservation());
            match table.plan(slot.cycle as i64, cand) {
                Some(r) => {
                    table.commit(slot.cycle as i64, cand, &r);
                    let p = &mut s.placements[id.index()];
                    p.cycle = slot.cycle;
                    p.unit = r.unit;
                    p.operand_buses = r.operand_buses;
                    p.result_buses = r.result_buses;
                    s.delay_slots[i].filler = Some(id);
                    log::trace!(
                        "region '{}': {} moved from cycle {} into delay slot {} of {}",
                        s.region,
                        id,
                        old.cycle,
                        slot.slot,
                        slot.branch
                    );
                    return true;
                }
                None => table.commit(old.cycle as i64, cand, &old.reservation()),
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::Conservative;
    use crate::machine::tests::minimal_model;
    use crate::pass::StageCert;
    use crate::schedule::verify_schedule;
    use crate::strategy::{run, ScheduleOptions, StrategyKind};

    fn build(source: &str, model: &ResourceModel) -> DependenceGraph {
        let region = crate::parser::parse(source).program.unwrap().regions.remove(0);
        crate::ddg_builder::build(&region, model, &Conservative).unwrap()
    }

    #[test]
    fn four_operation_example_keeps_nop() {
        let m = minimal_model();
        let g = build(
            "region bb0 in(r0) {\n r1 = load r0\n r2 = add r1, r1\n store r2, r0\n branch\n}",
            &m,
        );
        let s = run(StrategyKind::BottomUp, &g, &m, &ScheduleOptions::default()).unwrap();
        let filled = fill(&s, &g, &m, m.delay_slots);
        assert_eq!(filled, s);
        assert_eq!(filled.delay_slots[0].filler, None);
    }

    /// Place operations at the given cycles, in id order.
    fn by_hand(g: &DependenceGraph, m: &ResourceModel, at: &[i64]) -> Schedule {
        let mut table = ReservationTable::new(m);
        let placed = at
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, table.try_reserve(c, g.node(OpId(i as u32))).unwrap()))
            .collect();
        Schedule::assemble(g, m, StrategyKind::TopDown, placed)
    }

    const SAFE_AFTER_BRANCH: &str =
        "region b in(r0) out(r3) {\n r1 = add r0, 1\n branch\n r3 = add r0, 5 [safe]\n}";

    #[test]
    fn safe_operation_fills_slot() {
        let m = minimal_model();
        let g = build(SAFE_AFTER_BRANCH, &m);
        let s = by_hand(&g, &m, &[0, 0, 3]);
        assert_eq!(s.length, 4);

        let filled = fill(&s, &g, &m, m.delay_slots);
        assert_eq!(filled.delay_slots[0].filler, Some(OpId(2)));
        assert_eq!(filled.cycle_of(OpId(2)), 1);
        assert_eq!(filled.length, 2);
        assert!(verify_schedule(&filled, &g, &m).all_pass());
        assert_eq!(fill(&filled, &g, &m, m.delay_slots), filled);
    }

    #[test]
    fn side_effects_never_fill() {
        let m = minimal_model();
        let g = build(
            "region b in(r0, r1) {\n r2 = add r0, 1\n branch\n store r1, r0 [safe]\n}",
            &m,
        );
        let s = by_hand(&g, &m, &[0, 0, 3]);
        let filled = fill(&s, &g, &m, m.delay_slots);
        assert_eq!(filled.delay_slots[0].filler, None);
        assert_eq!(filled, s);
    }

    #[test]
    fn dependent_operation_never_fills() {
        let m = minimal_model();
        // not safe: control edge from the branch
        let g = build(
            "region b in(r0) out(r3) {\n r1 = add r0, 1\n branch\n r3 = add r0, 5\n}",
            &m,
        );
        let s = by_hand(&g, &m, &[0, 0, 3]);
        assert_eq!(fill(&s, &g, &m, m.delay_slots), s);
    }

    #[test]
    fn disabled_with_zero_slots() {
        let m = minimal_model();
        let g = build(SAFE_AFTER_BRANCH, &m);
        let s = by_hand(&g, &m, &[0, 0, 3]);
        assert_eq!(fill(&s, &g, &m, 0), s);
    }
}
