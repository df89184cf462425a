// timing.rs — Mermaid Gantt timing chart output for region schedules
//
// One section per (region, function unit); each operation is a bar from its
// issue cycle to issue + unit latency. Operations moved into a delay slot
// are marked.
//
// Preconditions: each schedule was produced for the paired graph on `model`.
// Postconditions: returns a valid Mermaid Gantt chart string.
// Failure modes: none (pure string formatting; unknown latencies draw one
//                cycle).
// Side effects: none.

use std::fmt::{self, Write};

use crate::ddg::DependenceGraph;
use crate::machine::ResourceModel;
use crate::schedule::Schedule;

/// Emit the schedules as a Mermaid Gantt chart string.
pub fn emit_timing_chart(regions: &[(&Schedule, &DependenceGraph)], model: &ResourceModel) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_chart(&mut buf, regions, model);
    buf
}

fn write_chart(
    buf: &mut String,
    regions: &[(&Schedule, &DependenceGraph)],
    model: &ResourceModel,
) -> fmt::Result {
    writeln!(buf, "gantt")?;
    writeln!(buf, "    title Schedule on {}", model.name)?;
    writeln!(buf, "    dateFormat x")?;
    writeln!(buf, "    axisFormat %Q")?;

    for (schedule, graph) in regions {
        let prefix = sanitize(&schedule.region);
        for unit in model.units() {
            let mut bars: Vec<_> = schedule
                .placements
                .iter()
                .filter(|p| p.unit == unit.id)
                .collect();
            if bars.is_empty() {
                continue;
            }
            bars.sort_by_key(|p| (p.cycle, p.op));

            writeln!(buf)?;
            writeln!(
                buf,
                "    section {} {} ({}, {} cycles)",
                schedule.region, unit.name, schedule.strategy, schedule.length
            )?;
            for p in bars {
                let node = graph.node(p.op);
                let latency = model.unit_latency(p.unit, &node.opcode).unwrap_or(1);
                let slot = schedule
                    .delay_slots
                    .iter()
                    .find(|d| d.filler == Some(p.op))
                    .map(|d| format!(" slot {} of #{}", d.slot, d.branch.0))
                    .unwrap_or_default();
                writeln!(
                    buf,
                    "    #{} {}{} :{}_{}, {}, {}",
                    p.op.0,
                    node.opcode,
                    slot,
                    prefix,
                    p.op.0,
                    p.cycle,
                    p.cycle + latency
                )?;
            }
        }
    }
    Ok(())
}

/// Sanitize a name to valid Mermaid identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
