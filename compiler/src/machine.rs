// machine.rs — Processor description and the static resource model
//
// `MachineDescription` is the serde view of a processor description file
// (`.adf.json`). `ResourceModel` is the validated, index-based view the
// scheduler works with: function units with per-operation latencies and
// issue-slot counts, transport buses with their connectivity, register files
// with their ports, issue width and delay-slot count.
//
// Preconditions: the description comes from the processor description source.
// Postconditions: a `ResourceModel` only exists for a description in which
//                 every unit has a positive slot count, every latency is at
//                 least one cycle, and every bus endpoint names a unit or a
//                 register file.
// Failure modes: I/O, JSON and validation errors → `MachineError`.
// Side effects: `MachineDescription::load` reads one file.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MachineError;
use crate::id::{BusId, RegFileId, UnitId};

// ── Processor description (serde view) ──────────────────────────────────────

/// Memory behaviour of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryAccess {
    #[default]
    None,
    Load,
    Store,
}

/// Semantics of one opcode, independent of the unit executing it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationInfo {
    pub memory: MemoryAccess,
    /// Control transfer (jump, branch, call, return).
    pub control: bool,
    /// Architecturally visible effect besides writing result registers.
    pub side_effects: bool,
}

/// A function unit: issue slots per cycle and the operations it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionUnitDesc {
    pub name: String,
    #[serde(default = "default_slots")]
    pub slots: u32,
    /// opcode → latency in cycles.
    pub operations: BTreeMap<String, u32>,
}

/// A transport bus. `connects` names the units and register files it
/// reaches; an empty list means the bus is fully connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusDesc {
    pub name: String,
    #[serde(default)]
    pub connects: Vec<String>,
}

/// A register file: registers `<prefix>0 .. <prefix><size-1>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFileDesc {
    pub name: String,
    pub prefix: String,
    pub size: u32,
    #[serde(default = "default_ports")]
    pub read_ports: u32,
    #[serde(default = "default_ports")]
    pub write_ports: u32,
}

/// A processor description as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDescription {
    /// Cosmetic; excluded from the plugin fingerprint.
    pub name: String,
    /// Cosmetic; excluded from the plugin fingerprint.
    #[serde(default)]
    pub description: String,
    pub issue_width: u32,
    #[serde(default)]
    pub delay_slots: u32,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationInfo>,
    pub function_units: Vec<FunctionUnitDesc>,
    pub buses: Vec<BusDesc>,
    pub register_files: Vec<RegisterFileDesc>,
}

fn default_slots() -> u32 {
    1
}

fn default_ports() -> u32 {
    1
}

/// The resource-relevant subset of a description, in canonical form.
#[derive(Serialize)]
struct CanonicalMachine<'a> {
    issue_width: u32,
    delay_slots: u32,
    operations: &'a BTreeMap<String, OperationInfo>,
    function_units: &'a [FunctionUnitDesc],
    buses: &'a [BusDesc],
    register_files: &'a [RegisterFileDesc],
}

impl MachineDescription {
    /// Read and deserialize a description file.
    pub fn load(path: &Path) -> Result<Self, MachineError> {
        let text = std::fs::read_to_string(path).map_err(|source| MachineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| MachineError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Compact JSON over every resource-model-relevant field.
    ///
    /// Field order is fixed by `CanonicalMachine`, map order by `BTreeMap`;
    /// unit, bus and register file order is kept because unit and bus
    /// assignment prefers lower indices. The name and description are left
    /// out so cosmetic edits do not change the fingerprint.
    pub fn canonical_json(&self) -> String {
        let canonical = CanonicalMachine {
            issue_width: self.issue_width,
            delay_slots: self.delay_slots,
            operations: &self.operations,
            function_units: &self.function_units,
            buses: &self.buses,
            register_files: &self.register_files,
        };
        // Serializing plain structs, strings and integers cannot fail.
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

// ── Resource model (validated, index-based) ─────────────────────────────────

/// Endpoint of a transport: a function unit port or a register file port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Unit(UnitId),
    RegFile(RegFileId),
}

#[derive(Debug, Clone)]
pub struct FunctionUnit {
    pub id: UnitId,
    pub name: String,
    pub slots: u32,
    pub latencies: BTreeMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// `None` = fully connected.
    reach: Option<Vec<Endpoint>>,
}

impl Bus {
    pub fn connects(&self, endpoint: Endpoint) -> bool {
        match &self.reach {
            None => true,
            Some(reach) => reach.contains(&endpoint),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub id: RegFileId,
    pub name: String,
    pub prefix: String,
    pub size: u32,
    pub read_ports: u32,
    pub write_ports: u32,
}

/// Immutable view of a target processor shared by every strategy, the
/// delay-slot filler and the plugin cache.
#[derive(Debug, Clone)]
pub struct ResourceModel {
    pub name: String,
    pub issue_width: u32,
    pub delay_slots: u32,
    units: Vec<FunctionUnit>,
    buses: Vec<Bus>,
    register_files: Vec<RegisterFile>,
    operations: BTreeMap<String, OperationInfo>,
    /// opcode → implementing units in declaration order.
    units_by_opcode: HashMap<String, Vec<UnitId>>,
}

impl ResourceModel {
    /// Validate a description and build the index-based model.
    pub fn new(desc: &MachineDescription) -> Result<Self, MachineError> {
        let invalid = |reason: String| MachineError::Invalid {
            machine: desc.name.clone(),
            reason,
        };

        if desc.issue_width == 0 {
            return Err(invalid("issue_width must be at least 1".into()));
        }
        if desc.buses.is_empty() {
            return Err(invalid("at least one bus is required".into()));
        }

        let mut units = Vec::with_capacity(desc.function_units.len());
        let mut units_by_opcode: HashMap<String, Vec<UnitId>> = HashMap::new();
        for (i, fu) in desc.function_units.iter().enumerate() {
            if fu.slots == 0 {
                return Err(invalid(format!("function unit '{}' has zero slots", fu.name)));
            }
            let id = UnitId(i as u32);
            for (opcode, &latency) in &fu.operations {
                if latency == 0 {
                    return Err(invalid(format!(
                        "operation '{}' on unit '{}' has zero latency",
                        opcode, fu.name
                    )));
                }
                units_by_opcode.entry(opcode.clone()).or_default().push(id);
            }
            units.push(FunctionUnit {
                id,
                name: fu.name.clone(),
                slots: fu.slots,
                latencies: fu.operations.clone(),
            });
        }

        let mut register_files = Vec::with_capacity(desc.register_files.len());
        for (i, rf) in desc.register_files.iter().enumerate() {
            if rf.prefix.is_empty() || rf.size == 0 {
                return Err(invalid(format!(
                    "register file '{}' needs a prefix and a non-zero size",
                    rf.name
                )));
            }
            if rf.read_ports == 0 || rf.write_ports == 0 {
                return Err(invalid(format!("register file '{}' has no ports", rf.name)));
            }
            register_files.push(RegisterFile {
                id: RegFileId(i as u32),
                name: rf.name.clone(),
                prefix: rf.prefix.clone(),
                size: rf.size,
                read_ports: rf.read_ports,
                write_ports: rf.write_ports,
            });
        }

        let mut buses = Vec::with_capacity(desc.buses.len());
        for (i, bus) in desc.buses.iter().enumerate() {
            let reach = if bus.connects.is_empty() {
                None
            } else {
                let mut reach = Vec::with_capacity(bus.connects.len());
                for name in &bus.connects {
                    let endpoint = units
                        .iter()
                        .find(|u| &u.name == name)
                        .map(|u| Endpoint::Unit(u.id))
                        .or_else(|| {
                            register_files
                                .iter()
                                .find(|r| &r.name == name)
                                .map(|r| Endpoint::RegFile(r.id))
                        })
                        .ok_or_else(|| {
                            invalid(format!(
                                "bus '{}' connects unknown unit or register file '{}'",
                                bus.name, name
                            ))
                        })?;
                    reach.push(endpoint);
                }
                Some(reach)
            };
            buses.push(Bus {
                id: BusId(i as u32),
                name: bus.name.clone(),
                reach,
            });
        }

        Ok(ResourceModel {
            name: desc.name.clone(),
            issue_width: desc.issue_width,
            delay_slots: desc.delay_slots,
            units,
            buses,
            register_files,
            operations: desc.operations.clone(),
            units_by_opcode,
        })
    }

    pub fn units(&self) -> &[FunctionUnit] {
        &self.units
    }

    pub fn unit(&self, id: UnitId) -> &FunctionUnit {
        &self.units[id.index()]
    }

    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    pub fn register_files(&self) -> &[RegisterFile] {
        &self.register_files
    }

    pub fn register_file(&self, id: RegFileId) -> &RegisterFile {
        &self.register_files[id.index()]
    }

    /// Units implementing `opcode`, lowest index first.
    pub fn units_for(&self, opcode: &str) -> &[UnitId] {
        self.units_by_opcode
            .get(opcode)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Latency of `opcode` on a specific unit.
    pub fn unit_latency(&self, unit: UnitId, opcode: &str) -> Option<u32> {
        self.unit(unit).latencies.get(opcode).copied()
    }

    /// Declared latency of an opcode: the slowest implementing unit, so
    /// dependence edges hold whichever unit the scheduler picks.
    pub fn latency(&self, opcode: &str) -> Option<u32> {
        self.units_for(opcode)
            .iter()
            .filter_map(|&u| self.unit_latency(u, opcode))
            .max()
    }

    /// Fastest implementing unit's latency of an opcode.
    pub fn min_latency(&self, opcode: &str) -> Option<u32> {
        self.units_for(opcode)
            .iter()
            .filter_map(|&u| self.unit_latency(u, opcode))
            .min()
    }

    /// Operation semantics; opcodes without an entry are pure computations.
    pub fn operation_info(&self, opcode: &str) -> OperationInfo {
        self.operations.get(opcode).cloned().unwrap_or_default()
    }

    /// Map a register name (`r12`) to its register file.
    ///
    /// The longest matching prefix wins, so `vr3` lands in a `vr` file even
    /// when an `r` file exists.
    pub fn register_file_of(&self, reg: &str) -> Option<RegFileId> {
        self.register_files
            .iter()
            .filter(|rf| {
                reg.strip_prefix(rf.prefix.as_str())
                    .and_then(|idx| idx.parse::<u32>().ok())
                    .is_some_and(|idx| idx < rf.size)
            })
            .max_by_key(|rf| rf.prefix.len())
            .map(|rf| rf.id)
    }

    /// Total architectural registers across all files.
    pub fn total_registers(&self) -> usize {
        self.register_files.iter().map(|rf| rf.size as usize).sum()
    }
}

impl fmt::Display for ResourceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "machine '{}': issue width {}, {} delay slot(s)",
            self.name, self.issue_width, self.delay_slots
        )?;
        for u in &self.units {
            let ops: Vec<String> = u
                .latencies
                .iter()
                .map(|(op, lat)| format!("{op}/{lat}"))
                .collect();
            writeln!(f, "  unit {} x{}: {}", u.name, u.slots, ops.join(" "))?;
        }
        writeln!(f, "  buses: {}", self.buses.len())?;
        for rf in &self.register_files {
            writeln!(
                f,
                "  rf {} ({}0..{}{}) r{} w{}",
                rf.name,
                rf.prefix,
                rf.prefix,
                rf.size - 1,
                rf.read_ports,
                rf.write_ports
            )?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
