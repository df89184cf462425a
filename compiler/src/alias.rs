// alias.rs — Memory alias oracles consulted by the dependence graph builder
//
// An oracle answers whether two memory operations may touch the same
// address. The builder only needs the three-valued answer; `yes` and
// `unknown` both produce a memory edge.
//
// Preconditions: both nodes passed to `may_alias` are memory operations.
// Postconditions: answers are pure functions of the two nodes.
// Failure modes: loading an alias fact file → `AliasFactsError`.
// Side effects: `WorkItemAliasFacts::load` reads one file.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::ddg::OpNode;
use crate::error::AliasFactsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasAnswer {
    Yes,
    No,
    Unknown,
}

/// Alias query interface. Implementations are shared across region workers.
pub trait AliasOracle: Send + Sync {
    fn name(&self) -> &'static str;
    fn may_alias(&self, a: &OpNode, b: &OpNode) -> AliasAnswer;
}

// ── Conservative ──

/// Knows nothing; every pair is `unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conservative;

impl AliasOracle for Conservative {
    fn name(&self) -> &'static str {
        "conservative"
    }

    fn may_alias(&self, _a: &OpNode, _b: &OpNode) -> AliasAnswer {
        AliasAnswer::Unknown
    }
}

// ── Address spaces ──

/// Operations in distinct, explicitly annotated address spaces never alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressSpaceAnalysis;

impl AliasOracle for AddressSpaceAnalysis {
    fn name(&self) -> &'static str {
        "address-space"
    }

    fn may_alias(&self, a: &OpNode, b: &OpNode) -> AliasAnswer {
        match (a.space, b.space) {
            (Some(x), Some(y)) if x != y => AliasAnswer::No,
            _ => AliasAnswer::Unknown,
        }
    }
}

// ── Work-item alias facts ──

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AliasFactsFile {
    #[serde(default)]
    no_alias: Vec<(String, String)>,
    #[serde(default)]
    may_alias: Vec<(String, String)>,
}

/// User-supplied facts over alias tags (`tag=...` on memory operations).
///
/// Facts are symmetric. A pair listed under both `no_alias` and `may_alias`
/// resolves to `yes`.
#[derive(Debug, Clone, Default)]
pub struct WorkItemAliasFacts {
    no_alias: HashSet<(String, String)>,
    may_alias: HashSet<(String, String)>,
}

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl WorkItemAliasFacts {
    pub fn load(path: &Path) -> Result<Self, AliasFactsError> {
        let text = std::fs::read_to_string(path).map_err(|source| AliasFactsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| AliasFactsError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let file: AliasFactsFile = serde_json::from_str(text)?;
        Ok(WorkItemAliasFacts {
            no_alias: file.no_alias.iter().map(|(a, b)| ordered(a, b)).collect(),
            may_alias: file.may_alias.iter().map(|(a, b)| ordered(a, b)).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.no_alias.len() + self.may_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AliasOracle for WorkItemAliasFacts {
    fn name(&self) -> &'static str {
        "work-item-facts"
    }

    fn may_alias(&self, a: &OpNode, b: &OpNode) -> AliasAnswer {
        let (Some(ta), Some(tb)) = (&a.tag, &b.tag) else {
            return AliasAnswer::Unknown;
        };
        let key = ordered(ta, tb);
        if self.may_alias.contains(&key) {
            AliasAnswer::Yes
        } else if self.no_alias.contains(&key) {
            AliasAnswer::No
        } else {
            AliasAnswer::Unknown
        }
    }
}

// ── Chain ──

/// Asks each oracle in order; the first definitive answer wins.
#[derive(Default)]
pub struct OracleChain {
    oracles: Vec<Box<dyn AliasOracle>>,
}

impl OracleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, oracle: impl AliasOracle + 'static) -> Self {
        self.oracles.push(Box::new(oracle));
        self
    }

    pub fn push(&mut self, oracle: Box<dyn AliasOracle>) {
        self.oracles.push(oracle);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.oracles.iter().map(|o| o.name()).collect()
    }
}

impl AliasOracle for OracleChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn may_alias(&self, a: &OpNode, b: &OpNode) -> AliasAnswer {
        for oracle in &self.oracles {
            match oracle.may_alias(a, b) {
                AliasAnswer::Unknown => continue,
                definitive => {
                    log::trace!(
                        "alias {} vs {}: {:?} from {}",
                        a.id,
                        b.id,
                        definitive,
                        oracle.name()
                    );
                    return definitive;
                }
            }
        }
        AliasAnswer::Unknown
    }
}

impl std::fmt::Debug for OracleChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
