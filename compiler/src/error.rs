// error.rs — Error taxonomy for region scheduling and the plugin cache
//
// Region-level errors (`SchedError`) are isolated per region by the pipeline;
// cache errors (`CacheError`) are shared by every requester of a fingerprint.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Where in a region a malformed input was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpLocation {
    /// A specific operation: program-order index and opcode.
    Op { index: u32, opcode: String },
    /// The region header (live-in / live-out declarations).
    Header,
}

impl fmt::Display for OpLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpLocation::Op { index, opcode } => write!(f, "operation #{} ({})", index, opcode),
            OpLocation::Header => write!(f, "region header"),
        }
    }
}

/// Errors raised while building or scheduling one region.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    #[error("malformed region '{region}' at {at}: {reason}")]
    MalformedRegion {
        region: String,
        at: OpLocation,
        reason: String,
    },

    #[error("cyclic dependence in region '{region}' through operations {nodes:?}")]
    CyclicDependence { region: String, nodes: Vec<u32> },

    #[error("region '{region}' is unschedulable: {reason}")]
    UnschedulableRegion { region: String, reason: String },
}

impl SchedError {
    pub fn region(&self) -> &str {
        match self {
            SchedError::MalformedRegion { region, .. }
            | SchedError::CyclicDependence { region, .. }
            | SchedError::UnschedulableRegion { region, .. } => region,
        }
    }
}

/// Result type alias for region operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors raised by the backend plugin cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("backend plugin build failed for {fingerprint}: {reason}")]
    BuildFailure { fingerprint: String, reason: String },

    #[error("backend cache I/O error at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::CacheIo {
            path: path.into(),
            source,
        }
    }
}

// Waiters on an in-flight build all receive the builder's error.
impl Clone for CacheError {
    fn clone(&self) -> Self {
        match self {
            CacheError::BuildFailure {
                fingerprint,
                reason,
            } => CacheError::BuildFailure {
                fingerprint: fingerprint.clone(),
                reason: reason.clone(),
            },
            CacheError::CacheIo { path, source } => CacheError::CacheIo {
                path: path.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
        }
    }
}

/// Errors raised while loading a processor description.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: invalid processor description: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid processor description '{machine}': {reason}")]
    Invalid { machine: String, reason: String },
}

/// Errors raised while loading a work-item alias fact file.
#[derive(Error, Debug)]
pub enum AliasFactsError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: invalid alias facts: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while reading a dependence graph dump.
#[derive(Error, Debug)]
pub enum DdgDumpError {
    #[error("invalid dependence graph dump: {0}")]
    Json(#[from] serde_json::Error),

    #[error("inconsistent dependence graph dump for region '{region}': {reason}")]
    Inconsistent { region: String, reason: String },
}
