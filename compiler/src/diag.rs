// diag.rs — Unified diagnostics model
//
// Shared diagnostic type reported by every pass. Region-level failures are
// turned into diagnostics so that one bad region never hides the results of
// the others.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;
use crate::error::{CacheError, SchedError};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0200`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E00xx: region IR front-end
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0002: DiagCode = DiagCode("E0002"); // duplicate region name

    // E01xx: region scheduling
    pub const E0100: DiagCode = DiagCode("E0100"); // malformed region
    pub const E0101: DiagCode = DiagCode("E0101"); // cyclic dependence
    pub const E0102: DiagCode = DiagCode("E0102"); // unschedulable region
    pub const E0103: DiagCode = DiagCode("E0103"); // schedule verification failed

    // E02xx: backend plugin cache
    pub const E0200: DiagCode = DiagCode("E0200"); // plugin build failure
    pub const E0201: DiagCode = DiagCode("E0201"); // cache I/O error

    // E03xx: inputs and outputs
    pub const E0300: DiagCode = DiagCode("E0300"); // processor description unusable
    pub const E0301: DiagCode = DiagCode("E0301"); // alias facts unusable
    pub const E0302: DiagCode = DiagCode("E0302"); // file read/write failed

    // W02xx: backend plugin cache warnings
    pub const W0200: DiagCode = DiagCode("W0200"); // fell back to ephemeral plugin
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Region the diagnostic belongs to, if any.
    pub region: Option<String>,
    /// Source range in the region IR, when known.
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, location, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            region: None,
            span: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the owning region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Attach a source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl From<&SchedError> for Diagnostic {
    fn from(err: &SchedError) -> Self {
        let code = match err {
            SchedError::MalformedRegion { .. } => codes::E0100,
            SchedError::CyclicDependence { .. } => codes::E0101,
            SchedError::UnschedulableRegion { .. } => codes::E0102,
        };
        let d = Diagnostic::new(DiagLevel::Error, err.to_string())
            .with_code(code)
            .with_region(err.region());
        match err {
            SchedError::MalformedRegion { reason, .. } if reason.contains("read before") => d
                .with_hint("declare externally defined registers with `in(...)` on the region header"),
            _ => d,
        }
    }
}

impl From<&CacheError> for Diagnostic {
    fn from(err: &CacheError) -> Self {
        let code = match err {
            CacheError::BuildFailure { .. } => codes::E0200,
            CacheError::CacheIo { .. } => codes::E0201,
        };
        let mut d = Diagnostic::new(DiagLevel::Error, err.to_string()).with_code(code);
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            d = d.with_cause(cause.to_string());
            source = std::error::Error::source(cause);
        }
        d
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
