// AST node types for region IR (`.tir`) files.
//
// A program is a list of scheduling regions; a region is a header (name,
// live-in and live-out registers) followed by one operation per line.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete region IR file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub regions: Vec<Region>,
    pub span: Span,
}

// ── Regions ──

/// `region <name> in(<regs>) out(<regs>) { <ops> }`
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: Ident,
    /// Registers defined outside the region and read inside it.
    pub live_in: Vec<Ident>,
    /// Registers whose final in-region value is read after the region.
    pub live_out: Vec<Ident>,
    pub ops: Vec<OpStmt>,
    pub span: Span,
}

// ── Operations ──

/// `<dests> = <opcode> <operands> [<attrs>]`, where `<dests> =` is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct OpStmt {
    pub dests: Vec<Ident>,
    pub opcode: Ident,
    pub operands: Vec<OperandExpr>,
    pub attrs: Vec<Attr>,
    pub span: Span,
}

/// A source operand.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandExpr {
    /// Register read.
    Reg(Ident),
    /// `&reg`: register both read and written by the operation.
    InOut(Ident),
    /// Integer immediate.
    Imm(i64, Span),
}

/// `key` or `key=value` inside the trailing `[...]` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: Ident,
    pub value: Option<AttrValue>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Ident(Ident),
    Number(i64, Span),
}

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl OpStmt {
    /// Look up an attribute by key.
    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.key.name == key)
    }

    /// True when the bare flag `key` (or `key=...`) is present.
    pub fn has_flag(&self, key: &str) -> bool {
        self.attr(key).is_some()
    }
}
