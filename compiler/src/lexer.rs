// Lexer for region IR (`.tir`) source files.
//
// Uses the `logos` crate for DFA-based lexing. Newlines are significant:
// they terminate operation lines.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Region IR token types.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("region")]
    Region,
    #[token("in")]
    In,
    #[token("out")]
    Out,

    // ── Symbols ──
    #[token("=")]
    Equals,
    #[token(",")]
    Comma,
    #[token("&")]
    Amp,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // ── Literals ──
    /// Integer immediate (decimal, optionally negative).
    #[regex(r"-?[0-9]+", parse_int)]
    Number(i64),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_.][a-zA-Z0-9_.]*` (opcodes may contain dots, e.g. `add.i32`).
    #[regex(r"[a-zA-Z_.][a-zA-Z0-9_.]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (operation terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Region => write!(f, "region"),
            Token::In => write!(f, "in"),
            Token::Out => write!(f, "out"),
            Token::Equals => write!(f, "="),
            Token::Comma => write!(f, ","),
            Token::Amp => write!(f, "&"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Number(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

/// Lex a region IR source string.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            lex_ok("region bb0 in out inside"),
            vec![
                Token::Region,
                Token::Ident,
                Token::In,
                Token::Out,
                Token::Ident
            ]
        );
    }

    #[test]
    fn operation_line() {
        assert_eq!(
            lex_ok("r1 = add &r2, -4 [safe]\n"),
            vec![
                Token::Ident,
                Token::Equals,
                Token::Ident,
                Token::Amp,
                Token::Ident,
                Token::Comma,
                Token::Number(-4),
                Token::LBracket,
                Token::Ident,
                Token::RBracket,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex_ok("# header\nbranch # trailing\n"),
            vec![Token::Newline, Token::Ident, Token::Newline]
        );
    }

    #[test]
    fn dotted_opcode_is_one_ident() {
        let result = lex("add.i32");
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 7 });
    }

    #[test]
    fn unknown_character_reports_error() {
        let result = lex("r1 = add r2 ; r3");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains(";"));
        // lexing continues past the error
        assert_eq!(result.tokens.last().map(|(t, _)| t.clone()), Some(Token::Ident));
    }
}
