// Parser for region IR (`.tir`) source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
//   program  := nl (region (nl+ region)*)? nl
//   region   := 'region' IDENT ('in' regs)? ('out' regs)? '{' nl (op (nl+ op)*)? nl '}'
//   regs     := '(' (IDENT (',' IDENT)*)? ')'
//   op       := (IDENT (',' IDENT)* '=')? IDENT (operand (',' operand)*)? attrs?
//   operand  := '&' IDENT | IDENT | NUMBER
//   attrs    := '[' attr (',' attr)* ']'
//   attr     := IDENT ('=' (IDENT | NUMBER))?
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a region IR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Register lists: '(' regs ')' ──

    let reg_list = ident
        .clone()
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    // ── Operand ──

    let operand = {
        let inout = just(Token::Amp)
            .ignore_then(ident.clone())
            .map(OperandExpr::InOut);
        let reg = ident.clone().map(OperandExpr::Reg);
        let imm = select! {
            Token::Number(n) = e => OperandExpr::Imm(n, e.span()),
        };
        inout.or(reg).or(imm)
    };

    // ── Attributes ──

    let attr_value = ident
        .clone()
        .map(AttrValue::Ident)
        .or(select! {
            Token::Number(n) = e => AttrValue::Number(n, e.span()),
        });

    let attr = ident
        .clone()
        .then(just(Token::Equals).ignore_then(attr_value).or_not())
        .map_with(|(key, value), e| Attr {
            key,
            value,
            span: e.span(),
        });

    let attrs = attr
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    // ── Operation line ──
    //
    // The destination list is tried first; `or_not` rewinds when no `=`
    // follows, so `store r2, r0` parses as opcode + operands.

    let dests = ident
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .then_ignore(just(Token::Equals));

    let op_stmt = dests
        .or_not()
        .then(ident.clone())
        .then(
            operand
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>(),
        )
        .then(attrs.or_not())
        .map_with(|(((dests, opcode), operands), attrs), e| OpStmt {
            dests: dests.unwrap_or_default(),
            opcode,
            operands,
            attrs: attrs.unwrap_or_default(),
            span: e.span(),
        });

    // ── Region body: newline-separated operations ──

    let region_body = nl
        .clone()
        .ignore_then(
            op_stmt
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    // ── Region ──

    let region = just(Token::Region)
        .ignore_then(ident.clone())
        .then(just(Token::In).ignore_then(reg_list.clone()).or_not())
        .then(just(Token::Out).ignore_then(reg_list).or_not())
        .then(region_body.delimited_by(just(Token::LBrace), just(Token::RBrace)))
        .map_with(|(((name, live_in), live_out), ops), e| Region {
            name,
            live_in: live_in.unwrap_or_default(),
            live_out: live_out.unwrap_or_default(),
            ops,
            span: e.span(),
        });

    // ── Program ──

    nl.clone()
        .ignore_then(
            region
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(move |regions, e| Program {
            regions,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.program.expect("expected program")
    }

    fn parse_one_region(source: &str) -> Region {
        let prog = parse_ok(source);
        assert_eq!(prog.regions.len(), 1, "expected 1 region");
        prog.regions.into_iter().next().unwrap()
    }

    #[test]
    fn empty_program() {
        assert!(parse_ok("").regions.is_empty());
        assert!(parse_ok("\n\n# only a comment\n").regions.is_empty());
    }

    #[test]
    fn empty_region() {
        let r = parse_one_region("region bb0 {\n}");
        assert_eq!(r.name.name, "bb0");
        assert!(r.ops.is_empty());
        assert!(r.live_in.is_empty());
    }

    #[test]
    fn header_live_in_and_out() {
        let r = parse_one_region("region entry in(r0, r1) out(r2) {\n r2 = add r0, r1\n}\n");
        let ins: Vec<_> = r.live_in.iter().map(|i| i.name.as_str()).collect();
        let outs: Vec<_> = r.live_out.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(ins, vec!["r0", "r1"]);
        assert_eq!(outs, vec!["r2"]);
    }

    #[test]
    fn load_add_store_branch() {
        let r = parse_one_region(
            "region bb0 in(r0) {\n\
             \x20   r1 = load r0\n\
             \x20   r2 = add r1, r1\n\
             \x20   store r2, r0\n\
             \x20   branch\n\
             }\n",
        );
        assert_eq!(r.ops.len(), 4);

        assert_eq!(r.ops[0].dests.len(), 1);
        assert_eq!(r.ops[0].dests[0].name, "r1");
        assert_eq!(r.ops[0].opcode.name, "load");

        assert_eq!(r.ops[2].opcode.name, "store");
        assert!(r.ops[2].dests.is_empty());
        assert_eq!(r.ops[2].operands.len(), 2);

        assert_eq!(r.ops[3].opcode.name, "branch");
        assert!(r.ops[3].operands.is_empty());
    }

    #[test]
    fn inout_and_immediate_operands() {
        let r = parse_one_region("region b {\n r3 = addc &r4, -12\n}");
        let op = &r.ops[0];
        match &op.operands[0] {
            OperandExpr::InOut(id) => assert_eq!(id.name, "r4"),
            other => panic!("expected in/out operand, got {other:?}"),
        }
        match &op.operands[1] {
            OperandExpr::Imm(v, _) => assert_eq!(*v, -12),
            other => panic!("expected immediate, got {other:?}"),
        }
    }

    #[test]
    fn attributes() {
        let r = parse_one_region("region b in(r0) {\n r1 = load r0 [space=2, tag=buf, safe]\n}");
        let op = &r.ops[0];
        assert_eq!(op.attrs.len(), 3);
        assert!(op.has_flag("safe"));
        match &op.attr("space").and_then(|a| a.value.clone()) {
            Some(AttrValue::Number(2, _)) => {}
            other => panic!("unexpected space attr: {other:?}"),
        }
        match &op.attr("tag").and_then(|a| a.value.clone()) {
            Some(AttrValue::Ident(id)) => assert_eq!(id.name, "buf"),
            other => panic!("unexpected tag attr: {other:?}"),
        }
    }

    #[test]
    fn multiple_destinations() {
        let r = parse_one_region("region b in(r0) {\n r1, r2 = divmod r0, 3\n}");
        assert_eq!(r.ops[0].dests.len(), 2);
        assert_eq!(r.ops[0].dests[1].name, "r2");
    }

    #[test]
    fn multiple_regions() {
        let prog = parse_ok("region a {\n nop\n}\n\nregion b {\n nop\n}\n");
        assert_eq!(prog.regions.len(), 2);
        assert_eq!(prog.regions[1].name.name, "b");
    }

    #[test]
    fn missing_brace_is_error() {
        let result = parse("region a {\n nop\n");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_error_is_reported() {
        let result = parse("region a {\n r1 = add r0 ; oops\n}");
        assert!(!result.errors.is_empty());
    }
}
