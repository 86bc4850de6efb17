// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Parser for OpenSBP part programs.
//!
//! The language is line-oriented, so parsing works one line at a time.
//! Most production lines are plain `MN,1,2,...` commands; those take a fast
//! path through a single regular expression.  Everything else goes through
//! the pest grammar in `sbp.pest`, after the dialect's lexical quirks have
//! been normalized away:
//!
//! - whitespace after a mnemonic stands in for the first comma (`MX 10`),
//!   except after `IF`;
//! - `'` starts a comment;
//! - `&name = free text` assigns the raw text when the right-hand side is
//!   not an expression.
//!
//! The fast path and the grammar are required to agree on every line both
//! accept; the tests at the bottom of this module check that.

use std::fmt;
use fancy_regex::Regex;
use itertools::Itertools;
use pest::{Parser, iterators::Pair};
use pest_derive::Parser;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "sbp.pest"]
struct SbpParser;

/// A syntax failure, with the 1-based source line it occurred on.
#[derive(Debug)]
pub struct ParseError {
    pub lineno: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "parse error in line {}: {}", self.lineno, self.message)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

struct Patterns {
    /// `MN,1,2.5,,-3` lines that can skip the grammar entirely.
    fast: Regex,
    /// Whitespace standing in for the first comma after a mnemonic.
    sep: Regex,
    /// Fallback for the raw-text assignment idiom.
    raw_assign: Regex,
}

impl Patterns {
    fn new() -> Patterns {
        Patterns {
            fast: Regex::new(r"^\s*(\w\w)(((\s*,\s*)([+-]?[0-9]+(\.[0-9]+)?)?)+)\s*$")
                .expect("valid pattern"),
            sep: Regex::new(r"^\s*(\w\w)[ \t]+(?=\S)").expect("valid pattern"),
            raw_assign: Regex::new(r"^\s*&(\w+)\s*=\s*(.*?)\s*$").expect("valid pattern"),
        }
    }
}

/// Parse a whole program.
///
/// Blank and comment lines are kept as `Statement::Comment`, so statement
/// indices and 1-based source line numbers stay in lockstep.
pub fn parse(filename: &str, input: &str) -> ParseResult<Program> {
    let pats = Patterns::new();
    let mut prog = Program { filename: filename.into(), lines: vec![] };
    for (i, raw) in input.lines().enumerate() {
        let lineno = i + 1;
        let stmt = parse_line(&pats, raw).map_err(|message| ParseError { lineno, message })?;
        prog.lines.push(Line { lineno, stmt });
    }
    Ok(prog)
}

fn parse_line(pats: &Patterns, raw: &str) -> Result<Statement, String> {
    let mut text = raw.trim();
    if text.is_empty() {
        return Ok(Statement::Comment(String::new()));
    }
    if let Some(rest) = text.strip_prefix('\'') {
        return Ok(Statement::Comment(rest.trim().into()));
    }
    if let Some(i) = text.find('\'') {
        text = text[..i].trim_end();
    }
    let text = normalize_seps(pats, text);
    if let Some(stmt) = parse_fast(pats, &text) {
        return Ok(stmt);
    }
    parse_grammar(pats, &text)
}

/// Insert the comma the legacy dialect lets a space or tab stand in for.
fn normalize_seps(pats: &Patterns, text: &str) -> String {
    if let Ok(Some(caps)) = pats.sep.captures(text) {
        let mnemonic = caps.get(1).expect("group");
        if !mnemonic.as_str().eq_ignore_ascii_case("IF") {
            let ws_end = caps.get(0).expect("group").end();
            return format!("{},{}", &text[..mnemonic.end()], &text[ws_end..]);
        }
    }
    text.to_string()
}

fn parse_fast(pats: &Patterns, text: &str) -> Option<Statement> {
    let caps = match pats.fast.captures(text) {
        Ok(Some(caps)) => caps,
        _ => return None,
    };
    let mnemonic = caps.get(1).expect("group").as_str().to_ascii_uppercase();
    if mnemonic == "IF" {
        return None;
    }
    // The argument blob starts with the first comma, so the split's leading
    // field is the empty string before it.
    let args = caps.get(2).expect("group").as_str()
        .split(',')
        .skip(1)
        .map(|field| {
            let field = field.trim();
            (!field.is_empty()).then(|| Expr::Num(field.parse().expect("number by regex")))
        })
        .collect();
    Some(Statement::Cmd { mnemonic, args })
}

fn parse_grammar(pats: &Patterns, text: &str) -> Result<Statement, String> {
    let mut pairs = match SbpParser::parse(Rule::line, text) {
        Ok(pairs) => pairs,
        Err(err) => {
            if let Ok(Some(caps)) = pats.raw_assign.captures(text) {
                return Ok(Statement::Assign {
                    name: caps.get(1).expect("group").as_str().into(),
                    expr: Expr::Text(caps.get(2).expect("group").as_str().into()),
                });
            }
            return Err(err.to_string());
        }
    };
    for pair in pairs.next().expect("line").into_inner() {
        if pair.as_rule() != Rule::EOI {
            return make_stmt(pair);
        }
    }
    Ok(Statement::Comment(String::new()))
}

fn make_stmt(pair: Pair<Rule>) -> Result<Statement, String> {
    Ok(match pair.as_rule() {
        Rule::if_stmt => {
            let (test, then) = pair.into_inner().collect_tuple().expect("children");
            Statement::If { test: make_expr(test)?, then: Box::new(make_stmt(then)?) }
        }
        Rule::goto_stmt => Statement::Goto(first_name(pair)),
        Rule::gosub_stmt => Statement::Gosub(first_name(pair)),
        Rule::return_stmt => Statement::Return,
        Rule::end_stmt => Statement::End,
        Rule::pause_stmt => Statement::Pause(pair.into_inner().next().map(make_expr).transpose()?),
        Rule::assign => {
            let (var, value) = pair.into_inner().collect_tuple().expect("children");
            Statement::Assign { name: var.as_str()[1..].into(), expr: make_expr(value)? }
        }
        Rule::label => Statement::Label(first_name(pair)),
        Rule::cmd => {
            let mut inner = pair.into_inner();
            let mnemonic = inner.next().expect("mnemonic").as_str().to_ascii_uppercase();
            let mut args: Vec<Option<Expr>> = vec![];
            for p in inner {
                if p.as_rule() == Rule::argsep {
                    args.push(None);
                } else {
                    *args.last_mut().expect("separator before argument") = Some(make_expr(p)?);
                }
            }
            Statement::Cmd { mnemonic, args }
        }
        _ => unreachable!(),
    })
}

fn first_name(pair: Pair<Rule>) -> String {
    pair.into_inner().next().expect("name").as_str().to_string()
}

fn make_expr(pair: Pair<Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::num => Ok(Expr::Num(pair.as_str().parse().expect("number by grammar"))),
        Rule::uservar => Ok(Expr::UserVar(pair.as_str()[1..].into())),
        Rule::sysvar => {
            let sel = pair.into_inner().next().expect("selector");
            Ok(Expr::SysVar(Box::new(make_expr(sel)?)))
        }
        Rule::token => Ok(Expr::Text(pair.as_str().into())),
        // left-associative binop chains: cmp, sum, product
        _ => {
            let mut lhs = None;
            let mut op = None;
            for pair in pair.into_inner() {
                match pair.as_rule() {
                    Rule::cmp_op => op = Some(match pair.as_str() {
                        "<=" => Op::Le, ">=" => Op::Ge, "!=" => Op::Ne,
                        "<" => Op::Lt, ">" => Op::Gt, _ => Op::Eq,
                    }),
                    Rule::sum_op => op = Some(match pair.as_str() {
                        "+" => Op::Add, _ => Op::Sub,
                    }),
                    Rule::mul_op => op = Some(match pair.as_str() {
                        "*" => Op::Mul, _ => Op::Div,
                    }),
                    _ => {
                        let rhs = make_expr(pair)?;
                        lhs = Some(match (lhs.take(), op.take()) {
                            (Some(l), Some(o)) => Expr::Op(o, Box::new(l), Box::new(rhs)),
                            (None, None) => rhs,
                            _ => unreachable!(),
                        });
                    }
                }
            }
            Ok(lhs.expect("no children in expr?"))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast(text: &str) -> Option<Statement> {
        parse_fast(&Patterns::new(), text)
    }

    fn grammar(text: &str) -> Statement {
        parse_grammar(&Patterns::new(), text).unwrap()
    }

    #[test]
    fn fast_path_agrees_with_grammar() {
        for line in ["MX,10", "M2,1,2", "JZ,-0.5", "M2,,3.25", "CG,,1,1,0,1", "MX,", "mx , 7"] {
            assert_eq!(fast(line).expect(line), grammar(line), "line: {}", line);
        }
    }

    #[test]
    fn fast_path_rejects_what_it_cannot_represent() {
        assert!(fast("CG,,1,1,0,1,T,1").is_none());
        assert!(fast("MX,&a").is_none());
        assert!(fast("MX,1+2").is_none());
        assert!(fast("GOTO top").is_none());
    }

    proptest! {
        #[test]
        fn fast_path_equivalence(
            mnemonic in "[A-Z][A-Z0-9]",
            args in prop::collection::vec(prop::option::of((-10000..10000i32, 0..100u8)), 1..8),
        ) {
            prop_assume!(mnemonic != "IF");
            let mut line = mnemonic;
            for arg in &args {
                match arg {
                    Some((whole, frac)) => line.push_str(&format!(",{}.{:02}", whole, frac)),
                    None => line.push(','),
                }
            }
            let from_fast = fast(&line).expect("fast path must accept this line");
            prop_assert_eq!(from_fast, grammar(&line));
        }
    }
}
