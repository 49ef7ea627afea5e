//! Static extraction of party, input and output declarations from program source.
//!
//! The source is never executed. A small scanner turns it into tokens (skipping
//! `#` comments and keeping string literals opaque), then one pass over the
//! tokens recognises three call shapes:
//!
//! * `symbol = Party(name="Name")`
//! * `Type(Input(name="name", party=symbol))`
//! * `Output(expr, "name", symbol)`
//!
//! References are resolved after the pass, so a party may be declared after
//! the inputs that use it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{PartySymbol, ProgramId},
    protocol::InputDecl,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyDecl {
    pub party_name: String,
    pub inputs: Vec<InputDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Declared parties in declaration order.
pub type PartyTable = IndexMap<PartySymbol, PartyDecl>;

/// Party table frozen against an uploaded program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramDescriptor {
    pub program_id: ProgramId,
    pub parties: PartyTable,
}

impl ProgramDescriptor {
    pub fn new(program_id: ProgramId, parties: PartyTable) -> Self {
        Self {
            program_id,
            parties,
        }
    }

    pub fn party(&self, symbol: &PartySymbol) -> Option<&PartyDecl> {
        self.parties.get(symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },
    #[error("line {line}: `{symbol}` is not a declared party")]
    UndeclaredParty { symbol: String, line: usize },
    #[error("line {line}: party `{symbol}` is declared twice")]
    DuplicateParty { symbol: String, line: usize },
    #[error("line {line}: malformed {call} declaration")]
    Malformed { call: &'static str, line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number,
    Punct(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    line: usize,
}

impl Token {
    fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name.as_str()),
            _ => None,
        }
    }

    fn is_ident(&self, expected: &str) -> bool {
        self.ident() == Some(expected)
    }

    fn is_punct(&self, expected: char) -> bool {
        self.kind == TokenKind::Punct(expected)
    }
}

fn is_string_prefix(ident: &str) -> bool {
    matches!(
        ident.to_ascii_lowercase().as_str(),
        "r" | "b" | "u" | "f" | "rb" | "br" | "fr" | "rf"
    )
}

fn scan(source: &str) -> Result<Vec<Token>, ExtractError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '"' || c == '\'' {
            let (literal, next, lines) = scan_string(&chars, i, false, line)?;
            tokens.push(Token {
                kind: TokenKind::Str(literal),
                line,
            });
            line += lines;
            i = next;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') && is_string_prefix(&ident)
            {
                let raw = ident.to_ascii_lowercase().contains('r');
                let (literal, next, lines) = scan_string(&chars, i, raw, line)?;
                tokens.push(Token {
                    kind: TokenKind::Str(literal),
                    line,
                });
                line += lines;
                i = next;
            } else {
                tokens.push(Token {
                    kind: TokenKind::Ident(ident),
                    line,
                });
            }
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                line,
            });
        } else {
            tokens.push(Token {
                kind: TokenKind::Punct(c),
                line,
            });
            i += 1;
        }
    }

    Ok(tokens)
}

/// Returns the literal body, the index after the closing quote and the number
/// of newlines consumed.
fn scan_string(
    chars: &[char],
    start: usize,
    raw: bool,
    line: usize,
) -> Result<(String, usize, usize), ExtractError> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut body = String::new();
    let mut newlines = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && !raw {
            if let Some(&escaped) = chars.get(i + 1) {
                if escaped == '\n' {
                    newlines += 1;
                }
                body.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            if !triple {
                return Ok((body, i + 1, newlines));
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((body, i + 3, newlines));
            }
        }
        if c == '\n' {
            if !triple {
                break;
            }
            newlines += 1;
        }
        body.push(c);
        i += 1;
    }

    Err(ExtractError::UnterminatedString { line })
}

/// Top-level arguments of the call whose `(` sits at `open`, plus the index of
/// the matching `)`.
fn call_args(tokens: &[Token], open: usize) -> Option<(Vec<&[Token]>, usize)> {
    let mut depth = 0usize;
    let mut args = Vec::new();
    let mut arg_start = open + 1;

    for (offset, token) in tokens[open..].iter().enumerate() {
        let idx = open + offset;
        match token.kind {
            TokenKind::Punct('(') | TokenKind::Punct('[') | TokenKind::Punct('{') => depth += 1,
            TokenKind::Punct(')') | TokenKind::Punct(']') | TokenKind::Punct('}') => {
                depth -= 1;
                if depth == 0 {
                    if arg_start < idx {
                        args.push(&tokens[arg_start..idx]);
                    }
                    return Some((args, idx));
                }
            }
            TokenKind::Punct(',') if depth == 1 => {
                args.push(&tokens[arg_start..idx]);
                arg_start = idx + 1;
            }
            _ => {}
        }
    }
    None
}

fn keyword<'a>(args: &[&'a [Token]], name: &str) -> Option<&'a [Token]> {
    args.iter().copied().find_map(|arg| match arg {
        [key, eq, value @ ..] if key.is_ident(name) && eq.is_punct('=') => Some(value),
        _ => None,
    })
}

fn single_str(tokens: &[Token]) -> Option<&str> {
    match tokens {
        [Token {
            kind: TokenKind::Str(value),
            ..
        }] => Some(value.as_str()),
        _ => None,
    }
}

fn single_ident(tokens: &[Token]) -> Option<&str> {
    match tokens {
        [token] => token.ident(),
        _ => None,
    }
}

struct PendingRef<T> {
    symbol: PartySymbol,
    line: usize,
    value: T,
}

fn resolve<'a>(
    parties: &'a mut PartyTable,
    symbol: &PartySymbol,
    line: usize,
) -> Result<&'a mut PartyDecl, ExtractError> {
    parties
        .get_mut(symbol)
        .ok_or_else(|| ExtractError::UndeclaredParty {
            symbol: symbol.to_string(),
            line,
        })
}

/// Extracts the party table of a program.
pub fn extract(source: &str) -> Result<PartyTable, ExtractError> {
    let tokens = scan(source)?;
    let mut parties = PartyTable::new();
    let mut inputs: Vec<PendingRef<InputDecl>> = Vec::new();
    let mut outputs: Vec<PendingRef<String>> = Vec::new();

    let mut i = 0usize;
    while i < tokens.len() {
        let token = &tokens[i];
        let line = token.line;
        let after_dot = i > 0 && tokens[i - 1].is_punct('.');

        // symbol = Party(name="Name")
        if let (Some(symbol), false) = (token.ident(), after_dot) {
            if tokens.get(i + 1).is_some_and(|t| t.is_punct('='))
                && tokens.get(i + 2).is_some_and(|t| t.is_ident("Party"))
                && tokens.get(i + 3).is_some_and(|t| t.is_punct('('))
            {
                let (args, close) =
                    call_args(&tokens, i + 3).ok_or(ExtractError::Malformed { call: "Party", line })?;
                let name = keyword(&args, "name")
                    .or_else(|| args.first().copied())
                    .and_then(single_str)
                    .ok_or(ExtractError::Malformed { call: "Party", line })?;
                let key = PartySymbol::from(symbol);
                if parties.contains_key(&key) {
                    return Err(ExtractError::DuplicateParty {
                        symbol: symbol.to_string(),
                        line,
                    });
                }
                parties.insert(
                    key,
                    PartyDecl {
                        party_name: name.to_string(),
                        inputs: Vec::new(),
                        output_name: None,
                    },
                );
                i = close + 1;
                continue;
            }
        }

        // Type(Input(name="name", party=symbol))
        if let (Some(ty), false) = (token.ident(), after_dot) {
            if tokens.get(i + 1).is_some_and(|t| t.is_punct('('))
                && tokens.get(i + 2).is_some_and(|t| t.is_ident("Input"))
                && tokens.get(i + 3).is_some_and(|t| t.is_punct('('))
            {
                let (args, close) =
                    call_args(&tokens, i + 3).ok_or(ExtractError::Malformed { call: "Input", line })?;
                let name = keyword(&args, "name")
                    .and_then(single_str)
                    .ok_or(ExtractError::Malformed { call: "Input", line })?;
                let party = keyword(&args, "party")
                    .and_then(single_ident)
                    .ok_or(ExtractError::Malformed { call: "Input", line })?;
                inputs.push(PendingRef {
                    symbol: PartySymbol::from(party),
                    line,
                    value: InputDecl {
                        ty: ty.to_string(),
                        name: name.to_string(),
                    },
                });
                i = close + 1;
                continue;
            }
        }

        // Output(expr, "name", symbol)
        if token.is_ident("Output") && !after_dot && tokens.get(i + 1).is_some_and(|t| t.is_punct('('))
        {
            let (args, close) =
                call_args(&tokens, i + 1).ok_or(ExtractError::Malformed { call: "Output", line })?;
            let [_, name, party] = args.as_slice() else {
                return Err(ExtractError::Malformed { call: "Output", line });
            };
            let name = single_str(name).ok_or(ExtractError::Malformed { call: "Output", line })?;
            let party = single_ident(party).ok_or(ExtractError::Malformed { call: "Output", line })?;
            outputs.push(PendingRef {
                symbol: PartySymbol::from(party),
                line,
                value: name.to_string(),
            });
            i = close + 1;
            continue;
        }

        i += 1;
    }

    for input in inputs {
        let party = resolve(&mut parties, &input.symbol, input.line)?;
        party.inputs.push(input.value);
    }
    for output in outputs {
        let party = resolve(&mut parties, &output.symbol, output.line)?;
        party.output_name = Some(output.value);
    }

    Ok(parties)
}

#[cfg(test)]
#[path = "tests/extractor_tests.rs"]
mod tests;
