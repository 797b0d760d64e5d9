use super::types::{Binding, Operand, Statement, StatementKind};
use crate::error::ParseError;

/// Identifier rule for variables, functions and parameters.
pub fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// A JSON literal, or failing that a variable name.
pub fn parse_operand(text: &str, line: u32) -> Result<Operand, ParseError> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(Operand::Literal(value));
    }
    if is_name(text) {
        return Ok(Operand::Name(text.to_string()));
    }
    Err(ParseError::InvalidOperand {
        line,
        text: text.to_string(),
    })
}

pub fn parse_statement(statement: &Statement) -> Result<StatementKind, ParseError> {
    let line = statement.location.line;
    let text = statement.text.as_str();
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };

    match keyword {
        "let" => parse_assignment(Binding::Let, "let", rest, line),
        "set" => parse_assignment(Binding::Set, "set", rest, line),
        "global" => parse_assignment(Binding::Global, "global", rest, line),
        "call" => {
            let (name, args) = parse_call(rest, line)?;
            Ok(StatementKind::Call { name, args })
        }
        "defer" => {
            let (name, args) = parse_call(rest, line)?;
            Ok(StatementKind::Defer { name, args })
        }
        "print" => Ok(StatementKind::Print(parse_operand(rest, line)?)),
        "function" => {
            let mut words = rest.split_whitespace();
            let name = words.next().unwrap_or_default();
            let name = checked_name(name, line)?;
            let params = words
                .map(|p| checked_name(p, line))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StatementKind::Function { name, params })
        }
        "end" if rest.is_empty() => Ok(StatementKind::End),
        _ => Err(ParseError::UnknownStatement {
            line,
            keyword: keyword.to_string(),
        }),
    }
}

fn parse_assignment(
    binding: Binding,
    statement: &'static str,
    rest: &str,
    line: u32,
) -> Result<StatementKind, ParseError> {
    let Some((name, value)) = rest.split_once('=') else {
        return Err(ParseError::MalformedAssignment { line, statement });
    };
    if value.trim().is_empty() {
        return Err(ParseError::MalformedAssignment { line, statement });
    }
    Ok(StatementKind::Assign {
        binding,
        name: checked_name(name.trim(), line)?,
        value: parse_operand(value, line)?,
    })
}

/// Split `NAME ARGS...` with shell quoting: the first token is the function,
/// the remaining tokens are operands.
fn parse_call(rest: &str, line: u32) -> Result<(String, Vec<Operand>), ParseError> {
    let mut lexer = shlex::Shlex::new(rest);
    let tokens: Vec<String> = lexer.by_ref().collect();
    if lexer.had_error {
        return Err(ParseError::UnbalancedQuotes { line });
    }
    let mut tokens = tokens.into_iter();
    let name = checked_name(&tokens.next().unwrap_or_default(), line)?;
    let args = tokens
        .map(|token| parse_operand(&token, line))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name, args))
}

fn checked_name(name: &str, line: u32) -> Result<String, ParseError> {
    if is_name(name) {
        Ok(name.to_string())
    } else {
        Err(ParseError::InvalidName {
            line,
            name: name.to_string(),
        })
    }
}
