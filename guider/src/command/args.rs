//! Tokenizing and numeric checks for command arguments.

use crate::error::{CommandError, CommandResult};

/// Split a command line into whitespace-separated tokens.
///
/// Single or double quotes group text containing spaces and may appear
/// inside a token (`filename="a b"` yields `filename=a b`). The quotes
/// themselves are removed.
pub fn tokenize(line: &str) -> CommandResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(CommandError::UnbalancedQuotes);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse a finite float.
pub fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// True if `text` is an optionally signed run of decimal digits.
pub fn is_int(text: &str) -> bool {
    let digits = text.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Interpret an ON/OFF switch argument, case-insensitively.
pub fn parse_switch(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("on") {
        Some(true)
    } else if text.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

/// Split `key=value`, matching the key case-insensitively.
pub fn key_value<'a>(token: &'a str, key: &str) -> Option<&'a str> {
    let (k, v) = token.split_once('=')?;
    k.eq_ignore_ascii_case(key).then_some(v)
}
