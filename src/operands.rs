//! Operand parsing shared by every opcode handler.
//!
//! Handlers receive the raw operand text of their instruction and pick it
//! apart with the helpers here: register tokens (`v3`, `p0`), integer
//! literals (`-0x1f`, `42`), string literals, labels and `{...}` register
//! lists.
use std::fmt::Write;

use crate::error::{Result, RuntimeError};

/// A syntactic register reference, resolved against a frame later on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterToken {
    /// `vN`, register N of the frame.
    Local(usize),
    /// `pN`, parameter N, which lives in the trailing registers.
    Param(usize),
}

impl RegisterToken {
    /// Parses `token` as a register, returning `None` when it is not one.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.trim().chars();
        let kind = chars.next()?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number = digits.parse().ok()?;
        match kind {
            'v' => Some(Self::Local(number)),
            'p' => Some(Self::Param(number)),
            _ => None,
        }
    }

    /// Resolves the token to a register index for a frame with
    /// `register_count` registers, the last `parameter_count` of which are
    /// parameters. `None` when the arithmetic leaves `usize`.
    pub fn index(self, register_count: usize, parameter_count: usize) -> Option<usize> {
        match self {
            Self::Local(n) => Some(n),
            Self::Param(n) => register_count.checked_sub(parameter_count)?.checked_add(n),
        }
    }

    fn with_number(self, number: usize) -> Self {
        match self {
            Self::Local(_) => Self::Local(number),
            Self::Param(_) => Self::Param(number),
        }
    }

    fn number(self) -> usize {
        match self {
            Self::Local(n) | Self::Param(n) => n,
        }
    }
}

/// Parses a register token or fails with a malformed instruction.
pub fn parse_register(token: &str) -> Result<RegisterToken> {
    RegisterToken::parse(token)
        .ok_or_else(|| RuntimeError::malformed(format!("invalid register `{}`", token.trim())))
}

/// Parses a signed integer literal: optional sign, then decimal digits or
/// `0x` followed by hexadecimal digits.
pub fn parse_integer_literal(literal: &str) -> Result<i64> {
    let literal = literal.trim();
    let invalid = || RuntimeError::malformed(format!("invalid integer literal `{literal}`"));
    let (negative, unsigned) = match literal.as_bytes().first() {
        Some(b'-') => (true, &literal[1..]),
        Some(b'+') => (false, &literal[1..]),
        _ => (false, literal),
    };
    let (digits, radix) = match unsigned.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (unsigned, 10),
    };
    if digits.starts_with(['+', '-']) {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Parses an integer literal and narrows it to a 32-bit register value,
/// keeping the low 32 bits like a Java `(int)` cast.
pub fn parse_int(literal: &str) -> Result<i32> {
    parse_integer_literal(literal).map(|value| value as i32)
}

/// Parses a double-quoted string literal, undoing its escapes.
pub fn parse_string_literal(literal: &str) -> Result<String> {
    let literal = literal.trim();
    let inner = literal
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| literal.len() >= 2)
        .ok_or_else(|| RuntimeError::malformed(format!("invalid string literal {literal}")))?;
    unescape(inner)
}

/// Parses a label reference (`:cond_0`), returning the bare label name.
pub fn parse_label(token: &str) -> Result<&str> {
    token
        .trim()
        .strip_prefix(':')
        .filter(|label| !label.is_empty())
        .ok_or_else(|| RuntimeError::malformed(format!("expected label, found `{}`", token.trim())))
}

/// Splits operand text on commas into at most `max` trimmed pieces. The last
/// piece keeps any remaining commas, which matters for string literals and
/// descriptors.
pub fn split_operands(operands: &str, max: usize) -> Vec<&str> {
    operands.splitn(max, ',').map(str::trim).collect()
}

/// Like [`split_operands`] but requires exactly `count` pieces.
pub fn expect_operands(operands: &str, count: usize) -> Result<Vec<&str>> {
    let pieces = split_operands(operands, count);
    if pieces.len() != count || pieces.iter().any(|piece| piece.is_empty()) {
        return Err(RuntimeError::malformed(format!(
            "expected {count} operands, found `{operands}`"
        )));
    }
    Ok(pieces)
}

/// Splits `{v0, v1}, Lfoo;->bar()V` into its register list and trailing
/// operand. Both the enumerated and the `{vA .. vB}` range forms are
/// accepted.
pub fn parse_register_list(operands: &str) -> Result<(Vec<RegisterToken>, &str)> {
    let operands = operands.trim();
    let malformed = || RuntimeError::malformed(format!("expected register list: {operands}"));
    let body = operands.strip_prefix('{').ok_or_else(malformed)?;
    let close = body.find('}').ok_or_else(malformed)?;
    let (list, rest) = (body[..close].trim(), &body[close + 1..]);
    let target = rest
        .trim_start()
        .strip_prefix(',')
        .map(str::trim)
        .filter(|target| !target.is_empty())
        .ok_or_else(malformed)?;

    if list.is_empty() {
        return Ok((Vec::new(), target));
    }
    let registers = match list.split_once("..") {
        Some((first, last)) => {
            let first = parse_register(first)?;
            let last = parse_register(last)?;
            if std::mem::discriminant(&first) != std::mem::discriminant(&last)
                || last.number() < first.number()
            {
                return Err(malformed());
            }
            (first.number()..=last.number())
                .map(|n| first.with_number(n))
                .collect()
        }
        None => list
            .split(',')
            .map(parse_register)
            .collect::<Result<Vec<_>>>()?,
    };
    Ok((registers, target))
}

/// Removes a trailing `#` comment, ignoring `#` inside string literals.
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => (),
        }
    }
    line
}

/// Undoes backslash escapes. `\uXXXX` escapes are UTF-16 code units, so
/// surrogate pairs combine into a single character.
pub fn unescape(text: &str) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u16; 2];
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let escaped = chars
            .next()
            .ok_or_else(|| RuntimeError::malformed(format!("dangling escape in \"{text}\"")))?;
        let unit = match escaped {
            'n' => b'\n' as u16,
            't' => b'\t' as u16,
            'r' => b'\r' as u16,
            'b' => 0x08,
            'f' => 0x0c,
            '0' => 0,
            '\\' | '"' | '\'' => escaped as u16,
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err(RuntimeError::malformed(format!("short \\u escape in \"{text}\"")));
                }
                u16::from_str_radix(&hex, 16)
                    .map_err(|_| RuntimeError::malformed(format!("bad \\u escape in \"{text}\"")))?
            }
            other => {
                return Err(RuntimeError::malformed(format!(
                    "unknown escape \\{other} in \"{text}\""
                )))
            }
        };
        units.push(unit);
    }
    Ok(String::from_utf16_lossy(&units))
}

/// Quotes `text`, escaping quotes, backslashes, control characters and
/// anything outside printable ASCII.
pub fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            ' '..='~' => out.push(c),
            _ => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
    out
}
