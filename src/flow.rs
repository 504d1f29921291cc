//! Control flow: label seeking, branches, switch tables and inline array
//! data.
//!
//! There is no label index. A jump rewinds the frame's cursor to the start
//! of the method and scans forward for the label line, so backward and
//! forward jumps work alike. Switch tables and array data are read through
//! an independent cursor over the same method, leaving the frame's cursor
//! right after the instruction being executed.
use crate::error::{Result, RuntimeError};
use crate::heap::Value;
use crate::operands::{expect_operands, parse_int, parse_integer_literal, parse_label, strip_comment};
use crate::runtime::Runtime;
use crate::source::SourceCursor;

/// Scans forward from the cursor's position for `:label`, stopping at the
/// end of the method.
fn seek_label(cursor: &mut SourceCursor, label: &str, method: &str) -> Result<()> {
    loop {
        let line = cursor
            .read_line()?
            .ok_or_else(|| RuntimeError::UnexpectedEndOfSource(method.to_string()))?;
        let line = strip_comment(&line).trim();
        if line.strip_prefix(':') == Some(label) {
            return Ok(());
        }
        if line.starts_with(".end method") {
            return Err(RuntimeError::LabelNotFound {
                label: label.to_string(),
                method: method.to_string(),
            });
        }
    }
}

/// Moves the active frame to `label`.
pub fn jump_to_label(runtime: &mut Runtime, label: &str) -> Result<()> {
    let frame = runtime.frame_mut()?;
    let from = frame.cursor().line_number();
    let method = frame.name().to_string();
    let cursor = frame.cursor_mut();
    cursor.reset()?;
    seek_label(cursor, label, &method)?;
    let to = cursor.line_number();
    runtime.profiler_mut().count_jump(&method, label, from, to);
    Ok(())
}

/// Opens an independent cursor over the active method, positioned right
/// after `label`. Dropping it releases the file.
fn lookahead(runtime: &Runtime, label: &str) -> Result<SourceCursor> {
    let frame = runtime.frame()?;
    let mut cursor = frame.cursor().fork()?;
    seek_label(&mut cursor, label, frame.name())?;
    Ok(cursor)
}

/// Next significant line of a data block, comments stripped.
fn next_data_line(cursor: &mut SourceCursor, method: &str) -> Result<String> {
    loop {
        let line = cursor
            .read_line()?
            .ok_or_else(|| RuntimeError::UnexpectedEndOfSource(method.to_string()))?;
        let line = strip_comment(&line).trim();
        if !line.is_empty() {
            return Ok(line.to_string());
        }
    }
}

fn is_block_end(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map_or(false, |token| token.starts_with(".end"))
}

/* Unconditional and conditional jumps */

pub fn goto(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 1)?;
    let label = parse_label(args[0])?;
    jump_to_label(runtime, label)
}

/// `if-<cmp> vA, vB, :label`, signed comparison of two registers.
fn compare(runtime: &mut Runtime, operands: &str, test: fn(Value, Value) -> bool) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    let lhs = runtime.register(args[0])?;
    let rhs = runtime.register(args[1])?;
    let label = parse_label(args[2])?;
    if test(lhs, rhs) {
        jump_to_label(runtime, label)?;
    }
    Ok(())
}

/// `if-<cmp>z vA, :label`, comparison against zero.
fn compare_zero(runtime: &mut Runtime, operands: &str, test: fn(Value, Value) -> bool) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = runtime.register(args[0])?;
    let label = parse_label(args[1])?;
    if test(value, 0) {
        jump_to_label(runtime, label)?;
    }
    Ok(())
}

pub fn if_eq(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a == b)
}

pub fn if_ne(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a != b)
}

pub fn if_lt(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a < b)
}

pub fn if_ge(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a >= b)
}

pub fn if_gt(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a > b)
}

pub fn if_le(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare(runtime, operands, |a, b| a <= b)
}

pub fn if_eqz(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a == b)
}

pub fn if_nez(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a != b)
}

pub fn if_ltz(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a < b)
}

pub fn if_gez(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a >= b)
}

pub fn if_gtz(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a > b)
}

pub fn if_lez(runtime: &mut Runtime, operands: &str) -> Result<()> {
    compare_zero(runtime, operands, |a, b| a <= b)
}

/* Switch tables */

/// `packed-switch vA, :data` where the data block lists the targets for
/// consecutive keys starting at its base. Values outside the table fall
/// through.
pub fn packed_switch(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = i64::from(runtime.register(args[0])?);
    let data_label = parse_label(args[1])?;
    let method = runtime.frame()?.name().to_string();

    let mut data = lookahead(runtime, data_label)?;
    let header = next_data_line(&mut data, &method)?;
    let base = match header.split_once(char::is_whitespace) {
        Some((".packed-switch", base)) => i64::from(parse_int(base)?),
        _ => {
            return Err(RuntimeError::malformed(format!(
                "expected packed switch: {header}"
            )))
        }
    };
    if value < base {
        return Ok(());
    }

    let mut key = base;
    let target = loop {
        let line = next_data_line(&mut data, &method)?;
        if is_block_end(&line) {
            break None;
        }
        let label = parse_label(&line)?;
        if key == value {
            break Some(label.to_string());
        }
        key += 1;
    };
    drop(data);

    match target {
        Some(label) => jump_to_label(runtime, &label),
        None => Ok(()),
    }
}

/// `sparse-switch vA, :data` where the data block maps individual keys to
/// targets (`0x1 -> :sswitch_0`). Unmatched values fall through.
pub fn sparse_switch(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = runtime.register(args[0])?;
    let data_label = parse_label(args[1])?;
    let method = runtime.frame()?.name().to_string();

    let mut data = lookahead(runtime, data_label)?;
    let header = next_data_line(&mut data, &method)?;
    if header != ".sparse-switch" {
        return Err(RuntimeError::malformed(format!(
            "expected sparse switch: {header}"
        )));
    }

    let target = loop {
        let line = next_data_line(&mut data, &method)?;
        if is_block_end(&line) {
            break None;
        }
        let (key, label) = line
            .split_once("->")
            .ok_or_else(|| RuntimeError::malformed(format!("expected switch case: {line}")))?;
        if parse_int(key)? == value {
            break Some(parse_label(label)?.to_string());
        }
    };
    drop(data);

    match target {
        Some(label) => jump_to_label(runtime, &label),
        None => Ok(()),
    }
}

/* Inline array data */

/// Parses one `.array-data` element. Byte and short elements carry a `t`
/// or `s` suffix, int elements none; 64-bit elements are not supported.
fn parse_array_element(line: &str) -> Result<Value> {
    let literal = line.strip_suffix(['t', 's']).unwrap_or(line);
    if literal.ends_with('L') {
        return Err(RuntimeError::malformed(format!(
            "64-bit array data is not supported: {line}"
        )));
    }
    parse_integer_literal(literal).map(|value| value as Value)
}

/// `fill-array-data vA, :data` copies the literal elements of the data
/// block into the array in `vA`.
pub fn fill_array_data(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let array = runtime.register(args[0])?;
    let data_label = parse_label(args[1])?;
    let method = runtime.frame()?.name().to_string();

    let mut data = lookahead(runtime, data_label)?;
    let header = next_data_line(&mut data, &method)?;
    if header.split_whitespace().next() != Some(".array-data") {
        return Err(RuntimeError::malformed(format!(
            "expected array data: {header}"
        )));
    }

    let mut elements = Vec::new();
    loop {
        let line = next_data_line(&mut data, &method)?;
        if is_block_end(&line) {
            break;
        }
        elements.push(parse_array_element(&line)?);
    }
    drop(data);

    let array = runtime.heap_mut().array_mut(array)?;
    for (index, value) in elements.into_iter().enumerate() {
        array.set(index as Value, value)?;
    }
    Ok(())
}

/* Directives */

/// `.end method` reached by execution means the method fell off its end.
/// Other `.end` lines (`.end local`, `.end param`) are debug info.
pub fn end_directive(runtime: &mut Runtime, operands: &str) -> Result<()> {
    if operands.split_whitespace().next() == Some("method") {
        let method = runtime.frame()?.name().to_string();
        return Err(RuntimeError::UnexpectedEndOfSource(method));
    }
    Ok(())
}

/// Skips an `.annotation` block embedded in a method body.
pub fn skip_annotation(runtime: &mut Runtime, _: &str) -> Result<()> {
    let frame = runtime.frame_mut()?;
    let method = frame.name().to_string();
    loop {
        let line = frame
            .cursor_mut()
            .read_line()?
            .ok_or_else(|| RuntimeError::UnexpectedEndOfSource(method.clone()))?;
        if strip_comment(&line).trim().starts_with(".end annotation") {
            return Ok(());
        }
    }
}
