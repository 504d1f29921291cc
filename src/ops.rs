//! Opcode semantics for data movement, arithmetic, objects, fields, arrays
//! and invocation. Branching and the data-table opcodes live in
//! [`crate::flow`].
use tracing::{info, warn};

use crate::error::{Result, RuntimeError};
use crate::heap::{ArrayObject, Object, Value, VirtualObject};
use crate::operands::{
    expect_operands, parse_int, parse_register_list, parse_string_literal, split_operands,
};
use crate::program::FieldRef;
use crate::runtime::{Runtime, StateChange};

/// Directives and opcodes without effect in this VM.
pub fn ignore(_: &mut Runtime, _: &str) -> Result<()> {
    Ok(())
}

/* Constants and moves */

pub fn constant(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = parse_int(args[1])?;
    runtime.set_register(args[0], value)
}

pub fn const_string(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let text = parse_string_literal(args[1])?;
    let string = runtime.heap_mut().allocate(Object::String(text));
    runtime.set_register(args[0], string)
}

pub fn move_register(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = runtime.register(args[1])?;
    runtime.set_register(args[0], value)
}

pub fn move_result(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 1)?;
    let value = runtime.return_value();
    runtime.set_register(args[0], value)
}

/* Returns */

pub fn return_void(runtime: &mut Runtime, _: &str) -> Result<()> {
    runtime.return_from_method()
}

pub fn return_value(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 1)?;
    let value = runtime.register(args[0])?;
    runtime.set_return_value(value);
    runtime.return_from_method()
}

/* Invocation and allocation */

/// Every invoke kind resolves the named method verbatim; there is no
/// dispatch on the receiver's runtime type.
pub fn invoke(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let (registers, method) = parse_register_list(operands)?;
    let frame = runtime.frame()?;
    let arguments = registers
        .into_iter()
        .map(|register| frame.get(register))
        .collect::<Result<Vec<_>>>()?;
    runtime.invoke(method, &arguments)
}

pub fn new_instance(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let type_descriptor = args[1];
    let allocator = runtime.natives().get(type_descriptor);
    let object = match allocator {
        Some(allocator) => {
            allocator(runtime, &[])?;
            runtime.return_value()
        }
        None => runtime
            .heap_mut()
            .allocate(Object::Virtual(VirtualObject::new(type_descriptor))),
    };
    runtime.set_register(args[0], object)
}

pub fn new_array(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    let size = runtime.register(args[1])?;
    let length = usize::try_from(size).map_err(|_| RuntimeError::NegativeArraySize(size))?;
    let array = ArrayObject::new(args[2], vec![0; length]);
    let array = runtime.heap_mut().allocate(Object::Array(array));
    runtime.set_register(args[0], array)
}

/// Builds an array from a register list; the result goes to the return
/// register for a following `move-result-object`.
pub fn filled_new_array(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let (registers, type_descriptor) = parse_register_list(operands)?;
    let frame = runtime.frame()?;
    let elements = registers
        .into_iter()
        .map(|register| frame.get(register))
        .collect::<Result<Vec<_>>>()?;
    let array = ArrayObject::new(type_descriptor, elements);
    let array = runtime.heap_mut().allocate(Object::Array(array));
    runtime.set_return_value(array);
    Ok(())
}

/* Fields */

pub fn iget(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    let object = runtime.register(args[1])?;
    let value = runtime.heap().virtual_object(object)?.field(args[2]);
    runtime.set_register(args[0], value)
}

pub fn iput(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    FieldRef::parse(args[2])?;
    let value = runtime.register(args[0])?;
    let object = runtime.register(args[1])?;
    runtime
        .heap_mut()
        .virtual_object_mut(object)?
        .set_field(args[2], value);
    Ok(())
}

pub fn sget(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = runtime.static_field(args[1]);
    runtime.set_register(args[0], value)
}

/// Writes a static field and reports the write. Reference-typed fields
/// holding an object of another type only raise a warning.
pub fn sput(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let field = FieldRef::parse(args[1])?;
    let value = runtime.register(args[0])?;

    let rendered = if field.is_reference() {
        if let Some(object) = runtime.heap().lookup(value)? {
            if object.type_descriptor() != field.type_descriptor {
                warn!(
                    "types don't match: {} for {}",
                    runtime.heap().render(value),
                    args[1]
                );
            }
        }
        runtime.heap().render(value)
    } else {
        value.to_string()
    };
    info!("{} = {}", args[1], rendered);

    runtime.set_static_field(args[1], value);
    runtime.record_change(StateChange::StaticWrite {
        field: args[1].to_string(),
        rendered,
    });
    Ok(())
}

/* Arrays */

pub fn aget(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    let array = runtime.register(args[1])?;
    let index = runtime.register(args[2])?;
    let value = runtime.heap().array(array)?.get(index)?;
    runtime.set_register(args[0], value)
}

pub fn aput(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 3)?;
    let value = runtime.register(args[0])?;
    let array = runtime.register(args[1])?;
    let index = runtime.register(args[2])?;
    runtime.heap_mut().array_mut(array)?.set(index, value)
}

pub fn array_length(runtime: &mut Runtime, operands: &str) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let array = runtime.register(args[1])?;
    let length = runtime.heap().array(array)?.elements.len() as Value;
    runtime.set_register(args[0], length)
}

/* Arithmetic */

/// Shared shape of the binary integer ops. `op dst, a, b` and the
/// `/2addr` form `op dst, b` (where `dst` is also `a`) are both accepted;
/// either source may be a register or a literal.
fn binary(
    runtime: &mut Runtime,
    operands: &str,
    op: fn(Value, Value) -> Result<Value>,
) -> Result<()> {
    let args = split_operands(operands, 3);
    if args.len() < 2 || args.iter().any(|arg| arg.is_empty()) {
        return Err(RuntimeError::malformed(format!(
            "expected 2 or 3 operands, found `{operands}`"
        )));
    }
    let lhs = runtime.operand_value(args[args.len() - 2])?;
    let rhs = runtime.operand_value(args[args.len() - 1])?;
    runtime.set_register(args[0], op(lhs, rhs)?)
}

fn unary(runtime: &mut Runtime, operands: &str, op: fn(Value) -> Value) -> Result<()> {
    let args = expect_operands(operands, 2)?;
    let value = runtime.register(args[1])?;
    runtime.set_register(args[0], op(value))
}

pub fn add_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a.wrapping_add(b)))
}

pub fn sub_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a.wrapping_sub(b)))
}

/// `rsub-int dst, src, lit` computes `lit - src`.
pub fn rsub_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(b.wrapping_sub(a)))
}

pub fn mul_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a.wrapping_mul(b)))
}

pub fn div_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| {
        if b == 0 {
            return Err(RuntimeError::DivisionByZero);
        }
        Ok(a.wrapping_div(b))
    })
}

pub fn rem_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| {
        if b == 0 {
            return Err(RuntimeError::DivisionByZero);
        }
        Ok(a.wrapping_rem(b))
    })
}

pub fn and_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a & b))
}

pub fn or_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a | b))
}

pub fn xor_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a ^ b))
}

pub fn shl_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a.wrapping_shl(b as u32 & 0x1f)))
}

pub fn shr_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| Ok(a.wrapping_shr(b as u32 & 0x1f)))
}

pub fn ushr_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    binary(runtime, operands, |a, b| {
        Ok(((a as u32) >> (b as u32 & 0x1f)) as Value)
    })
}

pub fn neg_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    unary(runtime, operands, Value::wrapping_neg)
}

pub fn not_int(runtime: &mut Runtime, operands: &str) -> Result<()> {
    unary(runtime, operands, |a| !a)
}

pub fn int_to_char(runtime: &mut Runtime, operands: &str) -> Result<()> {
    unary(runtime, operands, |a| a as u16 as Value)
}

pub fn int_to_byte(runtime: &mut Runtime, operands: &str) -> Result<()> {
    unary(runtime, operands, |a| a as i8 as Value)
}

pub fn int_to_short(runtime: &mut Runtime, operands: &str) -> Result<()> {
    unary(runtime, operands, |a| a as i16 as Value)
}

#[cfg(test)]
mod tests {
    use crate::config::VmConfig;
    use crate::error::RuntimeError;
    use crate::runtime::{Runtime, StateChange};
    use std::fs;

    /// Runs `body` as a static `()I` method of class `T`.
    fn run(body: &str) -> (Runtime, crate::error::Result<i32>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("T.smali"),
            format!(".class LT;\n.method static f()I\n{body}\n.end method\n"),
        )
        .unwrap();
        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        let result = runtime.call("LT;->f()I", &[]);
        (runtime, result, dir)
    }

    #[test]
    fn arithmetic_wraps_like_java() {
        let (_, result, _dir) = run(
            ".locals 2\n\
             const v0, -0x80000000\n\
             const/4 v1, -0x1\n\
             div-int/2addr v0, v1\n\
             return v0",
        );
        assert_eq!(result.unwrap(), i32::MIN);

        let (_, result, _dir) = run(
            ".locals 1\n\
             const/4 v0, -0x7\n\
             rem-int/lit8 v0, v0, 0x3\n\
             return v0",
        );
        assert_eq!(result.unwrap(), -1);

        let (_, result, _dir) = run(
            ".locals 1\n\
             const/4 v0, 0x1\n\
             shl-int/lit8 v0, v0, 0x21\n\
             return v0",
        );
        assert_eq!(result.unwrap(), 2);

        let (_, result, _dir) = run(
            ".locals 1\n\
             const v0, 0x7fffffff\n\
             add-int/lit8 v0, v0, 0x1\n\
             return v0",
        );
        assert_eq!(result.unwrap(), i32::MIN);
    }

    #[test]
    fn narrowing_conversions() {
        let (_, result, _dir) = run(
            ".locals 3\n\
             const v0, 0x1ff80\n\
             int-to-byte v1, v0\n\
             int-to-short v2, v0\n\
             add-int/2addr v1, v2\n\
             int-to-char v2, v0\n\
             add-int/2addr v1, v2\n\
             not-int v2, v1\n\
             add-int/2addr v1, v2\n\
             return v1",
        );
        // byte -128, short -128, char 0xff80, then x + !x == -1
        assert_eq!(result.unwrap(), -1);
    }

    #[test]
    fn negative_array_size() {
        let (_, result, _dir) = run(
            ".locals 1\n\
             const/4 v0, -0x1\n\
             new-array v0, v0, [I\n\
             return v0",
        );
        assert!(matches!(result, Err(RuntimeError::NegativeArraySize(-1))));
    }

    #[test]
    fn mismatched_static_reference_is_still_written() {
        let (mut runtime, result, _dir) = run(
            ".locals 1\n\
             const-string v0, \"text\"\n\
             sput-object v0, LT;->list:Ljava/util/List;\n\
             sget-object v0, LT;->list:Ljava/util/List;\n\
             return-object v0",
        );
        let text = result.unwrap();
        assert_eq!(runtime.heap().string(text).unwrap(), "text");
        assert_eq!(
            runtime.drain_state_changes(),
            [StateChange::StaticWrite {
                field: "LT;->list:Ljava/util/List;".to_string(),
                rendered: "\"text\"".to_string(),
            }]
        );
    }

    #[test]
    fn operands_are_checked() {
        let (_, result, _dir) = run(".locals 1\nconst v0\nreturn v0");
        assert!(matches!(result, Err(RuntimeError::MalformedInstruction(_))));

        let (_, result, _dir) = run(".locals 1\nconst v7, 0x1\nreturn v0");
        assert!(matches!(result, Err(RuntimeError::MalformedInstruction(_))));

        let (_, result, _dir) = run(".locals 1\niget v0, v0, LT;->x:I\nreturn v0");
        assert!(matches!(result, Err(RuntimeError::InvalidReference { index: 0, .. })));
    }
}
