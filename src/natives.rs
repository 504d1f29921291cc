//! Emulated library methods.
//!
//! Natives are keyed by the exact method reference an `invoke` names, or by
//! a bare type descriptor for the allocator `new-instance` uses. Every
//! native receives the invocation's register values (the receiver first for
//! instance methods) and reports its result through the return register.
use std::collections::HashMap;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use indexmap::IndexSet;

use crate::error::{Result, RuntimeError};
use crate::heap::{ArrayObject, Object, Value};
use crate::runtime::Runtime;

/// Signature of an emulated method.
pub type NativeMethod = fn(&mut Runtime, &[Value]) -> Result<()>;

/// Lookup table of emulated methods.
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    methods: HashMap<String, NativeMethod>,
}

impl NativeTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The emulated subset of `java.lang` and `java.util`.
    pub fn standard() -> Self {
        let mut table = Self::new();

        table.register("Ljava/lang/Object;-><init>()V", no_op);
        table.register("[->clone()Ljava/lang/Object;", array_clone);

        table.register("Ljava/lang/String;", new_string);
        table.register("Ljava/lang/String;-><init>([C)V", string_from_chars);
        table.register("Ljava/lang/String;->intern()Ljava/lang/String;", string_intern);
        table.register("Ljava/lang/String;->charAt(I)C", string_char_at);
        table.register("Ljava/lang/String;->length()I", string_length);
        table.register("Ljava/lang/String;->toCharArray()[C", string_to_char_array);
        table.register("Ljava/lang/String;->getBytes()[B", string_get_bytes);
        table.register(
            "Ljava/lang/String;->getBytes(Ljava/lang/String;)[B",
            string_get_bytes_with,
        );

        table.register("Ljava/lang/StringBuilder;", new_string_builder);
        table.register("Ljava/lang/StringBuilder;-><init>()V", no_op);
        table.register("Ljava/lang/StringBuilder;-><init>(I)V", no_op);
        table.register(
            "Ljava/lang/StringBuilder;-><init>(Ljava/lang/String;)V",
            builder_from_string,
        );
        table.register(
            "Ljava/lang/StringBuilder;->append(C)Ljava/lang/StringBuilder;",
            builder_append_char,
        );
        table.register(
            "Ljava/lang/StringBuilder;->append(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            builder_append_string,
        );
        table.register(
            "Ljava/lang/StringBuilder;->append(I)Ljava/lang/StringBuilder;",
            builder_append_int,
        );
        table.register(
            "Ljava/lang/StringBuilder;->toString()Ljava/lang/String;",
            builder_to_string,
        );

        table.register("Ljava/lang/Enum;-><init>(Ljava/lang/String;I)V", no_op);

        table.register("Ljava/util/ArrayList;", new_array_list);
        table.register("Ljava/util/ArrayList;-><init>()V", clear_array_list);
        table.register("Ljava/util/ArrayList;->add(Ljava/lang/Object;)V", list_add);
        table.register("Ljava/util/ArrayList;->add(Ljava/lang/Object;)Z", list_add_returning);
        table.register("Ljava/util/ArrayList;->get(I)Ljava/lang/Object;", list_get);
        table.register("Ljava/util/ArrayList;->size()I", list_size);
        table.register(
            "Ljava/util/Arrays;->asList([Ljava/lang/Object;)Ljava/util/List;",
            arrays_as_list,
        );
        table.register("Ljava/util/Collections;->emptyList()Ljava/util/List;", new_array_list);

        table.register("Ljava/util/HashMap;", new_hash_map);
        table.register("Ljava/util/HashMap;-><init>()V", clear_hash_map);
        table.register(
            "Ljava/util/HashMap;->put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            map_put,
        );
        table.register("Ljava/util/Collections;->emptyMap()Ljava/util/Map;", new_hash_map);

        table.register("Ljava/util/HashSet;", new_hash_set);
        table.register("Ljava/util/HashSet;-><init>()V", clear_hash_set);
        table.register(
            "Ljava/util/HashSet;-><init>(Ljava/util/Collection;)V",
            set_from_collection,
        );
        table.register("Ljava/util/HashSet;->add(Ljava/lang/Object;)Z", set_add);
        table.register("Ljava/util/HashSet;->contains(Ljava/lang/Object;)Z", set_contains);

        table
    }

    /// Adds or replaces the native for `name`.
    pub fn register(&mut self, name: &str, method: NativeMethod) {
        self.methods.insert(name.to_string(), method);
    }

    pub fn get(&self, name: &str) -> Option<NativeMethod> {
        self.methods.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The `index`th argument; too few arguments is an operand error.
fn arg(args: &[Value], index: usize) -> Result<Value> {
    args.get(index).copied().ok_or_else(|| {
        RuntimeError::malformed(format!(
            "native expected at least {} arguments, got {}",
            index + 1,
            args.len()
        ))
    })
}

/// Allocates `object` and leaves it in the return register.
fn return_new(runtime: &mut Runtime, object: Object) -> Result<()> {
    let reference = runtime.heap_mut().allocate(object);
    runtime.set_return_value(reference);
    Ok(())
}

fn byte_array(bytes: &[u8]) -> Object {
    let elements = bytes.iter().map(|byte| Value::from(*byte as i8)).collect();
    Object::Array(ArrayObject::new("[B", elements))
}

fn no_op(_: &mut Runtime, _: &[Value]) -> Result<()> {
    Ok(())
}

fn array_clone(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let copy = runtime.heap().array(arg(args, 0)?)?.clone();
    return_new(runtime, Object::Array(copy))
}

/* java.lang.String */

fn new_string(runtime: &mut Runtime, _: &[Value]) -> Result<()> {
    return_new(runtime, Object::String(String::new()))
}

fn string_from_chars(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let units = runtime
        .heap()
        .array(arg(args, 1)?)?
        .elements
        .iter()
        .map(|unit| *unit as u16)
        .collect::<Vec<_>>();
    let text = String::from_utf16_lossy(&units);
    *runtime.heap_mut().string_mut(arg(args, 0)?)? = text;
    Ok(())
}

/// There is no string pool; the receiver is its own canonical instance.
fn string_intern(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    runtime.set_return_value(arg(args, 0)?);
    Ok(())
}

fn string_char_at(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let index = arg(args, 1)?;
    let text = runtime.heap().string(arg(args, 0)?)?;
    let length = text.encode_utf16().count();
    let unit = usize::try_from(index)
        .ok()
        .and_then(|slot| text.encode_utf16().nth(slot))
        .ok_or(RuntimeError::ArrayIndexOutOfBounds { index, length })?;
    runtime.set_return_value(Value::from(unit));
    Ok(())
}

fn string_length(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let length = runtime.heap().string(arg(args, 0)?)?.encode_utf16().count();
    runtime.set_return_value(length as Value);
    Ok(())
}

fn string_to_char_array(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let units = runtime
        .heap()
        .string(arg(args, 0)?)?
        .encode_utf16()
        .map(Value::from)
        .collect();
    return_new(runtime, Object::Array(ArrayObject::new("[C", units)))
}

fn string_get_bytes(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let bytes = runtime.heap().string(arg(args, 0)?)?.as_bytes().to_vec();
    return_new(runtime, byte_array(&bytes))
}

fn string_get_bytes_with(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let text = runtime.heap().string(arg(args, 0)?)?;
    let charset = runtime.heap().string(arg(args, 1)?)?;
    let bytes = encode(text, charset)?;
    return_new(runtime, byte_array(&bytes))
}

/// Encodes `text` with a named charset. Characters a single-byte charset
/// cannot represent become `?`.
pub fn encode(text: &str, charset: &str) -> Result<Vec<u8>> {
    let single_byte = |limit: u32| {
        text.chars()
            .map(|c| if u32::from(c) <= limit { c as u8 } else { b'?' })
            .collect::<Vec<_>>()
    };
    let mut bytes = Vec::with_capacity(text.len() * 2);
    match charset.to_ascii_uppercase().as_str() {
        "UTF-8" | "UTF8" => return Ok(text.as_bytes().to_vec()),
        "US-ASCII" | "ASCII" => return Ok(single_byte(0x7f)),
        "ISO-8859-1" | "LATIN1" => return Ok(single_byte(0xff)),
        "UTF-16BE" => {
            for unit in text.encode_utf16() {
                bytes.write_u16::<BigEndian>(unit)?;
            }
        }
        "UTF-16LE" => {
            for unit in text.encode_utf16() {
                bytes.write_u16::<LittleEndian>(unit)?;
            }
        }
        "UTF-16" => {
            if !text.is_empty() {
                bytes.write_u16::<BigEndian>(0xfeff)?;
            }
            for unit in text.encode_utf16() {
                bytes.write_u16::<BigEndian>(unit)?;
            }
        }
        _ => return Err(RuntimeError::UnsupportedEncoding(charset.to_string())),
    }
    Ok(bytes)
}

/* java.lang.StringBuilder */

fn new_string_builder(runtime: &mut Runtime, _: &[Value]) -> Result<()> {
    return_new(runtime, Object::StringBuilder(Vec::new()))
}

fn builder_from_string(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let units = runtime.heap().string(arg(args, 1)?)?.encode_utf16().collect::<Vec<_>>();
    runtime
        .heap_mut()
        .string_builder_mut(arg(args, 0)?)?
        .extend(units);
    Ok(())
}

/// Appends code units to the builder in `args[0]`, which is also the
/// result. Units are kept as-is so surrogate halves appended one at a time
/// still pair up.
fn append_units(runtime: &mut Runtime, args: &[Value], units: &[u16]) -> Result<()> {
    let builder = arg(args, 0)?;
    runtime
        .heap_mut()
        .string_builder_mut(builder)?
        .extend_from_slice(units);
    runtime.set_return_value(builder);
    Ok(())
}

fn append(runtime: &mut Runtime, args: &[Value], text: &str) -> Result<()> {
    let units = text.encode_utf16().collect::<Vec<_>>();
    append_units(runtime, args, &units)
}

fn builder_append_char(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let unit = arg(args, 1)? as u16;
    append_units(runtime, args, &[unit])
}

fn builder_append_string(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let text = match runtime.heap().lookup(arg(args, 1)?)? {
        None => "null".to_string(),
        Some(_) => runtime.heap().string(arg(args, 1)?)?.clone(),
    };
    append(runtime, args, &text)
}

fn builder_append_int(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let text = arg(args, 1)?.to_string();
    append(runtime, args, &text)
}

fn builder_to_string(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let text = String::from_utf16_lossy(runtime.heap().string_builder(arg(args, 0)?)?);
    return_new(runtime, Object::String(text))
}

/* java.util collections */

fn new_array_list(runtime: &mut Runtime, _: &[Value]) -> Result<()> {
    return_new(runtime, Object::ArrayList(Vec::new()))
}

fn clear_array_list(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    runtime.heap_mut().array_list_mut(arg(args, 0)?)?.clear();
    Ok(())
}

fn list_add(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let value = arg(args, 1)?;
    runtime.heap_mut().array_list_mut(arg(args, 0)?)?.push(value);
    Ok(())
}

fn list_add_returning(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    list_add(runtime, args)?;
    runtime.set_return_value(1);
    Ok(())
}

fn list_get(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let index = arg(args, 1)?;
    let list = runtime.heap().array_list(arg(args, 0)?)?;
    let value = usize::try_from(index)
        .ok()
        .and_then(|slot| list.get(slot).copied())
        .ok_or(RuntimeError::ArrayIndexOutOfBounds {
            index,
            length: list.len(),
        })?;
    runtime.set_return_value(value);
    Ok(())
}

fn list_size(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let size = runtime.heap().array_list(arg(args, 0)?)?.len();
    runtime.set_return_value(size as Value);
    Ok(())
}

fn arrays_as_list(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let elements = runtime.heap().array(arg(args, 0)?)?.elements.clone();
    return_new(runtime, Object::ArrayList(elements))
}

fn new_hash_map(runtime: &mut Runtime, _: &[Value]) -> Result<()> {
    return_new(runtime, Object::HashMap(Default::default()))
}

fn clear_hash_map(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    runtime.heap_mut().hash_map_mut(arg(args, 0)?)?.clear();
    Ok(())
}

/// Returns the previous value for the key, null when there was none.
fn map_put(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let (key, value) = (arg(args, 1)?, arg(args, 2)?);
    let previous = runtime
        .heap_mut()
        .hash_map_mut(arg(args, 0)?)?
        .insert(key, value)
        .unwrap_or(0);
    runtime.set_return_value(previous);
    Ok(())
}

fn new_hash_set(runtime: &mut Runtime, _: &[Value]) -> Result<()> {
    return_new(runtime, Object::HashSet(IndexSet::new()))
}

fn clear_hash_set(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    runtime.heap_mut().hash_set_mut(arg(args, 0)?)?.clear();
    Ok(())
}

fn set_from_collection(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let values = runtime
        .heap()
        .array_list(arg(args, 1)?)?
        .iter()
        .copied()
        .collect::<IndexSet<_>>();
    *runtime.heap_mut().hash_set_mut(arg(args, 0)?)? = values;
    Ok(())
}

fn set_add(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let value = arg(args, 1)?;
    let added = runtime.heap_mut().hash_set_mut(arg(args, 0)?)?.insert(value);
    runtime.set_return_value(Value::from(added));
    Ok(())
}

fn set_contains(runtime: &mut Runtime, args: &[Value]) -> Result<()> {
    let value = arg(args, 1)?;
    let found = runtime.heap().hash_set(arg(args, 0)?)?.contains(&value);
    runtime.set_return_value(Value::from(found));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn runtime() -> Runtime {
        Runtime::new(VmConfig::new())
    }

    fn string(runtime: &mut Runtime, text: &str) -> Value {
        runtime.heap_mut().allocate(Object::String(text.to_string()))
    }

    fn call(runtime: &mut Runtime, name: &str, args: &[Value]) -> Value {
        runtime.invoke(name, args).unwrap();
        runtime.return_value()
    }

    #[test]
    fn encodings() {
        assert_eq!(encode("hé", "UTF-8").unwrap(), [0x68, 0xc3, 0xa9]);
        assert_eq!(encode("hé", "latin1").unwrap(), [0x68, 0xe9]);
        assert_eq!(encode("hé", "US-ASCII").unwrap(), [0x68, b'?']);
        assert_eq!(encode("A", "UTF-16BE").unwrap(), [0x00, 0x41]);
        assert_eq!(encode("A", "utf-16le").unwrap(), [0x41, 0x00]);
        assert_eq!(encode("A", "UTF-16").unwrap(), [0xfe, 0xff, 0x00, 0x41]);
        assert!(encode("", "UTF-16").unwrap().is_empty());
        assert!(matches!(
            encode("A", "EBCDIC"),
            Err(RuntimeError::UnsupportedEncoding(name)) if name == "EBCDIC"
        ));
    }

    #[test]
    fn bytes_are_signed() {
        let mut runtime = runtime();
        let text = string(&mut runtime, "é");
        let bytes = call(&mut runtime, "Ljava/lang/String;->getBytes()[B", &[text]);
        assert_eq!(runtime.heap().array(bytes).unwrap().elements, [-61, -87]);
    }

    #[test]
    fn strings_count_utf16_units() {
        let mut runtime = runtime();
        let text = string(&mut runtime, "a\u{1F600}");
        assert_eq!(call(&mut runtime, "Ljava/lang/String;->length()I", &[text]), 3);
        assert_eq!(
            call(&mut runtime, "Ljava/lang/String;->charAt(I)C", &[text, 1]),
            0xd83d
        );
        assert!(matches!(
            runtime.invoke("Ljava/lang/String;->charAt(I)C", &[text, 3]),
            Err(RuntimeError::ArrayIndexOutOfBounds { index: 3, length: 3 })
        ));

        let chars = call(&mut runtime, "Ljava/lang/String;->toCharArray()[C", &[text]);
        let fresh = call(&mut runtime, "Ljava/lang/String;", &[]);
        runtime
            .invoke("Ljava/lang/String;-><init>([C)V", &[fresh, chars])
            .unwrap();
        assert_eq!(runtime.heap().string(fresh).unwrap(), "a\u{1F600}");
    }

    #[test]
    fn string_builder_appends() {
        let mut runtime = runtime();
        let builder = call(&mut runtime, "Ljava/lang/StringBuilder;", &[]);
        let prefix = string(&mut runtime, "x=");
        let returned = call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->append(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            &[builder, prefix],
        );
        assert_eq!(returned, builder);
        call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->append(I)Ljava/lang/StringBuilder;",
            &[builder, -4],
        );
        call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->append(C)Ljava/lang/StringBuilder;",
            &[builder, 'z' as Value],
        );
        call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->append(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            &[builder, 0],
        );
        let text = call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->toString()Ljava/lang/String;",
            &[builder],
        );
        assert_eq!(runtime.heap().string(text).unwrap(), "x=-4znull");
    }

    #[test]
    fn surrogate_halves_appended_separately_pair_up() {
        let mut runtime = runtime();
        let builder = call(&mut runtime, "Ljava/lang/StringBuilder;", &[]);
        let append_char = "Ljava/lang/StringBuilder;->append(C)Ljava/lang/StringBuilder;";
        call(&mut runtime, append_char, &[builder, 0xd83d]);
        assert_eq!(runtime.heap().string_builder(builder).unwrap().as_slice(), [0xd83d_u16]);
        call(&mut runtime, append_char, &[builder, 0xde00]);
        let text = call(
            &mut runtime,
            "Ljava/lang/StringBuilder;->toString()Ljava/lang/String;",
            &[builder],
        );
        assert_eq!(runtime.heap().string(text).unwrap(), "\u{1F600}");
        assert_eq!(call(&mut runtime, "Ljava/lang/String;->length()I", &[text]), 2);
    }

    #[test]
    fn collections() {
        let mut runtime = runtime();
        let list = call(&mut runtime, "Ljava/util/ArrayList;", &[]);
        runtime.invoke("Ljava/util/ArrayList;-><init>()V", &[list]).unwrap();
        runtime
            .invoke("Ljava/util/ArrayList;->add(Ljava/lang/Object;)V", &[list, 7])
            .unwrap();
        assert_eq!(
            call(&mut runtime, "Ljava/util/ArrayList;->add(Ljava/lang/Object;)Z", &[list, 7]),
            1
        );
        assert_eq!(call(&mut runtime, "Ljava/util/ArrayList;->size()I", &[list]), 2);
        assert_eq!(
            call(&mut runtime, "Ljava/util/ArrayList;->get(I)Ljava/lang/Object;", &[list, 1]),
            7
        );
        assert!(runtime
            .invoke("Ljava/util/ArrayList;->get(I)Ljava/lang/Object;", &[list, 2])
            .is_err());

        let set = call(&mut runtime, "Ljava/util/HashSet;", &[]);
        runtime
            .invoke("Ljava/util/HashSet;-><init>(Ljava/util/Collection;)V", &[set, list])
            .unwrap();
        assert_eq!(runtime.heap().hash_set(set).unwrap().len(), 1);
        assert_eq!(
            call(&mut runtime, "Ljava/util/HashSet;->add(Ljava/lang/Object;)Z", &[set, 7]),
            0
        );
        assert_eq!(
            call(&mut runtime, "Ljava/util/HashSet;->add(Ljava/lang/Object;)Z", &[set, 8]),
            1
        );
        assert_eq!(
            call(&mut runtime, "Ljava/util/HashSet;->contains(Ljava/lang/Object;)Z", &[set, 8]),
            1
        );

        let map = call(&mut runtime, "Ljava/util/HashMap;", &[]);
        let put = "Ljava/util/HashMap;->put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";
        assert_eq!(call(&mut runtime, put, &[map, 1, 10]), 0);
        assert_eq!(call(&mut runtime, put, &[map, 1, 11]), 10);
        assert_eq!(runtime.heap().hash_map(map).unwrap()[&1], 11);
    }

    #[test]
    fn array_clone_is_a_copy() {
        let mut runtime = runtime();
        let array = runtime
            .heap_mut()
            .allocate(Object::Array(ArrayObject::new("[I", vec![1, 2])));
        let copy = call(&mut runtime, "[I->clone()Ljava/lang/Object;", &[array]);
        assert_ne!(copy, array);
        runtime.heap_mut().array_mut(copy).unwrap().set(0, 9).unwrap();
        assert_eq!(runtime.heap().array(array).unwrap().elements, [1, 2]);

        let list = call(
            &mut runtime,
            "Ljava/util/Arrays;->asList([Ljava/lang/Object;)Ljava/util/List;",
            &[copy],
        );
        assert_eq!(runtime.heap().array_list(list).unwrap(), &vec![9, 2]);
    }
}
