//! Value and heap model.
//!
//! Registers hold a single 32-bit integer that is either a primitive or an
//! index into the [`Heap`]. Nothing tags the two apart: the opcode variant
//! (`move` vs `move-object`, `aget` vs `aget-object`, ...) is what tells the
//! interpreter how to read a register.
use std::collections::HashMap;
use std::fmt::Write;

use indexmap::{IndexMap, IndexSet};

use crate::error::{Result, RuntimeError};
use crate::operands::escape_string;

/// Register value, either a primitive or a heap index.
pub type Value = i32;

/// The null reference, which is also integer zero.
pub const NULL: Value = 0;

/// Maximum nesting followed when rendering object graphs.
const RENDER_DEPTH: usize = 4;

/// Object with field registers, allocated for every non-native type.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualObject {
    pub type_descriptor: String,
    pub fields: HashMap<String, Value>,
}

impl VirtualObject {
    pub fn new(type_descriptor: &str) -> Self {
        Self {
            type_descriptor: type_descriptor.to_string(),
            fields: HashMap::new(),
        }
    }

    /// Reads a field, absent fields read as zero.
    pub fn field(&self, descriptor: &str) -> Value {
        self.fields.get(descriptor).copied().unwrap_or(NULL)
    }

    pub fn set_field(&mut self, descriptor: &str, value: Value) {
        self.fields.insert(descriptor.to_string(), value);
    }
}

/// Fixed-length array, the element type is encoded in the descriptor
/// (`[I`, `[Ljava/lang/String;`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayObject {
    pub type_descriptor: String,
    pub elements: Vec<Value>,
}

impl ArrayObject {
    pub fn new(type_descriptor: &str, elements: Vec<Value>) -> Self {
        Self {
            type_descriptor: type_descriptor.to_string(),
            elements,
        }
    }

    /// Whether elements are heap references rather than primitives.
    pub fn holds_references(&self) -> bool {
        matches!(self.type_descriptor.as_bytes().get(1), Some(b'L' | b'['))
    }

    pub fn get(&self, index: Value) -> Result<Value> {
        let slot = self.slot(index)?;
        Ok(self.elements[slot])
    }

    pub fn set(&mut self, index: Value, value: Value) -> Result<()> {
        let slot = self.slot(index)?;
        self.elements[slot] = value;
        Ok(())
    }

    fn slot(&self, index: Value) -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|slot| *slot < self.elements.len())
            .ok_or(RuntimeError::ArrayIndexOutOfBounds {
                index,
                length: self.elements.len(),
            })
    }
}

/// Heap objects. The variant set is closed: every type the interpreter
/// knows natively has its own case and everything else is a
/// [`VirtualObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Virtual(VirtualObject),
    String(String),
    /// UTF-16 code units, decoded when the builder is turned into a string.
    StringBuilder(Vec<u16>),
    ArrayList(Vec<Value>),
    HashMap(IndexMap<Value, Value>),
    HashSet(IndexSet<Value>),
    Array(ArrayObject),
}

impl Object {
    /// Returns the fully-qualified type descriptor of the object.
    pub fn type_descriptor(&self) -> &str {
        match self {
            Object::Virtual(object) => &object.type_descriptor,
            Object::String(_) => "Ljava/lang/String;",
            Object::StringBuilder(_) => "Ljava/lang/StringBuilder;",
            Object::ArrayList(_) => "Ljava/util/ArrayList;",
            Object::HashMap(_) => "Ljava/util/HashMap;",
            Object::HashSet(_) => "Ljava/util/HashSet;",
            Object::Array(array) => &array.type_descriptor,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Object::Virtual(_) => "object",
            Object::String(_) => "string",
            Object::StringBuilder(_) => "string builder",
            Object::ArrayList(_) => "array list",
            Object::HashMap(_) => "hash map",
            Object::HashSet(_) => "hash set",
            Object::Array(_) => "array",
        }
    }
}

/// Generates a shared and a mutable accessor for one object variant. Null
/// and wrong-variant accesses surface as `InvalidReference`.
macro_rules! accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $target:ty, $expected:literal) => {
        pub fn $get(&self, index: Value) -> Result<&$target> {
            match self.object(index)? {
                Object::$variant(inner) => Ok(inner),
                other => Err(RuntimeError::invalid_reference(
                    index,
                    format!(concat!("expected ", $expected, ", found {}"), other.kind()),
                )),
            }
        }

        pub fn $get_mut(&mut self, index: Value) -> Result<&mut $target> {
            match self.object_mut(index)? {
                Object::$variant(inner) => Ok(inner),
                other => Err(RuntimeError::invalid_reference(
                    index,
                    format!(concat!("expected ", $expected, ", found {}"), other.kind()),
                )),
            }
        }
    };
}

/// Append-only object store. Slot zero is reserved for null and objects are
/// never reclaimed within a session.
#[derive(Debug, Clone)]
pub struct Heap {
    objects: Vec<Option<Object>>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: vec![None],
        }
    }

    /// Appends `object` and returns its reference.
    pub fn allocate(&mut self, object: Object) -> Value {
        let index = self.objects.len() as Value;
        self.objects.push(Some(object));
        index
    }

    /// Number of slots, including the null slot.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when only the null slot is present.
    pub fn is_empty(&self) -> bool {
        self.objects.len() == 1
    }

    /// Drops every object, leaving only the null slot.
    pub fn clear(&mut self) {
        self.objects.truncate(1);
        self.objects[0] = None;
    }

    /// Dereferences `index`. Null yields `None`, out of range references are
    /// an error.
    pub fn lookup(&self, index: Value) -> Result<Option<&Object>> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.objects.get(slot))
            .map(Option::as_ref)
            .ok_or_else(|| RuntimeError::invalid_reference(index, "out of heap bounds"))
    }

    /// Dereferences a non-null reference.
    pub fn object(&self, index: Value) -> Result<&Object> {
        self.lookup(index)?
            .ok_or_else(|| RuntimeError::invalid_reference(index, "null dereference"))
    }

    pub fn object_mut(&mut self, index: Value) -> Result<&mut Object> {
        let slot = usize::try_from(index)
            .ok()
            .filter(|slot| *slot < self.objects.len())
            .ok_or_else(|| RuntimeError::invalid_reference(index, "out of heap bounds"))?;
        self.objects[slot]
            .as_mut()
            .ok_or_else(|| RuntimeError::invalid_reference(index, "null dereference"))
    }

    accessors!(virtual_object, virtual_object_mut, Virtual, VirtualObject, "object");
    accessors!(string, string_mut, String, String, "string");
    accessors!(string_builder, string_builder_mut, StringBuilder, Vec<u16>, "string builder");
    accessors!(array_list, array_list_mut, ArrayList, Vec<Value>, "array list");
    accessors!(hash_map, hash_map_mut, HashMap, IndexMap<Value, Value>, "hash map");
    accessors!(hash_set, hash_set_mut, HashSet, IndexSet<Value>, "hash set");
    accessors!(array, array_mut, Array, ArrayObject, "array");

    /// Renders the object referenced by `index` for diagnostics.
    pub fn render(&self, index: Value) -> String {
        let mut out = String::new();
        self.render_into(&mut out, index, RENDER_DEPTH);
        out
    }

    fn render_into(&self, out: &mut String, index: Value, depth: usize) {
        let object = match self.lookup(index) {
            Ok(Some(object)) => object,
            Ok(None) => {
                out.push_str("null");
                return;
            }
            Err(_) => {
                let _ = write!(out, "<dangling {index}>");
                return;
            }
        };
        if depth == 0 {
            let _ = write!(out, "<{}@{index}>", object.type_descriptor());
            return;
        }
        match object {
            Object::Virtual(object) => {
                let _ = write!(out, "{}{{", object.type_descriptor);
                let mut fields: Vec<_> = object.fields.iter().collect();
                fields.sort();
                for (i, (name, value)) in fields.into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{name}={value}");
                }
                out.push('}');
            }
            Object::String(text) => out.push_str(&escape_string(text)),
            Object::StringBuilder(units) => {
                let text = String::from_utf16_lossy(units);
                let _ = write!(out, "StringBuilder{{ {} }}", escape_string(&text));
            }
            Object::ArrayList(values) => {
                out.push_str("ArrayList[ ");
                self.render_references(out, values.iter().copied(), depth);
                out.push_str(" ]");
            }
            Object::HashSet(values) => {
                out.push_str("HashSet{ ");
                self.render_references(out, values.iter().copied(), depth);
                out.push_str(" }");
            }
            Object::HashMap(entries) => {
                out.push_str("HashMap{ ");
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(out, *key, depth - 1);
                    out.push('=');
                    self.render_into(out, *value, depth - 1);
                }
                out.push_str(" }");
            }
            Object::Array(array) => {
                out.push_str("[ ");
                if array.holds_references() {
                    self.render_references(out, array.elements.iter().copied(), depth);
                } else {
                    for (i, value) in array.elements.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{value}");
                    }
                }
                out.push_str(" ]");
            }
        }
    }

    fn render_references(
        &self,
        out: &mut String,
        values: impl Iterator<Item = Value>,
        depth: usize,
    ) {
        for (i, value) in values.enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.render_into(out, value, depth - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_append_only() {
        let mut heap = Heap::new();
        let a = heap.allocate(Object::String("a".into()));
        let b = heap.allocate(Object::String("b".into()));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert!(heap.lookup(NULL).unwrap().is_none());
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.allocate(Object::ArrayList(Vec::new())), 1);
    }

    #[test]
    fn out_of_bounds_and_wrong_variant_are_invalid_references() {
        let mut heap = Heap::new();
        let s = heap.allocate(Object::String("x".into()));
        assert!(matches!(
            heap.lookup(42),
            Err(RuntimeError::InvalidReference { index: 42, .. })
        ));
        assert!(matches!(
            heap.lookup(-1),
            Err(RuntimeError::InvalidReference { .. })
        ));
        assert!(heap.array(s).is_err());
        assert!(heap.string(NULL).is_err());
        assert_eq!(heap.string(s).unwrap(), "x");
    }

    #[test]
    fn virtual_fields_default_to_zero() {
        let mut object = VirtualObject::new("LFoo;");
        assert_eq!(object.field("LFoo;->x:I"), 0);
        object.set_field("LFoo;->x:I", 7);
        assert_eq!(object.field("LFoo;->x:I"), 7);
    }

    #[test]
    fn array_bounds_are_checked() {
        let mut array = ArrayObject::new("[I", vec![0; 2]);
        array.set(1, 9).unwrap();
        assert_eq!(array.get(1).unwrap(), 9);
        assert!(matches!(
            array.get(2),
            Err(RuntimeError::ArrayIndexOutOfBounds { index: 2, length: 2 })
        ));
        assert!(array.set(-1, 0).is_err());
    }

    #[test]
    fn render_follows_references() {
        let mut heap = Heap::new();
        let s = heap.allocate(Object::String("hi\n".into()));
        let arr = heap.allocate(Object::Array(ArrayObject::new(
            "[Ljava/lang/String;",
            vec![s, NULL],
        )));
        let ints = heap.allocate(Object::Array(ArrayObject::new("[I", vec![1, 2])));
        assert_eq!(heap.render(arr), "[ \"hi\\n\", null ]");
        assert_eq!(heap.render(ints), "[ 1, 2 ]");
    }

    #[test]
    fn render_terminates_on_cycles() {
        let mut heap = Heap::new();
        let list = heap.allocate(Object::ArrayList(Vec::new()));
        heap.array_list_mut(list).unwrap().push(list);
        let rendered = heap.render(list);
        assert!(rendered.contains("<Ljava/util/ArrayList;@1>"));
    }
}
