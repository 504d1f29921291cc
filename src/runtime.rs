//! Runtime module responsible for creating a new execution session and
//! running smali methods in it.
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use tracing::{debug, trace};

use crate::config::VmConfig;
use crate::error::{Result, RuntimeError};
use crate::heap::{Heap, Value, NULL};
use crate::interpreter::{next_instruction, Instruction, Interpreter};
use crate::natives::NativeTable;
use crate::operands::{parse_int, parse_register, RegisterToken};
use crate::profiler::Profiler;
use crate::program::{array_method_key, ClassPath, MethodRef, CLASS_INITIALIZER};
use crate::stack::{CallStack, Frame};
use crate::trace::{RecordEntry, TraceRecorder};

/// Lines of upcoming source shown per frame in a state dump.
const DUMP_SOURCE_LINES: usize = 3;

/// Observable side effects of a run, drained by the host after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// A static field was written. `rendered` is the integer value for
    /// primitive fields and a rendering of the object for reference fields.
    StaticWrite { field: String, rendered: String },
}

/// `Runtime` is one isolated interpreter session.
///
/// It owns everything a run can touch: the call stack, the heap, static
/// fields, the set of initialized classes and the return register. Nothing
/// is shared between sessions, so independent runtimes can coexist. Between
/// runs the host calls [`Runtime::reset`].
///
/// Execution is driven one instruction at a time by [`Runtime::step`]; the
/// instruction at the top frame's cursor is decoded, looked up in the
/// [`Interpreter`] table and handed to its handler, which may touch
/// registers, the heap and statics, push frames through
/// [`Runtime::invoke`] or move the cursor through the control-flow
/// handlers.
#[derive(Debug)]
pub struct Runtime {
    config: VmConfig,
    class_path: ClassPath,
    interpreter: Interpreter,
    natives: NativeTable,
    stack: CallStack,
    heap: Heap,
    static_fields: HashMap<String, Value>,
    initialized_classes: HashSet<String>,
    return_value: Value,
    trace: TraceRecorder,
    profiler: Profiler,
    changes: Vec<StateChange>,
}

impl Runtime {
    /// Creates a runtime with the standard opcode and native tables.
    pub fn new(config: VmConfig) -> Self {
        Self::with_natives(config, NativeTable::standard())
    }

    /// Creates a runtime that resolves natives through `natives`.
    pub fn with_natives(config: VmConfig, natives: NativeTable) -> Self {
        Self {
            class_path: ClassPath::new(&config.root, &config.extension),
            interpreter: Interpreter::new(),
            natives,
            stack: CallStack::new(config.max_call_depth),
            heap: Heap::new(),
            static_fields: HashMap::new(),
            initialized_classes: HashSet::new(),
            return_value: 0,
            trace: TraceRecorder::new(config.trace_depth),
            profiler: Profiler::new(config.hot_loop_threshold),
            changes: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    pub fn natives(&self) -> &NativeTable {
        &self.natives
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub(crate) fn profiler_mut(&mut self) -> &mut Profiler {
        &mut self.profiler
    }

    pub fn return_value(&self) -> Value {
        self.return_value
    }

    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = value;
    }

    /// Reads a static field, absent fields read as zero.
    pub fn static_field(&self, field: &str) -> Value {
        self.static_fields.get(field).copied().unwrap_or(NULL)
    }

    pub fn set_static_field(&mut self, field: &str, value: Value) {
        self.static_fields.insert(field.to_string(), value);
    }

    pub(crate) fn record_change(&mut self, change: StateChange) {
        self.changes.push(change);
    }

    /// Takes the state changes recorded since the last drain.
    pub fn drain_state_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn is_initialized(&self, class_name: &str) -> bool {
        self.initialized_classes.contains(class_name)
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn frame(&self) -> Result<&Frame> {
        self.stack.current()
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.stack.current_mut()
    }

    /// Last instruction the runtime attempted.
    pub fn last_instruction(&self) -> Option<&RecordEntry> {
        self.trace.last()
    }

    /// Reads the register named by `token` in the active frame.
    pub fn register(&self, token: &str) -> Result<Value> {
        self.frame()?.get(parse_register(token)?)
    }

    /// Writes the register named by `token` in the active frame.
    pub fn set_register(&mut self, token: &str, value: Value) -> Result<()> {
        let register = parse_register(token)?;
        self.frame_mut()?.set(register, value)
    }

    /// Reads `token` as a register when it is one and as an integer literal
    /// otherwise.
    pub fn operand_value(&self, token: &str) -> Result<Value> {
        match RegisterToken::parse(token) {
            Some(register) => self.frame()?.get(register),
            None => parse_int(token),
        }
    }

    /// Resolves `name` and starts executing it with `arguments`.
    ///
    /// Natives complete synchronously. Interpreted methods get a new frame
    /// and, unless the target is the class initializer itself, trigger the
    /// lazy initialization of their class, whose frame then runs first.
    pub fn invoke(&mut self, name: &str, arguments: &[Value]) -> Result<()> {
        if let Some(native) = self.natives.get(name) {
            trace!(method = name, "native call");
            return native(self, arguments);
        }
        if let Some(key) = array_method_key(name) {
            let native = self
                .natives
                .get(&key)
                .ok_or_else(|| RuntimeError::MethodNotFound(name.to_string()))?;
            return native(self, arguments);
        }

        let method = MethodRef::parse(name)?;
        self.stack.ensure_capacity()?;
        let body = self.class_path.open_method(name, &method, arguments.len())?;
        let frame = Frame::new(name, body.cursor, body.register_count, arguments)?;
        self.stack.push(frame)?;
        debug!(depth = self.stack.depth(), "entering {name}");

        if method.is_class_initializer() {
            self.initialized_classes.insert(method.class_name.to_string());
        } else {
            self.initialize_class(method.class_name)?;
        }
        Ok(())
    }

    /// Runs the class initializer of `class_name` unless it already ran.
    /// Returns whether an initializer frame was pushed. Classes without an
    /// initializer count as initialized.
    pub fn initialize_class(&mut self, class_name: &str) -> Result<bool> {
        if self.initialized_classes.contains(class_name) {
            return Ok(false);
        }
        let initializer = format!("L{class_name};->{CLASS_INITIALIZER}");
        match self.invoke(&initializer, &[]) {
            Ok(()) => Ok(true),
            Err(RuntimeError::MethodNotFound(_)) => {
                debug!("{class_name} has no class initializer");
                self.initialized_classes.insert(class_name.to_string());
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Leaves the active method, closing its source.
    pub fn return_from_method(&mut self) -> Result<()> {
        let frame = self.stack.pop()?;
        debug!(depth = self.stack.depth(), "leaving {}", frame.name());
        Ok(())
    }

    /// Executes the instruction at the active frame's cursor.
    pub fn step(&mut self) -> Result<()> {
        let steps = self.profiler.count_step();
        if let Some(limit) = self.config.max_steps {
            if steps > limit {
                return Err(RuntimeError::StepLimitExceeded(limit));
            }
        }

        let frame = self.stack.current_mut()?;
        let line = next_instruction(frame)?;
        self.trace
            .record(frame.name(), frame.cursor().line_number(), &line);
        trace!(method = frame.name(), "{line}");

        let instruction = Instruction::decode(&line);
        let handler = self.interpreter.handler(instruction.opcode)?;
        handler(self, instruction.operands)
    }

    /// Steps until the call stack is empty.
    pub fn run(&mut self) -> Result<()> {
        self.run_until(0)
    }

    fn run_until(&mut self, depth: usize) -> Result<()> {
        while self.stack.depth() > depth {
            self.step()?;
        }
        Ok(())
    }

    /// Initializes `class_name` and runs until the stack empties, which is
    /// how a class file gets exercised.
    pub fn run_class(&mut self, class_name: &str) -> Result<()> {
        self.initialize_class(class_name)?;
        self.run()
    }

    /// Invokes `name` and runs until it returns, yielding the return
    /// register.
    pub fn call(&mut self, name: &str, arguments: &[Value]) -> Result<Value> {
        let depth = self.stack.depth();
        self.invoke(name, arguments)?;
        self.run_until(depth)?;
        Ok(self.return_value)
    }

    /// Discards all session state: frames (closing their sources), statics,
    /// the heap, initialized classes and the return register.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.static_fields.clear();
        self.heap.clear();
        self.initialized_classes.clear();
        self.return_value = 0;
        self.trace.clear();
        self.profiler.reset();
        self.changes.clear();
    }

    /// Renders the last attempted instruction, the recent trace and, per
    /// active frame, its registers and upcoming source. Reads ahead on the
    /// frame cursors, so only call it on a run that is being abandoned.
    pub fn dump_state(&mut self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, " Last command:");
        match self.trace.last() {
            Some(entry) => {
                let _ = writeln!(out, "    {}", entry.instruction);
            }
            None => {
                let _ = writeln!(out, "    <none>");
            }
        }
        let _ = writeln!(out, " Recent instructions:");
        for entry in self.trace.entries() {
            let _ = writeln!(out, "    {entry}");
        }

        for frame in self.stack.iter_mut() {
            let _ = write!(out, "\n * {}\n   Registers:", frame.name());
            let registers = frame.registers();
            let used = registers
                .iter()
                .rposition(|value| *value != 0)
                .map_or(0, |last| last + 1);
            for (i, value) in registers[..used].iter().enumerate() {
                if i % 5 == 0 {
                    out.push_str("\n   ");
                }
                let _ = write!(out, "  {value:08x}");
            }
            let _ = writeln!(out, "\n   Source:");
            for _ in 0..DUMP_SOURCE_LINES {
                match frame.cursor_mut().read_line() {
                    Ok(Some(line)) => {
                        let _ = writeln!(out, "     | {line}");
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = writeln!(out, "     | <{err}>");
                        break;
                    }
                }
            }
            let _ = writeln!(out, "     ...");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_class(root: &Path, name: &str, body: &str) {
        let path = root.join(format!("{name}.smali"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn call_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        write_class(
            dir.path(),
            "Calc",
            ".class public LCalc;\n\
             .method public static add()I\n\
             \x20   .locals 3\n\
             \x20   const v0, 5\n\
             \x20   const v1, 0x3\n\
             \x20   add-int v2, v0, v1\n\
             \x20   return-object v2\n\
             .end method\n",
        );
        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        assert_eq!(runtime.call("LCalc;->add()I", &[]).unwrap(), 8);
        assert_eq!(runtime.depth(), 0);
        assert!(runtime.is_initialized("Calc"));
    }

    #[test]
    fn reset_clears_session() {
        let dir = tempfile::tempdir().unwrap();
        write_class(
            dir.path(),
            "Hold",
            ".class public LHold;\n\
             .method public static hold()V\n\
             \x20   .locals 1\n\
             \x20   const-string v0, \"x\"\n\
             \x20   sput-object v0, LHold;->s:Ljava/lang/String;\n\
             \x20   return-void\n\
             .end method\n",
        );
        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        runtime.invoke("LHold;->hold()V", &[]).unwrap();
        runtime.step().unwrap();
        runtime.step().unwrap();
        assert_eq!(runtime.depth(), 1);
        assert_eq!(runtime.static_field("LHold;->s:Ljava/lang/String;"), 1);
        runtime.set_return_value(9);

        runtime.reset();
        assert_eq!(runtime.depth(), 0);
        assert!(runtime.heap().is_empty());
        assert_eq!(runtime.static_field("LHold;->s:Ljava/lang/String;"), 0);
        assert!(!runtime.is_initialized("Hold"));
        assert_eq!(runtime.return_value(), 0);
        assert!(runtime.drain_state_changes().is_empty());
        assert!(runtime.last_instruction().is_none());
    }

    #[test]
    fn step_limit_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        write_class(
            dir.path(),
            "Spin",
            ".class public LSpin;\n\
             .method public static spin()V\n\
             \x20   .locals 0\n\
             \x20   :goto_0\n\
             \x20   goto :goto_0\n\
             .end method\n",
        );
        let config = VmConfig {
            max_steps: Some(50),
            ..VmConfig::with_root(dir.path())
        };
        let mut runtime = Runtime::new(config);
        assert!(matches!(
            runtime.call("LSpin;->spin()V", &[]),
            Err(RuntimeError::StepLimitExceeded(50))
        ));
        assert_eq!(runtime.profiler().steps(), 51);
    }

    #[test]
    fn dump_shows_frames_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        write_class(
            dir.path(),
            "Bad",
            ".class public LBad;\n\
             .method public static bad(I)V\n\
             \x20   .locals 1\n\
             \x20   const v0, 0x2a\n\
             \x20   frobnicate v0\n\
             \x20   return-void\n\
             .end method\n",
        );
        let mut runtime = Runtime::new(VmConfig::with_root(dir.path()));
        let err = runtime.call("LBad;->bad(I)V", &[7]).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownOpcode(ref op) if op == "frobnicate"));
        let dump = runtime.dump_state();
        assert!(dump.contains("frobnicate v0"));
        assert!(dump.contains(" * LBad;->bad(I)V"));
        assert!(dump.contains("0000002a  00000007"));
        assert!(dump.contains("| return-void"));
    }
}
