//! Interpreter for smali instruction listings.
//!
//! Instructions are read straight from the frame's source cursor: blank
//! lines, comments and label definitions are skipped, the opcode is the
//! first token with any `/size` hint removed, and the remaining text is
//! handed verbatim to the opcode's handler which parses its own operands.
use std::collections::HashMap;

use crate::error::{Result, RuntimeError};
use crate::flow;
use crate::ops;
use crate::operands::strip_comment;
use crate::runtime::Runtime;
use crate::stack::Frame;

/// Opcode handler, receives the runtime and the raw operand text.
pub type OpHandler = fn(&mut Runtime, &str) -> Result<()>;

/// A decoded instruction line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: &'a str,
    pub operands: &'a str,
}

impl<'a> Instruction<'a> {
    /// Splits an instruction line into opcode and operand text.
    pub fn decode(line: &'a str) -> Self {
        let line = strip_comment(line).trim();
        let (mnemonic, operands) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let opcode = mnemonic.split('/').next().unwrap_or(mnemonic);
        Self {
            opcode,
            operands: operands.trim(),
        }
    }
}

/// Reads forward from the frame's cursor to the next instruction line and
/// returns it trimmed.
pub fn next_instruction(frame: &mut Frame) -> Result<String> {
    loop {
        let line = frame
            .cursor_mut()
            .read_line()?
            .ok_or_else(|| RuntimeError::UnexpectedEndOfSource(frame.name().to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(':') {
            continue;
        }
        return Ok(line.to_string());
    }
}

/// Immutable table from opcode name to handler. Aliases are simply more
/// names bound to the same handler.
#[derive(Debug, Clone)]
pub struct Interpreter {
    handlers: HashMap<&'static str, OpHandler>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Builds the table with every supported opcode.
    pub fn new() -> Self {
        let mut interpreter = Self {
            handlers: HashMap::new(),
        };

        // Directives met while executing a method body.
        interpreter.register(
            &[".catch", ".catchall", ".line", ".prologue", ".local", ".restart", ".param"],
            ops::ignore,
        );
        interpreter.register(&[".end"], flow::end_directive);
        interpreter.register(&[".annotation"], flow::skip_annotation);
        interpreter.register(&["nop", "check-cast", "monitor-enter", "monitor-exit"], ops::ignore);

        // Constants and moves.
        interpreter.register(&["const"], ops::constant);
        interpreter.register(&["const-string"], ops::const_string);
        interpreter.register(&["move", "move-object"], ops::move_register);
        interpreter.register(&["move-result", "move-result-object"], ops::move_result);

        // Returns and branches.
        interpreter.register(&["return-void"], ops::return_void);
        interpreter.register(&["return", "return-object"], ops::return_value);
        interpreter.register(&["goto"], flow::goto);
        interpreter.register(&["if-eq"], flow::if_eq);
        interpreter.register(&["if-ne"], flow::if_ne);
        interpreter.register(&["if-lt"], flow::if_lt);
        interpreter.register(&["if-ge"], flow::if_ge);
        interpreter.register(&["if-gt"], flow::if_gt);
        interpreter.register(&["if-le"], flow::if_le);
        interpreter.register(&["if-eqz"], flow::if_eqz);
        interpreter.register(&["if-nez"], flow::if_nez);
        interpreter.register(&["if-ltz"], flow::if_ltz);
        interpreter.register(&["if-gez"], flow::if_gez);
        interpreter.register(&["if-gtz"], flow::if_gtz);
        interpreter.register(&["if-lez"], flow::if_lez);
        interpreter.register(&["packed-switch"], flow::packed_switch);
        interpreter.register(&["sparse-switch"], flow::sparse_switch);
        interpreter.register(&["fill-array-data"], flow::fill_array_data);

        // Invocation and allocation.
        interpreter.register(
            &[
                "invoke-direct",
                "invoke-static",
                "invoke-virtual",
                "invoke-super",
                "invoke-interface",
            ],
            ops::invoke,
        );
        interpreter.register(&["new-instance"], ops::new_instance);
        interpreter.register(&["new-array"], ops::new_array);
        interpreter.register(&["filled-new-array"], ops::filled_new_array);

        // Fields and arrays.
        interpreter.register(
            &["iget", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short"],
            ops::iget,
        );
        interpreter.register(
            &["iput", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short"],
            ops::iput,
        );
        interpreter.register(
            &["sget", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short"],
            ops::sget,
        );
        interpreter.register(
            &["sput", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short"],
            ops::sput,
        );
        interpreter.register(
            &["aget", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short"],
            ops::aget,
        );
        interpreter.register(
            &["aput", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short"],
            ops::aput,
        );
        interpreter.register(&["array-length"], ops::array_length);

        // Integer arithmetic.
        interpreter.register(&["add-int"], ops::add_int);
        interpreter.register(&["sub-int"], ops::sub_int);
        interpreter.register(&["rsub-int"], ops::rsub_int);
        interpreter.register(&["mul-int"], ops::mul_int);
        interpreter.register(&["div-int"], ops::div_int);
        interpreter.register(&["rem-int"], ops::rem_int);
        interpreter.register(&["and-int"], ops::and_int);
        interpreter.register(&["or-int"], ops::or_int);
        interpreter.register(&["xor-int"], ops::xor_int);
        interpreter.register(&["shl-int"], ops::shl_int);
        interpreter.register(&["shr-int"], ops::shr_int);
        interpreter.register(&["ushr-int"], ops::ushr_int);
        interpreter.register(&["neg-int"], ops::neg_int);
        interpreter.register(&["not-int"], ops::not_int);
        interpreter.register(&["int-to-char"], ops::int_to_char);
        interpreter.register(&["int-to-byte"], ops::int_to_byte);
        interpreter.register(&["int-to-short"], ops::int_to_short);

        interpreter
    }

    /// Binds every name in `opcodes` to `handler`.
    pub fn register(&mut self, opcodes: &[&'static str], handler: OpHandler) {
        for opcode in opcodes {
            self.handlers.insert(*opcode, handler);
        }
    }

    /// Looks up the handler for `opcode`.
    pub fn handler(&self, opcode: &str) -> Result<OpHandler> {
        self.handlers
            .get(opcode)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownOpcode(opcode.to_string()))
    }

    pub fn supports(&self, opcode: &str) -> bool {
        self.handlers.contains_key(opcode)
    }
}
