//! Runtime errors.
//!
//! Every variant is fatal to the run that raised it. There is no exception
//! model inside the VM, so the only recovery point is the batch driver which
//! reports the fault and resets the runtime.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::heap::Value;

/// Runtime result type.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// `RuntimeError` represents the possible failures that can occur while
/// resolving or executing smali code.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),

    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("class not found for {method}: {}", path.display())]
    ClassNotFound { method: String, path: PathBuf },

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("expected .locals or .registers after {method}, found `{found}`")]
    MalformedDeclaration { method: String, found: String },

    #[error("invalid reference {index}: {reason}")]
    InvalidReference { index: Value, reason: String },

    #[error("call stack exceeded {0} frames")]
    StackOverflow(usize),

    #[error("no active frame")]
    EmptyStack,

    #[error("unexpected end of source in {0}")]
    UnexpectedEndOfSource(String),

    #[error("label :{label} not found in {method}")]
    LabelNotFound { label: String, method: String },

    #[error("unsupported encoding requested: {0}")]
    UnsupportedEncoding(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: Value, length: usize },

    #[error("negative array size: {0}")]
    NegativeArraySize(Value),

    #[error("step limit of {0} instructions exceeded")]
    StepLimitExceeded(u64),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl RuntimeError {
    /// Shorthand for operand shape errors.
    pub fn malformed(what: impl Into<String>) -> Self {
        RuntimeError::MalformedInstruction(what.into())
    }

    /// Reference errors for wrong-variant or dangling heap accesses.
    pub fn invalid_reference(index: Value, reason: impl Into<String>) -> Self {
        RuntimeError::InvalidReference {
            index,
            reason: reason.into(),
        }
    }
}
