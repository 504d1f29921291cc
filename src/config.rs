//! Runtime configuration.
//!
//! Limits and locations only; enforcement happens in the runtime.
use std::path::PathBuf;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Directory holding one source file per class.
    pub root: PathBuf,

    /// Extension of class source files, without the dot.
    pub extension: String,

    /// Maximum number of nested interpreted frames.
    pub max_call_depth: usize,

    /// Instruction budget per run, unbounded when `None`.
    pub max_steps: Option<u64>,

    /// Number of recently executed instructions kept for diagnostics.
    pub trace_depth: usize,

    /// Backward jumps to the same label before a loop is reported as hot.
    pub hot_loop_threshold: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            root: PathBuf::from("."),
            extension: "smali".to_string(),
            max_call_depth: 32,
            max_steps: None,
            trace_depth: 8,
            hot_loop_threshold: 10_000,
        }
    }
}

impl VmConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        VmConfig {
            root: root.into(),
            ..Self::default()
        }
    }
}
