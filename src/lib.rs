//! A small interpreter for smali listings.
//!
//! Method bodies are executed straight from their text, one class per file
//! under a root directory. There is no verifier, no garbage collector and
//! no exception model; the goal is to tell whether a corpus of classes runs
//! to completion under a simple but faithful semantics.
pub mod config;
pub mod driver;
pub mod error;
pub mod flow;
pub mod heap;
pub mod interpreter;
pub mod natives;
pub mod operands;
pub mod ops;
pub mod profiler;
pub mod program;
pub mod runtime;
pub mod source;
pub mod stack;
pub mod trace;

pub use config::VmConfig;
pub use error::{Result, RuntimeError};
pub use runtime::{Runtime, StateChange};
