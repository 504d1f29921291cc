//! Frames and the call stack.
use crate::error::{Result, RuntimeError};
use crate::heap::Value;
use crate::operands::RegisterToken;
use crate::source::SourceCursor;

/// Activation record for one interpreted method invocation.
///
/// Parameters occupy the trailing registers, so `p0` is register
/// `registers.len() - parameters`.
#[derive(Debug)]
pub struct Frame {
    name: String,
    cursor: SourceCursor,
    registers: Vec<Value>,
    parameters: usize,
}

impl Frame {
    /// Builds a frame with `register_count` registers, copying `arguments`
    /// into the trailing ones and zeroing the rest.
    pub fn new(
        name: &str,
        cursor: SourceCursor,
        register_count: usize,
        arguments: &[Value],
    ) -> Result<Self> {
        if arguments.len() > register_count {
            return Err(RuntimeError::MalformedDeclaration {
                method: name.to_string(),
                found: format!(
                    "{register_count} registers for {} arguments",
                    arguments.len()
                ),
            });
        }
        let mut registers = vec![0; register_count];
        registers[register_count - arguments.len()..].copy_from_slice(arguments);
        Ok(Self {
            name: name.to_string(),
            cursor,
            registers,
            parameters: arguments.len(),
        })
    }

    /// Qualified name of the method this frame executes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cursor(&self) -> &SourceCursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut SourceCursor {
        &mut self.cursor
    }

    pub fn registers(&self) -> &[Value] {
        &self.registers
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters
    }

    /// Resolves a register token to an index inside this frame.
    pub fn register_index(&self, token: RegisterToken) -> Result<usize> {
        token
            .index(self.registers.len(), self.parameters)
            .filter(|index| *index < self.registers.len())
            .ok_or_else(|| {
                RuntimeError::malformed(format!(
                    "register {token:?} out of range for {} ({} registers)",
                    self.name,
                    self.registers.len()
                ))
            })
    }

    pub fn get(&self, token: RegisterToken) -> Result<Value> {
        Ok(self.registers[self.register_index(token)?])
    }

    pub fn set(&mut self, token: RegisterToken, value: Value) -> Result<()> {
        let index = self.register_index(token)?;
        self.registers[index] = value;
        Ok(())
    }
}

/// Bounded LIFO of frames.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<Frame>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth),
            max_depth,
        }
    }

    /// Fails with `StackOverflow` when another frame would exceed the bound.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(RuntimeError::StackOverflow(self.max_depth));
        }
        Ok(())
    }

    pub fn push(&mut self, frame: Frame) -> Result<()> {
        self.ensure_capacity()?;
        self.frames.push(frame);
        Ok(())
    }

    /// Pops the top frame. Dropping it closes its source cursor.
    pub fn pop(&mut self) -> Result<Frame> {
        self.frames.pop().ok_or(RuntimeError::EmptyStack)
    }

    pub fn current(&self) -> Result<&Frame> {
        self.frames.last().ok_or(RuntimeError::EmptyStack)
    }

    pub fn current_mut(&mut self) -> Result<&mut Frame> {
        self.frames.last_mut().ok_or(RuntimeError::EmptyStack)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drops every frame, releasing their sources.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Frames from innermost to outermost.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        self.frames.iter_mut().rev()
    }
}
