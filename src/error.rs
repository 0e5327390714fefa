use crate::instructions::Opcode;
use thiserror::Error;

/// Errors raised while turning assembler text into a [`Program`](crate::decoder::Program).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Mnemonic is not in the instruction catalog
    #[error("unknown instruction `{0}`")]
    UnknownInstruction(String),

    /// Bad operand syntax, out-of-range register index, or an operand of the wrong kind
    #[error("malformed operand `{text}`: {reason}")]
    MalformedOperand { text: String, reason: String },

    /// Operand count does not match the instruction signature
    #[error("`{mnemonic}` takes {expected} operands, found {found}")]
    Arity {
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub fn malformed(text: &str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedOperand {
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub fn at_line(self, line: usize) -> Self {
        DecodeError::Line {
            line,
            source: Box::new(self),
        }
    }
}

/// Errors reported by a [`Memory`](crate::memory::Memory) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("access of {width} bytes at {address:#x} is not mapped")]
    Unmapped { address: u64, width: usize },

    #[error("memory lock poisoned")]
    Poisoned,
}

/// What went wrong while executing one instruction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultKind {
    #[error("invalid write target {0}")]
    InvalidWriteTarget(String),

    #[error("invalid read source {0}")]
    InvalidReadSource(String),

    /// Catalog entry without a semantic function
    #[error("no handler for {0:?}")]
    ImplementationFault(Opcode),

    #[error("wait on {counter} <= {threshold} can never be satisfied (counter is {value})")]
    UnsatisfiableWait {
        counter: &'static str,
        value: u32,
        threshold: u32,
    },

    #[error("no instruction at pc {0:#x}")]
    InvalidProgramCounter(u64),

    #[error("register index {0} out of range")]
    RegisterOutOfRange(usize),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// A fault recorded against a wavefront, together with where it happened.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} (pc {pc:#x}, {opcode:?})")]
pub struct Fault {
    pub pc: u64,
    pub opcode: Option<Opcode>,
    pub kind: FaultKind,
}

/// Errors surfaced by the workgroup dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("wave {wave} faulted: {fault}")]
    Fault { wave: usize, fault: Fault },

    /// Every remaining wave of a workgroup is blocked and none can make progress
    #[error("workgroup {workgroup} deadlocked")]
    Deadlock { workgroup: usize },

    #[error("invalid launch manifest: {0}")]
    Manifest(String),

    #[error("worker thread panicked")]
    WorkerPanicked,

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type Result<T> = std::result::Result<T, FaultKind>;
