pub mod alu;
pub mod barrier;
pub mod bit;
pub mod buffer;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod execute;
pub mod instructions;
pub mod memory;
pub mod memory_ops;
pub mod operand;
pub mod processor;
pub mod register_file;
pub mod scalar_alu;
pub mod vector_alu;
pub mod wavefront;

pub use config::{LaunchGeometry, LaunchManifest, SimConfig};
pub use decoder::{Instruction, Program};
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{DecodeError, DispatchError, Fault, FaultKind, MemoryError};
pub use memory::{FlatMemory, Memory};
pub use processor::{ControlUnit, Processor, StepResult};
pub use wavefront::{Snapshot, WaveState, Wavefront};
