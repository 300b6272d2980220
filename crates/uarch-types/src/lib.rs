//! Static data model shared by every pipeline stage: instruction templates,
//! operand identity, microarchitecture configuration, and the event/error
//! types the core emits. Contains no simulation behavior.

pub mod config;
pub mod error;
pub mod events;
pub mod instruction;
pub mod operand;

pub use config::{MicroArchConfig, MoveEliminationSlots, Port};
pub use error::SimError;
pub use events::{EventLog, Stage, StallReason};
pub use instruction::{Instr, UopProperties};
pub use operand::{FlagOperand, MemAddr, MemOperand, Operand, PseudoOperand, RegOperand, RenameKey};
