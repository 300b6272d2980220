//! Core-boundary error type.
//!
//! Most of the unusual states the simulator runs into (an unknown iform, an
//! instruction macro-fused into its predecessor) are not `Result` errors —
//! they are ordinary data the simulation proceeds through, surfaced via
//! per-instruction notes. `SimError` only covers conditions the core cannot
//! meaningfully simulate at all.

use thiserror::Error;

/// A fatal precondition failure at the core's boundary.
#[derive(Debug, Error)]
pub enum SimError {
    /// The instruction stream was empty; there is nothing to simulate.
    #[error("program contains no instructions")]
    EmptyProgram,

    /// The supplied `MicroArchConfig` is internally inconsistent.
    #[error("invalid microarchitecture configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of which invariant failed.
        reason: String,
    },
}
