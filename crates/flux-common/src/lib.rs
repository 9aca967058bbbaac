//! Shared types for the OpenFlux framework
//!
//! Everything the other crates agree on lives here: the error taxonomy,
//! the runtime configuration struct, and CPU-list parsing.

pub mod config;
pub mod error;

pub use config::{Config, CpuSet};
pub use error::{FluxError, FluxResult};

/// Direction of a port binding (a port may carry one receiver and one
/// sender, never two of the same).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDir {
    /// Receive side of a port
    Rx,
    /// Transmit side of a port
    Tx,
}

impl std::fmt::Display for PortDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDir::Rx => write!(f, "rx"),
            PortDir::Tx => write!(f, "tx"),
        }
    }
}
