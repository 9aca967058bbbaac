//! Error types for OpenFlux
//!
//! One taxonomy for the whole framework. Build errors are returned
//! synchronously from graph construction; resource and packet errors are
//! counted on the fast path and never surface as `Err`; driver errors
//! abort the running graph.

use thiserror::Error;

use crate::PortDir;

/// OpenFlux error type
#[derive(Error, Debug)]
pub enum FluxError {
    /// Port index outside the probed range
    #[error("no such port: {0}")]
    NoSuchPort(u16),

    /// A port already carries a binding in this direction
    #[error("port {port} already bound for {dir}")]
    DuplicatePortBinding {
        /// Offending port index
        port: u16,
        /// Direction of the existing binding
        dir: PortDir,
    },

    /// A flow was created but never consumed by a downstream vertex
    #[error("flow {0} is not terminated")]
    UnterminatedFlow(usize),

    /// Graph contains a cycle
    #[error("flow graph is cyclic")]
    CyclicGraph,

    /// A builder operation was given an invalid argument
    #[error("invalid graph operation: {0}")]
    InvalidGraphOp(String),

    /// CPU list could not be parsed
    #[error("bad CPU list: {0}")]
    BadCpuList(String),

    /// Not enough cores for the scheduler plus at least one worker
    #[error("need at least 2 cores, got {0}")]
    TooFewCores(usize),

    /// Buffer pool has no free buffers
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// Packet bytes do not match the layout an accessor expected
    #[error("malformed packet")]
    MalformedPacket,

    /// `System::init` called while another system is live
    #[error("system already initialized")]
    AlreadyInitialized,

    /// Build-time operation attempted after `start`
    #[error("graph is frozen after start")]
    BuildAfterStart,

    /// Irrecoverable failure reported by a port driver
    #[error("driver error: {0}")]
    Driver(String),

    /// Pool starvation persisted beyond the grace window with no egress
    #[error("pipeline stalled: pool exhausted for {0} ms with no TX progress")]
    Stalled(u64),

    /// Classifier rule file could not be parsed
    #[error("rule parse error at line {line}: {reason}")]
    RuleParse {
        /// 1-based line number in the rule file
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for OpenFlux
pub type FluxResult<T> = Result<T, FluxError>;
