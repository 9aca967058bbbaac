//! OpenFlux runtime
//!
//! The core of the framework: applications describe a packet-processing
//! pipeline as a directed graph of typed flows, and the runtime executes
//! it as batch kernels over a fixed set of pinned cores, connected by
//! single-producer/single-consumer rings of buffer handles.
//!
//! ```no_run
//! use flux_common::Config;
//! use flux_runtime::{System, driver::LoopbackPort};
//!
//! # fn main() -> flux_common::FluxResult<()> {
//! let mut system = System::init(Config::default())?;
//! let (a, b) = LoopbackPort::pair(1024);
//! let port0 = system.register_port(Box::new(a))?;
//! let _port1 = system.register_port(Box::new(b))?;
//!
//! let flow = system.add_receiver(port0)?;
//! let flow = system.add_handler(flow, |pkt: &mut flux_packet::Packet<'_>| {
//!     pkt.parse_l3();
//! })?;
//! system.add_sender(flow, port0)?;
//! system.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! The graph is frozen at [`System::start`]; from then on the scheduler
//! owns every vertex-to-core assignment decision.

pub mod callbacks;
pub mod driver;
pub mod graph;
pub mod ring;
pub mod stats;
pub mod system;

pub(crate) mod scheduler;
pub(crate) mod vertex;

pub use callbacks::{DropHandler, Generator, PacketHandler, Separator, Splitter, Verdict};
pub use graph::Flow;
pub use ring::SpscRing;
pub use stats::PipelineSnapshot;
pub use system::{StatsHandle, StopHandle, System};

/// Initial batch target per kernel pass
pub const BATCH_INITIAL: usize = 32;
/// Smallest batch target the scheduler will assign
pub const BATCH_MIN: usize = 1;
/// Largest batch target the scheduler will assign
pub const BATCH_MAX: usize = 256;
/// Buffers preallocated by `System::init`
pub const DEFAULT_POOL_CAPACITY: usize = 16384;
