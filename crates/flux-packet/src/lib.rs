//! Packet data model for OpenFlux
//!
//! Fixed-size buffers from a preallocated pool, addressed by index
//! handles that move through the pipeline; a zero-copy header view over
//! one buffer; and the pcap codec used by the capture ports.
//!
//! # Ownership discipline
//!
//! Every buffer is exclusively owned at every point in time by exactly
//! one of: the pool free list, a ring slot, or a vertex-local batch.
//! Ownership moves only by handle transfer. The pool is the single
//! authority for buffer memory.

pub mod buffer;
pub mod checksum;
pub mod packet;
pub mod pcap;
pub mod pool;

pub use buffer::{OffloadFlags, PacketBuffer, BUFFER_SIZE, DEFAULT_HEADROOM};
pub use packet::Packet;
pub use pcap::{PcapGlobalHeader, PcapReader, PcapRecord, PcapWriter};
pub use pool::{BufferHandle, BufferPool, PoolClient, MAGAZINE_SIZE};
