//! Port driver seam
//!
//! The kernel-bypass NIC layer is an external collaborator; the runtime
//! consumes it only through these poll-mode, batch-oriented traits. A
//! port splits into independent RX and TX halves at start so the two
//! ends can live on different cores without sharing.
//!
//! Two implementations ship with the framework: an in-memory port for
//! tests and demos, and a pcap port that replays a capture file on RX
//! and dumps to one on TX.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use flux_common::{FluxError, FluxResult};
use flux_packet::{BufferHandle, BufferPool, PcapReader, PcapWriter, PoolClient};

/// Largest port index the runtime will probe
pub const MAX_PORTS: usize = 16;

/// Split halves of a registered port, held between init and start
pub(crate) struct PortQueues {
    pub rx: Option<Box<dyn RxQueue>>,
    pub tx: Option<Box<dyn TxQueue>>,
}

/// A NIC port as the runtime sees it before start
pub trait PacketPort: Send {
    /// Split into poll-mode queue halves. Called once, at start.
    fn split(self: Box<Self>) -> (Box<dyn RxQueue>, Box<dyn TxQueue>);
}

/// Poll-mode receive queue
pub trait RxQueue: Send {
    /// Receive up to `max` frames into pool buffers, pushing their
    /// handles onto `out`. Returns the number received; never blocks.
    /// An `Err` is irrecoverable and stops the graph.
    fn rx_burst(
        &mut self,
        client: &mut PoolClient,
        out: &mut Vec<BufferHandle>,
        max: usize,
    ) -> FluxResult<usize>;
}

/// Poll-mode transmit queue
pub trait TxQueue: Send {
    /// Transmit a batch. Returns how many frames the queue accepted
    /// (a short write is backpressure); never blocks. Accepted frames
    /// have been serialized — the caller frees every handle afterwards.
    fn tx_burst(&mut self, pool: &BufferPool, handles: &[BufferHandle]) -> FluxResult<usize>;

    /// Push out anything buffered. Called while draining at stop.
    fn flush(&mut self) -> FluxResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// In-memory port
// ---------------------------------------------------------------------

/// In-memory port backed by bounded lock-free frame queues.
///
/// Frames injected through the [`MemoryPortHandle`] appear on RX;
/// transmitted frames can be drained from the same handle. The loopback
/// pair used by the demos is two memory ports wired tail-to-head.
pub struct MemoryPort {
    rx: Arc<ArrayQueue<Vec<u8>>>,
    tx: Arc<ArrayQueue<Vec<u8>>>,
}

impl MemoryPort {
    /// Port with `depth` frames of buffering per direction
    pub fn new(depth: usize) -> Self {
        Self {
            rx: Arc::new(ArrayQueue::new(depth)),
            tx: Arc::new(ArrayQueue::new(depth)),
        }
    }

    /// Test-side handle for injecting and draining frames
    pub fn handle(&self) -> MemoryPortHandle {
        MemoryPortHandle {
            rx: self.rx.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl PacketPort for MemoryPort {
    fn split(self: Box<Self>) -> (Box<dyn RxQueue>, Box<dyn TxQueue>) {
        (
            Box::new(MemoryRxQueue { frames: self.rx }),
            Box::new(MemoryTxQueue { frames: self.tx }),
        )
    }
}

/// Injector/collector side of a [`MemoryPort`]
#[derive(Clone)]
pub struct MemoryPortHandle {
    rx: Arc<ArrayQueue<Vec<u8>>>,
    tx: Arc<ArrayQueue<Vec<u8>>>,
}

impl MemoryPortHandle {
    /// Offer a frame to the port's receive side. `false` when the queue
    /// is full.
    pub fn inject(&self, frame: Vec<u8>) -> bool {
        self.rx.push(frame).is_ok()
    }

    /// Take one transmitted frame, oldest first
    pub fn pop_transmitted(&self) -> Option<Vec<u8>> {
        self.tx.pop()
    }

    /// Frames currently waiting on the transmit side
    pub fn transmitted_len(&self) -> usize {
        self.tx.len()
    }

    /// Frames still waiting to be received
    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }
}

struct MemoryRxQueue {
    frames: Arc<ArrayQueue<Vec<u8>>>,
}

impl RxQueue for MemoryRxQueue {
    fn rx_burst(
        &mut self,
        client: &mut PoolClient,
        out: &mut Vec<BufferHandle>,
        max: usize,
    ) -> FluxResult<usize> {
        let want = max.min(self.frames.len());
        if want == 0 {
            return Ok(0);
        }
        let mut batch = Vec::with_capacity(want);
        let got = match client.alloc_batch(&mut batch, want) {
            Ok(n) => n,
            // Exhaustion shows up in the pool's failure counter; frames
            // stay queued in the port until buffers free up.
            Err(FluxError::PoolExhausted) => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut filled = 0;
        for &h in &batch[..got] {
            match self.frames.pop() {
                Some(frame) => {
                    unsafe { client.pool().buffer_mut(h) }.fill(&frame);
                    out.push(h);
                    filled += 1;
                }
                None => break,
            }
        }
        client.free_batch(&batch[filled..got]);
        Ok(filled)
    }
}

struct MemoryTxQueue {
    frames: Arc<ArrayQueue<Vec<u8>>>,
}

impl TxQueue for MemoryTxQueue {
    fn tx_burst(&mut self, pool: &BufferPool, handles: &[BufferHandle]) -> FluxResult<usize> {
        for (i, &h) in handles.iter().enumerate() {
            let bytes = unsafe { pool.buffer(h) }.data().to_vec();
            if self.frames.push(bytes).is_err() {
                return Ok(i);
            }
        }
        Ok(handles.len())
    }
}

/// Two memory ports wired to each other: frames transmitted on one
/// appear on the other's receive side.
pub struct LoopbackPort;

impl LoopbackPort {
    /// Build a crossed pair with `depth` frames of buffering per link
    pub fn pair(depth: usize) -> (MemoryPort, MemoryPort) {
        let ab = Arc::new(ArrayQueue::new(depth));
        let ba = Arc::new(ArrayQueue::new(depth));
        (
            MemoryPort {
                rx: ba.clone(),
                tx: ab.clone(),
            },
            MemoryPort { rx: ab, tx: ba },
        )
    }
}

// ---------------------------------------------------------------------
// pcap port
// ---------------------------------------------------------------------

/// Port that replays a pcap file on RX and/or dumps frames to one on TX
pub struct PcapPort {
    reader: Option<PcapReader<BufReader<File>>>,
    writer: Option<PcapWriter<BufWriter<File>>>,
}

impl PcapPort {
    /// RX-only port replaying `path`; the global header is consumed and
    /// validated here.
    pub fn replay<P: AsRef<Path>>(path: P) -> FluxResult<Self> {
        let mut reader = PcapReader::new(BufReader::new(File::open(path)?));
        reader.read_global_header()?;
        Ok(Self {
            reader: Some(reader),
            writer: None,
        })
    }

    /// TX-only port dumping to `path`; the global header is written here.
    pub fn dump<P: AsRef<Path>>(path: P) -> FluxResult<Self> {
        let mut writer = PcapWriter::new(BufWriter::new(File::create(path)?));
        writer.write_global_header()?;
        Ok(Self {
            reader: None,
            writer: Some(writer),
        })
    }

    /// Replay `rx_path` and dump to `tx_path` through one port
    pub fn replay_dump<P: AsRef<Path>>(rx_path: P, tx_path: P) -> FluxResult<Self> {
        let mut reader = PcapReader::new(BufReader::new(File::open(rx_path)?));
        reader.read_global_header()?;
        let mut writer = PcapWriter::new(BufWriter::new(File::create(tx_path)?));
        writer.write_global_header()?;
        Ok(Self {
            reader: Some(reader),
            writer: Some(writer),
        })
    }
}

impl PacketPort for PcapPort {
    fn split(self: Box<Self>) -> (Box<dyn RxQueue>, Box<dyn TxQueue>) {
        (
            Box::new(PcapRxQueue {
                reader: self.reader,
            }),
            Box::new(PcapTxQueue {
                writer: self.writer,
            }),
        )
    }
}

struct PcapRxQueue {
    reader: Option<PcapReader<BufReader<File>>>,
}

impl RxQueue for PcapRxQueue {
    fn rx_burst(
        &mut self,
        client: &mut PoolClient,
        out: &mut Vec<BufferHandle>,
        max: usize,
    ) -> FluxResult<usize> {
        let mut reader = match self.reader.take() {
            Some(r) => r,
            None => return Ok(0),
        };
        let mut batch = Vec::with_capacity(max);
        let got = match client.alloc_batch(&mut batch, max) {
            Ok(n) => n,
            Err(FluxError::PoolExhausted) => {
                self.reader = Some(reader);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut filled = 0;
        let mut open = true;
        for &h in &batch[..got] {
            match reader.read_packet() {
                Ok(Some(rec)) => {
                    unsafe { client.pool().buffer_mut(h) }.fill(&rec.data);
                    out.push(h);
                    filled += 1;
                }
                Ok(None) => {
                    // Clean end of capture: the port goes quiet.
                    open = false;
                    break;
                }
                Err(e) => {
                    client.free_batch(&batch[filled..got]);
                    return Err(e.into());
                }
            }
        }
        client.free_batch(&batch[filled..got]);
        if open {
            self.reader = Some(reader);
        }
        Ok(filled)
    }
}

struct PcapTxQueue {
    writer: Option<PcapWriter<BufWriter<File>>>,
}

impl TxQueue for PcapTxQueue {
    fn tx_burst(&mut self, pool: &BufferPool, handles: &[BufferHandle]) -> FluxResult<usize> {
        let writer = match self.writer.as_mut() {
            // A replay-only port sinks whatever reaches its TX side.
            None => return Ok(handles.len()),
            Some(w) => w,
        };
        for &h in handles {
            let buf = unsafe { pool.buffer(h) };
            writer.write_packet(buf.data())?;
        }
        Ok(handles.len())
    }

    fn flush(&mut self) -> FluxResult<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_packet::BufferPool;

    #[test]
    fn test_memory_port_rx() {
        let port = MemoryPort::new(16);
        let handle = port.handle();
        handle.inject(vec![1, 2, 3]);
        handle.inject(vec![4, 5]);

        let pool = BufferPool::new(32);
        let mut client = PoolClient::new(pool.clone());
        let (mut rx, _tx) = Box::new(port).split();

        let mut out = Vec::new();
        let n = rx.rx_burst(&mut client, &mut out, 8).unwrap();
        assert_eq!(n, 2);
        assert_eq!(unsafe { pool.buffer(out[0]) }.data(), &[1, 2, 3]);
        assert_eq!(unsafe { pool.buffer(out[1]) }.data(), &[4, 5]);
        client.free_batch(&out);
    }

    #[test]
    fn test_memory_port_tx_backpressure() {
        let port = MemoryPort::new(2);
        let handle = port.handle();
        let (_rx, mut tx) = Box::new(port).split();

        let pool = BufferPool::new(8);
        let mut client = PoolClient::new(pool.clone());
        let mut batch = Vec::new();
        client.alloc_batch(&mut batch, 4).unwrap();
        for &h in &batch {
            unsafe { pool.buffer_mut(h) }.fill(&[0xEE]);
        }

        let accepted = tx.tx_burst(&pool, &batch).unwrap();
        assert_eq!(accepted, 2);
        assert_eq!(handle.transmitted_len(), 2);
        client.free_batch(&batch);
    }

    #[test]
    fn test_loopback_pair() {
        let (a, b) = LoopbackPort::pair(8);
        let b_handle = b.handle();

        let pool = BufferPool::new(8);
        let mut client = PoolClient::new(pool.clone());
        let (_a_rx, mut a_tx) = Box::new(a).split();
        let (mut b_rx, _b_tx) = Box::new(b).split();

        let mut batch = Vec::new();
        client.alloc_batch(&mut batch, 1).unwrap();
        unsafe { pool.buffer_mut(batch[0]) }.fill(&[9, 9, 9]);
        assert_eq!(a_tx.tx_burst(&pool, &batch).unwrap(), 1);
        client.free_batch(&batch);

        assert_eq!(b_handle.pending_rx(), 1);
        let mut out = Vec::new();
        assert_eq!(b_rx.rx_burst(&mut client, &mut out, 4).unwrap(), 1);
        assert_eq!(unsafe { pool.buffer(out[0]) }.data(), &[9, 9, 9]);
        client.free_batch(&out);
    }

    #[test]
    fn test_pcap_port_roundtrip() {
        let dir = std::env::temp_dir().join("flux-pcap-port-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.pcap");

        {
            let port = PcapPort::dump(&path).unwrap();
            let (_rx, mut tx) = Box::new(port).split();
            let pool = BufferPool::new(8);
            let mut client = PoolClient::new(pool.clone());
            let mut batch = Vec::new();
            client.alloc_batch(&mut batch, 3).unwrap();
            for (i, &h) in batch.iter().enumerate() {
                unsafe { pool.buffer_mut(h) }.fill(&vec![i as u8; 60 + i]);
            }
            tx.tx_burst(&pool, &batch).unwrap();
            tx.flush().unwrap();
            client.free_batch(&batch);
        }

        let port = PcapPort::replay(&path).unwrap();
        let (mut rx, _tx) = Box::new(port).split();
        let pool = BufferPool::new(8);
        let mut client = PoolClient::new(pool.clone());
        let mut out = Vec::new();
        assert_eq!(rx.rx_burst(&mut client, &mut out, 8).unwrap(), 3);
        for (i, &h) in out.iter().enumerate() {
            assert_eq!(unsafe { pool.buffer(h) }.data(), &vec![i as u8; 60 + i][..]);
        }
        client.free_batch(&out);
        // A second burst reports the quiet port, not an error
        out.clear();
        assert_eq!(rx.rx_burst(&mut client, &mut out, 8).unwrap(), 0);

        std::fs::remove_file(&path).ok();
    }
}
