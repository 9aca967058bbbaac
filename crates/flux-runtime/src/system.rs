//! System facade
//!
//! The only surface example programs touch: `init`, the build-time
//! graph operations, and `start`. One system may be live per process;
//! dropping it releases the guard so tests can run graphs serially.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flux_common::{Config, CpuSet, FluxError, FluxResult};
use flux_packet::BufferPool;

use crate::callbacks::{DropHandler, Generator, PacketHandler, Separator, Splitter};
use crate::driver::{PacketPort, PortQueues, MAX_PORTS};
use crate::graph::{Flow, GraphBuilder};
use crate::scheduler::{self, SchedulerParams};
use crate::stats::{PipelineSnapshot, StatsRegistry};
use crate::DEFAULT_POOL_CAPACITY;

static SYSTEM_LIVE: AtomicBool = AtomicBool::new(false);

/// The framework instance: buffer pool, port registry, graph under
/// construction, and the scheduler entry point
pub struct System {
    cpu: CpuSet,
    hw_tx_checksum: bool,
    pool: Arc<BufferPool>,
    ports: Vec<PortQueues>,
    builder: Option<GraphBuilder>,
    stop: Arc<AtomicBool>,
    registry: Arc<StatsRegistry>,
}

impl System {
    /// Initialize the framework: resolve the core set and preallocate
    /// the buffer pool. Errors with `AlreadyInitialized` — leaving no
    /// trace — if another `System` is live in this process.
    pub fn init(config: Config) -> FluxResult<Self> {
        // Validate before claiming the process guard so a failed init
        // leaves state untouched.
        let cpu = config.cpu_set()?;
        cpu.split_scheduler()?;
        if SYSTEM_LIVE.swap(true, Ordering::SeqCst) {
            return Err(FluxError::AlreadyInitialized);
        }
        let capacity = config.pool_capacity.unwrap_or(DEFAULT_POOL_CAPACITY);
        tracing::info!(
            cores = cpu.len(),
            pool = capacity,
            hw_tx_checksum = config.hw_tx_checksum,
            "system initialized"
        );
        Ok(Self {
            cpu,
            hw_tx_checksum: config.hw_tx_checksum,
            pool: BufferPool::new(capacity),
            ports: Vec::new(),
            builder: Some(GraphBuilder::default()),
            stop: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(StatsRegistry::default()),
        })
    }

    /// Whether the TX path should request hardware checksum offload
    pub fn hw_tx_checksum(&self) -> bool {
        self.hw_tx_checksum
    }

    /// Probe a port into the registry. Returns its index for the
    /// builder operations.
    pub fn register_port(&mut self, port: Box<dyn PacketPort>) -> FluxResult<u16> {
        if self.builder.is_none() {
            return Err(FluxError::BuildAfterStart);
        }
        if self.ports.len() >= MAX_PORTS {
            return Err(FluxError::Config(format!("port limit {MAX_PORTS} reached")));
        }
        let (rx, tx) = port.split();
        self.ports.push(PortQueues {
            rx: Some(rx),
            tx: Some(tx),
        });
        Ok((self.ports.len() - 1) as u16)
    }

    fn builder(&mut self) -> FluxResult<&mut GraphBuilder> {
        self.builder.as_mut().ok_or(FluxError::BuildAfterStart)
    }

    /// Bind a NIC RX queue; produces the flow of received packets
    pub fn add_receiver(&mut self, port: u16) -> FluxResult<Flow> {
        let registered = self.ports.len();
        self.builder()?.add_receiver(port, registered)
    }

    /// Add a clocked packet source aiming at `rate` packets per second
    pub fn add_generator<G: Generator>(&mut self, gen: G, rate: u64) -> FluxResult<Flow> {
        self.builder()?.add_generator(Box::new(gen), rate)
    }

    /// In-place per-packet mutation
    pub fn add_handler<H: PacketHandler>(&mut self, flow: Flow, f: H) -> FluxResult<Flow> {
        self.builder()?.add_handler(flow, Box::new(f))
    }

    /// Per-packet mutation with a keep/drop decision
    pub fn add_drop_handler<H: DropHandler>(&mut self, flow: Flow, f: H) -> FluxResult<Flow> {
        self.builder()?.add_drop_handler(flow, Box::new(f))
    }

    /// Fan a flow out into `ways` flows by callback-chosen index.
    /// Packet order is preserved per output index.
    pub fn add_splitter<S: Splitter>(
        &mut self,
        flow: Flow,
        f: S,
        ways: usize,
    ) -> FluxResult<Vec<Flow>> {
        self.builder()?.add_splitter(flow, Box::new(f), ways)
    }

    /// Two-way split: returns (accepted, rejected) flows
    pub fn add_separator<S: Separator>(&mut self, flow: Flow, f: S) -> FluxResult<(Flow, Flow)> {
        self.builder()?.add_separator(flow, Box::new(f))
    }

    /// Join several flows into one; order across inputs is unspecified
    pub fn add_merger(&mut self, flows: Vec<Flow>) -> FluxResult<Flow> {
        self.builder()?.add_merger(flows)
    }

    /// Bind a flow to a NIC TX queue
    pub fn add_sender(&mut self, flow: Flow, port: u16) -> FluxResult<()> {
        let registered = self.ports.len();
        self.builder()?.add_sender(flow, port, registered)
    }

    /// Terminate a flow, freeing its packets back to the pool
    pub fn add_stopper(&mut self, flow: Flow) -> FluxResult<()> {
        self.builder()?.add_stopper(flow)
    }

    /// Validate the graph, launch the workers and run the scheduler.
    /// Blocks until a stop is requested or a worker fails fatally. The
    /// graph is frozen: build operations after this return
    /// `BuildAfterStart`.
    pub fn start(&mut self) -> FluxResult<()> {
        let builder = self.builder.take().ok_or(FluxError::BuildAfterStart)?;
        let graph = builder.finish()?;
        let ports = std::mem::take(&mut self.ports);
        scheduler::run(
            graph,
            ports,
            self.pool.clone(),
            &self.cpu,
            self.registry.clone(),
            self.stop.clone(),
            SchedulerParams::default(),
        )
    }

    /// Cloneable, signal-safe stop trigger. The scheduler observes it
    /// at its next sampling tick, drains rings, flushes TX and returns
    /// from `start`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
        }
    }

    /// Live view of the pipeline counters
    pub fn stats(&self) -> StatsHandle {
        StatsHandle {
            registry: self.registry.clone(),
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        SYSTEM_LIVE.store(false, Ordering::SeqCst);
    }
}

/// Requests a clean stop of a running graph. Only touches one atomic,
/// so it may be called from a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the stop
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Cloneable view of the pipeline counters, valid during and after the
/// run
#[derive(Clone)]
pub struct StatsHandle {
    registry: Arc<StatsRegistry>,
}

impl StatsHandle {
    /// Aggregate the per-core counters
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.registry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // The process-wide init guard is the thing under test here, so the
    // tests themselves must not race each other.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn config() -> Config {
        Config {
            cpu_cores_number: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_double_init_rejected() {
        let _guard = SERIAL.lock();
        let first = System::init(config()).unwrap();
        let second = System::init(config());
        assert!(matches!(second, Err(FluxError::AlreadyInitialized)));
        drop(first);
        // Serial re-init after drop works
        let third = System::init(config());
        assert!(third.is_ok());
    }

    #[test]
    fn test_failed_init_leaves_no_guard() {
        let _guard = SERIAL.lock();
        let bad = System::init(Config {
            cpu_list: Some("not-a-list".into()),
            ..Default::default()
        });
        assert!(matches!(bad, Err(FluxError::BadCpuList(_))));
        // The failed init must not have claimed the process guard.
        let ok = System::init(config());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_one_core_rejected() {
        let _guard = SERIAL.lock();
        let bad = System::init(Config {
            cpu_cores_number: Some(1),
            ..Default::default()
        });
        assert!(matches!(bad, Err(FluxError::TooFewCores(1))));
    }

    #[test]
    fn test_build_ops_check_ports() {
        let _guard = SERIAL.lock();
        let mut sys = System::init(config()).unwrap();
        assert!(matches!(
            sys.add_receiver(0),
            Err(FluxError::NoSuchPort(0))
        ));
    }
}
