//! Core assignment, load shifting and lifecycle
//!
//! The scheduler owns every vertex-to-core decision after start. Worker
//! threads run their assigned clones in a tight busy-poll loop and only
//! learn about reassignment through control messages applied at batch
//! boundaries. The scheduler thread samples ring occupancy, per-vertex
//! packets-per-poll and per-core busy fractions at a fixed interval and
//! applies at most one topology action per tick:
//!
//! - a vertex whose downstream ring stays near-full while its cores are
//!   saturated is cloned onto the least-busy free core; the upstream
//!   feed spreads round-robin over the grown ring matrix
//! - two adjacent underutilized handler vertices are fused into one
//!   inner loop, eliminating the ring hop between them
//! - each clone group's batch target moves within [BATCH_MIN, BATCH_MAX]
//!   as queues lengthen or shorten
//!
//! All logging happens here, never on the packet path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use flux_common::{CpuSet, FluxError, FluxResult};
use flux_packet::{BufferPool, PoolClient};

use crate::callbacks::{DropHandler, PacketHandler, Separator, Splitter};
use crate::driver::PortQueues;
use crate::graph::{BuiltGraph, VertexDef};
use crate::ring::SpscRing;
use crate::stats::{CoreStats, StatsRegistry, VertexStats};
use crate::vertex::{run_task, CloneTask, EdgeRx, EdgeShared, EdgeTx, Kernel, Pacer, RingMatrix, Scratch};
use crate::{BATCH_INITIAL, BATCH_MAX, BATCH_MIN};

/// Tunables of the sampling loop
pub(crate) struct SchedulerParams {
    pub sample_interval: Duration,
    /// Edge occupancy ratio counting as "near-full"
    pub near_full_ratio: f64,
    /// Busy fraction above which a core counts as saturated
    pub saturated_busy: f64,
    /// Busy fraction below which a core counts as free
    pub free_busy: f64,
    /// Consecutive near-full ticks before cloning
    pub clone_streak: u32,
    /// Consecutive quiet ticks before fusing
    pub fuse_streak: u32,
    /// Packets-per-poll below `ratio * batch` counts as quiet
    pub quiet_ppp_ratio: f64,
    /// Ticks of pool exhaustion with zero egress before going fatal
    pub grace_ticks: u32,
    /// How long to wait for rings to empty at stop
    pub drain_deadline: Duration,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(100),
            near_full_ratio: 0.75,
            saturated_busy: 0.90,
            free_busy: 0.50,
            clone_streak: 3,
            fuse_streak: 5,
            quiet_ppp_ratio: 0.25,
            grace_ticks: 50,
            drain_deadline: Duration::from_secs(1),
        }
    }
}

/// Ring slots per edge, derived from the batch target
fn ring_capacity(batch: usize) -> usize {
    (batch * 16).next_power_of_two().max(512)
}

#[cfg(target_os = "linux")]
pub(crate) fn pin_to_core(core: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            tracing::warn!(core, "sched_setaffinity failed; running unpinned");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_to_core(_core: usize) {}

// ---------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------

pub(crate) enum WorkerMsg {
    Install { slot: usize, task: Box<CloneTask> },
    Remove { slot: usize },
}

struct Worker {
    core: usize,
    tasks: Vec<Option<CloneTask>>,
    ctrl: Receiver<WorkerMsg>,
    client: PoolClient,
    stats: Arc<CoreStats>,
    halt: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<FluxError>>>,
}

impl Worker {
    fn apply(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Install { slot, task } => {
                if slot >= self.tasks.len() {
                    self.tasks.resize_with(slot + 1, || None);
                }
                self.tasks[slot] = Some(*task);
            }
            WorkerMsg::Remove { slot } => {
                if slot < self.tasks.len() {
                    self.tasks[slot] = None;
                }
            }
        }
    }

    fn run(mut self) {
        pin_to_core(self.core);
        let mut scratch = Scratch::default();
        let mut idle_streak = 0u32;

        while !self.halt.load(Ordering::Relaxed) {
            // Reassignment lands only here, between batches.
            while let Ok(msg) = self.ctrl.try_recv() {
                self.apply(msg);
            }
            let draining = self.draining.load(Ordering::Relaxed);
            let mut busy = false;
            for i in 0..self.tasks.len() {
                let Some(task) = self.tasks[i].as_mut() else {
                    continue;
                };
                match run_task(task, &mut self.client, &self.stats, draining, &mut scratch) {
                    Ok(moved) => busy |= moved,
                    Err(e) => {
                        tracing::error!(core = self.core, error = %e, "kernel failed; stopping graph");
                        let mut fatal = self.fatal.lock();
                        if fatal.is_none() {
                            *fatal = Some(e);
                        }
                        self.tasks[i] = None;
                    }
                }
            }
            self.stats.total_polls.fetch_add(1, Ordering::Relaxed);
            if busy {
                self.stats.busy_polls.fetch_add(1, Ordering::Relaxed);
                idle_streak = 0;
            } else {
                idle_streak = idle_streak.saturating_add(1);
                if idle_streak > 256 {
                    thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }
}

struct WorkerHandle {
    core: usize,
    ctrl: Sender<WorkerMsg>,
    stats: Arc<CoreStats>,
    join: Option<JoinHandle<()>>,
    next_slot: usize,
    last_polls: (u64, u64),
    busy_frac: f64,
}

impl WorkerHandle {
    fn refresh_busy(&mut self) {
        let busy = self.stats.busy_polls.load(Ordering::Relaxed);
        let total = self.stats.total_polls.load(Ordering::Relaxed);
        let d_busy = busy - self.last_polls.0;
        let d_total = total - self.last_polls.1;
        self.last_polls = (busy, total);
        self.busy_frac = if d_total == 0 {
            0.0
        } else {
            d_busy as f64 / d_total as f64
        };
    }
}

// ---------------------------------------------------------------------
// Clone groups
// ---------------------------------------------------------------------

/// Prototype state a cloneable vertex forks new kernels from
enum KernelProto {
    Handle(Box<dyn PacketHandler>),
    HandleDrop(Box<dyn DropHandler>),
    Split(Box<dyn Splitter>),
    Separate(Box<dyn Separator>),
}

impl KernelProto {
    fn fork_kernel(&self) -> Kernel {
        match self {
            KernelProto::Handle(f) => Kernel::Handle { f: f.fork() },
            KernelProto::HandleDrop(f) => Kernel::HandleDrop { f: f.fork() },
            KernelProto::Split(f) => Kernel::Split { f: f.fork() },
            KernelProto::Separate(f) => Kernel::Separate { f: f.fork() },
        }
    }

    fn is_handle(&self) -> bool {
        matches!(self, KernelProto::Handle(_))
    }
}

struct ClonePlace {
    worker: usize,
    slot: usize,
}

struct CloneGroup {
    vertex: usize,
    proto: Option<KernelProto>,
    clones: Vec<ClonePlace>,
    batch: Arc<AtomicUsize>,
    vstats: Arc<VertexStats>,
    last_vstats: (u64, u64),
    ppp: f64,
    /// Group was coalesced into an upstream neighbor
    fused_away: bool,
    /// Group absorbed its downstream neighbor; no further cloning
    fused_host: bool,
}

impl CloneGroup {
    fn cloneable(&self) -> bool {
        self.proto.is_some() && !self.fused_host && !self.fused_away
    }
}

struct FusePlan {
    edge: usize,
    up: usize,
    down: usize,
}

// ---------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------

pub(crate) struct Scheduler {
    params: SchedulerParams,
    pool: Arc<BufferPool>,
    registry: Arc<StatsRegistry>,
    workers: Vec<WorkerHandle>,
    groups: Vec<CloneGroup>,
    edges: Vec<Arc<EdgeShared>>,
    /// Per-edge consecutive near-full tick count
    hot_streak: Vec<u32>,
    /// Per-edge consecutive quiet tick count
    quiet_streak: Vec<u32>,
    edge_retired: Vec<bool>,
    halt: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<FluxError>>>,
}

/// Run the graph to completion. Blocks until the stop flag is observed
/// or a worker reports a fatal error.
pub(crate) fn run(
    graph: BuiltGraph,
    ports: Vec<PortQueues>,
    pool: Arc<BufferPool>,
    cpu: &CpuSet,
    registry: Arc<StatsRegistry>,
    stop: Arc<AtomicBool>,
    params: SchedulerParams,
) -> FluxResult<()> {
    let (sched_core, worker_cores) = cpu.split_scheduler()?;
    pin_to_core(sched_core);

    let halt = Arc::new(AtomicBool::new(false));
    let draining = Arc::new(AtomicBool::new(false));
    let fatal: Arc<Mutex<Option<FluxError>>> = Arc::new(Mutex::new(None));

    let mut workers = Vec::with_capacity(worker_cores.len());
    for &core in worker_cores {
        let (tx, rx) = unbounded();
        let stats = registry.register_core();
        let worker = Worker {
            core,
            tasks: Vec::new(),
            ctrl: rx,
            client: PoolClient::new(pool.clone()),
            stats: stats.clone(),
            halt: halt.clone(),
            draining: draining.clone(),
            fatal: fatal.clone(),
        };
        let join = thread::Builder::new()
            .name(format!("flux-worker-{core}"))
            .spawn(move || worker.run())
            .map_err(|e| FluxError::Driver(format!("spawn failed: {e}")))?;
        workers.push(WorkerHandle {
            core,
            ctrl: tx,
            stats,
            join: Some(join),
            next_slot: 0,
            last_polls: (0, 0),
            busy_frac: 0.0,
        });
    }

    let mut scheduler = Scheduler {
        params,
        pool,
        registry,
        workers,
        groups: Vec::new(),
        edges: Vec::new(),
        hot_streak: Vec::new(),
        quiet_streak: Vec::new(),
        edge_retired: Vec::new(),
        halt,
        draining,
        fatal,
    };
    scheduler.lay_out(graph, ports)?;
    tracing::info!(
        workers = scheduler.workers.len(),
        vertices = scheduler.groups.len(),
        edges = scheduler.edges.len(),
        "graph started"
    );
    scheduler.sample_loop(stop)
}

impl Scheduler {
    /// Initial layout: one clone per vertex, vertices spread round-robin
    /// over the worker cores in topological order, one ring per edge.
    fn lay_out(&mut self, graph: BuiltGraph, mut ports: Vec<PortQueues>) -> FluxResult<()> {
        let n_vertices = graph.vertices.len();
        self.edges = graph
            .flows
            .iter()
            .map(|f| {
                EdgeShared::new(
                    ring_capacity(BATCH_INITIAL),
                    f.producer.0,
                    f.consumer.expect("validated"),
                )
            })
            .collect();
        self.hot_streak = vec![0; self.edges.len()];
        self.quiet_streak = vec![0; self.edges.len()];
        self.edge_retired = vec![false; self.edges.len()];

        // Deconstruct vertex defs into (kernel, proto) pairs
        let mut kernels: Vec<Option<(Kernel, Option<KernelProto>)>> =
            Vec::with_capacity(n_vertices);
        let mut adjacency = Vec::with_capacity(n_vertices);
        for node in graph.vertices {
            adjacency.push((node.inputs.clone(), node.outputs.clone()));
            let built = match node.def {
                VertexDef::Receive { port } => {
                    let rx = ports[port as usize]
                        .rx
                        .take()
                        .ok_or_else(|| FluxError::Driver(format!("port {port}: no rx queue")))?;
                    (Kernel::Receive { rx }, None)
                }
                VertexDef::Transmit { port } => {
                    let tx = ports[port as usize]
                        .tx
                        .take()
                        .ok_or_else(|| FluxError::Driver(format!("port {port}: no tx queue")))?;
                    (Kernel::Transmit { tx }, None)
                }
                VertexDef::Generate { gen, rate } => (
                    Kernel::Generate {
                        f: gen,
                        pacer: Pacer::new(rate),
                    },
                    None,
                ),
                VertexDef::Handle { f } => {
                    let proto = KernelProto::Handle(f);
                    (proto.fork_kernel(), Some(proto))
                }
                VertexDef::HandleDrop { f } => {
                    let proto = KernelProto::HandleDrop(f);
                    (proto.fork_kernel(), Some(proto))
                }
                VertexDef::Split { f, .. } => {
                    let proto = KernelProto::Split(f);
                    (proto.fork_kernel(), Some(proto))
                }
                VertexDef::Separate { f } => {
                    let proto = KernelProto::Separate(f);
                    (proto.fork_kernel(), Some(proto))
                }
                VertexDef::Merge => (Kernel::Merge, None),
                VertexDef::Stop => (Kernel::Stop, None),
            };
            kernels.push(Some(built));
        }

        // One group per vertex; install the first clone
        self.groups = (0..n_vertices)
            .map(|v| CloneGroup {
                vertex: v,
                proto: None,
                clones: Vec::new(),
                batch: Arc::new(AtomicUsize::new(BATCH_INITIAL)),
                vstats: Arc::new(VertexStats::default()),
                last_vstats: (0, 0),
                ppp: 0.0,
                fused_away: false,
                fused_host: false,
            })
            .collect();

        for (pos, &v) in graph.order.iter().enumerate() {
            let (kernel, proto) = kernels[v].take().expect("each vertex built once");
            self.groups[v].proto = proto;
            let (inputs, outputs) = &adjacency[v];
            let task = CloneTask {
                group: v,
                kernel,
                inputs: inputs
                    .iter()
                    .map(|&f| EdgeRx::new(self.edges[f].clone(), 0))
                    .collect(),
                outputs: outputs
                    .iter()
                    .map(|&f| EdgeTx::new(self.edges[f].clone(), 0))
                    .collect(),
                batch: self.groups[v].batch.clone(),
                vstats: self.groups[v].vstats.clone(),
            };
            let worker = pos % self.workers.len();
            let slot = self.install(worker, task);
            self.groups[v].clones.push(ClonePlace { worker, slot });
        }
        Ok(())
    }

    fn install(&mut self, worker: usize, task: CloneTask) -> usize {
        let handle = &mut self.workers[worker];
        let slot = handle.next_slot;
        handle.next_slot += 1;
        let _ = handle.ctrl.send(WorkerMsg::Install {
            slot,
            task: Box::new(task),
        });
        slot
    }

    fn sample_loop(&mut self, stop: Arc<AtomicBool>) -> FluxResult<()> {
        let mut stall_ticks = 0u32;
        let mut last_out = 0u64;
        let mut last_fail = 0u64;
        let mut pending_fuse: Option<FusePlan> = None;

        loop {
            thread::sleep(self.params.sample_interval);

            let fatal = self.fatal.lock().take();
            if let Some(e) = fatal {
                self.shutdown();
                return Err(e);
            }
            if stop.load(Ordering::Relaxed) {
                tracing::info!("stop observed; draining");
                self.shutdown();
                return Ok(());
            }

            for w in &mut self.workers {
                w.refresh_busy();
            }
            for g in &mut self.groups {
                let batch = g.batch.load(Ordering::Relaxed);
                g.ppp = g.vstats.packets_per_poll(g.last_vstats);
                g.last_vstats = g.vstats.snapshot();
                // Queues lengthening (saturated polls) amortize better
                // with bigger batches; short queues favor small ones.
                let next = if g.ppp >= 0.9 * batch as f64 {
                    (batch * 2).min(BATCH_MAX)
                } else if g.ppp > 0.0 && g.ppp < 0.25 * batch as f64 {
                    (batch / 2).max(BATCH_MIN)
                } else {
                    batch
                };
                if next != batch {
                    g.batch.store(next, Ordering::Relaxed);
                }
            }

            // Sustained pool exhaustion with zero egress is a wedged
            // pipeline, not transient backpressure.
            let snap = self.registry.snapshot();
            let fails = self.pool.alloc_failures();
            if fails > last_fail && snap.out_packets == last_out {
                stall_ticks += 1;
            } else {
                stall_ticks = 0;
            }
            last_fail = fails;
            last_out = snap.out_packets;
            if stall_ticks >= self.params.grace_ticks {
                let ms = self.params.grace_ticks as u64
                    * self.params.sample_interval.as_millis() as u64;
                self.shutdown();
                return Err(FluxError::Stalled(ms));
            }

            if let Some(plan) = pending_fuse.take() {
                self.fuse_phase2(plan);
                continue;
            }

            self.update_streaks();
            if let Some(edge) = self.pick_clone_candidate() {
                self.clone_downstream(edge);
            } else if let Some(plan) = self.pick_fuse_candidate() {
                // Phase 1: detach the downstream clone; its ring keeps
                // buffering until the fused kernel installs next tick.
                let down = &self.groups[plan.down];
                let place = &down.clones[0];
                let _ = self.workers[place.worker]
                    .ctrl
                    .send(WorkerMsg::Remove { slot: place.slot });
                pending_fuse = Some(plan);
            }

            tracing::debug!(
                in_packets = snap.in_packets,
                out_packets = snap.out_packets,
                dropped = snap.dropped,
                broken = snap.broken,
                pool_free = self.pool.available(),
                "tick"
            );
        }
    }

    fn update_streaks(&mut self) {
        for (i, edge) in self.edges.iter().enumerate() {
            if self.edge_retired[i] {
                continue;
            }
            let (len, cap) = edge.occupancy();
            let ratio = len as f64 / cap as f64;
            if ratio >= self.params.near_full_ratio {
                self.hot_streak[i] += 1;
            } else {
                self.hot_streak[i] = 0;
            }

            let up = &self.groups[edge.from_group];
            let down = &self.groups[edge.to_group];
            let batch = down.batch.load(Ordering::Relaxed) as f64;
            let quiet = ratio < 0.05
                && up.ppp < self.params.quiet_ppp_ratio * batch
                && down.ppp < self.params.quiet_ppp_ratio * batch;
            if quiet {
                self.quiet_streak[i] += 1;
            } else {
                self.quiet_streak[i] = 0;
            }
        }
    }

    /// First edge (upstream-most wins ties) whose consumer should clone
    fn pick_clone_candidate(&self) -> Option<usize> {
        for (i, edge) in self.edges.iter().enumerate() {
            if self.edge_retired[i] || self.hot_streak[i] < self.params.clone_streak {
                continue;
            }
            let group = &self.groups[edge.to_group];
            if !group.cloneable() || group.clones.len() >= self.workers.len() {
                continue;
            }
            let saturated = group
                .clones
                .iter()
                .all(|c| self.workers[c.worker].busy_frac >= self.params.saturated_busy);
            if !saturated {
                continue;
            }
            if self.free_worker_for(edge.to_group).is_some() {
                return Some(i);
            }
        }
        None
    }

    /// Least-busy worker under the free threshold not already hosting
    /// the group
    fn free_worker_for(&self, group: usize) -> Option<usize> {
        let hosted: Vec<usize> = self.groups[group].clones.iter().map(|c| c.worker).collect();
        self.workers
            .iter()
            .enumerate()
            .filter(|(i, w)| !hosted.contains(i) && w.busy_frac < self.params.free_busy)
            .min_by(|a, b| a.1.busy_frac.total_cmp(&b.1.busy_frac))
            .map(|(i, _)| i)
    }

    fn clone_downstream(&mut self, edge_idx: usize) {
        let group_idx = self.edges[edge_idx].to_group;
        let Some(target) = self.free_worker_for(group_idx) else {
            return;
        };
        let vertex = self.groups[group_idx].vertex;
        let clone_idx = self.groups[group_idx].clones.len();

        // Grow every input edge by a consumer column and every output
        // edge by a producer row; existing rings keep their packets.
        let batch = self.groups[group_idx].batch.load(Ordering::Relaxed);
        let cap = ring_capacity(batch.max(BATCH_INITIAL));
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for edge in self.edges.iter().filter(|e| e.to_group == vertex) {
            grow_cols(edge, cap);
            inputs.push(EdgeRx::new(Arc::clone(edge), clone_idx));
        }
        for edge in self.edges.iter().filter(|e| e.from_group == vertex) {
            grow_rows(edge, cap);
            outputs.push(EdgeTx::new(Arc::clone(edge), clone_idx));
        }

        let kernel = self.groups[group_idx]
            .proto
            .as_ref()
            .expect("cloneable group has a prototype")
            .fork_kernel();
        let task = CloneTask {
            group: group_idx,
            kernel,
            inputs,
            outputs,
            batch: self.groups[group_idx].batch.clone(),
            vstats: self.groups[group_idx].vstats.clone(),
        };
        let slot = self.install(target, task);
        self.groups[group_idx]
            .clones
            .push(ClonePlace { worker: target, slot });
        self.hot_streak[edge_idx] = 0;
        tracing::info!(
            vertex,
            clones = clone_idx + 1,
            core = self.workers[target].core,
            "cloned saturated vertex"
        );
    }

    /// An edge joining two singleton handler groups that have stayed
    /// quiet long enough to coalesce
    fn pick_fuse_candidate(&self) -> Option<FusePlan> {
        for (i, edge) in self.edges.iter().enumerate() {
            if self.edge_retired[i] || self.quiet_streak[i] < self.params.fuse_streak {
                continue;
            }
            let up = &self.groups[edge.from_group];
            let down = &self.groups[edge.to_group];
            let both_plain_handlers = up
                .proto
                .as_ref()
                .map(|p| p.is_handle())
                .unwrap_or(false)
                && down.proto.as_ref().map(|p| p.is_handle()).unwrap_or(false);
            if !both_plain_handlers
                || up.fused_host
                || up.fused_away
                || down.fused_host
                || down.fused_away
                || up.clones.len() != 1
                || down.clones.len() != 1
            {
                continue;
            }
            return Some(FusePlan {
                edge: i,
                up: edge.from_group,
                down: edge.to_group,
            });
        }
        None
    }

    fn fuse_phase2(&mut self, plan: FusePlan) {
        let edge = &self.edges[plan.edge];
        let a = match self.groups[plan.up].proto.as_ref() {
            Some(KernelProto::Handle(f)) => f.fork(),
            _ => return,
        };
        let b = match self.groups[plan.down].proto.as_ref() {
            Some(KernelProto::Handle(f)) => f.fork(),
            _ => return,
        };

        let up_vertex = self.groups[plan.up].vertex;
        let down_vertex = self.groups[plan.down].vertex;
        let inputs: Vec<EdgeRx> = self
            .edges
            .iter()
            .filter(|e| e.to_group == up_vertex)
            .map(|e| EdgeRx::new(Arc::clone(e), 0))
            .collect();
        let outputs: Vec<EdgeTx> = self
            .edges
            .iter()
            .filter(|e| e.from_group == down_vertex)
            .map(|e| EdgeTx::new(Arc::clone(e), 0))
            .collect();

        let task = CloneTask {
            group: plan.up,
            kernel: Kernel::FusedHandle {
                a,
                b,
                residual: Some(EdgeRx::new(Arc::clone(edge), 0)),
            },
            inputs,
            outputs,
            batch: self.groups[plan.up].batch.clone(),
            vstats: self.groups[plan.up].vstats.clone(),
        };
        let place = &self.groups[plan.up].clones[0];
        let (worker, slot) = (place.worker, place.slot);
        let _ = self.workers[worker].ctrl.send(WorkerMsg::Install {
            slot,
            task: Box::new(task),
        });

        self.groups[plan.up].fused_host = true;
        self.groups[plan.down].fused_away = true;
        self.edge_retired[plan.edge] = true;
        tracing::info!(
            upstream = up_vertex,
            downstream = down_vertex,
            "fused adjacent idle handlers"
        );
    }

    /// Stop sources, drain rings, flush TX, halt and join the workers.
    fn shutdown(&mut self) {
        self.draining.store(true, Ordering::Relaxed);
        let deadline = Instant::now() + self.params.drain_deadline;
        loop {
            let queued: usize = self.edges.iter().map(|e| e.occupancy().0).sum();
            if queued == 0 || Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        // One more interval so TX kernels run their drain-time flush.
        thread::sleep(Duration::from_millis(5));
        self.halt.store(true, Ordering::Relaxed);
        for w in &mut self.workers {
            if let Some(join) = w.join.take() {
                let _ = join.join();
            }
        }
        let queued: u64 = self.edges.iter().map(|e| e.occupancy().0 as u64).sum();
        self.registry
            .queued_at_stop
            .store(queued, Ordering::Relaxed);
        tracing::info!(queued_at_stop = queued, "graph stopped");
    }
}

fn grow_cols(edge: &EdgeShared, cap: usize) {
    let old = edge.matrix.load_full();
    let cols = old.cols + 1;
    let mut rings = Vec::with_capacity(old.rows * cols);
    for r in 0..old.rows {
        for c in 0..old.cols {
            rings.push(Arc::clone(old.ring(r, c)));
        }
        rings.push(SpscRing::new(cap));
    }
    edge.matrix.store(Arc::new(RingMatrix {
        rows: old.rows,
        cols,
        rings,
    }));
}

fn grow_rows(edge: &EdgeShared, cap: usize) {
    let old = edge.matrix.load_full();
    let rows = old.rows + 1;
    let mut rings: Vec<Arc<SpscRing>> = old.rings.to_vec();
    for _ in 0..old.cols {
        rings.push(SpscRing::new(cap));
    }
    edge.matrix.store(Arc::new(RingMatrix {
        rows,
        cols: old.cols,
        rings,
    }));
}
