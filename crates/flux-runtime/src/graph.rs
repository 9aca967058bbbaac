//! Flow graph construction and validation
//!
//! A [`Flow`] is an opaque token for one logical edge. Builder
//! operations take flows by value, so "exactly one consumer per flow"
//! is enforced by move semantics; a flow that is never handed back shows
//! up at start as `UnterminatedFlow`. The graph is a DAG by
//! construction (a vertex can only consume flows that already exist),
//! but start still runs a topological sort — it both orders the chain
//! layout and defends the invariant.

use flux_common::{FluxError, FluxResult, PortDir};

use crate::callbacks::{DropHandler, Generator, PacketHandler, Separator, Splitter};
use crate::driver::MAX_PORTS;

/// Opaque token for one logical packet stream between two vertices.
/// Deliberately neither `Clone` nor `Copy`.
#[derive(Debug)]
pub struct Flow {
    pub(crate) id: usize,
}

/// Vertex payload as described by the application
pub(crate) enum VertexDef {
    Receive { port: u16 },
    Generate { gen: Box<dyn Generator>, rate: u64 },
    Handle { f: Box<dyn PacketHandler> },
    HandleDrop { f: Box<dyn DropHandler> },
    Split { f: Box<dyn Splitter>, ways: usize },
    Separate { f: Box<dyn Separator> },
    Merge,
    Transmit { port: u16 },
    Stop,
}

/// One vertex plus its adjacency
pub(crate) struct VertexNode {
    pub def: VertexDef,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

/// Book-keeping for one flow
pub(crate) struct FlowRecord {
    /// (vertex, output slot) that produces into this flow
    pub producer: (usize, usize),
    /// Vertex consuming this flow; `None` until bound
    pub consumer: Option<usize>,
}

/// Mutable graph under construction
#[derive(Default)]
pub(crate) struct GraphBuilder {
    pub vertices: Vec<VertexNode>,
    pub flows: Vec<FlowRecord>,
    rx_bound: [bool; MAX_PORTS],
    tx_bound: [bool; MAX_PORTS],
}

impl GraphBuilder {
    fn new_flow(&mut self, producer: usize, slot: usize) -> Flow {
        let id = self.flows.len();
        self.flows.push(FlowRecord {
            producer: (producer, slot),
            consumer: None,
        });
        self.vertices[producer].outputs.push(id);
        Flow { id }
    }

    fn consume(&mut self, flow: Flow, consumer: usize) {
        // The token moved in, so the flow exists and is unconsumed.
        debug_assert!(self.flows[flow.id].consumer.is_none());
        self.flows[flow.id].consumer = Some(consumer);
        self.vertices[consumer].inputs.push(flow.id);
    }

    fn push_vertex(&mut self, def: VertexDef) -> usize {
        self.vertices.push(VertexNode {
            def,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        self.vertices.len() - 1
    }

    fn check_port(&self, port: u16, registered: usize, dir: PortDir) -> FluxResult<()> {
        if (port as usize) >= registered {
            return Err(FluxError::NoSuchPort(port));
        }
        let bound = match dir {
            PortDir::Rx => self.rx_bound[port as usize],
            PortDir::Tx => self.tx_bound[port as usize],
        };
        if bound {
            return Err(FluxError::DuplicatePortBinding { port, dir });
        }
        Ok(())
    }

    pub fn add_receiver(&mut self, port: u16, registered: usize) -> FluxResult<Flow> {
        self.check_port(port, registered, PortDir::Rx)?;
        self.rx_bound[port as usize] = true;
        let v = self.push_vertex(VertexDef::Receive { port });
        Ok(self.new_flow(v, 0))
    }

    pub fn add_generator(
        &mut self,
        gen: Box<dyn Generator>,
        rate: u64,
    ) -> FluxResult<Flow> {
        if rate == 0 {
            return Err(FluxError::InvalidGraphOp("generator rate must be > 0".into()));
        }
        let v = self.push_vertex(VertexDef::Generate { gen, rate });
        Ok(self.new_flow(v, 0))
    }

    pub fn add_handler(&mut self, flow: Flow, f: Box<dyn PacketHandler>) -> FluxResult<Flow> {
        let v = self.push_vertex(VertexDef::Handle { f });
        self.consume(flow, v);
        Ok(self.new_flow(v, 0))
    }

    pub fn add_drop_handler(&mut self, flow: Flow, f: Box<dyn DropHandler>) -> FluxResult<Flow> {
        let v = self.push_vertex(VertexDef::HandleDrop { f });
        self.consume(flow, v);
        Ok(self.new_flow(v, 0))
    }

    pub fn add_splitter(
        &mut self,
        flow: Flow,
        f: Box<dyn Splitter>,
        ways: usize,
    ) -> FluxResult<Vec<Flow>> {
        if ways < 2 {
            return Err(FluxError::InvalidGraphOp(format!(
                "splitter needs at least 2 outputs, got {ways}"
            )));
        }
        let v = self.push_vertex(VertexDef::Split { f, ways });
        self.consume(flow, v);
        Ok((0..ways).map(|slot| self.new_flow(v, slot)).collect())
    }

    pub fn add_separator(
        &mut self,
        flow: Flow,
        f: Box<dyn Separator>,
    ) -> FluxResult<(Flow, Flow)> {
        let v = self.push_vertex(VertexDef::Separate { f });
        self.consume(flow, v);
        let accepted = self.new_flow(v, 0);
        let rejected = self.new_flow(v, 1);
        Ok((accepted, rejected))
    }

    pub fn add_merger(&mut self, flows: Vec<Flow>) -> FluxResult<Flow> {
        if flows.is_empty() {
            return Err(FluxError::InvalidGraphOp("merger needs at least one input".into()));
        }
        let v = self.push_vertex(VertexDef::Merge);
        for flow in flows {
            self.consume(flow, v);
        }
        Ok(self.new_flow(v, 0))
    }

    pub fn add_sender(&mut self, flow: Flow, port: u16, registered: usize) -> FluxResult<()> {
        self.check_port(port, registered, PortDir::Tx)?;
        self.tx_bound[port as usize] = true;
        let v = self.push_vertex(VertexDef::Transmit { port });
        self.consume(flow, v);
        Ok(())
    }

    pub fn add_stopper(&mut self, flow: Flow) -> FluxResult<()> {
        let v = self.push_vertex(VertexDef::Stop);
        self.consume(flow, v);
        Ok(())
    }

    /// Validate and freeze the graph
    pub fn finish(self) -> FluxResult<BuiltGraph> {
        for (id, flow) in self.flows.iter().enumerate() {
            if flow.consumer.is_none() {
                return Err(FluxError::UnterminatedFlow(id));
            }
        }
        let order = topo_order(&self.vertices, &self.flows)?;
        Ok(BuiltGraph {
            vertices: self.vertices,
            flows: self.flows,
            order,
        })
    }
}

/// Immutable, validated graph handed to the scheduler
pub(crate) struct BuiltGraph {
    pub vertices: Vec<VertexNode>,
    pub flows: Vec<FlowRecord>,
    /// Topological order of vertex ids, sources first
    pub order: Vec<usize>,
}

fn topo_order(vertices: &[VertexNode], flows: &[FlowRecord]) -> FluxResult<Vec<usize>> {
    let mut indegree: Vec<usize> = vertices.iter().map(|v| v.inputs.len()).collect();
    let mut queue: Vec<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(vertices.len());

    while let Some(v) = queue.pop() {
        order.push(v);
        for &f in &vertices[v].outputs {
            if let Some(next) = flows[f].consumer {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push(next);
                }
            }
        }
    }
    if order.len() != vertices.len() {
        return Err(FluxError::CyclicGraph);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_packet::Packet;

    fn noop_handler() -> Box<dyn PacketHandler> {
        Box::new(|_pkt: &mut Packet<'_>| {})
    }

    #[test]
    fn test_duplicate_receiver_rejected() {
        let mut g = GraphBuilder::default();
        let f = g.add_receiver(0, 2).unwrap();
        g.add_stopper(f).unwrap();
        let err = g.add_receiver(0, 2).unwrap_err();
        assert!(matches!(
            err,
            FluxError::DuplicatePortBinding {
                port: 0,
                dir: PortDir::Rx
            }
        ));
        // The same port can still carry a sender.
        let f = g.add_receiver(1, 2).unwrap();
        g.add_sender(f, 0, 2).unwrap();
    }

    #[test]
    fn test_unknown_port_rejected() {
        let mut g = GraphBuilder::default();
        assert!(matches!(
            g.add_receiver(5, 2),
            Err(FluxError::NoSuchPort(5))
        ));
    }

    #[test]
    fn test_unterminated_flow_fails_finish() {
        let mut g = GraphBuilder::default();
        let _dangling = g.add_receiver(0, 1).unwrap();
        assert!(matches!(g.finish(), Err(FluxError::UnterminatedFlow(0))));
    }

    #[test]
    fn test_chain_topo_order() {
        let mut g = GraphBuilder::default();
        let f = g.add_receiver(0, 1).unwrap();
        let f = g.add_handler(f, noop_handler()).unwrap();
        let f = g.add_handler(f, noop_handler()).unwrap();
        g.add_stopper(f).unwrap();

        let built = g.finish().unwrap();
        assert_eq!(built.order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_split_merge_shape() {
        let mut g = GraphBuilder::default();
        let f = g.add_receiver(0, 1).unwrap();
        let outs = g
            .add_splitter(f, Box::new(|_p: &mut Packet<'_>| 0usize), 3)
            .unwrap();
        assert_eq!(outs.len(), 3);
        let merged = g.add_merger(outs.into_iter().collect()).unwrap();
        g.add_stopper(merged).unwrap();

        let built = g.finish().unwrap();
        assert_eq!(built.vertices.len(), 4);
        assert_eq!(built.vertices[2].inputs.len(), 3);
        assert!(built.order.len() == 4);
    }

    #[test]
    fn test_splitter_needs_two_ways() {
        let mut g = GraphBuilder::default();
        let f = g.add_receiver(0, 1).unwrap();
        assert!(g
            .add_splitter(f, Box::new(|_p: &mut Packet<'_>| 0usize), 1)
            .is_err());
    }
}
