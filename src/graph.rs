//! Audio graph - owns nodes and message queues

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::node::{AudioNode, NodeId, ProcessContext, BLOCK_SIZE};

/// Default depth of a node's message queue
pub(crate) const DEFAULT_QUEUE_SIZE: usize = 64;

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    receiver: Consumer<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        // Split borrow to avoid conflict between receiver and node
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Draining iterator straight off the consumer - no allocation
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

// Stable indices: removing a node must not renumber the others
type InnerGraph = StableGraph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate
pub(crate) struct AudioGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,

    node_indices: HashMap<NodeId, NodeIndex>,
    next_node_id: u32,

    terminal: Option<NodeIndex>,
}

impl AudioGraph {
    /// Create a new graph with the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(64, 64),
            processor: Processor::with_capacity(64),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: BLOCK_SIZE,
            },
            node_indices: HashMap::new(),
            next_node_id: 0,
            terminal: None,
        }
    }

    /// Add a node, returns its id and the sending half of its message queue
    pub fn add<N: AudioNode>(&mut self, node: N) -> (NodeId, Producer<N::Message>) {
        self.add_with_queue_size(node, DEFAULT_QUEUE_SIZE)
    }

    /// Add a node with a custom message queue size
    pub fn add_with_queue_size<N: AudioNode>(
        &mut self,
        node: N,
        queue_size: usize,
    ) -> (NodeId, Producer<N::Message>) {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        let (producer, consumer) = RingBuffer::new(queue_size.max(1));

        let num_outputs = node.num_outputs();
        let wrapper = NodeWrapper { node, receiver: consumer };
        let adapter = DaspAdapter {
            node: Box::new(wrapper),
            ctx: self.ctx,
        };

        let node_data = match num_outputs {
            // 0 outputs = sink, but dasp_graph still needs a buffer for inputs
            0 | 1 => NodeData::new1(adapter),
            2 => NodeData::new2(adapter),
            n => NodeData::new(adapter, vec![Buffer::SILENT; n]),
        };

        let idx = self.graph.add_node(node_data);
        self.node_indices.insert(id, idx);

        (id, producer)
    }

    /// Connect output of `from` to input of `to`
    ///
    /// Returns false if either node is no longer in the graph.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        match (self.node_indices.get(&from), self.node_indices.get(&to)) {
            (Some(&from_idx), Some(&to_idx)) => {
                self.graph.add_edge(from_idx, to_idx, ());
                true
            }
            _ => false,
        }
    }

    /// Remove every connection into and out of a node, keeping the node itself
    pub fn disconnect_all(&mut self, id: NodeId) {
        let Some(&idx) = self.node_indices.get(&id) else {
            return;
        };

        let neighbors: Vec<NodeIndex> = self.graph.neighbors_undirected(idx).collect();
        for other in neighbors {
            while let Some(edge) = self.graph.find_edge(idx, other) {
                self.graph.remove_edge(edge);
            }
            while let Some(edge) = self.graph.find_edge(other, idx) {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Remove a node and all of its connections
    ///
    /// The node (and whatever it owns) is dropped here. Returns false if the
    /// node was already gone.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(idx) = self.node_indices.remove(&id) else {
            return false;
        };
        if self.terminal == Some(idx) {
            self.terminal = None;
        }
        self.graph.remove_node(idx).is_some()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_indices.contains_key(&id)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.node_indices.len()
    }

    /// Set which node to process to (typically a sink)
    pub fn set_terminal(&mut self, id: NodeId) {
        self.terminal = self.node_indices.get(&id).copied();
    }

    /// Process one block of audio through the graph
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dc(f32);

    impl AudioNode for Dc {
        type Message = f32;

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            messages: impl Iterator<Item = f32>,
            _inputs: &[Input],
            outputs: &mut [Buffer],
        ) {
            for level in messages {
                self.0 = level;
            }
            for buffer in outputs.iter_mut() {
                buffer.iter_mut().for_each(|s| *s = self.0);
            }
        }
    }

    struct Probe(std::sync::Arc<std::sync::atomic::AtomicU32>);

    impl AudioNode for Probe {
        type Message = ();

        fn process(
            &mut self,
            _ctx: &ProcessContext,
            _messages: impl Iterator<Item = ()>,
            inputs: &[Input],
            _outputs: &mut [Buffer],
        ) {
            let sum: f32 = inputs
                .iter()
                .filter_map(|input| input.buffers().first())
                .map(|buffer| buffer[0])
                .sum();
            self.0.store(sum.to_bits(), std::sync::atomic::Ordering::Relaxed);
        }

        fn num_inputs(&self) -> usize { 1 }

        fn num_outputs(&self) -> usize { 0 }
    }

    fn probe() -> (Probe, std::sync::Arc<std::sync::atomic::AtomicU32>) {
        let cell = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        (Probe(cell.clone()), cell)
    }

    fn read(cell: &std::sync::atomic::AtomicU32) -> f32 {
        f32::from_bits(cell.load(std::sync::atomic::Ordering::Relaxed))
    }

    #[test]
    fn messages_reach_node_on_next_block() {
        let mut graph = AudioGraph::new(48_000);
        let (dc, mut sender) = graph.add(Dc(0.25));
        let (probe, cell) = probe();
        let (sink, _) = graph.add(probe);
        assert!(graph.connect(dc, sink));
        graph.set_terminal(sink);

        graph.process();
        assert_eq!(read(&cell), 0.25);

        sender.push(0.5).unwrap();
        graph.process();
        assert_eq!(read(&cell), 0.5);
    }

    #[test]
    fn removing_a_node_keeps_other_ids_valid() {
        let mut graph = AudioGraph::new(48_000);
        let (a, _) = graph.add(Dc(0.25));
        let (b, _) = graph.add(Dc(0.5));
        let (probe, cell) = probe();
        let (sink, _) = graph.add(probe);
        graph.connect(a, sink);
        graph.connect(b, sink);
        graph.set_terminal(sink);

        graph.process();
        assert_eq!(read(&cell), 0.75);

        assert!(graph.remove(a));
        assert!(!graph.remove(a));
        assert!(!graph.connect(a, sink));
        assert!(graph.contains(b));
        assert_eq!(graph.len(), 2);

        graph.process();
        assert_eq!(read(&cell), 0.5);
    }

    #[test]
    fn disconnect_keeps_node_but_drops_edges() {
        let mut graph = AudioGraph::new(48_000);
        let (a, _) = graph.add(Dc(1.0));
        let (probe, cell) = probe();
        let (sink, _) = graph.add(probe);
        graph.connect(a, sink);
        graph.set_terminal(sink);

        graph.disconnect_all(a);
        graph.process();
        assert!(graph.contains(a));
        assert_eq!(read(&cell), 0.0);
    }
}
