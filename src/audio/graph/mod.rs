//! Node-based audio graph.
//!
//! The graph lives on the render thread and is driven one frame at a time: voices
//! inject into nodes, then every node reachable from the destination is processed
//! in dependency order. A cycle (an echo feeding itself) is cut where the walk
//! finds it; the node closing the loop reads the previous frame's output.
//!
//! The control thread never touches an [`AudioGraph`] it doesn't own. It goes
//! through [`GraphOps`], implemented locally by `AudioGraph` (offline use, tests)
//! and remotely by [`RemoteGraph`], which turns every call into a command.

mod convolver;
mod effects;
mod node;
mod param;
mod remote;

pub use convolver::{Convolver, PARTITION};
pub use effects::{
    Automatable, Connectable, EchoNode, FeedbackNode, OutputEffectsChain, Param, ReverbNode, SendLevel,
    TrackRouter, TrackSend,
};
pub use node::{DelayLine, MAX_DELAY_SECS, NodeKind};
pub use param::{AudioParam, ParamEvent};
pub use remote::RemoteGraph;

use crate::audio::frame::StereoFrame;
use crate::error::GraphError;

const INITIAL_NODES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const DESTINATION: NodeId = NodeId(0);
}

/// One automatable parameter: which node, and which of its params.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamId {
    pub node: NodeId,
    pub index: u8,
}

impl ParamId {
    pub fn of(node: NodeId) -> Self {
        Self { node, index: 0 }
    }
}

/// Graph mutations, as they travel to the render thread.
#[derive(Debug)]
pub enum GraphCommand {
    AddNode { id: NodeId, kind: Box<NodeKind> },
    RemoveNode(NodeId),
    Connect { src: NodeId, dst: NodeId },
    Disconnect { src: NodeId, dst: Option<NodeId> },
    Automate { param: ParamId, event: ParamEvent },
    /// `event` on `primary` and its complement on `mirror`, in the same frame
    AutomatePaired { primary: ParamId, mirror: ParamId, event: ParamEvent },
}

/// What the control side can do to a graph.
pub trait GraphOps {
    fn sample_rate(&self) -> u32;
    fn add_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError>;
    fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError>;
    fn connect(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError>;
    /// Drops `src -> dst`, or every outgoing edge of `src` when `dst` is `None`.
    fn disconnect(&mut self, src: NodeId, dst: Option<NodeId>) -> Result<(), GraphError>;
    fn automate(&mut self, param: ParamId, event: ParamEvent) -> Result<(), GraphError>;
    fn automate_paired(&mut self, primary: ParamId, mirror: ParamId, event: ParamEvent) -> Result<(), GraphError>;

    fn destination(&self) -> NodeId {
        NodeId::DESTINATION
    }
}

#[derive(Debug)]
struct GraphNode {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    injected: StereoFrame,
    output: StereoFrame,
}

impl GraphNode {
    fn new(kind: NodeKind) -> Self {
        Self { kind, inputs: Vec::new(), injected: StereoFrame::zero(), output: StereoFrame::zero() }
    }
}

#[derive(Debug)]
pub struct AudioGraph {
    sample_rate: u32,
    nodes: Vec<Option<GraphNode>>,
    order: Vec<NodeId>,
    dirty: bool,
    now: f64,
    // scratch for the ordering walk
    visit: Vec<u8>,
    stack: Vec<(NodeId, usize)>,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        let mut nodes = Vec::with_capacity(INITIAL_NODES);
        nodes.push(Some(GraphNode::new(NodeKind::Destination)));
        Self {
            sample_rate,
            nodes,
            order: Vec::with_capacity(INITIAL_NODES),
            dirty: true,
            now: 0.0,
            visit: Vec::with_capacity(INITIAL_NODES),
            stack: Vec::with_capacity(INITIAL_NODES),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id.0 as usize).is_some_and(Option::is_some)
    }

    pub fn param_value(&mut self, param: ParamId) -> Option<f32> {
        self.node_mut(param.node).ok()?.kind.param_mut(param.index).map(|p| p.value())
    }

    pub fn inputs_of(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.inputs.as_slice()).unwrap_or(&[])
    }

    /// Places a node under an id chosen elsewhere (the remote side allocates ids).
    pub fn insert_node(&mut self, id: NodeId, kind: NodeKind) {
        let idx = id.0 as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        self.nodes[idx] = Some(GraphNode::new(kind));
        self.dirty = true;
    }

    pub fn apply(&mut self, cmd: GraphCommand) -> Result<(), GraphError> {
        match cmd {
            GraphCommand::AddNode { id, kind } => {
                self.insert_node(id, *kind);
                Ok(())
            }
            GraphCommand::RemoveNode(id) => self.remove_node(id),
            GraphCommand::Connect { src, dst } => self.connect(src, dst),
            GraphCommand::Disconnect { src, dst } => self.disconnect(src, dst),
            GraphCommand::Automate { param, event } => self.automate(param, event),
            GraphCommand::AutomatePaired { primary, mirror, event } => {
                self.automate_paired(primary, mirror, event)
            }
        }
    }

    /// Adds audio into `id`'s input for the frame about to be rendered.
    pub fn inject(&mut self, id: NodeId, frame: StereoFrame) {
        if let Some(Some(node)) = self.nodes.get_mut(id.0 as usize) {
            node.injected += frame;
        }
    }

    pub fn render_frame(&mut self, time: f64) -> StereoFrame {
        self.now = time;
        if self.dirty {
            self.rebuild_order();
        }
        let sr = self.sample_rate as f32;
        for i in 0..self.order.len() {
            let id = self.order[i];
            let input = self.gather(id);
            if let Some(Some(node)) = self.nodes.get_mut(id.0 as usize) {
                node.injected = StereoFrame::zero();
                node.output = node.kind.process(input, time, sr);
            }
        }
        // unreachable nodes still drop what was injected this frame
        for node in self.nodes.iter_mut().flatten() {
            node.injected = StereoFrame::zero();
        }
        self.node(NodeId::DESTINATION).map(|n| n.output).unwrap_or_default()
    }

    fn gather(&self, id: NodeId) -> StereoFrame {
        let Some(node) = self.node(id) else {
            return StereoFrame::zero();
        };
        let mut sum = node.injected;
        for src in &node.inputs {
            if let Some(up) = self.node(*src) {
                sum += up.output;
            }
        }
        sum
    }

    // iterative post-order walk from the destination over input edges
    fn rebuild_order(&mut self) {
        const NEW: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        self.order.clear();
        self.visit.clear();
        self.visit.resize(self.nodes.len(), NEW);
        self.stack.clear();
        if self.node(NodeId::DESTINATION).is_some() {
            self.stack.push((NodeId::DESTINATION, 0));
            self.visit[0] = ON_STACK;
        }
        while let Some(&(id, next_input)) = self.stack.last() {
            let inputs = self.inputs_of(id);
            if let Some(&src) = inputs.get(next_input) {
                if let Some(top) = self.stack.last_mut() {
                    top.1 += 1;
                }
                let idx = src.0 as usize;
                if self.visit.get(idx) == Some(&NEW) && self.node(src).is_some() {
                    self.visit[idx] = ON_STACK;
                    self.stack.push((src, 0));
                }
            } else {
                self.stack.pop();
                self.visit[id.0 as usize] = DONE;
                self.order.push(id);
            }
        }
        self.dirty = false;
    }

    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode, GraphError> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut).ok_or(GraphError::UnknownNode(id))
    }

    fn param_mut(&mut self, param: ParamId) -> Result<&mut AudioParam, GraphError> {
        self.node_mut(param.node)?.kind.param_mut(param.index).ok_or(GraphError::UnknownParam(param))
    }
}

impl GraphOps for AudioGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn add_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        let free = self.nodes.iter().skip(1).position(Option::is_none).map(|i| i + 1);
        let id = NodeId(free.unwrap_or(self.nodes.len()) as u32);
        self.insert_node(id, kind);
        Ok(id)
    }

    fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if id == NodeId::DESTINATION {
            return Err(GraphError::UnknownNode(id));
        }
        self.node_mut(id)?;
        self.nodes[id.0 as usize] = None;
        for node in self.nodes.iter_mut().flatten() {
            node.inputs.retain(|src| *src != id);
        }
        self.dirty = true;
        Ok(())
    }

    fn connect(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        self.node_mut(src)?;
        let node = self.node_mut(dst)?;
        if !node.inputs.contains(&src) {
            node.inputs.push(src);
            self.dirty = true;
        }
        Ok(())
    }

    fn disconnect(&mut self, src: NodeId, dst: Option<NodeId>) -> Result<(), GraphError> {
        self.node_mut(src)?;
        match dst {
            Some(dst) => self.node_mut(dst)?.inputs.retain(|s| *s != src),
            None => {
                for node in self.nodes.iter_mut().flatten() {
                    node.inputs.retain(|s| *s != src);
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn automate(&mut self, param: ParamId, event: ParamEvent) -> Result<(), GraphError> {
        let now = self.now;
        self.param_mut(param)?.apply(event, now);
        Ok(())
    }

    fn automate_paired(&mut self, primary: ParamId, mirror: ParamId, event: ParamEvent) -> Result<(), GraphError> {
        // check both before touching either so a bad id can't leave them split
        self.param_mut(mirror)?;
        self.automate(primary, event)?;
        self.automate(mirror, event.complement())
    }
}
