use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::{Sender, TrySendError};

use crate::audio_api::AudioCommand;
use crate::error::GraphError;

use super::{GraphCommand, GraphOps, NodeId, NodeKind, ParamEvent, ParamId};

/// Control-side view of the render thread's graph.
///
/// Node ids are handed out here, before the node exists on the other side, so a
/// caller can wire up a whole chain without waiting. Mistakes that can only be
/// seen on the render side (a stale id, say) come back as `EngineEvent::GraphRejected`.
#[derive(Clone, Debug)]
pub struct RemoteGraph {
    tx: Sender<AudioCommand>,
    sample_rate: u32,
    next_id: Arc<AtomicU32>,
}

impl RemoteGraph {
    pub fn new(tx: Sender<AudioCommand>, sample_rate: u32, next_id: Arc<AtomicU32>) -> Self {
        Self { tx, sample_rate, next_id }
    }

    fn send(&self, cmd: GraphCommand) -> Result<(), GraphError> {
        self.tx.try_send(AudioCommand::Graph(cmd)).map_err(|e| match e {
            TrySendError::Full(_) => GraphError::QueueFull,
            TrySendError::Disconnected(_) => GraphError::Disconnected,
        })
    }
}

impl GraphOps for RemoteGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn add_node(&mut self, kind: NodeKind) -> Result<NodeId, GraphError> {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(GraphCommand::AddNode { id, kind: Box::new(kind) })?;
        Ok(id)
    }

    fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if id == NodeId::DESTINATION {
            return Err(GraphError::UnknownNode(id));
        }
        self.send(GraphCommand::RemoveNode(id))
    }

    fn connect(&mut self, src: NodeId, dst: NodeId) -> Result<(), GraphError> {
        self.send(GraphCommand::Connect { src, dst })
    }

    fn disconnect(&mut self, src: NodeId, dst: Option<NodeId>) -> Result<(), GraphError> {
        self.send(GraphCommand::Disconnect { src, dst })
    }

    fn automate(&mut self, param: ParamId, event: ParamEvent) -> Result<(), GraphError> {
        self.send(GraphCommand::Automate { param, event })
    }

    fn automate_paired(&mut self, primary: ParamId, mirror: ParamId, event: ParamEvent) -> Result<(), GraphError> {
        self.send(GraphCommand::AutomatePaired { primary, mirror, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::AudioGraph;

    fn remote(capacity: usize) -> (RemoteGraph, crossbeam_channel::Receiver<AudioCommand>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (RemoteGraph::new(tx, 1000, Arc::new(AtomicU32::new(1))), rx)
    }

    #[test]
    fn commands_replay_onto_a_local_graph() {
        let (mut r, rx) = remote(16);
        let a = r.add_node(NodeKind::gain(0.5)).unwrap();
        r.connect(a, NodeId::DESTINATION).unwrap();

        let mut g = AudioGraph::new(1000);
        for cmd in rx.try_iter() {
            let AudioCommand::Graph(cmd) = cmd else { panic!("not a graph command") };
            g.apply(cmd).unwrap();
        }
        assert!(g.contains(a));
        assert_eq!(g.inputs_of(NodeId::DESTINATION), &[a]);
    }

    #[test]
    fn full_queue_is_reported() {
        let (mut r, _rx) = remote(1);
        r.add_node(NodeKind::gain(1.0)).unwrap();
        assert_eq!(r.add_node(NodeKind::gain(1.0)), Err(GraphError::QueueFull));
    }

    #[test]
    fn clones_never_hand_out_the_same_id() {
        let (mut r, _rx) = remote(16);
        let mut r2 = r.clone();
        let a = r.add_node(NodeKind::gain(1.0)).unwrap();
        let b = r2.add_node(NodeKind::gain(1.0)).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, NodeId::DESTINATION);
    }
}
