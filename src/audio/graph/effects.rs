//! Composite effects built from primitive nodes.
//!
//! A composite hands out its input, its output and a fixed set of named
//! parameters. Callers wire it with [`Connectable`] and drive it with
//! [`Automatable`]; the nodes inside stay private.

use std::collections::BTreeMap;

use crate::audio::frame::StereoFrame;
use crate::error::GraphError;
use crate::shared::TrackId;

use super::node::{MAX_DELAY_SECS, NodeKind};
use super::param::ParamEvent;
use super::{GraphOps, NodeId, ParamId};

pub trait Connectable {
    fn input(&self) -> NodeId;
    fn output(&self) -> NodeId;

    fn connect<G: GraphOps + ?Sized>(&self, graph: &mut G, dest: NodeId) -> Result<(), GraphError> {
        graph.connect(self.output(), dest)
    }

    fn disconnect<G: GraphOps + ?Sized>(&self, graph: &mut G, dest: Option<NodeId>) -> Result<(), GraphError> {
        graph.disconnect(self.output(), dest)
    }
}

/// Anything that accepts automation events.
pub trait Automatable {
    fn schedule<G: GraphOps + ?Sized>(&self, graph: &mut G, event: ParamEvent) -> Result<(), GraphError>;

    fn set<G: GraphOps + ?Sized>(&self, graph: &mut G, value: f32) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::SetValue(value))
    }

    fn set_at<G: GraphOps + ?Sized>(&self, graph: &mut G, value: f32, time: f64) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::SetValueAtTime { value, time })
    }

    fn linear_ramp_to<G: GraphOps + ?Sized>(&self, graph: &mut G, value: f32, end_time: f64) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::LinearRampTo { value, end_time })
    }

    fn exponential_ramp_to<G: GraphOps + ?Sized>(
        &self,
        graph: &mut G,
        value: f32,
        end_time: f64,
    ) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::ExponentialRampTo { value, end_time })
    }

    fn set_target<G: GraphOps + ?Sized>(
        &self,
        graph: &mut G,
        target: f32,
        start_time: f64,
        time_constant: f64,
    ) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::SetTarget { target, start_time, time_constant })
    }

    fn cancel_scheduled<G: GraphOps + ?Sized>(&self, graph: &mut G, from: f64) -> Result<(), GraphError> {
        self.schedule(graph, ParamEvent::CancelScheduled { from })
    }
}

/// A plain parameter of some node inside a composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param(pub ParamId);

impl Automatable for Param {
    fn schedule<G: GraphOps + ?Sized>(&self, graph: &mut G, event: ParamEvent) -> Result<(), GraphError> {
        graph.automate(self.0, event)
    }
}

/// Send amount of a [`TrackSend`]. Every event is clamped to [0, 1] and lands on
/// the dry gain as `1 - v` with the same curve, in the same graph command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendLevel {
    send: ParamId,
    dry: ParamId,
}

impl SendLevel {
    pub fn send_param(&self) -> ParamId {
        self.send
    }

    pub fn dry_param(&self) -> ParamId {
        self.dry
    }
}

impl Automatable for SendLevel {
    fn schedule<G: GraphOps + ?Sized>(&self, graph: &mut G, event: ParamEvent) -> Result<(), GraphError> {
        graph.automate_paired(self.send, self.dry, event.clamped(0.0, 1.0))
    }
}

fn gain<G: GraphOps + ?Sized>(graph: &mut G, value: f32) -> Result<NodeId, GraphError> {
    graph.add_node(NodeKind::gain(value))
}

/// delay -> gain -> back into the delay. Input and output are the delay.
#[derive(Clone, Copy, Debug)]
pub struct FeedbackNode {
    delay: NodeId,
    gain: NodeId,
}

impl FeedbackNode {
    pub const DEFAULT_DELAY: f32 = 0.3;

    pub fn build<G: GraphOps + ?Sized>(graph: &mut G, delay_secs: f32, feedback: f32) -> Result<Self, GraphError> {
        let sr = graph.sample_rate();
        let delay = graph.add_node(NodeKind::delay(delay_secs, MAX_DELAY_SECS, sr))?;
        let gain = gain(graph, feedback)?;
        graph.connect(delay, gain)?;
        graph.connect(gain, delay)?;
        Ok(Self { delay, gain })
    }

    pub fn delay_time(&self) -> Param {
        Param(ParamId::of(self.delay))
    }

    pub fn feedback(&self) -> Param {
        Param(ParamId::of(self.gain))
    }

    fn nodes(&self) -> [NodeId; 2] {
        [self.delay, self.gain]
    }
}

impl Connectable for FeedbackNode {
    fn input(&self) -> NodeId {
        self.delay
    }
    fn output(&self) -> NodeId {
        self.delay
    }
}

/// Feedback delay mixed over a dry path.
#[derive(Clone, Copy, Debug)]
pub struct EchoNode {
    input: NodeId,
    feedback: FeedbackNode,
    level: NodeId,
    output: NodeId,
}

impl EchoNode {
    pub fn build<G: GraphOps + ?Sized>(graph: &mut G, feedback: f32, level: f32) -> Result<Self, GraphError> {
        let input = gain(graph, 1.0)?;
        let feedback_loop = FeedbackNode::build(graph, FeedbackNode::DEFAULT_DELAY, feedback)?;
        let level_node = gain(graph, level)?;
        let output = gain(graph, 1.0)?;
        graph.connect(input, feedback_loop.input())?;
        graph.connect(feedback_loop.output(), level_node)?;
        graph.connect(level_node, output)?;
        graph.connect(input, output)?;
        Ok(Self { input, feedback: feedback_loop, level: level_node, output })
    }

    pub fn delay_time(&self) -> Param {
        self.feedback.delay_time()
    }

    pub fn feedback(&self) -> Param {
        self.feedback.feedback()
    }

    pub fn level(&self) -> Param {
        Param(ParamId::of(self.level))
    }

    fn nodes(&self) -> impl Iterator<Item = NodeId> {
        [self.input, self.level, self.output].into_iter().chain(self.feedback.nodes())
    }
}

impl Connectable for EchoNode {
    fn input(&self) -> NodeId {
        self.input
    }
    fn output(&self) -> NodeId {
        self.output
    }
}

/// Convolution reverb with separate dry and wet gains.
#[derive(Clone, Copy, Debug)]
pub struct ReverbNode {
    input: NodeId,
    dry: NodeId,
    convolver: NodeId,
    wet: NodeId,
    output: NodeId,
}

impl ReverbNode {
    pub fn build<G: GraphOps + ?Sized>(
        graph: &mut G,
        impulse: &[StereoFrame],
        wet: f32,
        dry: f32,
    ) -> Result<Self, GraphError> {
        let sr = graph.sample_rate();
        let input = gain(graph, 1.0)?;
        let dry_node = gain(graph, dry)?;
        let convolver = graph.add_node(NodeKind::convolver(impulse, sr))?;
        let wet_node = gain(graph, wet)?;
        let output = gain(graph, 1.0)?;
        graph.connect(input, dry_node)?;
        graph.connect(dry_node, output)?;
        graph.connect(input, convolver)?;
        graph.connect(convolver, wet_node)?;
        graph.connect(wet_node, output)?;
        Ok(Self { input, dry: dry_node, convolver, wet: wet_node, output })
    }

    pub fn wet(&self) -> Param {
        Param(ParamId::of(self.wet))
    }

    pub fn dry(&self) -> Param {
        Param(ParamId::of(self.dry))
    }

    fn nodes(&self) -> [NodeId; 5] {
        [self.input, self.dry, self.convolver, self.wet, self.output]
    }
}

impl Connectable for ReverbNode {
    fn input(&self) -> NodeId {
        self.input
    }
    fn output(&self) -> NodeId {
        self.output
    }
}

/// echo -> reverb, the chain every hit (or every send) runs through.
#[derive(Clone, Copy, Debug)]
pub struct OutputEffectsChain {
    echo: EchoNode,
    reverb: ReverbNode,
}

impl OutputEffectsChain {
    pub const ECHO_FEEDBACK: f32 = 0.33;
    pub const ECHO_LEVEL: f32 = 1.0;
    pub const REVERB_WET: f32 = 0.25;

    pub fn build<G: GraphOps + ?Sized>(graph: &mut G, impulse: &[StereoFrame]) -> Result<Self, GraphError> {
        let echo = EchoNode::build(graph, Self::ECHO_FEEDBACK, Self::ECHO_LEVEL)?;
        let reverb = ReverbNode::build(graph, impulse, Self::REVERB_WET, 1.0)?;
        echo.connect(graph, reverb.input())?;
        Ok(Self { echo, reverb })
    }

    pub fn echo_delay_time(&self) -> Param {
        self.echo.delay_time()
    }

    pub fn echo_feedback(&self) -> Param {
        self.echo.feedback()
    }

    pub fn echo_level(&self) -> Param {
        self.echo.level()
    }

    pub fn reverb_level(&self) -> Param {
        self.reverb.wet()
    }

    /// Disconnects and removes every node of the chain.
    pub fn teardown<G: GraphOps + ?Sized>(&self, graph: &mut G) -> Result<(), GraphError> {
        self.disconnect(graph, None)?;
        for id in self.echo.nodes().chain(self.reverb.nodes()) {
            graph.remove_node(id)?;
        }
        Ok(())
    }
}

impl Connectable for OutputEffectsChain {
    fn input(&self) -> NodeId {
        self.echo.input()
    }
    fn output(&self) -> NodeId {
        self.reverb.output()
    }
}

/// Splits one track into a dry path and a send into the effects chain.
#[derive(Clone, Copy, Debug)]
pub struct TrackSend {
    input: NodeId,
    send: NodeId,
    dry: NodeId,
}

impl TrackSend {
    pub fn build<G: GraphOps + ?Sized>(graph: &mut G) -> Result<Self, GraphError> {
        let input = gain(graph, 1.0)?;
        let send = gain(graph, 0.0)?;
        let dry = gain(graph, 1.0)?;
        graph.connect(input, send)?;
        graph.connect(input, dry)?;
        Ok(Self { input, send, dry })
    }

    pub fn send_level(&self) -> SendLevel {
        SendLevel { send: ParamId::of(self.send), dry: ParamId::of(self.dry) }
    }

    pub fn connect_send<G: GraphOps + ?Sized>(&self, graph: &mut G, dest: NodeId) -> Result<(), GraphError> {
        graph.connect(self.send, dest)
    }

    fn nodes(&self) -> [NodeId; 3] {
        [self.input, self.send, self.dry]
    }
}

impl Connectable for TrackSend {
    fn input(&self) -> NodeId {
        self.input
    }
    // the dry path; the send leaves through connect_send
    fn output(&self) -> NodeId {
        self.dry
    }
}

/// One send per track, a shared effects chain, and a final sum of wet and dry.
#[derive(Clone, Debug)]
pub struct TrackRouter {
    sends: BTreeMap<TrackId, TrackSend>,
    effects: OutputEffectsChain,
    dry_mix: NodeId,
    wet_mix: NodeId,
    final_sum: NodeId,
}

impl TrackRouter {
    pub fn build<G: GraphOps + ?Sized>(
        graph: &mut G,
        tracks: impl IntoIterator<Item = TrackId>,
        impulse: &[StereoFrame],
    ) -> Result<Self, GraphError> {
        let effects = OutputEffectsChain::build(graph, impulse)?;
        let dry_mix = gain(graph, 1.0)?;
        let wet_mix = gain(graph, 1.0)?;
        let final_sum = gain(graph, 1.0)?;
        effects.connect(graph, wet_mix)?;
        graph.connect(dry_mix, final_sum)?;
        graph.connect(wet_mix, final_sum)?;

        let mut sends = BTreeMap::new();
        for track in tracks {
            let send = TrackSend::build(graph)?;
            send.connect(graph, dry_mix)?;
            send.connect_send(graph, effects.input())?;
            sends.insert(track, send);
        }
        Ok(Self { sends, effects, dry_mix, wet_mix, final_sum })
    }

    pub fn effects(&self) -> &OutputEffectsChain {
        &self.effects
    }

    pub fn track_input(&self, track: TrackId) -> Option<NodeId> {
        self.sends.get(&track).map(Connectable::input)
    }

    pub fn send_level(&self, track: TrackId) -> Option<SendLevel> {
        self.sends.get(&track).map(TrackSend::send_level)
    }

    pub fn teardown<G: GraphOps + ?Sized>(&self, graph: &mut G) -> Result<(), GraphError> {
        self.disconnect(graph, None)?;
        for send in self.sends.values() {
            for id in send.nodes() {
                graph.remove_node(id)?;
            }
        }
        for id in [self.dry_mix, self.wet_mix, self.final_sum] {
            graph.remove_node(id)?;
        }
        self.effects.teardown(graph)
    }
}

impl Connectable for TrackRouter {
    fn input(&self) -> NodeId {
        self.dry_mix
    }
    fn output(&self) -> NodeId {
        self.final_sum
    }
}
