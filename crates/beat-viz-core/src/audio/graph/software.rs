//! Pull-based software implementation of [`AudioContext`].
//!
//! Renders mono audio one quantum at a time. Each quantum the destination and
//! every analyser are pulled; a node processes at most once per quantum, so
//! shared inputs (one gain feeding both the dry path and the reverb) are not
//! rendered twice.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::analyser::AnalyserState;
use super::convolver::Convolver;
use super::param::Param;
use super::{
    AudioBuffer, AudioContext, ContextState, LiveBuffer, NodeId, NodeSpec, ParamEvent, Waveform,
    RENDER_QUANTUM,
};
use crate::error::GraphError;

type Block = [f32; RENDER_QUANTUM];

/// Start/stop window shared by buffer sources and oscillators
#[derive(Clone, Copy, Debug, Default)]
struct Schedule {
    start: Option<f64>,
    stop: Option<f64>,
}

impl Schedule {
    fn playing_at(&self, t: f64) -> bool {
        match self.start {
            Some(start) => t >= start && self.stop.map_or(true, |stop| t < stop),
            None => false,
        }
    }
}

enum NodeKind {
    Destination,
    Analyser(Box<AnalyserState>),
    Gain(Param),
    BufferSource {
        buffer: Arc<AudioBuffer>,
        schedule: Schedule,
        offset: f64,
        ended: bool,
    },
    LiveInput(LiveBuffer),
    Oscillator {
        waveform: Waveform,
        frequency: f32,
        phase: f32,
        schedule: Schedule,
        ended: bool,
    },
    Convolver(Box<Convolver>),
}

impl NodeKind {
    fn name(&self) -> &'static str {
        match self {
            NodeKind::Destination => "destination",
            NodeKind::Analyser(_) => "analyser",
            NodeKind::Gain(_) => "gain",
            NodeKind::BufferSource { .. } => "buffer source",
            NodeKind::LiveInput(_) => "live input",
            NodeKind::Oscillator { .. } => "oscillator",
            NodeKind::Convolver(_) => "convolver",
        }
    }
}

struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    output: Block,
    rendered_quantum: u64,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            output: [0.0; RENDER_QUANTUM],
            rendered_quantum: u64::MAX,
        }
    }
}

/// In-process audio graph with a sample-accurate clock
pub struct SoftwareGraph {
    sample_rate: f32,
    state: ContextState,
    frames_rendered: u64,
    quantum: u64,
    next_id: u32,
    destination: NodeId,
    nodes: HashMap<NodeId, Node>,
    // Pulled every quantum even without a downstream consumer
    analysers: Vec<NodeId>,
}

impl SoftwareGraph {
    pub fn new(sample_rate: f32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, Node::new(NodeKind::Destination));

        Self {
            sample_rate,
            state: ContextState::Suspended,
            frames_rendered: 0,
            quantum: 0,
            next_id: 1,
            destination,
            nodes,
            analysers: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes feeding `node`
    pub fn inputs_of(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&node)
            .map(|n| n.inputs.clone())
            .unwrap_or_default()
    }

    /// True if audio can flow from `from` to `to` through connections
    pub fn is_routed(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![to];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.inputs.iter().copied());
            }
        }
        false
    }

    /// Render and discard `seconds` of audio, advancing the clock
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds * self.sample_rate as f64).ceil() as usize;
        let mut scratch = [0.0; RENDER_QUANTUM];
        let quanta = frames.div_ceil(RENDER_QUANTUM);
        for _ in 0..quanta {
            self.render_quantum(&mut scratch);
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn render_quantum(&mut self, out: &mut Block) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }

        self.quantum = self.quantum.wrapping_add(1);
        self.pull(self.destination);

        // Analysers keep listening even when nothing downstream pulls them
        for i in 0..self.analysers.len() {
            let id = self.analysers[i];
            self.pull(id);
        }

        match self.nodes.get(&self.destination) {
            Some(dest) => out.copy_from_slice(&dest.output),
            None => out.fill(0.0),
        }
        self.frames_rendered += RENDER_QUANTUM as u64;

        let now = self.current_time();
        for node in self.nodes.values_mut() {
            if let NodeKind::Gain(param) = &mut node.kind {
                param.compact(now);
            }
        }
    }

    fn pull(&mut self, id: NodeId) {
        let quantum = self.quantum;
        let inputs = match self.nodes.get_mut(&id) {
            Some(node) if node.rendered_quantum != quantum => {
                // Marked before recursing so cycles read last quantum's output
                node.rendered_quantum = quantum;
                std::mem::take(&mut node.inputs)
            }
            _ => return,
        };

        let mut mix = [0.0; RENDER_QUANTUM];
        for &input in &inputs {
            self.pull(input);
            if let Some(source) = self.nodes.get(&input) {
                for (m, s) in mix.iter_mut().zip(source.output.iter()) {
                    *m += s;
                }
            }
        }

        let t0 = self.current_time();
        let rate = self.sample_rate;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.inputs = inputs;
            process(&mut node.kind, &mix, &mut node.output, t0, rate);
        }
    }
}

fn process(kind: &mut NodeKind, input: &Block, out: &mut Block, t0: f64, rate: f32) {
    let dt = 1.0 / rate as f64;
    match kind {
        NodeKind::Destination => out.copy_from_slice(input),
        NodeKind::Analyser(analyser) => {
            analyser.push(input);
            out.copy_from_slice(input);
        }
        NodeKind::Gain(param) => {
            for (i, (o, s)) in out.iter_mut().zip(input.iter()).enumerate() {
                *o = s * param.value_at(t0 + i as f64 * dt);
            }
        }
        NodeKind::BufferSource {
            buffer,
            schedule,
            offset,
            ended,
        } => {
            let samples = buffer.samples();
            for (i, o) in out.iter_mut().enumerate() {
                let t = t0 + i as f64 * dt;
                *o = 0.0;
                if *ended || !schedule.playing_at(t) {
                    if schedule.stop.is_some_and(|stop| t >= stop) {
                        *ended = true;
                    }
                    continue;
                }
                let start = schedule.start.unwrap_or(t);
                let position = ((t - start + *offset) * buffer.sample_rate() as f64) as usize;
                match samples.get(position) {
                    Some(&s) => *o = s,
                    None => *ended = true,
                }
            }
        }
        NodeKind::LiveInput(live) => live.pull_into(out),
        NodeKind::Oscillator {
            waveform,
            frequency,
            phase,
            schedule,
            ended,
        } => {
            let step = *frequency / rate;
            for (i, o) in out.iter_mut().enumerate() {
                let t = t0 + i as f64 * dt;
                *o = 0.0;
                if *ended || !schedule.playing_at(t) {
                    if schedule.stop.is_some_and(|stop| t >= stop) {
                        *ended = true;
                    }
                    continue;
                }
                *o = waveform.sample(*phase);
                *phase = (*phase + step).fract();
            }
        }
        NodeKind::Convolver(convolver) => convolver.process(input, out),
    }
}

impl AudioContext for SoftwareGraph {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), GraphError> {
        match self.state {
            ContextState::Closed => Err(GraphError::Closed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                debug!(sample_rate = self.sample_rate, "audio context resumed");
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn close(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        debug!(nodes = self.nodes.len(), "audio context closed");
        self.nodes.retain(|&id, _| id == self.destination);
        self.analysers.clear();
        if let Some(dest) = self.nodes.get_mut(&self.destination) {
            dest.inputs.clear();
        }
        self.state = ContextState::Closed;
    }

    fn create_node(&mut self, spec: NodeSpec) -> Result<NodeId, GraphError> {
        if self.state == ContextState::Closed {
            return Err(GraphError::Closed);
        }

        let kind = match spec {
            NodeSpec::Analyser {
                fft_size,
                smoothing,
            } => NodeKind::Analyser(Box::new(AnalyserState::new(fft_size, smoothing)?)),
            NodeSpec::Gain { gain } => NodeKind::Gain(Param::new(gain)),
            NodeSpec::BufferSource { buffer } => NodeKind::BufferSource {
                buffer,
                schedule: Schedule::default(),
                offset: 0.0,
                ended: false,
            },
            NodeSpec::LiveInput { buffer } => NodeKind::LiveInput(buffer),
            NodeSpec::Oscillator {
                waveform,
                frequency,
            } => NodeKind::Oscillator {
                waveform,
                frequency,
                phase: 0.0,
                schedule: Schedule::default(),
                ended: false,
            },
            NodeSpec::Convolver { impulse } => {
                NodeKind::Convolver(Box::new(Convolver::new(&impulse)))
            }
        };

        let id = NodeId(self.next_id);
        self.next_id += 1;
        if matches!(kind, NodeKind::Analyser(_)) {
            self.analysers.push(id);
        }
        self.nodes.insert(id, Node::new(kind));
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node(from)?;
        let target = self.node_mut(to)?;
        if !target.inputs.contains(&from) {
            target.inputs.push(from);
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.node(node)?;
        for other in self.nodes.values_mut() {
            other.inputs.retain(|&input| input != node);
        }
        Ok(())
    }

    fn release(&mut self, node: NodeId) -> Result<(), GraphError> {
        if node == self.destination {
            return Err(GraphError::Unsupported(node, "release"));
        }
        self.disconnect(node)?;
        self.nodes.remove(&node);
        self.analysers.retain(|&id| id != node);
        Ok(())
    }

    fn start_node(&mut self, node: NodeId, when: f64, offset: f64) -> Result<(), GraphError> {
        let entry = self.node_mut(node)?;
        match &mut entry.kind {
            NodeKind::BufferSource {
                schedule,
                offset: start_offset,
                ..
            } => {
                schedule.start = Some(when);
                *start_offset = offset.max(0.0);
                Ok(())
            }
            NodeKind::Oscillator { schedule, .. } => {
                schedule.start = Some(when);
                Ok(())
            }
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn stop_node(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        let entry = self.node_mut(node)?;
        match &mut entry.kind {
            NodeKind::BufferSource { schedule, .. } | NodeKind::Oscillator { schedule, .. } => {
                schedule.stop = Some(when);
                Ok(())
            }
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn is_finished(&self, node: NodeId) -> bool {
        match self.nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::BufferSource { ended, .. }) | Some(NodeKind::Oscillator { ended, .. }) => {
                *ended
            }
            Some(_) => false,
            None => true,
        }
    }

    fn schedule(&mut self, node: NodeId, event: ParamEvent) -> Result<(), GraphError> {
        let entry = self.node_mut(node)?;
        match &mut entry.kind {
            NodeKind::Gain(param) => {
                param.apply(event);
                Ok(())
            }
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn param_value(&self, node: NodeId) -> Result<f32, GraphError> {
        let now = self.current_time();
        match &self.node(node)?.kind {
            NodeKind::Gain(param) => Ok(param.value_at(now)),
            NodeKind::Oscillator { frequency, .. } => Ok(*frequency),
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn frequency_bin_count(&self, node: NodeId) -> Result<usize, GraphError> {
        match &self.node(node)?.kind {
            NodeKind::Analyser(analyser) => Ok(analyser.frequency_bin_count()),
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn byte_frequency_data(&mut self, node: NodeId, out: &mut [u8]) -> Result<(), GraphError> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Analyser(analyser) => {
                analyser.byte_frequency_data(out);
                Ok(())
            }
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn byte_time_domain_data(&self, node: NodeId, out: &mut [u8]) -> Result<(), GraphError> {
        match &self.node(node)?.kind {
            NodeKind::Analyser(analyser) => {
                analyser.byte_time_domain_data(out);
                Ok(())
            }
            other => Err(GraphError::Unsupported(node, other.name())),
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let mut block = [0.0; RENDER_QUANTUM];
        for chunk in out.chunks_mut(RENDER_QUANTUM) {
            self.render_quantum(&mut block);
            chunk.copy_from_slice(&block[..chunk.len()]);
        }
    }
}
