//! Small synthesizer played from note on/off events.
//!
//! Each sounding note is an oscillator with its own envelope gain. All voices
//! mix into a bus that splits into a dry path and a convolution reverb; both
//! paths feed the analyser tap, so what gets visualized is the synth itself.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, trace};

use super::{AudioSource, Routing, SourceGraph};
use crate::audio::analyzer::AnalyzerTap;
use crate::audio::graph::{AudioBuffer, NodeId, NodeSpec, ParamEvent, SharedContext, Waveform};
use crate::config::{AnalyzerConfig, SynthConfig};
use crate::error::{Result, SourceError};

/// Length of the synthetic reverb impulse in seconds
const IMPULSE_SECONDS: f64 = 2.0;
/// Exponent of the impulse's decay curve
const IMPULSE_DECAY: i32 = 2;

/// Fourth-octave frequencies, A4 = 440 Hz
const NOTE_TABLE: [(&str, f32); 12] = [
    ("C", 261.63),
    ("C#", 277.18),
    ("D", 293.66),
    ("D#", 311.13),
    ("E", 329.63),
    ("F", 349.23),
    ("F#", 369.99),
    ("G", 392.00),
    ("G#", 415.30),
    ("A", 440.00),
    ("A#", 466.16),
    ("B", 493.88),
];

/// Frequency of `name` in `octave`, sharps and flats accepted
pub fn note_frequency(name: &str, octave: i32) -> Option<f32> {
    let sharp = match name {
        "Db" => "C#",
        "Eb" => "D#",
        "Gb" => "F#",
        "Ab" => "G#",
        "Bb" => "A#",
        other => other,
    };
    NOTE_TABLE
        .iter()
        .find(|(n, _)| *n == sharp)
        .map(|&(_, base)| base * 2f32.powi(octave - 4))
}

/// Attack-decay-sustain-release shape, times in seconds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    /// Fraction of velocity held after the decay
    pub sustain: f32,
    pub release: f32,
}

impl From<&SynthConfig> for Envelope {
    fn from(config: &SynthConfig) -> Self {
        Self {
            attack: config.attack(),
            decay: config.decay(),
            sustain: config.sustain(),
            release: config.release(),
        }
    }
}

#[derive(Debug)]
struct Voice {
    oscillator: NodeId,
    gain: NodeId,
    frequency: f32,
    velocity: f32,
    start_time: f64,
}

pub struct KeyboardSource {
    graph: SourceGraph,
    bus: NodeId,
    dry: NodeId,
    reverb: NodeId,
    wet: NodeId,
    voices: HashMap<String, Voice>,
    // Voices in their release ramp, reclaimed once the oscillator stops
    releasing: Vec<Voice>,
    waveform: Waveform,
    envelope: Envelope,
    reverb_amount: f32,
    active: bool,
}

impl KeyboardSource {
    pub fn new(context: SharedContext, config: &AnalyzerConfig, synth: &SynthConfig) -> Result<Self> {
        let graph = SourceGraph::new(context, config, Routing::ToOutput)?;
        let reverb_amount = synth.reverb_amount().clamp(0.0, 1.0);

        let (bus, dry, reverb, wet) = {
            let mut ctx = graph.context().lock();
            let impulse = Arc::new(reverb_impulse(ctx.sample_rate()));
            let bus = ctx.create_node(NodeSpec::Gain { gain: 1.0 })?;
            let dry = ctx.create_node(NodeSpec::Gain {
                gain: 1.0 - reverb_amount,
            })?;
            let reverb = ctx.create_node(NodeSpec::Convolver { impulse })?;
            let wet = ctx.create_node(NodeSpec::Gain {
                gain: reverb_amount,
            })?;
            ctx.connect(bus, dry)?;
            ctx.connect(bus, reverb)?;
            ctx.connect(reverb, wet)?;
            (bus, dry, reverb, wet)
        };
        graph.attach(dry)?;
        graph.attach(wet)?;

        Ok(Self {
            graph,
            bus,
            dry,
            reverb,
            wet,
            voices: HashMap::new(),
            releasing: Vec::new(),
            waveform: synth.waveform(),
            envelope: Envelope::from(synth),
            reverb_amount,
            active: false,
        })
    }

    /// Start a note and return its key (`"{name}{octave}"`).
    ///
    /// A note that is already sounding is cut and retriggered.
    pub fn play_note(&mut self, name: &str, velocity: f32, octave: i32) -> Result<String> {
        let frequency =
            note_frequency(name, octave).ok_or_else(|| SourceError::UnknownNote(name.to_string()))?;
        let key = format!("{}{}", name, octave);

        self.reclaim_released();
        if let Some(previous) = self.voices.remove(&key) {
            self.hard_stop(previous);
        }
        self.graph.resume()?;

        let velocity = velocity.clamp(0.0, 1.0);
        let env = self.envelope;
        let voice = {
            let mut ctx = self.graph.context().lock();
            let now = ctx.current_time();
            let oscillator = ctx.create_node(NodeSpec::Oscillator {
                waveform: self.waveform,
                frequency,
            })?;
            let gain = ctx.create_node(NodeSpec::Gain { gain: 0.0 })?;

            let attack_end = now + env.attack as f64;
            ctx.schedule(gain, ParamEvent::SetValue { value: 0.0, at: now })?;
            ctx.schedule(
                gain,
                ParamEvent::LinearRamp {
                    value: velocity,
                    end: attack_end,
                },
            )?;
            ctx.schedule(
                gain,
                ParamEvent::LinearRamp {
                    value: velocity * env.sustain,
                    end: attack_end + env.decay as f64,
                },
            )?;

            ctx.connect(oscillator, gain)?;
            ctx.connect(gain, self.bus)?;
            ctx.start_node(oscillator, now, 0.0)?;

            Voice {
                oscillator,
                gain,
                frequency,
                velocity,
                start_time: now,
            }
        };

        trace!(
            key = %key,
            frequency = voice.frequency,
            velocity = voice.velocity,
            start = voice.start_time,
            "note on"
        );
        self.voices.insert(key.clone(), voice);
        Ok(key)
    }

    /// Release a note with its release ramp; unknown keys are ignored
    pub fn stop_note(&mut self, key: &str) {
        let Some(voice) = self.voices.remove(key) else {
            return;
        };

        let release = self.envelope.release as f64;
        {
            let mut ctx = self.graph.context().lock();
            let now = ctx.current_time();
            let held = ctx.param_value(voice.gain).unwrap_or(0.0);
            let scheduled = ctx
                .schedule(voice.gain, ParamEvent::CancelFrom { at: now })
                .and_then(|_| ctx.schedule(voice.gain, ParamEvent::SetValue { value: held, at: now }))
                .and_then(|_| {
                    ctx.schedule(
                        voice.gain,
                        ParamEvent::LinearRamp {
                            value: 0.0,
                            end: now + release,
                        },
                    )
                })
                .and_then(|_| ctx.stop_node(voice.oscillator, now + release));
            if let Err(e) = scheduled {
                trace!(key, error = %e, "release on a voice already gone");
            }
        }

        trace!(key, "note off");
        self.releasing.push(voice);
    }

    pub fn stop_all_notes(&mut self) {
        let keys: Vec<String> = self.voices.keys().cloned().collect();
        for key in keys {
            self.stop_note(&key);
        }
    }

    /// Keys of notes currently held, sorted
    pub fn active_notes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.voices.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of voices still occupying the graph, held or releasing
    pub fn voice_count(&self) -> usize {
        self.voices.len() + self.releasing.len()
    }

    /// Applies to notes played from now on
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = Envelope {
            attack: envelope.attack.max(0.0),
            decay: envelope.decay.max(0.0),
            sustain: envelope.sustain.clamp(0.0, 1.0),
            release: envelope.release.max(0.0),
        };
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// Crossfade between dry (0.0) and fully wet (1.0)
    pub fn set_reverb_amount(&mut self, amount: f32) {
        self.reverb_amount = amount.clamp(0.0, 1.0);
        let mut ctx = self.graph.context().lock();
        let at = ctx.current_time();
        for (node, value) in [(self.dry, 1.0 - self.reverb_amount), (self.wet, self.reverb_amount)] {
            if let Err(e) = ctx.schedule(node, ParamEvent::SetValue { value, at }) {
                trace!(error = %e, "reverb mix on released node");
            }
        }
    }

    pub fn reverb_amount(&self) -> f32 {
        self.reverb_amount
    }

    /// Drop released voices whose oscillators have stopped
    fn reclaim_released(&mut self) {
        let finished: Vec<usize> = {
            let ctx = self.graph.context().lock();
            self.releasing
                .iter()
                .enumerate()
                .filter(|(_, v)| ctx.is_finished(v.oscillator))
                .map(|(i, _)| i)
                .collect()
        };
        for i in finished.into_iter().rev() {
            let voice = self.releasing.swap_remove(i);
            self.free_voice(&voice);
        }
    }

    fn hard_stop(&self, voice: Voice) {
        {
            let mut ctx = self.graph.context().lock();
            let now = ctx.current_time();
            if let Err(e) = ctx.stop_node(voice.oscillator, now) {
                trace!(error = %e, "oscillator already stopped");
            }
        }
        self.free_voice(&voice);
    }

    fn free_voice(&self, voice: &Voice) {
        self.graph.detach(voice.oscillator);
        self.graph.detach(voice.gain);
    }
}

impl AudioSource for KeyboardSource {
    fn start(&mut self) -> Result<()> {
        self.graph.resume()?;
        self.active = true;
        debug!("keyboard source started");
        Ok(())
    }

    fn stop(&mut self) {
        for (_, voice) in self.voices.drain().collect::<Vec<_>>() {
            self.hard_stop(voice);
        }
        for voice in std::mem::take(&mut self.releasing) {
            self.hard_stop(voice);
        }
        if self.active {
            debug!("keyboard source stopped");
        }
        self.active = false;
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn analyzer_tap(&self) -> &AnalyzerTap {
        self.graph.tap()
    }

    fn set_volume(&mut self, level: f32) {
        self.graph.set_volume(level);
    }

    fn volume(&self) -> f32 {
        self.graph.volume()
    }
}

impl Drop for KeyboardSource {
    fn drop(&mut self) {
        self.stop();
        for node in [self.bus, self.dry, self.reverb, self.wet] {
            self.graph.detach(node);
        }
    }
}

/// Decaying white noise used as the reverb's impulse response
fn reverb_impulse(sample_rate: f32) -> AudioBuffer {
    let len = (IMPULSE_SECONDS * sample_rate as f64) as usize;
    let mut rng = rand::rng();
    let samples = (0..len)
        .map(|i| {
            let decay = (1.0 - i as f32 / len as f32).powi(IMPULSE_DECAY);
            rng.random_range(-1.0f32..1.0) * decay
        })
        .collect();
    AudioBuffer::new(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::graph::{share, AudioContext, SoftwareGraph};
    use parking_lot::Mutex;

    const RATE: f32 = 4000.0;

    fn setup() -> (Arc<Mutex<SoftwareGraph>>, KeyboardSource) {
        let graph = share(SoftwareGraph::new(RATE));
        let context: SharedContext = graph.clone();
        let keyboard =
            KeyboardSource::new(context, &AnalyzerConfig::default(), &SynthConfig::default())
                .unwrap();
        (graph, keyboard)
    }

    #[test]
    fn test_note_table() {
        assert_eq!(note_frequency("A", 4), Some(440.0));
        assert_eq!(note_frequency("A", 5), Some(880.0));
        assert_eq!(note_frequency("A", 3), Some(220.0));
        assert_eq!(note_frequency("Db", 4), note_frequency("C#", 4));
        assert_eq!(note_frequency("H", 4), None);
    }

    #[test]
    fn test_unknown_note_is_error() {
        let (_graph, mut keyboard) = setup();
        assert!(matches!(
            keyboard.play_note("X", 1.0, 4),
            Err(SourceError::UnknownNote(_))
        ));
    }

    #[test]
    fn test_envelope_reaches_sustain() {
        let (graph, mut keyboard) = setup();
        keyboard.start().unwrap();
        let key = keyboard.play_note("C", 0.8, 4).unwrap();
        assert_eq!(key, "C4");

        graph.lock().advance(0.5);
        let voice = &keyboard.voices["C4"];
        let level = graph.lock().param_value(voice.gain).unwrap();
        assert!((level - 0.8 * 0.7).abs() < 1e-4);
        assert!((voice.frequency - 261.63).abs() < 1e-3);
    }

    #[test]
    fn test_retrigger_replaces_voice() {
        let (graph, mut keyboard) = setup();
        keyboard.start().unwrap();
        keyboard.play_note("E", 1.0, 4).unwrap();
        let first = keyboard.voices["E4"].oscillator;

        keyboard.play_note("E", 1.0, 4).unwrap();
        let second = keyboard.voices["E4"].oscillator;

        assert_ne!(first, second);
        assert_eq!(keyboard.voice_count(), 1);
        assert!(graph.lock().is_finished(first));
    }

    #[test]
    fn test_release_ramps_then_reclaims() {
        let (graph, mut keyboard) = setup();
        keyboard.start().unwrap();
        keyboard.play_note("G", 1.0, 4).unwrap();
        graph.lock().advance(0.5);

        keyboard.stop_note("G4");
        assert!(keyboard.active_notes().is_empty());
        assert_eq!(keyboard.voice_count(), 1);

        // Halfway through the release the gain is roughly half the sustain
        graph.lock().advance(0.15);
        let gain = keyboard.releasing[0].gain;
        let level = graph.lock().param_value(gain).unwrap();
        assert!(level > 0.1 && level < 0.7, "level {}", level);

        graph.lock().advance(0.5);
        keyboard.play_note("A", 1.0, 4).unwrap();
        assert_eq!(keyboard.voice_count(), 1);
        assert_eq!(keyboard.active_notes(), vec!["A4".to_string()]);
    }

    #[test]
    fn test_notes_reach_tap() {
        let (graph, mut keyboard) = setup();
        keyboard.start().unwrap();
        keyboard.play_note("A", 1.0, 4).unwrap();
        graph.lock().advance(0.6);

        let tap = keyboard.analyzer_tap().clone();
        let mut time = vec![0u8; tap.frequency_bin_count()];
        tap.read_time_domain(&mut time);
        assert!(time.iter().any(|&b| b != 128));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (graph, mut keyboard) = setup();
        let nodes = graph.lock().node_count();
        keyboard.start().unwrap();
        keyboard.play_note("C", 1.0, 4).unwrap();
        keyboard.play_note("D", 1.0, 4).unwrap();
        keyboard.stop_note("D4");

        keyboard.stop();
        keyboard.stop();
        assert!(!keyboard.is_active());
        assert_eq!(keyboard.voice_count(), 0);
        assert_eq!(graph.lock().node_count(), nodes);
    }

    #[test]
    fn test_reverb_amount_clamps() {
        let (graph, mut keyboard) = setup();
        keyboard.set_reverb_amount(3.0);
        assert_eq!(keyboard.reverb_amount(), 1.0);
        assert_eq!(graph.lock().param_value(keyboard.dry).unwrap(), 0.0);
        assert_eq!(graph.lock().param_value(keyboard.wet).unwrap(), 1.0);
    }
}
