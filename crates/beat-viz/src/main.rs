mod audio;
mod renderer;
mod ui;
mod utils;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use beat_viz_core::audio::graph::{share, SharedContext, SoftwareGraph};
use beat_viz_core::audio::{FileSource, KeyboardSource, MicrophoneSource};
use beat_viz_core::renderer::{ColorTheme, DrawList};
use beat_viz_core::{
    AudioManager, RenderDriver, SettingsPatch, Source, SourceType, VisualizationSettings,
    VisualizationType,
};
use clap::Parser;
use nannou::prelude::*;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use audio::{CpalInputs, OutputDevice, SilentClock};
use renderer::Canvas;
use ui::{parse_key, Action, VOLUME_STEP};
use utils::Config;

/// Graph rate when no output device could be opened
const FALLBACK_SAMPLE_RATE: f32 = 44100.0;
const DEFAULT_OCTAVE: i32 = 4;
const NOTE_VELOCITY: f32 = 0.8;

#[derive(Parser, Debug)]
#[command(name = "beat-viz", about = "Audio-reactive visualizer")]
struct Args {
    /// Run in a window instead of fullscreen
    #[arg(long)]
    windowed: bool,

    /// Audio file to play (WAV or MP3)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Start with the microphone instead of the keyboard synth
    #[arg(long)]
    mic: bool,

    /// Input device name for the microphone
    #[arg(long)]
    device: Option<String>,

    /// Print input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Visualization: circle, bars or wave
    #[arg(long)]
    viz: Option<VisualizationType>,

    /// Color theme: neon, sunset or mono
    #[arg(long)]
    theme: Option<ColorTheme>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beat_viz=info")),
        )
        .init();

    let args = Args::parse();
    if args.list_devices {
        audio::list_devices();
        return;
    }

    nannou::app(model).update(update).exit(exit).run();
}

struct Model {
    args: Args,
    config: Config,
    context: SharedContext,
    manager: AudioManager,
    driver: RenderDriver,
    surface: DrawList,
    /// Keeps the output stream alive; `None` means the clock is advanced by hand
    output: Option<cpal::Stream>,
    clock: SilentClock,
    octave: i32,
    /// Held piano keys and the note each one started
    held: HashMap<Key, String>,
}

fn model(app: &App) -> Model {
    let args = Args::parse();
    let config = Config::load();

    let mut win = app
        .new_window()
        .title("beat-viz")
        .size(1280, 720)
        .view(view)
        .key_pressed(key_pressed)
        .key_released(key_released);
    if !args.windowed {
        win = win.fullscreen();
    }
    if let Err(e) = win.build() {
        error!(error = ?e, "failed to open window");
        app.quit();
    }

    let device = OutputDevice::default_device()
        .map_err(|e| warn!(error = %format!("{e:#}"), "no audio output, running silent"))
        .ok();
    let sample_rate = device
        .as_ref()
        .map_or(FALLBACK_SAMPLE_RATE, OutputDevice::sample_rate);
    let context: SharedContext = share(SoftwareGraph::new(sample_rate));
    let output = device.and_then(|d| {
        d.play(context.clone())
            .map_err(|e| warn!(error = %format!("{e:#}"), "output stream failed, running silent"))
            .ok()
    });

    let mut patch = config.visualization();
    if args.viz.is_some() {
        patch.kind = args.viz;
    }
    if args.theme.is_some() {
        patch.color_theme = args.theme;
    }
    let driver = RenderDriver::new(VisualizationSettings::default().merged(&patch));

    let mut manager = AudioManager::with_frame_queue(context.clone(), &config.analyzer());
    if let Err(e) = manager.initialize() {
        warn!(error = %e, "audio context did not start");
    }

    let mut was_playing = false;
    manager.subscribe(move |state| {
        if was_playing && !state.is_playing {
            info!("playback stopped");
        }
        was_playing = state.is_playing;
    });

    let initial = if args.file.is_some() {
        SourceType::File
    } else if args.mic {
        SourceType::Microphone
    } else {
        SourceType::Keyboard
    };

    let mut model = Model {
        args,
        config,
        context,
        manager,
        driver,
        surface: DrawList::new(0.0, 0.0),
        output,
        clock: SilentClock::default(),
        octave: DEFAULT_OCTAVE,
        held: HashMap::new(),
    };
    model.select_source(initial);
    info!(viz = %model.driver.settings().kind, theme = %model.driver.settings().color_theme, "ready");
    model
}

impl Model {
    fn build_source(&mut self, kind: SourceType) -> anyhow::Result<Source> {
        let analyzer = self.config.analyzer();
        let source = match kind {
            SourceType::File => {
                let path = self
                    .args
                    .file
                    .as_ref()
                    .context("no audio file given, pass --file <path>")?;
                let bytes =
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                let mut file = FileSource::new(self.context.clone(), &analyzer)?;
                file.load_file(&bytes)?;
                info!(path = %path.display(), duration = file.duration(), "loaded audio file");
                file.into()
            }
            SourceType::Microphone => {
                let rate = self.context.lock().sample_rate();
                let timeout = Duration::from_secs(self.config.device_timeout_secs());
                let devices = Box::new(CpalInputs::new(rate, timeout));
                let mut mic = MicrophoneSource::new(self.context.clone(), &analyzer, devices)?;
                let device = self.args.device.clone().or_else(|| self.config.last_device.clone());
                if let Some(name) = device {
                    mic.switch_device(&name)?;
                }
                mic.into()
            }
            SourceType::Keyboard => {
                KeyboardSource::new(self.context.clone(), &analyzer, &self.config.synth())?.into()
            }
        };
        Ok(source)
    }

    fn select_source(&mut self, kind: SourceType) {
        if let Err(e) = self.try_select_source(kind) {
            warn!(source = %kind, error = %format!("{e:#}"), "could not switch source");
        }
    }

    fn try_select_source(&mut self, kind: SourceType) -> anyhow::Result<()> {
        let source = self.build_source(kind)?;
        self.held.clear();
        self.manager.set_source(source)?;
        self.manager.start_analysis()?;

        if let Some(mic) = self.manager.source_mut().and_then(Source::as_microphone_mut) {
            if let Some(name) = mic.device_id().map(str::to_string) {
                if self.config.last_device.as_deref() != Some(name.as_str()) {
                    self.config.set_device(&name);
                }
            }
        }
        Ok(())
    }

    fn toggle_playback(&mut self) {
        if self.manager.state().is_playing {
            self.manager.pause_analysis();
        } else if let Err(e) = self.manager.start_analysis() {
            warn!(error = %e, "could not resume playback");
        }
    }

    fn keyboard_active(&self) -> bool {
        self.manager.state().source_type == Some(SourceType::Keyboard)
    }

    fn note_on(&mut self, key: Key, name: &str, offset: i32) {
        if self.held.contains_key(&key) {
            // Key repeat
            return;
        }
        let octave = self.octave + offset;
        let Some(keyboard) = self.manager.source_mut().and_then(Source::as_keyboard_mut) else {
            return;
        };
        match keyboard.play_note(name, NOTE_VELOCITY, octave) {
            Ok(note) => {
                self.held.insert(key, note);
            }
            Err(e) => warn!(error = %e, "could not play note"),
        }
    }

    fn note_off(&mut self, key: Key) {
        let Some(note) = self.held.remove(&key) else {
            return;
        };
        if let Some(keyboard) = self.manager.source_mut().and_then(Source::as_keyboard_mut) {
            keyboard.stop_note(&note);
        }
    }
}

fn update(app: &App, model: &mut Model, update: Update) {
    if model.output.is_none() {
        model.clock.advance(&model.context, update.since_last);
    }
    model.manager.pump();

    let bounds = app.window_rect();
    model.surface.resize(bounds.w(), bounds.h());
    model.surface.clear();
    let state = model.manager.state();
    model.driver.frame(&state, &mut model.surface);

    if app.elapsed_frames() % 60 == 0 {
        if let Some(frame) = state.analysis.as_ref() {
            debug!(
                volume = frame.volume,
                bass = frame.bass_energy,
                centroid = frame.spectral_centroid,
                "analysis"
            );
        }
        if let Some(mic) = model.manager.source_mut().and_then(Source::as_microphone_mut) {
            let levels = mic.volume_levels();
            debug!(volume = levels.volume, peak = levels.peak, "input level");
        }
    }
}

fn view(app: &App, model: &Model, frame: Frame) {
    let draw = app.draw();
    if frame.nth() == 0 {
        draw.background().color(BLACK);
    }

    Canvas::new(app.window_rect()).replay(&draw, model.surface.commands());

    if let Err(e) = draw.to_frame(app, &frame) {
        warn!(error = ?e, "failed to draw frame");
    }
}

fn key_pressed(app: &App, model: &mut Model, key: Key) {
    let Some(action) = parse_key(key, model.keyboard_active()) else {
        return;
    };

    match action {
        Action::Quit => app.quit(),
        Action::UseFile => model.select_source(SourceType::File),
        Action::UseMicrophone => model.select_source(SourceType::Microphone),
        Action::UseKeyboard => model.select_source(SourceType::Keyboard),
        Action::TogglePlayback => model.toggle_playback(),
        Action::VolumeUp => {
            let volume = model.manager.state().volume + VOLUME_STEP;
            model.manager.set_volume(volume);
            info!(volume, "volume");
        }
        Action::VolumeDown => {
            let volume = (model.manager.state().volume - VOLUME_STEP).max(0.0);
            model.manager.set_volume(volume);
            info!(volume, "volume");
        }
        Action::NextVisualization => {
            let next = model.driver.settings().kind.next();
            model.driver.update_settings(&SettingsPatch::kind(next));
            info!(viz = %next, "visualization");
        }
        Action::NextTheme => {
            let next = model.driver.settings().color_theme.next();
            model.driver.update_settings(&SettingsPatch::theme(next));
            info!(theme = %next, "theme");
        }
        Action::OctaveDown => {
            model.octave = (model.octave - 1).max(0);
            info!(octave = model.octave, "octave");
        }
        Action::OctaveUp => {
            model.octave = (model.octave + 1).min(8);
            info!(octave = model.octave, "octave");
        }
        Action::NoteOn(name, offset) => model.note_on(key, name, offset),
    }
}

fn key_released(_app: &App, model: &mut Model, key: Key) {
    model.note_off(key);
}

fn exit(_app: &App, mut model: Model) {
    model.driver.cleanup();
    model.manager.destroy();
    debug!("shut down");
}
