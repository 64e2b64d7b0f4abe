mod middle;
mod tui;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::terminal;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use simplelog::{LevelFilter, WriteLogger};

use middle::{InputEvent, Middle};
use pocketseq::audio;
use pocketseq::config::{CONFIG_FILE, EngineConfig};
use pocketseq::loader::{Drum, RawSample, WavDecoder, find_named_wav, read_raw, synth};
use pocketseq::pipeline::{Kit, PlaybackPipeline};
use pocketseq::shared::{PlaybackState, TrackId};

const LOG_FILE: &str = "pocketseq.log";
const LOG_ENV: &str = "POCKETSEQ_LOG";
const IMPULSE_NAME: &str = "impulse";
const IMPULSE_ID: TrackId = TrackId(u8::MAX);
const IMPULSE_SECS: f32 = 1.5;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

// the terminal owns stdout, so logs go to a file
fn init_logging() -> anyhow::Result<()> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let file = File::create(LOG_FILE).with_context(|| format!("creating {LOG_FILE}"))?;
    WriteLogger::init(level, simplelog::Config::default(), file).context("installing logger")?;
    Ok(())
}

// a wav named after the track if the directory has one, a synthesized hit otherwise
fn load_kit(dir: &Path, kit: &Kit, sample_rate: u32) -> anyhow::Result<Vec<RawSample>> {
    let mut sources = Vec::with_capacity(kit.len());
    for def in &kit.tracks {
        let from_disk = find_named_wav(dir, def.name).and_then(|path| match read_raw(def.id, &path) {
            Ok(raw) => {
                log::info!("{}: {}", def.name, path.display());
                Some(raw)
            }
            Err(err) => {
                log::warn!("{}: can't read {}: {err}", def.name, path.display());
                None
            }
        });
        let raw = match (from_disk, Drum::from_name(def.name)) {
            (Some(raw), _) => raw,
            (None, Some(drum)) => {
                log::info!("{}: synthesized", def.name);
                RawSample::new(def.id, synth::drum_wav(drum, sample_rate)?)
            }
            (None, None) => {
                log::warn!("{}: no sample and nothing to synthesize", def.name);
                continue;
            }
        };
        sources.push(raw);
    }
    Ok(sources)
}

fn load_impulse(dir: &Path, sample_rate: u32) -> anyhow::Result<RawSample> {
    if let Some(path) = find_named_wav(dir, IMPULSE_NAME) {
        return read_raw(IMPULSE_ID, &path).with_context(|| format!("reading {}", path.display()));
    }
    Ok(RawSample::new(IMPULSE_ID, synth::impulse_wav(sample_rate, IMPULSE_SECS)?))
}

fn run() -> anyhow::Result<()> {
    init_logging()?;
    let dir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let config = EngineConfig::load_or_default(&dir.join(CONFIG_FILE)).context("loading config")?;

    let audio = audio::start_audio(&config).context("starting audio output")?;
    let sample_rate = audio.sample_rate();
    let kit = Kit::default();
    let sources = load_kit(&dir, &kit, sample_rate)?;
    let impulse = load_impulse(&dir, sample_rate)?;

    let mut pipeline = PlaybackPipeline::new(audio, &sources, &impulse, &WavDecoder, config.clone())
        .context("building playback pipeline")?;
    pipeline.wait_ready(config.init_timeout()).context("waiting for the audio clock")?;
    let mut middle = Middle::new(kit, &mut pipeline);

    terminal::enable_raw_mode()?;
    // Enable keyboard enhancement for real press/release detection.
    // Falls back gracefully if the terminal doesn't support it.
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::PushKeyboardEnhancementFlags(
            crossterm::event::KeyboardEnhancementFlags::REPORT_EVENT_TYPES
        )
    );
    let _guard = RawModeGuard; // auto drops when out of scope

    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;

    let tick_rate = Duration::from_millis(16); // ~60fps
    let blink_start = Instant::now();
    let mut tui_state = tui::mode::TuiState::default();

    'run: loop {
        // steps first, so hits go out before the frame is drawn
        pipeline.pump();

        let blink_on = (blink_start.elapsed().as_millis() / 250) % 2 == 0;
        let ds = middle.display_state(&pipeline);
        tui_state.playing = ds.playback == PlaybackState::Playing;
        tui_state.track_count = ds.rows.len();

        term.draw(|frame| {
            tui::view::render(frame, frame.area(), &ds, blink_on);
        })?;

        for event in tui::input::poll_input(tick_rate, &tui_state)? {
            if event == InputEvent::Quit {
                break 'run;
            }
            if let Err(err) = middle.handle_input(event, &mut pipeline) {
                log::warn!("{event:?} failed: {err}");
                middle.set_status(err.to_string());
            }
        }
    }

    pipeline.dispose();
    drop(term);
    Ok(())
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::event::PopKeyboardEnhancementFlags
        );
        let _ = terminal::disable_raw_mode();
    }
}
