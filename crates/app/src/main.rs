use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keylight_core::{
    run_loop, EndpointRegistry, InputBinding, KeylightConfig, KeylightError, LightEngine,
    PixelSink, PlaybackClock, RenderScheduler, Rgb8, SharedEngine,
};
use midir::{MidiInput, MidiInputConnection};
use tracing_subscriber::EnvFilter;

const CLIENT_NAME: &str = "keylight";

fn main() -> keylight_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            serial,
            midi_port,
            frames_out,
        } => run(
            config.as_deref(),
            serial.as_deref(),
            midi_port.as_deref(),
            frames_out.as_deref(),
        ),
        Commands::Ports => list_ports(),
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

fn run(
    config_path: Option<&Path>,
    serial: Option<&Path>,
    midi_port: Option<&str>,
    frames_out: Option<&Path>,
) -> keylight_core::Result<()> {
    let config = load_config(config_path)?;
    tracing::info!(
        pixels = config.strip.length,
        fps = config.frame.rate,
        polyphony = ?config.notes.polyphony,
        "starting"
    );

    let engine = SharedEngine::new(LightEngine::new(&config)?, PlaybackClock::start());
    let endpoints = EndpointRegistry::new();
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed))
            .map_err(|e| KeylightError::msg(format!("failed to install Ctrl-C handler: {e}")))?;
    }

    // held for the lifetime of the render loop
    let mut _midi_connection = None;
    let mut _serial_reader = None;

    if let Some(path) = serial {
        let binding = engine.attach_input(&endpoints, &path.to_string_lossy())?;
        _serial_reader = Some(spawn_serial_reader(path, binding, Arc::clone(&shutdown))?);
    }
    if let Some(port) = midi_port {
        let binding = engine.attach_input(&endpoints, &format!("midi:{port}"))?;
        _midi_connection = Some(connect_midi(port, binding)?);
    }
    if serial.is_none() && midi_port.is_none() {
        tracing::warn!("no input configured; rendering the idle background only");
    }

    let mut sink: Box<dyn PixelSink> = match frames_out {
        Some(path) => Box::new(FileSink::create(path)?),
        None => Box::new(LogSink::default()),
    };

    let mut scheduler = RenderScheduler::new(config.frame.rate);
    run_loop(
        &engine,
        sink.as_mut(),
        &mut scheduler,
        Duration::from_millis(config.frame.report_interval_ms),
        &shutdown,
    )
}

fn list_ports() -> keylight_core::Result<()> {
    let midi_in = MidiInput::new(CLIENT_NAME)
        .map_err(|e| KeylightError::msg(format!("failed to open MIDI input: {e}")))?;
    let ports = midi_in.ports();
    if ports.is_empty() {
        println!("no MIDI input ports available");
    }
    for (index, port) in ports.iter().enumerate() {
        if let Ok(name) = midi_in.port_name(port) {
            println!("{index}: {name}");
        }
    }
    Ok(())
}

fn check_config(path: Option<&Path>) -> keylight_core::Result<()> {
    let config = load_config(path)?;
    LightEngine::new(&config)?;
    println!("{}", config.to_json_pretty()?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> keylight_core::Result<KeylightConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            KeylightConfig::load(path)
        }
        None => Ok(KeylightConfig::default()),
    }
}

/// Reads raw bytes from a serial device (configured externally, e.g. with
/// `stty`) or any other byte source such as a FIFO.
fn spawn_serial_reader(
    path: &Path,
    binding: InputBinding,
    shutdown: Arc<AtomicBool>,
) -> keylight_core::Result<thread::JoinHandle<()>> {
    let mut source = File::open(path)?;
    let handle = thread::Builder::new()
        .name("serial-input".into())
        .spawn(move || {
            let mut buffer = [0u8; 256];
            while !shutdown.load(Ordering::Relaxed) {
                match source.read(&mut buffer) {
                    Ok(0) => {
                        tracing::info!(endpoint = binding.endpoint(), "input closed");
                        break;
                    }
                    Ok(read) => {
                        if let Err(err) = binding.feed(&buffer[..read]) {
                            tracing::error!(%err, "input stopped");
                            break;
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::error!(%err, endpoint = binding.endpoint(), "read failed");
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

/// Connects to the first MIDI input whose name contains `port_name`
/// (case-insensitive).
fn connect_midi(port_name: &str, binding: InputBinding) -> keylight_core::Result<MidiInputConnection<()>> {
    let midi_in = MidiInput::new(CLIENT_NAME)
        .map_err(|e| KeylightError::msg(format!("failed to open MIDI input: {e}")))?;
    let wanted = port_name.to_lowercase();
    let port = midi_in
        .ports()
        .into_iter()
        .find(|port| {
            midi_in
                .port_name(port)
                .map(|name| name.to_lowercase().contains(&wanted))
                .unwrap_or(false)
        })
        .ok_or_else(|| KeylightError::msg(format!("MIDI port '{port_name}' not found")))?;

    midi_in
        .connect(
            &port,
            "keylight-input",
            move |_stamp, message, _| {
                if let Err(err) = binding.feed(message) {
                    tracing::error!(%err, "dropping MIDI message");
                }
            },
            (),
        )
        .map_err(|e| KeylightError::msg(format!("failed to connect to MIDI port: {e}")))
}

/// Logs a short summary of each frame at trace level.
#[derive(Debug, Default)]
struct LogSink {
    frames: u64,
}

impl PixelSink for LogSink {
    fn submit(&mut self, frame: &[Rgb8]) -> keylight_core::Result<()> {
        self.frames += 1;
        if tracing::enabled!(tracing::Level::TRACE) {
            let lit = frame.iter().filter(|pixel| **pixel != [0, 0, 0]).count();
            tracing::trace!(frame = self.frames, lit, "frame");
        }
        Ok(())
    }
}

/// Streams frames as packed RGB bytes, one frame after another, for an
/// external driver process to consume.
struct FileSink {
    out: BufWriter<File>,
    bytes: Vec<u8>,
}

impl FileSink {
    fn create(path: &Path) -> keylight_core::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            bytes: Vec::new(),
        })
    }
}

impl PixelSink for FileSink {
    fn submit(&mut self, frame: &[Rgb8]) -> keylight_core::Result<()> {
        self.bytes.clear();
        self.bytes.extend(frame.iter().flatten());
        self.out
            .write_all(&self.bytes)
            .and_then(|_| self.out.flush())
            .map_err(|e| KeylightError::Sink(e.to_string()))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "MIDI-driven LED strip animation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for MIDI and animate the strip until interrupted.
    Run {
        /// JSON configuration file; defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Raw MIDI byte source, e.g. /dev/ttyAMA0.
        #[arg(long)]
        serial: Option<PathBuf>,
        /// MIDI input port name (substring match).
        #[arg(long)]
        midi_port: Option<String>,
        /// Write packed RGB frames here instead of logging them.
        #[arg(long)]
        frames_out: Option<PathBuf>,
    },
    /// List available MIDI input ports.
    Ports,
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
