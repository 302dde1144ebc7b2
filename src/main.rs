use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use nexus_home::daemon::{format_device, parse_value, print_devices};
use nexus_home::home::{ChangeSource, DeviceStore, UpdateOutcome};
use nexus_home::voice::{
    AudioBackend, CpalBackend, PLAYBACK_SAMPLE_RATE, SAMPLE_RATE, codec, samples_to_wav,
};
use nexus_home::{Config, Daemon};

/// Frames of 100ms at 16kHz for the microphone meter
const METER_FRAME_SIZE: usize = 1600;

/// NexusHome - smart-home control with a realtime voice assistant
#[derive(Parser)]
#[command(name = "nexus", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON home file to use instead of the configured one
    #[arg(long, env = "NEXUS_HOME_FILE")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive console with a voice session (default)
    Voice,
    /// List devices
    Devices,
    /// List rooms and their devices
    Rooms,
    /// Toggle a device on or off
    Toggle {
        /// Device ID (e.g. "d1")
        id: String,
    },
    /// Set a device value (brightness, temperature, volume)
    Set {
        /// Device ID (e.g. "d2")
        id: String,
        /// New value
        value: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,nexus_home=info",
        1 => "info,nexus_home=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let mut config = Config::load()?;
    if let Some(home) = cli.home {
        config.home.state_file = Some(home);
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Voice) {
        Command::Voice => voice(config).await,
        Command::Devices => {
            print_devices(&config.load_home()?.devices);
            Ok(())
        }
        Command::Rooms => rooms(&config),
        Command::Toggle { id } => {
            let store = DeviceStore::new(config.load_home()?);
            apply(&store, &id, store.toggle(&id, ChangeSource::User))
        }
        Command::Set { id, value } => {
            let store = DeviceStore::new(config.load_home()?);
            let outcome = store.set_value(&id, parse_value(&value), ChangeSource::User);
            apply(&store, &id, outcome)
        }
        Command::TestMic { duration, save } => test_mic(duration, save).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Start a voice session and hand over to the console
async fn voice(config: Config) -> anyhow::Result<()> {
    let mut daemon = Daemon::new(config)?;

    match daemon.start_session().await {
        Ok(()) => tracing::info!("nexus ready - start talking"),
        Err(e) => {
            // Device controls still work without a session
            tracing::error!(error = %e, "voice session unavailable");
        }
    }

    daemon.run_console().await?;
    Ok(())
}

fn rooms(config: &Config) -> anyhow::Result<()> {
    let store = DeviceStore::new(config.load_home()?);
    for room in store.list_rooms() {
        println!("{} ({}, {:?})", room.name, room.id, room.room_type);
        for device in store.devices_in_room(&room.id) {
            println!("  {}", format_device(&device));
        }
    }
    Ok(())
}

/// Report a one-shot device change
///
/// Changes live only for this process; the home file is not rewritten.
fn apply(store: &DeviceStore, id: &str, outcome: UpdateOutcome) -> anyhow::Result<()> {
    match outcome {
        UpdateOutcome::Applied => {
            if let Some(device) = store.get_device(id) {
                println!("{}", format_device(&device));
            }
            Ok(())
        }
        UpdateOutcome::NotFound => anyhow::bail!("no device with id {id}"),
    }
}

/// Test microphone input
async fn test_mic(duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let backend = CpalBackend::new();
    let mut source = backend.open_input(SAMPLE_RATE, METER_FRAME_SIZE)?;
    let (tx, mut rx) = mpsc::channel(64);
    source.start(tx)?;

    println!("Sample rate: {} Hz", source.sample_rate());
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut second = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            second.extend_from_slice(frame.samples());
        }

        let energy = codec::rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if save.is_some() {
            recording.extend(second);
        }
    }

    source.stop()?;

    if let Some(path) = save {
        std::fs::write(&path, samples_to_wav(&recording, SAMPLE_RATE)?)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let backend = CpalBackend::new();
    let mut sink = backend.open_output(PLAYBACK_SAMPLE_RATE)?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Arc<[f32]> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);

    let start = sink.current_time();
    sink.schedule(0, start, samples)?;

    // Wait for the sink clock to pass the tone
    let end = start + f64::from(duration_secs);
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f32(duration_secs + 1.0);
    while sink.current_time() < end && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    sink.close()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
