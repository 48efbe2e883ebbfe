use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use elio_live::live::WebSocketTransport;
use elio_live::session::{ConnectionState, CpalDevices, SessionController};
use elio_live::voice::{
    AudioBuffer, AudioCapture, AudioPlayback, CaptureConfig, OutputConfig, PlaybackScheduler,
};
use elio_live::Config;

/// Elio - realtime spoken elocution coaching
#[derive(Parser)]
#[command(name = "elio", version, about)]
struct Cli {
    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Prebuilt voice name
    #[arg(long)]
    voice: Option<String>,

    /// File holding the system instruction
    #[arg(long)]
    instruction_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output with gapless scheduled chunks
    TestSpeaker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,elio_live=info",
        1 => "info,elio_live=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = Config::load()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.persona.voice = voice;
    }
    if let Some(path) = cli.instruction_file {
        config.set_instruction_file(&path)?;
    }
    if cli.muted {
        config.audio.start_muted = true;
    }
    config.validate()?;

    tracing::info!(
        model = %config.model,
        voice = %config.persona.voice,
        persona = %config.persona.name,
        "starting elio"
    );

    let transport = WebSocketTransport::from_config(&config)?;
    let (controller, handle) = SessionController::new(config, CpalDevices, transport);
    handle.connect()?;

    let mut states = handle.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut meter = tokio::time::interval(Duration::from_millis(250));
    let show_meter = cli.verbose > 0;
    let mut was_active = false;
    let mut outcome = ConnectionState::Disconnected;

    let session = controller.run();
    tokio::pin!(session);

    loop {
        tokio::select! {
            () = &mut session => break,
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("interrupted, disconnecting");
                if let Err(e) = handle.shutdown() {
                    tracing::debug!(error = %e, "controller already stopped");
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Connected => {
                        println!("Connected. Start speaking; type m + Enter to toggle mute, Ctrl-C to stop.");
                    }
                    _ if ends_session(state, was_active) => {
                        outcome = state;
                        if let Err(e) = handle.shutdown() {
                            tracing::debug!(error = %e, "controller already stopped");
                        }
                    }
                    _ => {}
                }
                was_active |= state.is_active();
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("m") => {
                    let muted = handle.toggle_mute();
                    println!("{}", if muted { "Microphone muted" } else { "Microphone live" });
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = meter.tick(), if show_meter => {
                tracing::debug!(amplitude = handle.amplitude(), muted = handle.is_muted(), "output level");
            }
        }
    }

    if outcome == ConnectionState::Error {
        anyhow::bail!("connection interrupted");
    }
    Ok(())
}

/// Whether a published state ends the CLI session
///
/// `ERROR` always does: a failed first connect can pass through
/// `CONNECTING` within one poll, so no active state is ever observed.
/// `DISCONNECTED` only does once a session was active, since it is also
/// the starting state.
const fn ends_session(state: ConnectionState, was_active: bool) -> bool {
    match state {
        ConnectionState::Error => true,
        ConnectionState::Disconnected => was_active,
        ConnectionState::Connecting | ConnectionState::Connected => false,
    }
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = CaptureConfig::default();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let mut capture = AudioCapture::open(&config, frames_tx)?;

    println!(
        "Device rate: {} Hz, {} channel(s), frames of {} samples at {} Hz",
        capture.device_sample_rate(),
        capture.device_channels(),
        config.frame_size,
        config.sample_rate
    );
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        let mut frames = 0;
        while let Ok(frame) = frames_rx.try_recv() {
            samples.extend_from_slice(&frame.samples);
            frames += 1;
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] frames: {frames:2} | RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.release();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Play a tone as three chunks through the playback scheduler
async fn test_speaker() -> anyhow::Result<()> {
    const CHUNKS: usize = 3;

    println!("Testing speaker output...");
    println!("You should hear one unbroken 440Hz tone for about 2 seconds\n");

    let config = OutputConfig::default();
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let mut playback = AudioPlayback::open(&config, ended_tx)?;
    let mut scheduler = PlaybackScheduler::new(Arc::new(playback.clock()));

    let rate = config.sample_rate;
    let frequency = 440.0_f32;
    let chunk_len = rate as usize * 2 / 3;

    for chunk in 0..CHUNKS {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..chunk_len)
            .map(|i| {
                let t = (chunk * chunk_len + i) as f32 / rate as f32;
                0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
            })
            .collect();

        let buffer = AudioBuffer::new(samples, rate, 1)?;
        let entry = scheduler.schedule(buffer.duration());
        playback.start(&entry, &buffer)?;
        println!(
            "chunk {} scheduled {:?} -> {:?}",
            entry.id, entry.start, entry.end
        );
    }

    while !scheduler.is_empty() {
        match tokio::time::timeout(Duration::from_secs(5), ended_rx.recv()).await {
            Ok(Some(id)) => {
                scheduler.complete(id);
                println!("chunk {id} finished");
            }
            Ok(None) | Err(_) => anyhow::bail!("output device stopped reporting progress"),
        }
    }

    playback.close();
    println!("Done!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_ends_session_without_prior_activity() {
        assert!(ends_session(ConnectionState::Error, false));
        assert!(ends_session(ConnectionState::Error, true));
    }

    #[test]
    fn disconnected_ends_session_only_after_activity() {
        assert!(!ends_session(ConnectionState::Disconnected, false));
        assert!(ends_session(ConnectionState::Disconnected, true));
    }

    #[test]
    fn active_states_keep_running() {
        for was_active in [false, true] {
            assert!(!ends_session(ConnectionState::Connecting, was_active));
            assert!(!ends_session(ConnectionState::Connected, was_active));
        }
    }

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert!((calculate_rms(&[0.5, -0.5]) - 0.5).abs() < f32::EPSILON);
    }
}
