use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use companion_voice::Config;
use companion_voice::voice::{
    AudioContext, AudioSession, CpalBackend, EncodedFrame, FrameRecorder, Microphone,
    OUTPUT_SAMPLE_RATE, PcmFrame, StreamResampler, decode_pcm16,
};

/// Companion - real-time voice pipeline for a conversational assistant
#[derive(Parser)]
#[command(name = "companion", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone capture and frame encoding
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the encoded frames to a WAV file
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Test gapless playback and barge-in stop
    TestSpeaker,
    /// Play the microphone back through the playback scheduler
    Echo {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Print the resolved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,companion_voice=info",
        1 => "info,companion_voice=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::TestMic { duration, record } => test_mic(&config, duration, record.as_deref()).await,
        Command::TestSpeaker => test_speaker(&config).await,
        Command::Echo { duration } => echo(&config, duration).await,
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn new_session(config: &Config) -> AudioSession<CpalBackend> {
    AudioSession::new(
        CpalBackend::new(config.audio.output_device.clone()),
        config.audio.clone(),
    )
}

/// Test microphone capture
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, record: Option<&Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mic = Microphone::open(config.audio.input_device.as_deref())?;
    println!("Device: {}", mic.name());

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<EncodedFrame>();
    let (level_tx, mut level_rx) = mpsc::unbounded_channel::<f32>();

    let mut session = new_session(config);
    session
        .init(
            &mic,
            Box::new(move |frame| {
                let _ = frame_tx.send(frame);
            }),
            Some(Box::new(move |level| {
                let _ = level_tx.send(level);
            })),
        )
        .await?;

    let mut recorder = record
        .map(|path| FrameRecorder::create(path, config.audio.input_sample_rate))
        .transpose()?;

    println!(
        "Block size: {} samples at {} Hz",
        config.audio.block_size, config.audio.input_sample_rate
    );
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut peak = 0.0f32;
        while let Ok(level) = level_rx.try_recv() {
            peak = peak.max(level);
        }

        while let Ok(frame) = frame_rx.try_recv() {
            if let Some(recorder) = recorder.as_mut() {
                recorder.write_frame(&frame)?;
            }
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (peak * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] level: {:.4} | frames: {:4} | [{}]",
            i + 1,
            peak,
            session.frames_emitted(),
            meter
        );
    }

    session.teardown().await;

    if let Some(recorder) = recorder {
        let samples = recorder.samples_written();
        recorder.finalize()?;
        if let Some(path) = record {
            println!("\nWrote {samples} samples to {}", path.display());
        }
    }

    println!("\n---");
    println!("If the level moved when you spoke, capture is working!");
    println!("If it stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Generate a sine tone at the playback rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sine_tone(frequency: f32, duration_secs: f32) -> Vec<f32> {
    let sample_rate = OUTPUT_SAMPLE_RATE as f32;
    let num_samples = (sample_rate * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect()
}

/// Wait until everything scheduled has played, with a timeout
#[allow(clippy::future_not_send)]
async fn drain_playback(session: &AudioSession<CpalBackend>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while session.active_count() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Test scheduled playback with a chunked sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a continuous 440Hz tone for 2 seconds\n");

    let mut session = new_session(config);
    session.init_playback().await?;

    // 100ms chunks, as the speech model streams them
    let tone = sine_tone(440.0, 2.0);
    for chunk in tone.chunks(OUTPUT_SAMPLE_RATE as usize / 10) {
        let data = PcmFrame::from_samples(chunk, OUTPUT_SAMPLE_RATE).encode().data;
        if let Some(scheduled) = session.process_output_audio(&data).await? {
            println!(
                "chunk {:2}: start {:.3}s, duration {:.3}s",
                scheduled.id, scheduled.start, scheduled.duration
            );
        }
    }

    drain_playback(&session, Duration::from_secs(4)).await;

    println!("\nNow a 2 second tone cut off after half a second (barge-in)...");
    let data = PcmFrame::from_samples(&sine_tone(660.0, 2.0), OUTPUT_SAMPLE_RATE)
        .encode()
        .data;
    session.process_output_audio(&data).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stopped = session.stop_output_audio();
    let now = session
        .output_context()
        .map_or(0.0, |ctx| ctx.current_time());
    println!(
        "Stopped {stopped} buffer(s) at {now:.3}s, cursor reset to {:.3}s",
        session.next_start_time()
    );

    session.teardown().await;

    println!("\n---");
    println!("If the first tone had no clicks or gaps, scheduling is working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Loop microphone frames back into the playback scheduler
#[allow(clippy::future_not_send)]
async fn echo(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Echoing microphone for {duration} seconds (use headphones)...\n");

    let mic = Microphone::open(config.audio.input_device.as_deref())?;
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<EncodedFrame>();

    let mut session = new_session(config);
    session
        .init(
            &mic,
            Box::new(move |frame| {
                let _ = frame_tx.send(frame);
            }),
            None,
        )
        .await?;

    let mut resampler = StreamResampler::new(
        config.audio.input_sample_rate,
        config.audio.output_sample_rate,
        config.audio.block_size,
    )?;
    let mut upsampled = Vec::new();

    let deadline = Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frame_rx.recv()).await {
        let pcm = frame.decode()?;
        upsampled.clear();
        resampler.process(&decode_pcm16(&pcm.bytes)?, &mut upsampled)?;

        let data = PcmFrame::from_samples(&upsampled, config.audio.output_sample_rate)
            .encode()
            .data;
        if let Err(e) = session.process_output_audio(&data).await {
            tracing::warn!(error = %e, "dropped echo chunk");
        }
    }

    println!("Echoed {} frames", session.frames_emitted());
    session.teardown().await;
    Ok(())
}
