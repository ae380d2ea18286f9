use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voxlink::api::ConversationService;
use voxlink::realtime::{Notice, SessionMode};
use voxlink::voice::{
    AudioCapture, AudioPlayback, AudioSink, AudioSource, PlaybackScheduler, samples_to_wav,
};
use voxlink::{Config, EndReason, SessionController};

/// Voxlink - realtime voice conversations from the terminal
#[derive(Parser)]
#[command(name = "voxlink", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold a voice conversation until Ctrl-C
    Talk {
        /// Run the onboarding interview instead of a regular conversation
        #[arg(long)]
        onboarding: bool,
    },
    /// List conversations, newest first
    Conversations,
    /// Mark an onboarding conversation as complete
    CompleteOnboarding {
        /// Conversation ID
        id: i64,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Also write the recording to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the gapless scheduler
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxlink=info",
        1 => "info,voxlink=debug",
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
    match cli.command {
        Command::Talk { onboarding } => {
            let mode = if onboarding {
                SessionMode::Onboarding
            } else {
                SessionMode::Conversation
            };
            talk(mode).await
        }
        Command::Conversations => list_conversations().await,
        Command::CompleteOnboarding { id } => complete_onboarding(id).await,
        Command::TestMic { duration, output } => test_mic(duration, output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run one conversation until Ctrl-C or the remote side hangs up
async fn talk(mode: SessionMode) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let (mut controller, notices) = SessionController::from_config(&config)?;
    let printer = tokio::spawn(print_notices(notices));

    controller.start(mode).await?;
    println!("Connected. Start speaking; press Ctrl-C to end.\n");

    let mut state = controller.subscribe();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nEnding conversation...");
        }
        _ = state.wait_for(|s| s.is_terminal()) => {}
    }

    controller.stop().await;
    let report = controller.join().await;
    drop(controller);
    let _ = printer.await;

    if let Some(report) = report {
        if let Some(latency) = report.latency {
            println!(
                "Latency: last {} ms, average {:.0} ms over {} turns",
                latency.latest_ms, latency.mean_ms, latency.samples
            );
        }
        if let EndReason::Failed(reason) = report.reason {
            anyhow::bail!("session failed: {reason}");
        }
    }

    Ok(())
}

async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::Transcript(line) => println!("{}: {}", line.role, line.text),
            Notice::SessionError(message) => eprintln!("error: {message}"),
            Notice::Refreshed { mode, latest } => match latest {
                Some(conversation) if mode.is_onboarding() => println!(
                    "Onboarding saved as conversation {}. Run `voxlink complete-onboarding {}` to finish.",
                    conversation.id, conversation.id
                ),
                Some(conversation) => println!(
                    "Saved conversation {}: {}",
                    conversation.id,
                    conversation.title.as_deref().unwrap_or("(untitled)")
                ),
                None => println!("Conversation list unavailable"),
            },
            Notice::State(state) => tracing::debug!(%state, "session state"),
            Notice::Latency(_) | Notice::ResponseDone => {}
        }
    }
}

/// List the user's conversations
async fn list_conversations() -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = config.conversation_client()?;

    let conversations = client.list_conversations().await?;
    if conversations.is_empty() {
        println!("No conversations yet");
        return Ok(());
    }

    for conversation in conversations {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let minutes = conversation.duration.map_or(0, |secs| (secs / 60.0).round() as u64);
        println!(
            "{:>6}  {:<40}  {:>3} min  {:>3} msgs  {}",
            conversation.id,
            conversation.title.as_deref().unwrap_or("(untitled)"),
            minutes,
            conversation.message_count.unwrap_or(0),
            conversation.created_at.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

/// Mark an onboarding conversation as complete
async fn complete_onboarding(id: i64) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = config.conversation_client()?;

    let outcome = client.complete_onboarding(id).await?;
    println!("{}", outcome.message.as_deref().unwrap_or("Onboarding completed"));
    if let Some(summary) = outcome.profile_summary {
        println!("\n{summary}");
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let sample_rate = config.audio.sample_rate;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::open(sample_rate)?;
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_samples()?;
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recording.extend(samples);
        }
    }

    capture.release();

    if let Some(path) = output {
        std::fs::write(&path, samples_to_wav(&recording, sample_rate)?)?;
        println!("\nWrote {} samples to {}", recording.len(), path.display());
    }

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

/// Test speaker output with a sine wave split into scheduled chunks
async fn test_speaker() -> anyhow::Result<()> {
    let config = Config::load()?;
    let session = config.session_config();
    let sample_rate = session.capture.sample_rate;

    println!("Testing speaker output...");
    println!("You should hear a smooth 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::open(sample_rate)?;
    let mut scheduler = PlaybackScheduler::new(sample_rate, session.lead_window);

    // 100 ms chunks; any audible click means a scheduling gap
    let chunk = (sample_rate / 10) as usize;
    let total = sample_rate as usize * 2;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for samples in tone.chunks(chunk) {
        if let Some(segment) = scheduler.schedule(samples.len(), playback.now()) {
            playback.enqueue(segment.start, samples.to_vec())?;
        }
    }

    println!("Playing {} chunks at {} Hz...", tone.len().div_ceil(chunk), sample_rate);

    while playback.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    playback.release();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
