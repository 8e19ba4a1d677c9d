use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use nexus_voice::audio::{samples_to_wav, voice_energy, CAPTURE_SAMPLE_RATE};
use nexus_voice::{
    AudioCapture, Config, LiveSession, ModulationProfile, OutputStream, Persona,
    PlaybackScheduler, SessionController, SessionSetup, Visualizer, FREQUENCY_BINS,
    PLAYBACK_SAMPLE_RATE,
};

/// Nexus - real-time voice session client
#[derive(Parser)]
#[command(name = "nexus", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open a live voice session (default)
    Run {
        /// Print a terminal level meter while connected
        #[arg(long)]
        meter: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Test speaker output with a short tone
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,nexus_voice=info",
        1 => "info,nexus_voice=debug",
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
        None | Some(Command::Run { meter: false }) => run_session(false).await,
        Some(Command::Run { meter: true }) => run_session(true).await,
        Some(Command::TestMic { duration, out }) => test_mic(duration, out).await,
        Some(Command::TestSpeaker) => test_speaker().await,
    }
}

/// Open a live session and route audio until Ctrl-C or remote close
#[allow(clippy::future_not_send)]
async fn run_session(meter: bool) -> anyhow::Result<()> {
    let config = Config::from_env();
    let api_key = config.require_api_key()?.to_string();

    let persona = Persona::roll();
    tracing::info!(mood = %persona.mood, "rolled session persona");

    let setup = SessionSetup {
        model: config.model.clone(),
        voice_name: config.voice_name.clone(),
        system_instruction: persona.system_instruction(),
    };

    let mut controller = SessionController::new(&config);
    let mixer = controller.mixer();

    // Devices are acquired inside the dial so that a hardware or
    // permission failure lands the controller in the error state
    let mut devices = None;
    controller
        .connect_with(|| async {
            let capture = AudioCapture::new()?;
            let output = OutputStream::open(mixer)?;
            let transport = LiveSession::connect(&api_key, &setup).await?;
            devices = Some((capture, output));
            Ok(transport)
        })
        .await?;
    let (mut capture, output) =
        devices.ok_or_else(|| anyhow::anyhow!("devices not initialized"))?;

    let (frame_tx, mut frame_rx) = mpsc::channel(32);
    capture.start(frame_tx)?;

    let meter_task = meter.then(|| {
        let visualizer = Visualizer::new(controller.tap());
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                draw_meter(&visualizer.sample());
            }
        })
    });

    tracing::info!("connected - talk into the microphone (Ctrl-C to quit)");

    tokio::select! {
        result = controller.run(&mut frame_rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    if let Some(task) = meter_task {
        task.abort();
    }
    controller.disconnect().await;
    capture.stop();
    drop(output);

    Ok(())
}

/// Render one line of the output level meter
fn draw_meter(bins: &[f32; FREQUENCY_BINS]) {
    const WIDTH: usize = 40;
    let peak = bins.iter().copied().fold(0.0f32, f32::max);
    let filled = ((peak * WIDTH as f32).round() as usize).min(WIDTH);
    let bar: String = "#".repeat(filled) + &" ".repeat(WIDTH - filled);
    print!("\r[{bar}]");
    let _ = std::io::stdout().flush();
}

/// Capture from the microphone and report voice energy
async fn test_mic(duration: u64, out: Option<PathBuf>) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    capture.start(frame_tx)?;

    println!("recording for {duration}s...");

    let mut samples: Vec<f32> = Vec::new();
    let mut peak = 0.0f32;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);

    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), frame_rx.recv()).await {
            Ok(Some(frame)) => {
                let energy = voice_energy(&frame);
                peak = peak.max(energy);
                samples.extend_from_slice(&frame);
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }
    capture.stop();

    println!(
        "captured {:.1}s, peak energy {peak:.4}",
        samples.len() as f32 / CAPTURE_SAMPLE_RATE as f32
    );

    if let Some(path) = out {
        std::fs::write(&path, samples_to_wav(&samples, CAPTURE_SAMPLE_RATE)?)?;
        println!("wrote {}", path.display());
    }

    Ok(())
}

/// Play a short tone through the playback scheduler
async fn test_speaker() -> anyhow::Result<()> {
    let mut scheduler = PlaybackScheduler::new();
    let output = OutputStream::open(scheduler.mixer())?;

    let frame: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    scheduler.schedule_next(&frame, &ModulationProfile::default(), 0.0)?;
    println!("playing test tone...");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    drop(output);

    Ok(())
}
