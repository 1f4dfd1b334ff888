use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use region_recorder::capture::XcapFrameSource;
use region_recorder::commands::recording::{start_recording, stop_recording, RecorderState};
use region_recorder::encoder::FfmpegLauncher;
use region_recorder::{
    CaptureMode, RecorderBackends, RecordingConfig, RecordingSession, Region, StatusEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "region-recorder")]
#[command(about = "Record a region of the screen into a video file")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until the duration elapses or Ctrl-C is pressed
    Record(RecordArgs),

    /// List available audio input devices
    Devices,
}

#[derive(clap::Args)]
struct RecordArgs {
    /// JSON configuration file; other flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region as TOP,LEFT,WIDTH,HEIGHT in screen pixels
    #[arg(short, long, value_parser = parse_region)]
    region: Option<Region>,

    /// Frames per second
    #[arg(short, long)]
    fps: Option<u32>,

    /// Record microphone audio
    #[arg(short, long)]
    audio: bool,

    /// Audio input device name (default device if omitted)
    #[arg(long)]
    device: Option<String>,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Buffer frames in memory and encode after stopping
    #[arg(long)]
    deferred: bool,

    /// Encoder executable
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Encoder log level (quiet, error, warning, info, ...)
    #[arg(long)]
    encoder_log_level: Option<String>,
}

impl RecordArgs {
    fn into_config(self) -> Result<RecordingConfig> {
        let mut config = match &self.config {
            Some(path) => RecordingConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => RecordingConfig::default(),
        };

        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if self.audio {
            config.audio_enabled = true;
        }
        if let Some(device) = self.device {
            config.audio.device_id = Some(device);
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if self.deferred {
            config.mode = CaptureMode::Deferred;
        }
        if let Some(program) = self.ffmpeg {
            config.encoder.program = program;
        }
        if let Some(level) = self.encoder_log_level {
            config.encoder.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_region(value: &str) -> Result<Region, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [top, left, width, height] = parts.as_slice() else {
        return Err("expected TOP,LEFT,WIDTH,HEIGHT".to_string());
    };
    let coord = |s: &str| s.parse::<i32>().map_err(|e| format!("{}: {}", s, e));
    let size = |s: &str| s.parse::<u32>().map_err(|e| format!("{}: {}", s, e));
    Ok(Region::new(coord(*top)?, coord(*left)?, size(*width)?, size(*height)?))
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.trim().parse().map_err(|e| format!("{}: {}", value, e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("{}: expected a positive number of seconds", value));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", value, e))
}

fn backends(config: &RecordingConfig) -> Result<RecorderBackends> {
    let backends = RecorderBackends::new(
        Arc::new(XcapFrameSource::new()),
        Arc::new(FfmpegLauncher::new()),
    );

    #[cfg(feature = "microphone")]
    let backends = if config.audio_enabled {
        backends.with_audio_source(Arc::new(region_recorder::capture::CpalAudioSource::new()))
    } else {
        backends
    };

    #[cfg(not(feature = "microphone"))]
    {
        if config.audio_enabled {
            anyhow::bail!("Audio requested but this build has no microphone support");
        }
    }

    Ok(backends)
}

fn print_event(event: &StatusEvent) {
    match event {
        StatusEvent::Recording(stats) => println!(
            "[RECORDING] Time elapsed: {}s | FPS: {} | Frames written: {} | Frame skips: {} ({}%)",
            stats.elapsed_secs, stats.fps, stats.frames_written, stats.frame_skips, stats.skip_percent
        ),
        StatusEvent::Finalizing => println!("[WRITING] Finalizing output..."),
        StatusEvent::Done(summary) => println!("[DONE] {}", summary.output_path.display()),
        StatusEvent::Failed { reason } => eprintln!("[FAILED] {}", reason),
    }
}

async fn record(args: RecordArgs) -> Result<()> {
    let duration = args.duration;
    let config = args.into_config()?;
    let session = RecordingSession::new(config.clone(), backends(&config)?);
    let state = RecorderState::new(session);

    let status = start_recording(&state, None)
        .await
        .map_err(anyhow::Error::msg)
        .context("Failed to start recording")?;
    println!(
        "Recording {} at {} fps to {} (Ctrl-C to stop)",
        config.region,
        config.fps,
        config.output_path.display()
    );

    let stop_after = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop_after);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = status.recv_async() => match event {
                Some(event) => {
                    print_event(&event);
                    if event.is_terminal() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => break,
            _ = &mut stop_after => break,
        }
    }

    let result = stop_recording(&state).await;
    for event in status.drain() {
        print_event(&event);
    }

    let summary = result.map_err(anyhow::Error::msg).context("Recording failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn list_devices() -> Result<()> {
    #[cfg(feature = "microphone")]
    {
        for name in region_recorder::capture::audio::list_input_devices() {
            println!("{}", name);
        }
    }

    #[cfg(not(feature = "microphone"))]
    {
        println!("This build has no microphone support");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    region_recorder::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Record(args) => record(args).await,
        Commands::Devices => list_devices(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_accepts_fractions() {
        assert_eq!(parse_duration("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_duration(" 10 "), Ok(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_duration_rejects_unusable_values() {
        for value in ["-1", "0", "NaN", "inf", "1e300", "soon"] {
            assert!(parse_duration(value).is_err(), "{} was accepted", value);
        }
    }

    #[test]
    fn test_negative_duration_is_a_usage_error() {
        let result = Cli::try_parse_from(["region-recorder", "record", "--duration", "-1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_region() {
        let region = parse_region("10, 20, 101, 57").unwrap();
        assert_eq!((region.width(), region.height()), (100, 56));
        assert!(parse_region("1,2,3").is_err());
    }

    #[test]
    fn test_encoder_log_level_flag_reaches_config() {
        let cli = Cli::try_parse_from([
            "region-recorder",
            "record",
            "--encoder-log-level",
            "warning",
        ])
        .unwrap();
        let Commands::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.into_config().unwrap().encoder.log_level, "warning");
    }
}
