//! deskcap command-line front end.
//!
//! Lists capture targets, prints the default configuration, and runs a capture
//! session for a fixed duration while logging delivery statistics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use deskcap_core::{
    AudioChunk, AudioEndpointKind, CaptureConfiguration, QualityTier, TargetFilter,
    TargetSelector, VideoFrame,
};
use deskcap_lib::init_logging;
use deskcap_session::{CaptureSession, DeliveryMetrics, DeliverySnapshot, SessionCallbacks};

#[derive(Debug, Parser)]
#[command(name = "deskcap", version, about = "Desktop screen and audio capture")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List capturable displays, windows and audio endpoints.
    List {
        #[arg(long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
    },
    /// Print the default capture configuration as JSON.
    Config,
    /// Capture for a while and report delivery statistics.
    Capture(CaptureArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Displays,
    Windows,
}

impl From<FilterArg> for TargetFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => Self::All,
            FilterArg::Displays => Self::Displays,
            FilterArg::Windows => Self::Windows,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QualityArg {
    High,
    Medium,
    Low,
}

impl From<QualityArg> for QualityTier {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::High => Self::High,
            QualityArg::Medium => Self::Medium,
            QualityArg::Low => Self::Low,
        }
    }
}

#[derive(Debug, Default, Args)]
struct CaptureArgs {
    /// JSON configuration file; flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display to capture (1-based).
    #[arg(long, conflicts_with_all = ["window", "audio_only"])]
    display: Option<u32>,

    /// Native window handle to capture.
    #[arg(long, conflicts_with = "audio_only")]
    window: Option<u64>,

    /// Capture audio only.
    #[arg(long)]
    audio_only: bool,

    /// Capture the default microphone instead of system output.
    #[arg(long)]
    microphone: bool,

    #[arg(long)]
    fps: Option<f32>,

    #[arg(long)]
    channels: Option<u16>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long, value_enum)]
    quality: Option<QualityArg>,

    /// The calling process already initialised the component runtime.
    #[arg(long)]
    host_owned_runtime: bool,

    /// Seconds to capture.
    #[arg(long, default_value_t = 10.0)]
    duration: f64,
}

impl CaptureArgs {
    fn apply(&self, mut config: CaptureConfiguration) -> CaptureConfiguration {
        let endpoint = if self.microphone {
            AudioEndpointKind::Microphone
        } else {
            config.effective_audio_endpoint()
        };
        config.audio_endpoint = endpoint;

        if self.audio_only {
            config.target = TargetSelector::AudioEndpoint(endpoint);
        } else if let Some(window) = self.window {
            config.target = TargetSelector::Window(window);
        } else if let Some(display) = self.display {
            config.target = TargetSelector::Display(display);
        } else if let TargetSelector::AudioEndpoint(_) = config.target {
            config.target = TargetSelector::AudioEndpoint(endpoint);
        }

        if let Some(fps) = self.fps {
            config.frame_rate = fps;
        }
        if let Some(channels) = self.channels {
            config.audio_channels = channels;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.audio_sample_rate = sample_rate;
        }
        if let Some(quality) = self.quality {
            config.quality = quality.into();
        }
        if self.host_owned_runtime {
            config.host_owns_runtime = true;
        }
        config
    }
}

fn load_config(path: &Path) -> Result<CaptureConfiguration> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn list(filter: FilterArg) -> Result<()> {
    let session = CaptureSession::new();
    let targets = session
        .enumerate_targets(filter.into())
        .context("enumerating capture targets")?;

    for target in &targets {
        let kind = if target.is_display {
            "display"
        } else if target.is_window {
            "window"
        } else {
            "audio"
        };
        println!(
            "{kind:<8} {:>20} {:>5}x{:<5} {} [{}]",
            target.id, target.width, target.height, target.title, target.app_name
        );
    }
    info!(count = targets.len(), "Listed capture targets");
    Ok(())
}

fn log_snapshot(label: &str, snapshot: &DeliverySnapshot) {
    info!(
        frames = snapshot.frames,
        fps = snapshot.fps as f64,
        bytes = snapshot.frame_bytes,
        mean_interval_ms = snapshot
            .mean_frame_interval
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0),
        chunks = snapshot.chunks,
        audio_frames = snapshot.audio_frames,
        uptime_secs = snapshot.uptime.as_secs(),
        "{label}"
    );
}

fn capture(args: &CaptureArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => load_config(path)?,
        None => CaptureConfiguration::default(),
    };
    let config = args.apply(base);
    if !args.duration.is_finite() || args.duration <= 0.0 {
        bail!("duration must be a positive number of seconds");
    }
    info!(config = %serde_json::to_string(&config)?, "Starting capture");

    let metrics = Arc::new(DeliveryMetrics::new());
    let video_metrics = Arc::clone(&metrics);
    let audio_metrics = Arc::clone(&metrics);

    let session = CaptureSession::new();
    let started = session.start(
        &config,
        SessionCallbacks {
            on_video: Some(Box::new(move |frame: &VideoFrame| video_metrics.record_frame(frame))),
            on_audio: Some(Box::new(move |chunk: &AudioChunk| audio_metrics.record_chunk(chunk))),
            on_exit: Arc::new(|message: &str| warn!(%message, "Capture reported an error")),
        },
    )?;
    info!(video = started.video, audio = started.audio, "Capturing");

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(remaining.min(Duration::from_secs(1)));
        log_snapshot("Delivery", &metrics.snapshot());
        metrics.mark_reported();
    }

    session.stop(|| info!("Capture stopped"));
    log_snapshot("Final delivery", &metrics.snapshot());
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::List { filter } => list(filter),
        Command::Config => {
            let config = CaptureConfiguration::default();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Capture(args) => capture(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_capture_flags() {
        let cli = Cli::try_parse_from([
            "deskcap",
            "capture",
            "--display",
            "2",
            "--fps",
            "15",
            "--channels",
            "1",
            "--sample-rate",
            "16000",
            "--quality",
            "low",
            "--duration",
            "3",
        ])
        .unwrap();
        let Command::Capture(args) = cli.command else {
            panic!("expected capture");
        };

        let config = args.apply(CaptureConfiguration::default());
        assert_eq!(config.target, TargetSelector::Display(2));
        assert_eq!(config.frame_rate, 15.0);
        assert_eq!(config.audio_channels, 1);
        assert_eq!(config.audio_sample_rate, 16_000);
        assert_eq!(config.quality, QualityTier::Low);
        assert_eq!(args.duration, 3.0);
    }

    #[test]
    fn test_audio_only_microphone() {
        let args = CaptureArgs {
            audio_only: true,
            microphone: true,
            ..Default::default()
        };
        let config = args.apply(CaptureConfiguration::default());
        assert_eq!(
            config.target,
            TargetSelector::AudioEndpoint(AudioEndpointKind::Microphone)
        );
        assert!(!config.wants_video());
    }

    #[test]
    fn test_flags_override_file_config() {
        let file: CaptureConfiguration =
            serde_json::from_str(r#"{"target":{"kind":"window","id":4242},"frame_rate":5.0}"#)
                .unwrap();
        let args = CaptureArgs {
            fps: Some(60.0),
            host_owned_runtime: true,
            ..Default::default()
        };
        let config = args.apply(file);
        assert_eq!(config.target, TargetSelector::Window(4242));
        assert_eq!(config.frame_rate, 60.0);
        assert!(config.host_owns_runtime);
        assert_eq!(config.audio_channels, 2);
    }

    #[test]
    fn test_display_conflicts_with_window() {
        let result = Cli::try_parse_from([
            "deskcap", "capture", "--display", "1", "--window", "77",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_list_filter_default() {
        let cli = Cli::try_parse_from(["deskcap", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::List {
                filter: FilterArg::All
            }
        ));
    }
}
