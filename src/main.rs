use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use screenmux::capture::{get_audio_input_devices, get_displays, AudioDeviceInfo, DisplayInfo};
use screenmux::mux::avi::read_summary;
use screenmux::mux::Codec;
use screenmux::{ErrorResponse, RecordingError, RecordingEvent, SessionBuilder, SessionConfig};

/// screenmux - record the screen and a microphone into an AVI file
#[derive(Parser)]
#[command(name = "screenmux")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until Ctrl-C or until --duration elapses
    #[command(alias = "r")]
    Record {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Session config as JSON; flags below are ignored when given
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Capture width (defaults to the primary display)
        #[arg(long)]
        width: Option<u32>,

        /// Capture height (defaults to the primary display)
        #[arg(long)]
        height: Option<u32>,

        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// uncompressed, motion-jpeg or a four-character code
        #[arg(long, default_value = "motion-jpeg")]
        codec: Codec,

        /// Encoder quality 0-100
        #[arg(long, default_value_t = 70)]
        quality: u8,

        /// Microphone index from `screenmux devices`; omit for video only
        #[arg(short, long)]
        audio_device: Option<usize>,

        #[arg(long)]
        stereo: bool,

        /// Store MP3 audio instead of PCM (needs an encoder)
        #[arg(long)]
        encode_audio: bool,

        /// kbit/s
        #[arg(long, default_value_t = 128)]
        audio_bitrate: u32,

        #[arg(long)]
        no_cursor: bool,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// List displays and audio inputs as JSON
    #[command(alias = "d")]
    Devices,

    /// Print the header and index of an AVI file as JSON
    #[command(alias = "i")]
    Inspect {
        input: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceList {
    displays: Vec<DisplayInfo>,
    audio_inputs: Vec<AudioDeviceInfo>,
}

fn primary_size() -> Option<(u32, u32)> {
    let displays = get_displays();
    displays
        .iter()
        .find(|d| d.is_primary)
        .or_else(|| displays.first())
        .map(|d| (d.width, d.height))
}

#[allow(clippy::too_many_arguments)]
fn session_config(
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    width: Option<u32>,
    height: Option<u32>,
    fps: u32,
    codec: Codec,
    quality: u8,
    audio_device: Option<usize>,
    stereo: bool,
    encode_audio: bool,
    audio_bitrate: u32,
    no_cursor: bool,
) -> Result<SessionConfig> {
    if let Some(path) = config {
        return SessionConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let Some(output) = output else {
        bail!("--output is required without --config");
    };
    let (width, height) = match (width, height, primary_size()) {
        (Some(w), Some(h), _) => (w, h),
        (w, h, Some((dw, dh))) => (w.unwrap_or(dw), h.unwrap_or(dh)),
        _ => bail!("--width and --height are required when no display can be queried"),
    };

    let mut config = SessionConfig::new(output, width, height, fps);
    config.codec = codec;
    config.quality = quality;
    config.audio_device = audio_device;
    config.stereo = stereo;
    config.encode_audio = encode_audio;
    config.audio_bitrate = audio_bitrate;
    config.include_cursor = !no_cursor;
    Ok(config)
}

/// Parse `--duration`, rejecting negative, NaN and overflowing values
fn recording_limit(secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(limit) => Ok(limit),
        Err(_) => bail!("--duration must be a finite, non-negative number of seconds, got {}", secs),
    }
}

/// Print a failed recording's code and message as JSON on stdout
fn report_failure(error: &RecordingError) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&ErrorResponse::from(error))?);
    Ok(())
}

async fn record(config: SessionConfig, duration: Option<f64>) -> Result<()> {
    let limit = duration.map(recording_limit).transpose()?;
    let builder = SessionBuilder::new(config);
    let mut events = builder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecordingEvent::Warning { message } => tracing::warn!("{}", message),
                RecordingEvent::Error { code, message } => tracing::error!("{}: {}", code, message),
                other => tracing::debug!("Event: {:?}", other),
            }
        }
    });

    let session = match builder.start() {
        Ok(session) => session,
        Err(e) => {
            report_failure(&e)?;
            return Err(e).context("Failed to start recording");
        }
    };
    eprintln!("Recording to {} - press Ctrl-C to stop", session.config().output_path.display());

    match limit {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        }
    }

    let stopped = tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("Stop task panicked")?;
    let summary = match stopped {
        Ok(summary) => summary,
        Err(e) => {
            report_failure(&e)?;
            return Err(e).context("Recording did not finish cleanly");
        }
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    screenmux::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            output,
            config,
            width,
            height,
            fps,
            codec,
            quality,
            audio_device,
            stereo,
            encode_audio,
            audio_bitrate,
            no_cursor,
            duration,
        } => {
            let config = session_config(
                output,
                config,
                width,
                height,
                fps,
                codec,
                quality,
                audio_device,
                stereo,
                encode_audio,
                audio_bitrate,
                no_cursor,
            )?;
            record(config, duration).await
        }
        Commands::Devices => {
            let devices = DeviceList {
                displays: get_displays(),
                audio_inputs: get_audio_input_devices(),
            };
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Commands::Inspect { input } => {
            let file = File::open(&input).with_context(|| format!("Failed to open {}", input.display()))?;
            let summary = read_summary(&mut BufReader::new(file))
                .with_context(|| format!("{} is not a readable AVI file", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_limit_rejects_unrepresentable_values() {
        assert_eq!(recording_limit(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(recording_limit(0.0).unwrap(), Duration::ZERO);
        assert!(recording_limit(-1.0).is_err());
        assert!(recording_limit(f64::NAN).is_err());
        assert!(recording_limit(f64::INFINITY).is_err());
        assert!(recording_limit(1e300).is_err());
    }

    #[test]
    fn cli_parses_duration() {
        let cli = Cli::try_parse_from(["screenmux", "record", "-o", "out.avi", "--width", "64", "--height", "48", "-d", "2.5"]).unwrap();
        match cli.command {
            Commands::Record { duration, .. } => assert_eq!(duration, Some(2.5)),
            _ => panic!("expected record"),
        }
    }
}
