//! Command line player.
//!
//! Usage: `avsync-play <media> [config.toml]`. Pictures go to a logging sink;
//! audio plays on the default cpal device.

use std::error::Error;
use std::thread;
use std::time::Duration;

use avsync::audio::{AudioOutput, CpalOutput};
use avsync::media::FfmpegSource;
use avsync::render::LogSink;
use avsync::{Player, PlayerConfig, PlayerEvent, QuitReason};
use crossbeam::channel::TryRecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("avsync=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        return Err("usage: avsync-play <media> [config.toml]".into());
    };
    let config = match args.next() {
        Some(config_path) => PlayerConfig::from_toml_str(&std::fs::read_to_string(config_path)?)?,
        None => PlayerConfig::default(),
    };

    let source = FfmpegSource::open(&path)?;
    let output: Option<Box<dyn AudioOutput>> = match CpalOutput::new() {
        Ok(output) => Some(Box::new(output)),
        Err(err) => {
            warn!("audio disabled: {}", err);
            None
        }
    };
    let mut player = Player::open(config, Box::new(source), output)?;
    let mut sink = LogSink::new();

    loop {
        match player.events().try_recv() {
            Ok(PlayerEvent::Quit(QuitReason::EndOfPlayback)) => break,
            Ok(PlayerEvent::Quit(QuitReason::Failed(reason))) => {
                error!("playback failed: {}", reason);
                break;
            }
            Ok(PlayerEvent::Error(message)) => warn!("{}", message),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break,
        }
        let remaining = player.refresh(&mut sink);
        if remaining > 0.0 {
            thread::sleep(Duration::from_secs_f64(remaining));
        }
    }

    player.close();
    info!(pictures = sink.displayed(), "done");
    Ok(())
}
