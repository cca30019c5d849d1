//! Load a capture file and inject it into a running service.
//!
//! Usage: fleetcap-replay <captured_data.json> [--chronological] [--speed N]
//!        [--info-only] [--nats-url URL] [--cache-dir DIR]

use anyhow::{bail, Result};
use fleetcap::capture::{images, CaptureFile};
use fleetcap::config::Config;
use fleetcap::replay::{NatsSink, ReplayMode, ReplayScheduler};
use std::path::PathBuf;
use tracing::info;

struct Args {
    file: PathBuf,
    mode: ReplayMode,
    speed_multiplier: f64,
    info_only: bool,
    nats_url: Option<String>,
    cache_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let defaults = Config::default();
    let mut args = Args {
        file: PathBuf::new(),
        mode: defaults.replay.mode,
        speed_multiplier: defaults.replay.speed_multiplier,
        info_only: defaults.replay.info_only,
        nats_url: None,
        cache_dir: None,
    };

    let mut file = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--chronological" => args.mode = ReplayMode::Chronological,
            "--mode" => {
                let value = iter.next().unwrap_or_default();
                args.mode = value.parse().map_err(anyhow::Error::msg)?;
            }
            "--speed" => {
                let value = iter.next().unwrap_or_default();
                args.speed_multiplier = value.parse()?;
            }
            "--info-only" => args.info_only = true,
            "--nats-url" => args.nats_url = iter.next(),
            "--cache-dir" => args.cache_dir = iter.next().map(PathBuf::from),
            other if file.is_none() && !other.starts_with('-') => {
                file = Some(PathBuf::from(other));
            }
            other => bail!("unknown argument '{}'", other),
        }
    }

    args.file = match file {
        Some(f) => f,
        None => bail!("usage: fleetcap-replay <captured_data.json> [--chronological] [--speed N] [--info-only]"),
    };
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetcap=info".into()),
        )
        .init();

    let args = parse_args()?;
    let config = Config::default();

    // Structural failures (unreadable file, corrupt metadata) abort here,
    // before any submission.
    let capture = CaptureFile::load_from_file(&args.file)?;
    println!("{}", capture.describe());

    if args.info_only {
        return Ok(());
    }

    let cache_dir = args
        .cache_dir
        .unwrap_or_else(|| config.capture.cache_directory.clone());
    images::restore_images(&capture.metadata, &args.file, &cache_dir)?;

    let nats_url = args.nats_url.unwrap_or_else(|| config.nats.url.clone());
    let sink = NatsSink::connect(&nats_url, &config.nats.topic_prefix).await?;

    let (scheduler, handle) =
        ReplayScheduler::new(capture, sink.clone());
    let scheduler = scheduler.with_speed(args.speed_multiplier);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling replay");
            handle.cancel();
        }
    });

    let report = scheduler.run(args.mode).await?;
    sink.flush().await?;

    print!("{}", report);

    Ok(())
}
