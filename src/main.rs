use anyhow::Result;
use fleetcap::capture::session::CaptureSession;
use fleetcap::config;
use fleetcap::sources::TopicFeed;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetcap=info".into()),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => config::load_config(&path)?,
        None => config::Config::default(),
    };
    config::apply_env_overrides(&mut config);

    if !config.capture.enabled {
        info!("capture disabled (set capture.enabled or RMF_CAPTURE_DATA=1), exiting");
        return Ok(());
    }

    let session = CaptureSession::activate(config.capture)?;

    let feed = TopicFeed::connect(&config.nats).await?;
    let tasks = feed.spawn_bindings(session.clone()).await?;

    // Ctrl-C acts as the external stop signal.
    {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping capture");
                session.stop();
            }
        });
    }

    let saved = session.run().await?;

    for task in tasks {
        task.abort();
    }

    match saved {
        Some(path) => info!(path = %path.display(), "capture session finished"),
        None => info!("capture session finished with no data"),
    }

    Ok(())
}
