mod cli;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use mediafetch::{DownloadOptions, DownloadStatus, Engine, EngineConfig};
use tracing::{event, Level};
use tracing_subscriber::filter::{FilterExt, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

fn main() -> ExitCode {
    let args = cli::Args::parse();

    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            event!(Level::ERROR, "{:?}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(args: cli::Args) -> anyhow::Result<bool> {
    let config = EngineConfig {
        request_timeout: Duration::from_secs(args.network_options.timeout),
        accept_invalid_certs: args.network_options.accept_invalid_certs,
        default_max_concurrent_segments: args.download_options.max_concurrent_segments,
    };
    let engine = Engine::init(config)?;

    let options = DownloadOptions {
        headers: Default::default(),
        max_concurrent_segments: args.download_options.max_concurrent_segments,
    };

    event!(Level::INFO, "starting download of {} to {:?}", args.url, args.download_options.output);
    let id = engine
        .download(args.url.clone(), args.download_options.output.clone(), options)
        .await;

    let mut progress_stream = Box::pin(engine.get_progress_flow(id.clone()));
    let progress_task = tokio::spawn(async move {
        while let Some(progress) = progress_stream.next().await {
            event!(
                Level::INFO,
                "{:?}: {}/{} segments, {}/{} bytes",
                progress.status,
                progress.downloaded_segments,
                progress.total_segments,
                progress.downloaded_bytes,
                progress.total_bytes,
            );
            if progress.status.is_terminal() {
                break;
            }
        }
    });

    // Pause on the first Ctrl-C; force-exit on a second while waiting on
    // the graceful pause to land.
    #[cfg(target_family = "unix")]
    let mut interrupt = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::interrupt())?
    };
    #[cfg(target_family = "windows")]
    let mut interrupt = tokio::signal::windows::ctrl_c()?;

    let interrupt_engine = engine.clone();
    let interrupt_id = id.clone();
    tokio::spawn(async move {
        interrupt.recv().await;
        event!(Level::WARN, "pausing download... press Ctrl-C again to force stop");
        interrupt_engine.pause(&interrupt_id).await;

        interrupt.recv().await;
        event!(Level::WARN, "force stopping process");
        std::process::exit(1);
    });

    engine.join_download(&id).await;
    let _ = progress_task.await;

    match engine.get_state(&id).map(|s| s.status) {
        Some(DownloadStatus::Completed) => {
            event!(Level::INFO, "download complete");
            Ok(true)
        }
        Some(DownloadStatus::Paused) => {
            event!(Level::WARN, "download paused, resume later to continue");
            Ok(true)
        }
        Some(DownloadStatus::Failed) => {
            if let Some(error) = engine.get_error(&id) {
                event!(Level::ERROR, "download failed: {}", error);
            }
            Ok(false)
        }
        other => {
            event!(Level::WARN, "download ended in unexpected state {:?}", other);
            Ok(false)
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_filter(EnvFilter::from_env("MEDIAFETCH_LOG").or(LevelFilter::INFO));

    let subscriber = tracing_subscriber::Registry::default().with(stdout_log);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
