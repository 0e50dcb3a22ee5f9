mod cli;
mod output;

use anyhow::{Context, bail};
use clap::Parser;
use shareconv::config::detect_binaries;
use shareconv::logging::init_logging;
use shareconv::{
    ConfigProvider, ConversionQueue, FileConfigProvider, JobStatus, ProcessRunner, QueueEvent,
    StaticConfigProvider, ThumbnailGenerator,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Args, Commands};
use crate::output::{EventPrinter, to_json_line};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json = args.command.wants_json();

    if let Err(e) = run(args).await {
        if json {
            let error_json = serde_json::json!({
                "type": "error",
                "message": format!("{:#}", e),
            });
            println!("{}", error_json);
        } else {
            eprintln!("Error: {:#}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (logging, _guard) = init_logging(args.log_dir.as_deref(), args.verbose)
        .context("Failed to initialize logging")?;

    let background = CancellationToken::new();
    if logging.log_dir().is_some() {
        logging.start_retention_cleanup(background.child_token());
    }

    let result = match args.command {
        Commands::Convert {
            files,
            config,
            json,
            concurrency,
        } => convert(files, config, json, concurrency.map(usize::from)).await,
        Commands::Thumbnail { file, config } => thumbnail(&file, config).await,
        Commands::Detect { json } => detect(json),
        Commands::Config { config } => print_config(config),
    };

    background.cancel();
    result
}

fn config_provider(path: Option<PathBuf>) -> anyhow::Result<FileConfigProvider> {
    let path = match path {
        Some(path) => path,
        None => FileConfigProvider::default_path().context("Failed to locate config file")?,
    };
    info!(path = %path.display(), "Using config file");
    Ok(FileConfigProvider::new(path))
}

async fn convert(
    files: Vec<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let file_provider = config_provider(config)?;
    let provider: Arc<dyn ConfigProvider> = match concurrency {
        Some(limit) => {
            let mut snapshot = (*file_provider.snapshot()?).clone();
            snapshot.max_concurrency = limit;
            Arc::new(StaticConfigProvider::new(snapshot))
        }
        None => Arc::new(file_provider),
    };

    let sources = files
        .iter()
        .map(|file| {
            std::path::absolute(file)
                .with_context(|| format!("Invalid path: {}", file.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let queue = ConversionQueue::start(Arc::new(ProcessRunner::new()), provider);
    // Subscribe first so the `queued` events are not missed.
    let mut events = queue.subscribe();
    let ids = queue.submit(&sources)?;
    if ids.is_empty() {
        warn!("Nothing to convert: every file was excluded or is already queued");
        queue.shutdown().await;
        return Ok(());
    }
    info!(count = ids.len(), "Submitted conversions");

    let mut printer = EventPrinter::new(json);
    let mut failed = 0usize;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                warn!("Interrupted, cancelling all conversions");
                queue.shutdown().await;
                bail!("Interrupted");
            }
            event = events.recv() => match event {
                Ok(event) => {
                    printer.print(&event)?;
                    match &event {
                        QueueEvent::Idle => break,
                        QueueEvent::Job(job) if job.status == JobStatus::Error => failed += 1,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, some events were dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    queue.shutdown().await;

    if failed > 0 {
        bail!("{} of {} conversions failed", failed, ids.len());
    }
    Ok(())
}

async fn thumbnail(file: &Path, config: Option<PathBuf>) -> anyhow::Result<()> {
    let snapshot = config_provider(config)?.snapshot()?;
    let uri = ThumbnailGenerator::from_config(&snapshot)
        .thumbnail(file)
        .await
        .with_context(|| format!("Failed to generate thumbnail for {}", file.display()))?;
    println!("{}", uri);
    Ok(())
}

fn detect(json: bool) -> anyhow::Result<()> {
    let detected = detect_binaries();
    if json {
        println!("{}", to_json_line(&detected)?);
        return Ok(());
    }

    let describe = |path: &Option<PathBuf>| match path {
        Some(path) => path.display().to_string(),
        None => "not found".to_string(),
    };
    println!("ffmpeg: {}", describe(&detected.ffmpeg));
    println!("magick: {}", describe(&detected.magick));
    Ok(())
}

fn print_config(config: Option<PathBuf>) -> anyhow::Result<()> {
    let snapshot = config_provider(config)?.snapshot()?;
    print!("{}", snapshot.to_toml()?);
    Ok(())
}
