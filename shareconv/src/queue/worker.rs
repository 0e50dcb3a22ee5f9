//! Execution of a single dispatched job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::scheduler::{Completion, Inner, Launch};
use crate::convert::{self, MediaKind, ProgressReporter, RunOutcome};
use crate::{Error, Result};

/// Capacity of the per-job progress channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Reject sources that are missing, directories, or empty.
async fn validate_source(source: &Path) -> Result<MediaKind> {
    let kind = MediaKind::from_path(source).ok_or_else(|| Error::UnsupportedFormat {
        path: source.to_path_buf(),
    })?;

    let invalid = || Error::InvalidSource {
        path: source.to_path_buf(),
    };
    let metadata = tokio::fs::metadata(source).await.map_err(|_| invalid())?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Err(invalid());
    }
    Ok(kind)
}

/// Remove a destination left behind by a failed or cancelled run.
async fn cleanup_partial_output(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => info!(path = %dest.display(), "Cleaned up partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dest.display(), error = %e, "Failed to clean up partial output"),
    }
}

pub(crate) async fn run(inner: Arc<Inner>, launch: Launch) {
    let mut dest: Option<PathBuf> = None;
    let completion = execute(&inner, &launch, &mut dest).await;
    inner.finish(&launch.id, dest.as_deref(), completion);
}

async fn execute(inner: &Inner, launch: &Launch, dest_slot: &mut Option<PathBuf>) -> Completion {
    if launch.cancel.is_cancelled() {
        return Completion::Cancelled;
    }

    let kind = match validate_source(&launch.source).await {
        Ok(kind) => kind,
        Err(e) => return Completion::Failed(e),
    };

    let dest = match inner.begin_processing(&launch.id, kind) {
        Ok(Some(dest)) => dest,
        Ok(None) => return Completion::Cancelled,
        Err(e) => return Completion::Failed(e),
    };
    *dest_slot = Some(dest.clone());

    let preexisting = tokio::fs::try_exists(&dest).await.unwrap_or(true);
    let invocation = match convert::build_invocation(&launch.config, &launch.source, &dest) {
        Ok(invocation) => invocation,
        Err(e) => return Completion::Failed(e),
    };

    let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let reporter = ProgressReporter::new(tx);

    let result = {
        let conversion = inner.converter.run(&invocation, &reporter, &launch.cancel);
        tokio::pin!(conversion);
        loop {
            tokio::select! {
                result = &mut conversion => break result,
                Some(update) = rx.recv() => inner.report_progress(&launch.id, update),
            }
        }
    };
    drop(reporter);
    while let Ok(update) = rx.try_recv() {
        inner.report_progress(&launch.id, update);
    }

    let completion = match result {
        Ok(RunOutcome::Completed) => Completion::Done,
        Ok(RunOutcome::Cancelled) => Completion::Cancelled,
        Err(e) => Completion::Failed(e),
    };

    if !matches!(completion, Completion::Done) {
        if preexisting {
            debug!(path = %dest.display(), "Keeping destination that existed before the job");
        } else {
            cleanup_partial_output(&dest).await;
        }
    }

    completion
}
