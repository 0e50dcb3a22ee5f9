//! Job model.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a free slot.
    Queued,
    /// Converter running.
    Processing,
    /// Converted successfully.
    Done,
    /// Failed; `error` holds the reason.
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// `Done` and `Error` are final; only the caller removes them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversion unit, keyed by its source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_path: PathBuf,
    /// Set once destination resolution succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<PathBuf>,
    pub status: JobStatus,
    /// 0..=100, never decreasing while processing.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            source_path: PathBuf::from(&id),
            id,
            dest_path: None,
            status: JobStatus::Queued,
            progress: 0,
            speed: None,
            error: None,
        }
    }

    pub(crate) fn mark_done(&mut self) {
        self.status = JobStatus::Done;
        self.progress = 100;
        self.speed = None;
        self.error = None;
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Error;
        self.speed = None;
        self.error = Some(error.into());
    }
}
