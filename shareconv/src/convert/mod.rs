//! Converter invocation and execution.
//!
//! A job's source extension selects the [`MediaKind`], which selects the
//! external tool and the output extension. [`build_invocation`] turns a
//! configuration snapshot plus resolved paths into an [`Invocation`], and a
//! [`Converter`] runs it.

pub mod ffmpeg;
pub mod magick;
pub mod progress;
pub mod records;
pub mod runner;

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigSnapshot;
use crate::{Error, Result};

pub use progress::{ProgressParser, ProgressReporter, ProgressUpdate};
pub use runner::ProcessRunner;

/// Kind of media a source file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Converted to `.mp4` by ffmpeg.
    Video,
    /// Converted to `.jpg` by ImageMagick.
    Image,
}

const VIDEO_EXTENSIONS: &[&str] = &["mov", "mkv", "avi", "m4v", "webm", "wmv", "mts", "m2ts"];
const IMAGE_EXTENSIONS: &[&str] = &["heic", "heif", "avif", "webp", "png", "tif", "tiff", "bmp"];

impl MediaKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else {
            None
        }
    }

    /// Extension of the converted file, without the dot.
    pub fn output_extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Image => "jpg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
        }
    }
}

/// A fully specified converter command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub kind: MediaKind,
}

impl Invocation {
    /// Command line rendered for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// How a converter run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The run was cancelled and the process tree has exited.
    Cancelled,
}

/// Executes converter invocations.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Run `invocation` to completion, reporting progress as it goes.
    ///
    /// When `cancel` fires, the process tree is terminated and
    /// `Ok(RunOutcome::Cancelled)` is returned once it has exited.
    async fn run(
        &self,
        invocation: &Invocation,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome>;
}

/// Build the converter command for `source` writing to `dest`.
pub fn build_invocation(config: &ConfigSnapshot, source: &Path, dest: &Path) -> Result<Invocation> {
    match MediaKind::from_path(source) {
        Some(MediaKind::Video) => Ok(ffmpeg::build_invocation(config, source, dest)),
        Some(MediaKind::Image) => Ok(magick::build_invocation(config, source, dest)),
        None => Err(Error::UnsupportedFormat {
            path: source.to_path_buf(),
        }),
    }
}
