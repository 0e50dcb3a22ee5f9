//! Thumbnail extraction.
//!
//! Independent of the queue: failures are returned to the caller and never
//! affect any job.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

use crate::config::ConfigSnapshot;
use crate::convert::MediaKind;
use crate::{Error, Result};

/// Width of generated thumbnails in pixels.
pub const THUMBNAIL_SIZE: u32 = 200;

/// Produces small JPEG previews as data URIs.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    ffmpeg_binary: String,
    magick_binary: String,
}

impl ThumbnailGenerator {
    pub fn new(ffmpeg_binary: impl Into<String>, magick_binary: impl Into<String>) -> Self {
        Self {
            ffmpeg_binary: ffmpeg_binary.into(),
            magick_binary: magick_binary.into(),
        }
    }

    pub fn from_config(config: &ConfigSnapshot) -> Self {
        Self::new(&config.ffmpeg_binary, &config.magick_binary)
    }

    fn is_video(path: &Path) -> bool {
        MediaKind::from_path(path) == Some(MediaKind::Video)
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
    }

    fn command_for(&self, path: &Path) -> (&str, Vec<OsString>) {
        if Self::is_video(path) {
            let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-ss", "00:00:00", "-i"]
                .into_iter()
                .map(OsString::from)
                .collect();
            args.push(path.as_os_str().to_owned());
            args.extend(
                [
                    "-vframes",
                    "1",
                    "-vf",
                    &format!("scale={}:-1", THUMBNAIL_SIZE),
                    "-f",
                    "image2",
                    "-c:v",
                    "mjpeg",
                    "pipe:1",
                ]
                .into_iter()
                .map(OsString::from),
            );
            (self.ffmpeg_binary.as_str(), args)
        } else {
            // `[0]` selects the first frame or page.
            let mut input = path.as_os_str().to_owned();
            input.push("[0]");
            let size = format!("{}x{}", THUMBNAIL_SIZE, THUMBNAIL_SIZE);
            let args = vec![
                input,
                "-resize".into(),
                size.into(),
                "-quality".into(),
                "80".into(),
                "jpeg:-".into(),
            ];
            (self.magick_binary.as_str(), args)
        }
    }

    /// Render a thumbnail of `path` as a `data:image/jpeg;base64,...` URI.
    pub async fn thumbnail(&self, path: &Path) -> Result<String> {
        let (program, args) = self.command_for(path);
        debug!(path = %path.display(), program, "Generating thumbnail");

        let output = process_utils::tokio_command(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::from_spawn(program, e))?;

        if !output.status.success() {
            return Err(Error::ConverterExitFailure {
                code: output.status.code(),
                tail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(Error::other(format!(
                "Thumbnail generation produced no data for {}",
                path.display()
            )));
        }

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&output.stdout)))
    }
}
