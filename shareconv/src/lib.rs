//! shareconv library crate.
//!
//! Background conversion of videos and photos into share-friendly files:
//! H.264 MP4 for videos and JPEG for images, driven by external `ffmpeg`
//! and ImageMagick processes.

pub mod config;
pub mod convert;
pub mod destination;
pub mod error;
pub mod logging;
pub mod queue;
pub mod thumbnail;

pub use config::{ConfigProvider, ConfigSnapshot, FileConfigProvider, StaticConfigProvider};
pub use convert::{Converter, ProcessRunner};
pub use error::{Error, Result};
pub use queue::{ConversionQueue, Job, JobEvent, JobStatus, QueueEvent, QueueStats};
pub use thumbnail::ThumbnailGenerator;
