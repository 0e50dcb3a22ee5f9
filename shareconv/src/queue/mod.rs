//! Conversion job queue.
//!
//! [`ConversionQueue`] accepts source paths, runs at most `max_concurrency`
//! converters at once in submission order, and publishes every job change on
//! a broadcast channel.

pub mod events;
pub mod job;
pub mod scheduler;
mod worker;

pub use events::{JobEvent, QueueEvent};
pub use job::{Job, JobStatus};
pub use scheduler::{ConversionQueue, QueueStats};
