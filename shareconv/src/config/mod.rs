//! Conversion settings.
//!
//! A [`ConfigSnapshot`] is captured once per submitted batch through a
//! [`ConfigProvider`] and travels with every job of that batch.

pub mod provider;
pub mod types;

pub use provider::{
    ConfigProvider, DetectedBinaries, FileConfigProvider, StaticConfigProvider, detect_binaries,
};
pub use types::{CollisionPolicy, ConfigSnapshot, HardwareAccelerator, VideoQuality};
