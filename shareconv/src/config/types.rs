//! Configuration snapshot and its enumerated settings.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Hardware encoder used for video conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccelerator {
    /// Software encoding (libx264).
    #[default]
    None,
    /// NVENC (h264_nvenc) with CUDA decoding.
    Nvidia,
    /// AMF (h264_amf).
    Amd,
}

impl HardwareAccelerator {
    /// Parse a user-supplied value. Unknown values fall back to software
    /// encoding so a typo in the settings never blocks conversions.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "nvidia" => Self::Nvidia,
            "amd" => Self::Amd,
            other => {
                warn!(
                    "Unknown hardware accelerator '{}', falling back to software encoder (libx264)",
                    other
                );
                Self::None
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
        }
    }
}

impl<'de> Deserialize<'de> for HardwareAccelerator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::parse_lenient(&s))
    }
}

/// Video quality preset. Maps onto bitrate and encoder preset choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl VideoQuality {
    /// Parse a user-supplied value. Anything unrecognised means `High`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            _ => Self::High,
        }
    }
}

impl<'de> Deserialize<'de> for VideoQuality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::parse_lenient(&s))
    }
}

/// What to do when the computed destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Pick `name (1).ext`, `name (2).ext`, ... until a free name is found.
    #[default]
    Rename,
    /// Write over the existing file.
    Overwrite,
    /// Fail the job.
    Error,
}

impl CollisionPolicy {
    /// Parse a user-supplied value. Anything unrecognised means `Rename`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Self::Overwrite,
            "error" => Self::Error,
            _ => Self::Rename,
        }
    }
}

impl<'de> Deserialize<'de> for CollisionPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self::parse_lenient(&s))
    }
}

/// Immutable configuration captured once per submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// Path or name of the ffmpeg binary.
    pub ffmpeg_binary: String,
    /// Path or name of the ImageMagick binary.
    pub magick_binary: String,
    pub hardware_accelerator: HardwareAccelerator,
    pub video_quality: VideoQuality,
    /// Extra ffmpeg arguments, split on whitespace and appended verbatim.
    pub ffmpeg_custom_args: String,
    /// Longest output edge in pixels. `0` disables scaling.
    pub max_size: u32,
    /// Output directory. `None` writes next to the source file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_dir: Option<PathBuf>,
    pub collision_option: CollisionPolicy,
    /// Paths matching any of these are dropped at submission.
    pub exclude_patterns: Vec<String>,
    /// Maximum number of conversions running at once.
    pub max_concurrency: usize,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            magick_binary: "magick".to_string(),
            hardware_accelerator: HardwareAccelerator::None,
            video_quality: VideoQuality::High,
            ffmpeg_custom_args: String::new(),
            max_size: 1920,
            dest_dir: None,
            collision_option: CollisionPolicy::Rename,
            exclude_patterns: Vec::new(),
            max_concurrency: 1,
        }
    }
}

impl ConfigSnapshot {
    /// Concurrency limit with the lower bound applied.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Render the snapshot as TOML (the on-disk format).
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::Error::config(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfigSnapshot::default();
        assert_eq!(config.ffmpeg_binary, "ffmpeg");
        assert_eq!(config.magick_binary, "magick");
        assert_eq!(config.max_size, 1920);
        assert_eq!(config.video_quality, VideoQuality::High);
        assert_eq!(config.collision_option, CollisionPolicy::Rename);
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn test_concurrency_floor() {
        let config = ConfigSnapshot {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn test_lenient_enums() {
        assert_eq!(HardwareAccelerator::parse_lenient("NVIDIA"), HardwareAccelerator::Nvidia);
        assert_eq!(HardwareAccelerator::parse_lenient("intel"), HardwareAccelerator::None);
        assert_eq!(VideoQuality::parse_lenient("Medium"), VideoQuality::Medium);
        assert_eq!(VideoQuality::parse_lenient("ultra"), VideoQuality::High);
        assert_eq!(CollisionPolicy::parse_lenient("ERROR"), CollisionPolicy::Error);
        assert_eq!(CollisionPolicy::parse_lenient(""), CollisionPolicy::Rename);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ConfigSnapshot = toml::from_str(
            r#"
            hardware_accelerator = "Amd"
            video_quality = "low"
            max_concurrency = 3
            exclude_patterns = ["/private/", "*.tmp.*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.hardware_accelerator, HardwareAccelerator::Amd);
        assert_eq!(config.video_quality, VideoQuality::Low);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.exclude_patterns.len(), 2);
        assert_eq!(config.ffmpeg_binary, "ffmpeg");
        assert!(config.dest_dir.is_none());
    }

    #[test]
    fn test_toml_roundtrip_keeps_enums_lowercase() {
        let config = ConfigSnapshot {
            hardware_accelerator: HardwareAccelerator::Nvidia,
            dest_dir: Some(PathBuf::from("/tmp/out")),
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        assert!(text.contains("hardware_accelerator = \"nvidia\""));
        let parsed: ConfigSnapshot = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
