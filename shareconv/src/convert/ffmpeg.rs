//! ffmpeg argument construction for video conversions.

use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

use super::{Invocation, MediaKind};
use crate::config::{ConfigSnapshot, HardwareAccelerator, VideoQuality};

/// Rate settings derived from the quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QualitySettings {
    bitrate: &'static str,
    max_bitrate: &'static str,
    buf_size: &'static str,
    amf_quality: &'static str,
    nvenc_preset: &'static str,
}

impl QualitySettings {
    fn for_quality(quality: VideoQuality) -> Self {
        match quality {
            VideoQuality::Low => Self {
                bitrate: "1M",
                max_bitrate: "2M",
                buf_size: "2M",
                amf_quality: "speed",
                nvenc_preset: "fast",
            },
            VideoQuality::Medium => Self {
                bitrate: "2.5M",
                max_bitrate: "5M",
                buf_size: "5M",
                amf_quality: "balanced",
                nvenc_preset: "medium",
            },
            VideoQuality::High => Self {
                bitrate: "5M",
                max_bitrate: "10M",
                buf_size: "10M",
                amf_quality: "quality",
                nvenc_preset: "slow",
            },
        }
    }
}

/// Scale filter bounding both edges by `max_size`, or `None` when unlimited.
fn scale_filter(filter: &str, max_size: u32) -> Option<String> {
    (max_size > 0).then(|| {
        format!(
            "{}='w={}:h={}:force_original_aspect_ratio=decrease'",
            filter, max_size, max_size
        )
    })
}

fn extend(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

/// Build the ffmpeg argument list for one video conversion.
pub fn build_args(config: &ConfigSnapshot, source: &Path, dest: &Path) -> Vec<OsString> {
    let q = QualitySettings::for_quality(config.video_quality);
    let mut args = Vec::new();
    extend(&mut args, &["-hide_banner", "-loglevel", "info", "-stats", "-y"]);

    match config.hardware_accelerator {
        HardwareAccelerator::Amd => {
            args.push("-i".into());
            args.push(source.as_os_str().to_owned());
            extend(
                &mut args,
                &["-c:v", "h264_amf", "-b:v", q.bitrate, "-quality", q.amf_quality],
            );
            if let Some(filter) = scale_filter("vpp_amf", config.max_size) {
                args.push("-vf".into());
                args.push(filter.into());
            }
            let rate_control = [
                "-rc",
                "vbr_peak",
                "-maxrate",
                q.max_bitrate,
                "-bufsize",
                q.buf_size,
                "-vbaq",
                "true",
                "-preencode",
                "true",
                "-high_motion_quality_boost_enable",
                "true",
            ];
            match config.video_quality {
                VideoQuality::High => {
                    extend(&mut args, &rate_control);
                    extend(
                        &mut args,
                        &[
                            "-preanalysis",
                            "true",
                            "-pa_adaptive_mini_gop",
                            "true",
                            "-pa_lookahead_buffer_depth",
                            "40",
                            "-pa_taq_mode",
                            "2",
                            "-bf",
                            "3",
                        ],
                    );
                }
                VideoQuality::Medium => {
                    extend(&mut args, &rate_control);
                    extend(&mut args, &["-bf", "3"]);
                }
                VideoQuality::Low => {}
            }
        }
        HardwareAccelerator::Nvidia => {
            extend(&mut args, &["-hwaccel", "cuda", "-i"]);
            args.push(source.as_os_str().to_owned());
            extend(
                &mut args,
                &["-c:v", "h264_nvenc", "-preset", q.nvenc_preset, "-b:v", q.bitrate],
            );
            if let Some(filter) = scale_filter("scale", config.max_size) {
                args.push("-vf".into());
                args.push(filter.into());
            }
        }
        HardwareAccelerator::None => {
            args.push("-i".into());
            args.push(source.as_os_str().to_owned());
            extend(&mut args, &["-c:v", "libx264"]);
            if let Some(filter) = scale_filter("scale", config.max_size) {
                args.push("-vf".into());
                args.push(filter.into());
            }
        }
    }

    if !config.ffmpeg_custom_args.trim().is_empty() {
        debug!(custom_args = %config.ffmpeg_custom_args, "Adding custom ffmpeg arguments");
        args.extend(config.ffmpeg_custom_args.split_whitespace().map(OsString::from));
    }

    args.push("-c:a".into());
    args.push("aac".into());
    args.push(dest.as_os_str().to_owned());
    args
}

pub fn build_invocation(config: &ConfigSnapshot, source: &Path, dest: &Path) -> Invocation {
    Invocation {
        program: config.ffmpeg_binary.clone(),
        args: build_args(config, source, dest),
        kind: MediaKind::Video,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(config: &ConfigSnapshot) -> Vec<String> {
        build_args(config, Path::new("/in/a.mov"), Path::new("/out/a.mp4"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_software_encoder() {
        let args = args_of(&ConfigSnapshot::default());
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-loglevel",
                "info",
                "-stats",
                "-y",
                "-i",
                "/in/a.mov",
                "-c:v",
                "libx264",
                "-vf",
                "scale='w=1920:h=1920:force_original_aspect_ratio=decrease'",
                "-c:a",
                "aac",
                "/out/a.mp4",
            ]
        );
    }

    #[test]
    fn test_nvidia_medium() {
        let config = ConfigSnapshot {
            hardware_accelerator: HardwareAccelerator::Nvidia,
            video_quality: VideoQuality::Medium,
            ..Default::default()
        };
        let args = args_of(&config).join(" ");
        assert!(args.contains("-hwaccel cuda -i /in/a.mov -c:v h264_nvenc -preset medium -b:v 2.5M"));
        assert!(args.contains("-vf scale='w=1920"));
    }

    #[test]
    fn test_amd_rate_control_by_quality() {
        let mut config = ConfigSnapshot {
            hardware_accelerator: HardwareAccelerator::Amd,
            max_size: 1280,
            ..Default::default()
        };

        let high = args_of(&config).join(" ");
        assert!(high.contains("-c:v h264_amf -b:v 5M -quality quality"));
        assert!(high.contains("-vf vpp_amf='w=1280:h=1280:force_original_aspect_ratio=decrease'"));
        assert!(high.contains("-rc vbr_peak -maxrate 10M -bufsize 10M"));
        assert!(high.contains("-pa_lookahead_buffer_depth 40"));

        config.video_quality = VideoQuality::Medium;
        let medium = args_of(&config).join(" ");
        assert!(medium.contains("-maxrate 5M"));
        assert!(medium.contains("-bf 3"));
        assert!(!medium.contains("-preanalysis"));

        config.video_quality = VideoQuality::Low;
        let low = args_of(&config).join(" ");
        assert!(low.contains("-quality speed"));
        assert!(!low.contains("-rc"));
    }

    #[test]
    fn test_unlimited_size_skips_scale() {
        let config = ConfigSnapshot {
            max_size: 0,
            ..Default::default()
        };
        assert!(!args_of(&config).iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_custom_args_before_audio() {
        let config = ConfigSnapshot {
            ffmpeg_custom_args: "  -movflags +faststart   -crf 23 ".to_string(),
            ..Default::default()
        };
        let args = args_of(&config);
        let tail: Vec<&str> = args[args.len() - 7..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["-movflags", "+faststart", "-crf", "23", "-c:a", "aac", "/out/a.mp4"]
        );
    }
}
