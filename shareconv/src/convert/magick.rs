//! ImageMagick argument construction for image conversions.

use std::ffi::OsString;
use std::path::Path;

use super::{Invocation, MediaKind};
use crate::config::ConfigSnapshot;

/// `<src> [-resize NxN>] <dest>`.
///
/// The `>` suffix only ever shrinks, so small images keep their size.
pub fn build_args(config: &ConfigSnapshot, source: &Path, dest: &Path) -> Vec<OsString> {
    let mut args = vec![source.as_os_str().to_owned()];
    if config.max_size > 0 {
        args.push("-resize".into());
        args.push(format!("{}x{}>", config.max_size, config.max_size).into());
    }
    args.push(dest.as_os_str().to_owned());
    args
}

pub fn build_invocation(config: &ConfigSnapshot, source: &Path, dest: &Path) -> Invocation {
    Invocation {
        program: config.magick_binary.clone(),
        args: build_args(config, source, dest),
        kind: MediaKind::Image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_bound() {
        let config = ConfigSnapshot {
            max_size: 2048,
            ..Default::default()
        };
        let args = build_args(&config, Path::new("in.heic"), Path::new("out.jpg"));
        assert_eq!(args, vec!["in.heic", "-resize", "2048x2048>", "out.jpg"]);
    }

    #[test]
    fn test_unlimited_size() {
        let config = ConfigSnapshot {
            max_size: 0,
            magick_binary: "/usr/local/bin/magick".to_string(),
            ..Default::default()
        };
        let invocation = build_invocation(&config, Path::new("in.png"), Path::new("out.jpg"));
        assert_eq!(invocation.program, "/usr/local/bin/magick");
        assert_eq!(invocation.args, vec!["in.png", "out.jpg"]);
    }
}
