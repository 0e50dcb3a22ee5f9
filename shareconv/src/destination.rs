//! Destination path resolution and exclusion filtering.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::CollisionPolicy;
use crate::convert::MediaKind;
use crate::{Error, Result};

/// Whether `path` matches any exclusion pattern.
///
/// A pattern matches when it is a case-sensitive substring of the path.
/// Patterns containing glob metacharacters are also tried as a glob against
/// the whole path.
pub fn is_excluded(path: &str, patterns: &[String]) -> bool {
    patterns.iter().filter(|p| !p.is_empty()).any(|pattern| {
        if path.contains(pattern.as_str()) {
            return true;
        }
        pattern.contains(['*', '?', '['])
            && glob::Pattern::new(pattern)
                .map(|g| g.matches(path))
                .unwrap_or(false)
    })
}

/// `dest_dir/<stem>.<ext>`, or next to the source when `dest_dir` is unset.
pub fn candidate_path(source: &Path, kind: MediaKind, dest_dir: Option<&Path>) -> PathBuf {
    let dir = dest_dir
        .filter(|d| !d.as_os_str().is_empty())
        .or_else(|| source.parent())
        .unwrap_or_else(|| Path::new(""));
    let stem = source.file_stem().unwrap_or(source.as_os_str());
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(kind.output_extension());
    dir.join(name)
}

/// `<stem> (n).<ext>` next to `candidate`.
fn numbered(candidate: &Path, n: u32) -> PathBuf {
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match candidate.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    candidate.with_file_name(name)
}

/// Resolves output paths under a collision policy.
///
/// Paths in `reserved` count as taken even when nothing exists on disk yet.
/// Resolution only inspects the filesystem; it never creates files.
#[derive(Debug, Clone, Copy)]
pub struct DestinationResolver<'a> {
    pub dest_dir: Option<&'a Path>,
    pub policy: CollisionPolicy,
    pub reserved: &'a HashSet<PathBuf>,
}

impl DestinationResolver<'_> {
    fn is_taken(&self, path: &Path) -> bool {
        // An unreadable parent counts as taken so it is never clobbered.
        self.reserved.contains(path) || path.try_exists().unwrap_or(true)
    }

    pub fn resolve(&self, source: &Path, kind: MediaKind) -> Result<PathBuf> {
        let candidate = candidate_path(source, kind, self.dest_dir);
        if !self.is_taken(&candidate) {
            return Ok(candidate);
        }

        match self.policy {
            CollisionPolicy::Overwrite => Ok(candidate),
            CollisionPolicy::Error => Err(Error::DestinationConflict { path: candidate }),
            CollisionPolicy::Rename => {
                let mut n = 1u32;
                loop {
                    let path = numbered(&candidate, n);
                    if !self.is_taken(&path) {
                        return Ok(path);
                    }
                    n = n
                        .checked_add(1)
                        .ok_or_else(|| Error::DestinationConflict {
                            path: candidate.clone(),
                        })?;
                }
            }
        }
    }
}
