// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Collision-free renames from suggested names

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{ArgusError, Result};

/// Probes before giving up on finding a free name
pub const MAX_COLLISION_ATTEMPTS: usize = 10_000;

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Computes destinations and performs renames for one batch
///
/// Destinations handed out in dry-run mode are remembered, so two files
/// suggesting the same name get distinct would-be paths. Real renames hold
/// the lock across resolve and move; concurrent workers never race for the
/// same free name.
#[derive(Debug, Default)]
pub struct RenameResolver {
    reserved: Mutex<HashSet<PathBuf>>,
}

/// Replace reserved characters and trim; `None` if nothing usable is left
pub fn sanitize_stem(raw: &str) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let stem = replaced.trim();

    if stem.is_empty() || stem == "." || stem == ".." {
        None
    } else {
        Some(stem.to_string())
    }
}

impl RenameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashSet<PathBuf>>> {
        self.reserved
            .lock()
            .map_err(|_| ArgusError::Config("Rename lock poisoned".to_string()))
    }

    /// Compute the destination for `current` renamed to `suggested`
    ///
    /// Returns `None` when the suggestion sanitizes to nothing or resolves to
    /// the current path.
    pub fn resolve(&self, current: &Path, suggested: &str) -> Result<Option<PathBuf>> {
        let reserved = self.lock()?;
        resolve_with(current, suggested, &reserved)
    }

    /// Resolve and, unless `dry_run`, move the file
    ///
    /// On failure the original file is left where it was.
    pub fn rename(&self, current: &Path, suggested: &str, dry_run: bool) -> Result<Option<PathBuf>> {
        let mut reserved = self.lock()?;
        let Some(dest) = resolve_with(current, suggested, &reserved)? else {
            return Ok(None);
        };

        if dry_run {
            info!("DRY RUN: Would rename {:?} to {:?}", current, dest);
        } else {
            move_file(current, &dest)?;
            info!("Renamed {:?} to {:?}", current, dest);
        }

        reserved.insert(dest.clone());
        Ok(Some(dest))
    }
}

fn resolve_with(current: &Path, suggested: &str, reserved: &HashSet<PathBuf>) -> Result<Option<PathBuf>> {
    let Some(stem) = sanitize_stem(suggested) else {
        return Ok(None);
    };

    let parent = current.parent().unwrap_or_else(|| Path::new(""));
    let ext = current
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let taken = |p: &Path| p != current && (p.exists() || reserved.contains(p));

    let mut candidate = parent.join(format!("{}{}", stem, ext));
    let mut counter = 1;
    while taken(&candidate) {
        if counter > MAX_COLLISION_ATTEMPTS {
            return Err(ArgusError::RenameConflictExhausted {
                path: current.to_path_buf(),
                attempts: MAX_COLLISION_ATTEMPTS,
            });
        }
        candidate = parent.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }

    if candidate == current {
        Ok(None)
    } else {
        Ok(Some(candidate))
    }
}

/// Move without ever replacing an existing destination
///
/// A hard link fails atomically when the destination exists. Filesystems
/// without hard links fall back to check-then-rename, which leaves a small
/// window for a writer outside this process.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    let fail = |source: std::io::Error| ArgusError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match std::fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(from) {
                // Undo the link so the file keeps a single name
                let _ = std::fs::remove_file(to);
                return Err(fail(e));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(fail(e)),
        Err(e) if !from.exists() => Err(fail(e)),
        Err(e) => {
            debug!("Hard link unavailable for {:?} ({}), renaming in place", from, e);
            if to.exists() {
                return Err(fail(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "destination exists",
                )));
            }
            std::fs::rename(from, to).map_err(fail)
        }
    }
}
