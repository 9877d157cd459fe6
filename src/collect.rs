// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Gathering the files a batch should process

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::metadata::sidecar_path;
use crate::{ArgusError, Result};

const TEMP_SUFFIXES: &[&str] = &[".tmp", ".part", ".crdownload", ".partial", ".download"];
const SYSTEM_NAMES: &[&str] = &["desktop.ini", "thumbs.db", ".ds_store"];

/// Files under `path`, sorted and without duplicates
///
/// A file path is returned as is. For a directory only its direct children
/// are considered unless `recursive` is set.
pub fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ArgusError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        ));
    }

    let base = glob::Pattern::escape(&path.to_string_lossy());
    let pattern = if recursive {
        format!("{}/**/*", base)
    } else {
        format!("{}/*", base)
    };

    let entries = glob::glob(&pattern)
        .map_err(|e| ArgusError::Config(format!("Invalid file pattern {}: {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(p) if p.is_file() && should_process(&p) => files.push(p),
            Ok(p) => debug!("Skipping {:?}", p),
            Err(e) => warn!("Cannot read {:?}: {}", e.path(), e.error()),
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Check if a file should be processed
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files
    if filename.starts_with('.') {
        return false;
    }

    if TEMP_SUFFIXES.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    if SYSTEM_NAMES.iter().any(|n| filename.eq_ignore_ascii_case(n)) {
        return false;
    }

    !is_sidecar(path)
}

/// `photo.jpg.json` next to an existing `photo.jpg`
fn is_sidecar(path: &Path) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return false;
    }
    let base = path.with_extension("");
    base.extension().is_some() && base.is_file() && sidecar_path(&base) == path
}
