// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::path::Path;

use argus::analyzer::parse_response;
use argus::fingerprint::Fingerprint;
use argus::rename::{sanitize_stem, RenameResolver};

#[derive(Debug, Arbitrary)]
struct Input {
    response: String,
    suggestion: String,
    hex: String,
}

fuzz_target!(|input: Input| {
    let _ = parse_response(&input.response);
    let _ = Fingerprint::from_hex(&input.hex);

    if let Some(stem) = sanitize_stem(&input.suggestion) {
        assert!(!stem.is_empty());
        assert!(!stem.contains('/') && !stem.contains('\\'));
    }

    // Resolution never escapes the file's directory
    let current = Path::new("/fuzz/dir/file.txt");
    if let Ok(Some(dest)) = RenameResolver::new().resolve(current, &input.suggestion) {
        assert_eq!(dest.parent(), current.parent());
    }
});
