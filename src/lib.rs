// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Argus: AI file analysis with a content-addressed result cache
//!
//! Files are fingerprinted, analyzed once per content and model, and
//! optionally renamed, tagged and given JSON sidecars by a bounded pool of
//! concurrent workers.

pub mod analyzer;
pub mod batch;
pub mod cache;
pub mod collect;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod rename;

pub use config::AppConfig;
pub use error::{ArgusError, Result};
