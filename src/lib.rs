// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Sift: sort files by asking a local AI model about their names
//!
//! Each file name in a source folder is turned into a yes/no question about a
//! concept. Files the model says yes to are moved or copied into a destination
//! folder; the rest can be added by hand, and every placement can be undone.

pub mod classifier;
pub mod config;
pub mod console;
pub mod error;
pub mod ledger;
pub mod mover;
pub mod ollama;
pub mod orchestrator;

pub use config::AppConfig;
pub use error::{Result, SiftError};
