// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory undo support
//!
//! One slot per file name: recording an action for a name replaces whatever
//! was there, so only the latest move/copy of a file can be reversed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::mover::{move_file, ActionKind};
use crate::{Result, SiftError};

/// The last move/copy recorded for a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAction {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub kind: ActionKind,
    pub recorded_at: DateTime<Utc>,
}

/// What a successful undo did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// A moved file went back to where it came from
    RestoredToSource(PathBuf),
    /// A copy was deleted from the destination
    RemovedCopy(PathBuf),
}

#[derive(Debug, Default)]
pub struct UndoLedger {
    actions: HashMap<String, FileAction>,
}

impl UndoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an action, replacing any earlier one for the same name
    pub fn record(
        &mut self,
        file_name: impl Into<String>,
        source: PathBuf,
        destination: PathBuf,
        kind: ActionKind,
    ) {
        let action = FileAction {
            source,
            destination,
            kind,
            recorded_at: Utc::now(),
        };
        self.actions.insert(file_name.into(), action);
    }

    /// Reverse the recorded action for `file_name`.
    ///
    /// Fails without touching the disk or the record when there is nothing to
    /// undo, the placed file is gone, or a moved file's source path is taken.
    pub fn undo(&mut self, file_name: &str) -> Result<UndoOutcome> {
        let action = self.actions.get(file_name).ok_or_else(|| {
            SiftError::State(format!("nothing to undo for {}", file_name))
        })?;

        if !action.destination.is_file() {
            return Err(SiftError::Placement(format!(
                "{} is no longer at {}",
                file_name,
                action.destination.display()
            )));
        }

        let outcome = match action.kind {
            ActionKind::Moved => {
                if action.source.exists() {
                    return Err(SiftError::Placement(format!(
                        "cannot move {} back, {} already exists",
                        file_name,
                        action.source.display()
                    )));
                }
                move_file(&action.destination, &action.source)?;
                info!("Moved {} back to {:?}", file_name, action.source);
                UndoOutcome::RestoredToSource(action.source.clone())
            }
            ActionKind::Copied => {
                fs::remove_file(&action.destination)?;
                info!("Removed {} from {:?}", file_name, action.destination);
                UndoOutcome::RemovedCopy(action.destination.clone())
            }
        };

        self.actions.remove(file_name);
        Ok(outcome)
    }

    pub fn get(&self, file_name: &str) -> Option<&FileAction> {
        self.actions.get(file_name)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.actions.contains_key(file_name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All live records, sorted by file name
    pub fn entries(&self) -> Vec<(&str, &FileAction)> {
        let mut entries: Vec<_> = self.actions.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}
