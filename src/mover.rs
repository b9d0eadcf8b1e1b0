// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Collision-safe move/copy of files into the destination folder

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::{Result, SiftError};

/// What to do with a matching file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

impl TransferMode {
    pub fn action(self) -> ActionKind {
        match self {
            TransferMode::Copy => ActionKind::Copied,
            TransferMode::Move => ActionKind::Moved,
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        })
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "move" => Ok(TransferMode::Move),
            other => Err(format!("expected `copy` or `move`, got `{}`", other)),
        }
    }
}

/// What was done to a file, as remembered for undo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Moved,
    Copied,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Moved => "moved",
            ActionKind::Copied => "copied",
        })
    }
}

/// Result of [`place_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Source and destination were the same path
    Skipped,
    Placed { destination: PathBuf, kind: ActionKind },
}

/// First free path among `path`, `stem_1.ext`, `stem_2.ext`, ...
pub fn resolve_destination(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut count = 1u32;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, count, ext));
        if !candidate.exists() {
            return candidate;
        }
        count += 1;
    }
}

/// Move or copy `source` to `destination` without overwriting anything
pub fn place_file(source: &Path, destination: &Path, mode: TransferMode) -> Result<Placement> {
    if source == destination {
        debug!("Source and destination are the same: {:?}", source);
        return Ok(Placement::Skipped);
    }

    if !source.is_file() {
        return Err(SiftError::Placement(format!(
            "source file not found: {}",
            source.display()
        )));
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let destination = resolve_destination(destination);

    match mode {
        TransferMode::Move => move_file(source, &destination)?,
        TransferMode::Copy => {
            fs::copy(source, &destination)?;
        }
    }

    let kind = mode.action();
    info!("{} {:?} -> {:?}", kind, source, destination);

    Ok(Placement::Placed { destination, kind })
}

/// Rename, falling back to copy + delete when the rename cannot cross devices
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = fs::rename(from, to) {
        debug!("Rename {:?} -> {:?} failed ({}), copying instead", from, to, e);
        fs::copy(from, to)?;
        if let Err(e) = fs::remove_file(from) {
            // Leave things as they were rather than keep two copies
            let _ = fs::remove_file(to);
            return Err(e.into());
        }
    }
    Ok(())
}

/// Lower-case an extension and give it a leading dot
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// Case-insensitive suffix match against the selected extensions
pub fn matches_extension(file_name: &str, selected: &[String]) -> bool {
    let lower = file_name.to_lowercase();
    selected
        .iter()
        .map(|e| normalize_extension(e))
        .any(|e| e.len() > 1 && lower.ends_with(&e))
}

/// Files in `dir` with a selected extension, sorted by name
pub fn list_candidates(dir: &Path, selected: &[String]) -> Result<Vec<String>> {
    let mut files: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .filter(|name| matches_extension(name, selected))
        .collect();
    files.sort();
    Ok(files)
}

/// Extensions present in `dir`, lower-cased, minus the excluded ones
pub fn discover_extensions(dir: &Path, excluded: &[String]) -> Result<BTreeSet<String>> {
    let excluded: BTreeSet<String> = excluded.iter().map(|e| normalize_extension(e)).collect();

    let found = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            Path::new(&e.file_name())
                .extension()
                .and_then(|x| x.to_str())
                .map(normalize_extension)
        })
        .filter(|ext| !excluded.contains(ext))
        .collect();

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn transfer_mode_parses() {
        assert_eq!("Move".parse::<TransferMode>().unwrap(), TransferMode::Move);
        assert_eq!("copy".parse::<TransferMode>().unwrap(), TransferMode::Copy);
        assert!("link".parse::<TransferMode>().is_err());
    }

    #[test]
    fn free_destination_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cat(1).jpg");
        assert_eq!(resolve_destination(&path), path);
    }

    #[test]
    fn collisions_count_up_from_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cat(1).jpg");
        fs::write(&path, "a").unwrap();
        assert_eq!(resolve_destination(&path), dir.path().join("cat(1)_1.jpg"));

        fs::write(dir.path().join("cat(1)_1.jpg"), "b").unwrap();
        fs::write(dir.path().join("cat(1)_3.jpg"), "d").unwrap();
        assert_eq!(resolve_destination(&path), dir.path().join("cat(1)_2.jpg"));
    }

    #[test]
    fn collisions_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, "a").unwrap();
        assert_eq!(resolve_destination(&path), dir.path().join("README_1"));
    }

    #[test]
    fn copy_keeps_source_and_never_overwrites() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let source = src.path().join("cat.jpg");
        fs::write(&source, "new").unwrap();
        fs::write(dst.path().join("cat.jpg"), "old").unwrap();

        let placement = place_file(&source, &dst.path().join("cat.jpg"), TransferMode::Copy).unwrap();

        assert_eq!(
            placement,
            Placement::Placed { destination: dst.path().join("cat_1.jpg"), kind: ActionKind::Copied }
        );
        assert!(source.exists());
        assert_eq!(fs::read_to_string(dst.path().join("cat.jpg")).unwrap(), "old");
        assert_eq!(fs::read_to_string(dst.path().join("cat_1.jpg")).unwrap(), "new");
    }

    #[test]
    fn move_removes_source() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let source = src.path().join("cat.jpg");
        fs::write(&source, "x").unwrap();

        let placement = place_file(&source, &dst.path().join("cat.jpg"), TransferMode::Move).unwrap();

        assert!(matches!(placement, Placement::Placed { kind: ActionKind::Moved, .. }));
        assert!(!source.exists());
        assert!(dst.path().join("cat.jpg").exists());
    }

    #[test]
    fn creates_missing_destination_folder() {
        let src = tempdir().unwrap();
        let source = src.path().join("cat.jpg");
        fs::write(&source, "x").unwrap();
        let target = src.path().join("sorted").join("cat.jpg");

        place_file(&source, &target, TransferMode::Copy).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn same_path_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cat.jpg");
        fs::write(&path, "x").unwrap();

        assert_eq!(place_file(&path, &path, TransferMode::Move).unwrap(), Placement::Skipped);
        assert!(path.exists());
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempdir().unwrap();
        let err = place_file(
            &dir.path().join("ghost.jpg"),
            &dir.path().join("out").join("ghost.jpg"),
            TransferMode::Copy,
        )
        .unwrap_err();
        assert!(err.is_file_system());
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let selected = vec![".jpg".to_string(), "png".to_string()];
        assert!(matches_extension("CAT.JPG", &selected));
        assert!(matches_extension("dog.png", &selected));
        assert!(!matches_extension("notes.txt", &selected));
        assert!(!matches_extension("jpg", &selected));
    }

    #[test]
    fn candidates_are_filtered_and_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b.jpg", "a.JPG", "c.txt", "d.png"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("folder.jpg")).unwrap();

        let files = list_candidates(dir.path(), &[".jpg".to_string()]).unwrap();
        assert_eq!(files, vec!["a.JPG".to_string(), "b.jpg".to_string()]);
    }

    #[test]
    fn discovery_skips_excluded_extensions() {
        let dir = tempdir().unwrap();
        for name in ["a.JPG", "b.jpg", "setup.exe", "desktop.ini", "notes.txt", "README"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let found = discover_extensions(dir.path(), &[".exe".to_string(), "ini".to_string()]).unwrap();
        let found: Vec<_> = found.into_iter().collect();
        assert_eq!(found, vec![".jpg".to_string(), ".txt".to_string()]);
    }
}
