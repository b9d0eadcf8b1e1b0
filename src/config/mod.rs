// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Sift

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::{PromptMode, RelevanceLevel};
use crate::mover::{discover_extensions, TransferMode};
use crate::orchestrator::RunSettings;
use crate::SiftError;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// How file names are turned into questions
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Move or copy matching files
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Source and destination folders
    #[serde(default)]
    pub folders: FolderConfig,

    /// Which file extensions take part in a run
    #[serde(default)]
    pub extensions: ExtensionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub concept: String,
    #[serde(default = "default_level")]
    pub level: u8,
    /// When set, replaces the level phrasings entirely
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TransferConfig {
    #[serde(default)]
    pub mode: TransferMode,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FolderConfig {
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtensionConfig {
    /// Empty means every extension found in the source folder
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default = "default_excluded")]
    pub excluded: Vec<String>,
}

// Default value functions
fn default_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "mistral:latest".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_level() -> u8 { 2 }

fn default_excluded() -> Vec<String> {
    vec![".ini", ".sys", ".dll", ".exe", ".bat", ".com", ".cmd"]
        .into_iter().map(String::from).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_engine: EngineConfig {
                url: default_url(),
                model: default_model(),
                timeout_secs: default_timeout(),
            },
            classification: ClassificationConfig::default(),
            transfer: TransferConfig::default(),
            folders: FolderConfig::default(),
            extensions: ExtensionConfig::default(),
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            concept: String::new(),
            level: default_level(),
            custom_prompt: None,
        }
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            selected: Vec::new(),
            excluded: default_excluded(),
        }
    }
}

impl ClassificationConfig {
    /// Build the prompt mode, checking the level range
    pub fn prompt_mode(&self) -> crate::Result<PromptMode> {
        match &self.custom_prompt {
            Some(template) => Ok(PromptMode::Custom { template: template.clone() }),
            None => Ok(PromptMode::Level {
                concept: self.concept.clone(),
                level: RelevanceLevel::new(self.level)?,
            }),
        }
    }
}

/// Values given on the command line or typed into a session
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub model: Option<String>,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub concept: Option<String>,
    pub level: Option<u8>,
    pub custom_prompt: Option<String>,
    pub extensions: Vec<String>,
    pub mode: Option<TransferMode>,
}

impl AppConfig {
    /// Layer overrides on top of the loaded file
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.url {
            self.ai_engine.url = url;
        }
        if let Some(model) = overrides.model {
            self.ai_engine.model = model;
        }
        if let Some(source) = overrides.source {
            self.folders.source = Some(source);
        }
        if let Some(destination) = overrides.destination {
            self.folders.destination = Some(destination);
        }
        if let Some(concept) = overrides.concept {
            // An explicit concept means the level phrasings are wanted
            self.classification.concept = concept;
            self.classification.custom_prompt = None;
        }
        if let Some(level) = overrides.level {
            self.classification.level = level;
        }
        if let Some(template) = overrides.custom_prompt {
            self.classification.custom_prompt = Some(template);
        }
        if !overrides.extensions.is_empty() {
            self.extensions.selected = overrides.extensions;
        }
        if let Some(mode) = overrides.mode {
            self.transfer.mode = mode;
        }
    }

    /// Extensions a run will use: the selection, or everything found in the source
    pub fn effective_extensions(&self) -> Vec<String> {
        if !self.extensions.selected.is_empty() {
            return self.extensions.selected.clone();
        }
        match &self.folders.source {
            Some(source) if source.is_dir() => {
                match discover_extensions(source, &self.extensions.excluded) {
                    Ok(found) => found.into_iter().collect(),
                    Err(e) => {
                        tracing::warn!("Cannot list extensions in {:?}: {}", source, e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        }
    }

    /// Settings for one run; the orchestrator validates the rest
    pub fn run_settings(&self) -> crate::Result<RunSettings> {
        let source = self.folders.source.clone().ok_or_else(|| {
            SiftError::Validation("No source folder selected".to_string())
        })?;
        let destination = self.folders.destination.clone().ok_or_else(|| {
            SiftError::Validation("No destination folder selected".to_string())
        })?;

        Ok(RunSettings {
            source,
            destination,
            extensions: self.effective_extensions(),
            mode: self.transfer.mode,
            model: self.ai_engine.model.clone(),
            prompt: self.classification.prompt_mode()?,
        })
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| SiftError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
