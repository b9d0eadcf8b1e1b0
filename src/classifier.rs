// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Yes/no classification of file names by a local language model
//!
//! A file name is normalized, turned into a question about a concept and sent
//! as a single chat message. The free-text answer is reduced to a [`Verdict`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Result, SiftError};

/// Anything that can answer a single-message chat prompt
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `prompt` as the only user message and return the first reply
    async fn chat(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Outcome of asking the model about one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Match,
    NoMatch,
    /// The reply said neither yes nor no, or the call failed
    Indeterminate,
}

impl Verdict {
    pub fn is_match(self) -> bool {
        self == Verdict::Match
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Match => "match",
            Verdict::NoMatch => "no match",
            Verdict::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

/// How strict the question is, from 0 (anything goes) to 8 (exact match)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RelevanceLevel(u8);

impl RelevanceLevel {
    pub const MAX: u8 = 8;

    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX {
            return Err(SiftError::Validation(format!(
                "relevance level must be between 0 and {}, got {}",
                Self::MAX,
                level
            )));
        }
        Ok(Self(level))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Short description shown next to the level
    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "Anything could be considered",
            1 => "Loose Association",
            2 => "Loosely Associated",
            3 => "Partial or Tangential Relation",
            4 => "Somewhat Related",
            5 => "Can be Categorized",
            6 => "Direct Connection",
            7 => "Strong Relation",
            _ => "Exact Match",
        }
    }

    /// The question asked at this level
    pub fn phrase(self, name: &str, concept: &str) -> String {
        match self.0 {
            0 => format!(
                "Could '{name}' be considered related to '{concept}'? \
                 Consider even weak or indirect connections."
            ),
            1 => format!(
                "Could '{name}' be loosely associated with the concept or category of '{concept}'? \
                 Consider even indirect or weak associations."
            ),
            2 => format!(
                "Could '{name}' be loosely associated with the concept or category of '{concept}'?"
            ),
            3 => format!(
                "Would you say that '{name}' is somewhat related to the concept or category of '{concept}'? \
                 This includes partial or tangential relationships."
            ),
            4 => format!(
                "Would you say that '{name}' is somewhat related to the concept or category of '{concept}'?"
            ),
            5 => format!(
                "Can '{name}' be categorized as '{concept}'? \
                 Focus on whether this fits under that category."
            ),
            6 => format!(
                "Does '{name}' have a clear and direct connection to the concept or category of '{concept}'? \
                 Focus on explicit and obvious relationships."
            ),
            7 => format!(
                "Is '{name}' strongly related to the concept or category of '{concept}'? \
                 This should be a significant and apparent connection."
            ),
            _ => format!(
                "Does '{name}' specifically and explicitly represent the concept or category of '{concept}'?"
            ),
        }
    }
}

impl TryFrom<u8> for RelevanceLevel {
    type Error = SiftError;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<RelevanceLevel> for u8 {
    fn from(level: RelevanceLevel) -> u8 {
        level.0
    }
}

impl fmt::Display for RelevanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Level {})", self.label(), self.0)
    }
}

/// Where the question comes from: a fixed phrasing or the user's own text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    Level { concept: String, level: RelevanceLevel },
    Custom { template: String },
}

impl PromptMode {
    pub fn is_custom(&self) -> bool {
        matches!(self, PromptMode::Custom { .. })
    }
}

/// Remove every `(<digits>)` counter and trim the result.
///
/// Counters are removed until none are left, so the function is idempotent
/// even for nested input like `((1)2)`.
pub fn strip_counters(name: &str) -> String {
    let mut current = name.to_string();
    while let Some(next) = remove_counters_once(&current) {
        current = next;
    }
    current.trim().to_string()
}

fn remove_counters_once(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    let mut changed = false;

    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with(')') {
            out.push_str(&rest[..open]);
            rest = &after[digits + 1..];
            changed = true;
        } else {
            out.push_str(&rest[..=open]);
            rest = after;
        }
    }
    out.push_str(rest);

    changed.then_some(out)
}

/// Drop the last extension; dot files keep their name
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if !name[..i].trim_start_matches('.').is_empty() => &name[..i],
        _ => name,
    }
}

/// The name the model is asked about: no directory, no extension, no counters
pub fn normalize_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);
    strip_counters(strip_extension(base))
}

/// Build the question for an already normalized name
pub fn build_prompt(mode: &PromptMode, name: &str) -> String {
    match mode {
        PromptMode::Custom { template } => format!("\"{}\", {}", name, template),
        PromptMode::Level { concept, level } => level.phrase(name, concept),
    }
}

/// Reduce a free-text reply to a verdict; "yes" is checked before "no"
pub fn interpret_reply(reply: &str) -> Verdict {
    let reply = reply.trim().to_lowercase();
    if reply.contains("yes") {
        Verdict::Match
    } else if reply.contains("no") {
        Verdict::NoMatch
    } else {
        Verdict::Indeterminate
    }
}

/// Asks the model about one file at a time
#[derive(Clone)]
pub struct Classifier {
    backend: Arc<dyn ChatBackend>,
    model: String,
    mode: PromptMode,
}

impl Classifier {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, mode: PromptMode) -> Self {
        Self {
            backend,
            model: model.into(),
            mode,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> &PromptMode {
        &self.mode
    }

    /// The exact prompt that would be sent for `file_name`
    pub fn prompt_for(&self, file_name: &str) -> String {
        build_prompt(&self.mode, &normalize_file_name(file_name))
    }

    /// Classify, surfacing transport failures to the caller
    pub async fn try_classify(&self, file_name: &str) -> Result<Verdict> {
        let prompt = self.prompt_for(file_name);
        debug!("Classifying {} with prompt: {}", file_name, prompt);

        let reply = self.backend.chat(&self.model, &prompt).await?;
        let verdict = interpret_reply(&reply);
        debug!("Reply for {}: {:?} -> {}", file_name, reply.trim(), verdict);

        Ok(verdict)
    }

    /// Classify, treating any failure as indeterminate
    pub async fn classify(&self, file_name: &str) -> Verdict {
        match self.try_classify(file_name).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Classification of {} failed: {}", file_name, e);
                Verdict::Indeterminate
            }
        }
    }
}
