// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Terminal front end: event rendering and the interactive session
//!
//! The session stands in for a window. It queues start/cancel/add/undo
//! requests to the [`Orchestrator`] and prints worker events as they arrive.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::classifier::{build_prompt, normalize_file_name, ChatBackend, PromptMode, RelevanceLevel};
use crate::config::{AppConfig, Overrides};
use crate::ledger::{FileAction, UndoOutcome};
use crate::mover::{Placement, TransferMode};
use crate::ollama::OllamaClient;
use crate::orchestrator::{format_elapsed, Orchestrator, PipelineEvent, RunOutcome};
use crate::{Result, SiftError};

/// How events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Jsonl,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            other => Err(format!("unknown output format `{}`", other)),
        }
    }
}

/// One line of human-readable output for an event, if it deserves one
pub fn describe_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::Started { total, .. } => {
            Some(format!("Classification started: {} file(s) to check", total))
        }
        PipelineEvent::Status { message } => Some(message.clone()),
        PipelineEvent::Progress { .. } => None,
        PipelineEvent::FileActed { file_name, destination, kind, .. } => {
            Some(format!("  + {} {} to {}", file_name, kind, destination.display()))
        }
        PipelineEvent::Pending { file_name, verdict } => {
            Some(format!("  ? {} ({}), use `add {}` to place it", file_name, verdict, file_name))
        }
        PipelineEvent::Failed { file_name, error } => {
            Some(format!("  ! {}: {}", file_name, error))
        }
        PipelineEvent::Finished { outcome, elapsed } => {
            let what = match outcome {
                RunOutcome::Completed => "Classification completed.",
                RunOutcome::Cancelled => "Classification ended.",
            };
            Some(format!("{} Time taken: {}", what, format_elapsed(*elapsed)))
        }
    }
}

/// Write an event in the requested format; `Json` is handled by the caller
pub fn write_event(out: &mut impl Write, event: &PipelineEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if let Some(line) = describe_event(event) {
                writeln!(out, "{}", line)?;
            }
        }
        OutputFormat::Json | OutputFormat::Jsonl => {
            writeln!(out, "{}", serde_json::to_string(event)?)?;
        }
    }
    Ok(())
}

/// What `run --format json` prints once a run is over
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub events: &'a [PipelineEvent],
    pub placed: BTreeMap<&'a str, &'a FileAction>,
    pub pending: &'a [String],
    pub elapsed: Option<String>,
}

impl<'a> RunReport<'a> {
    pub fn new(orchestrator: &'a Orchestrator, events: &'a [PipelineEvent]) -> Self {
        Self {
            events,
            placed: orchestrator.ledger().entries().into_iter().collect(),
            pending: orchestrator.pending(),
            elapsed: orchestrator.last_elapsed().map(format_elapsed),
        }
    }
}

/// Whether the session loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
Commands:
  start                 begin classifying the source folder
  cancel                stop the current run (placed files stay placed)
  status                show run state and progress
  pending               files the model did not match
  placed                files moved or copied, which can be undone
  add <file|#>          place a pending file by hand
  undo <file>           reverse the last move/copy of a file
  prompt [file]         show the prompt that will be sent
  models                list models on the inference server
  set source <dir>      set source folder
  set dest <dir>        set destination folder
  set concept <text>    use the level phrasings with this concept
  set level <0-8>       relevance level
  set prompt <text>     use a custom prompt instead (empty to clear)
  set ext <.a,.b>       extensions to include (empty for all)
  set mode copy|move    what to do with matches
  set model <name>      model to ask
  help                  this text
  quit                  leave (cancels a running classification)";

/// Interactive session state
pub struct Session<W: Write> {
    config: AppConfig,
    orchestrator: Orchestrator,
    models: Option<OllamaClient>,
    format: OutputFormat,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn ChatBackend>,
        models: Option<OllamaClient>,
        format: OutputFormat,
        out: W,
    ) -> Self {
        Self {
            config,
            orchestrator: Orchestrator::new(backend),
            models,
            format,
            out,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn greet(&mut self) -> Result<()> {
        writeln!(self.out, "Sift interactive session. Type `help` for commands.")?;
        Ok(())
    }

    /// Wait for the next worker event and print it; `None` when idle
    pub async fn pump(&mut self) -> Option<PipelineEvent> {
        let event = self.orchestrator.next_event().await?;
        let format = match self.format {
            OutputFormat::Json => OutputFormat::Jsonl,
            other => other,
        };
        if let Err(e) = write_event(&mut self.out, &event, format) {
            warn!("Cannot write event: {}", e);
        }
        Some(event)
    }

    /// Handle one typed line; errors are printed, never returned
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match self.dispatch(line).await {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(self.out, "Error: {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" | "?" => writeln!(self.out, "{}", HELP)?,
            "start" => {
                let settings = self.config.run_settings()?;
                if !self.orchestrator.is_running() {
                    // Report whatever a cancelled run still had queued
                    while self.pump().await.is_some() {}
                }
                let mode = settings.mode;
                self.orchestrator.start(settings).await?;
                writeln!(self.out, "Started ({} matching files).", mode)?;
            }
            "cancel" | "end" => {
                self.orchestrator.cancel()?;
                writeln!(self.out, "Cancelling classification...")?;
            }
            "status" => self.print_status()?,
            "pending" => {
                if self.orchestrator.pending().is_empty() {
                    writeln!(self.out, "No pending files.")?;
                }
                for (i, name) in self.orchestrator.pending().iter().enumerate() {
                    writeln!(self.out, "{:3}. {}", i + 1, name)?;
                }
            }
            "placed" => {
                let ledger = self.orchestrator.ledger();
                if ledger.is_empty() {
                    writeln!(self.out, "Nothing placed yet.")?;
                }
                for (name, action) in ledger.entries() {
                    writeln!(
                        self.out,
                        "  {} [{}] -> {}",
                        name,
                        action.kind,
                        action.destination.display()
                    )?;
                }
            }
            "add" => {
                let name = self.pending_name(rest)?;
                match self.orchestrator.add(&name)? {
                    Placement::Placed { destination, kind } => {
                        writeln!(self.out, "{} {} to {}", name, kind, destination.display())?
                    }
                    Placement::Skipped => writeln!(
                        self.out,
                        "Skipping {}: Source and destination are the same.",
                        name
                    )?,
                }
            }
            "undo" => {
                if rest.is_empty() {
                    return Err(SiftError::Validation("usage: undo <file>".to_string()));
                }
                match self.orchestrator.undo(rest)? {
                    UndoOutcome::RestoredToSource(_) => {
                        writeln!(self.out, "Moved {} back to source folder.", rest)?
                    }
                    UndoOutcome::RemovedCopy(_) => {
                        writeln!(self.out, "Removed {} from destination folder.", rest)?
                    }
                }
            }
            "prompt" => {
                let name = if rest.is_empty() { "File Name" } else { rest };
                let mode = self.config.classification.prompt_mode()?;
                let label = match &mode {
                    PromptMode::Level { level, .. } => format!("Relevance Level: {}", level),
                    PromptMode::Custom { .. } => "Custom prompt".to_string(),
                };
                let normalized = normalize_file_name(name);
                writeln!(self.out, "{}", label)?;
                writeln!(self.out, "The Used Prompt: {}", build_prompt(&mode, &normalized))?;
            }
            "models" => match &self.models {
                Some(client) => {
                    let list = client.list_models_or_placeholder().await;
                    for model in &list.models {
                        let marker = if *model == self.config.ai_engine.model { "→" } else { " " };
                        writeln!(self.out, "  {} {}", marker, model)?;
                    }
                }
                None => writeln!(self.out, "Model listing is not available.")?,
            },
            "set" => self.set(rest)?,
            "quit" | "exit" => {
                if self.orchestrator.is_running() {
                    self.orchestrator.cancel()?;
                }
                return Ok(Flow::Quit);
            }
            other => {
                return Err(SiftError::Validation(format!(
                    "unknown command `{}`, type `help`",
                    other
                )))
            }
        }

        Ok(Flow::Continue)
    }

    /// Accept a file name or a 1-based index into the pending list
    fn pending_name(&self, arg: &str) -> Result<String> {
        if arg.is_empty() {
            return Err(SiftError::Validation("usage: add <file|#>".to_string()));
        }
        if let Ok(index) = arg.parse::<usize>() {
            if let Some(name) = index.checked_sub(1).and_then(|i| self.orchestrator.pending().get(i)) {
                return Ok(name.clone());
            }
        }
        Ok(arg.to_string())
    }

    fn set(&mut self, args: &str) -> Result<()> {
        let (key, value) = match args.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (args, ""),
        };

        let mut overrides = Overrides::default();
        match key {
            "source" => overrides.source = Some(PathBuf::from(value)),
            "dest" | "destination" => overrides.destination = Some(PathBuf::from(value)),
            "concept" => overrides.concept = Some(value.to_string()),
            "level" => {
                let level = value.parse::<u8>().map_err(|_| {
                    SiftError::Validation(format!("level must be a number from 0 to 8, got `{}`", value))
                })?;
                RelevanceLevel::new(level)?;
                overrides.level = Some(level);
            }
            "prompt" if value.is_empty() => self.config.classification.custom_prompt = None,
            "prompt" => overrides.custom_prompt = Some(value.to_string()),
            "ext" | "extensions" if value.is_empty() => self.config.extensions.selected.clear(),
            "ext" | "extensions" => {
                overrides.extensions = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|e| !e.is_empty())
                    .map(String::from)
                    .collect();
            }
            "mode" => overrides.mode = Some(value.parse::<TransferMode>().map_err(SiftError::Validation)?),
            "model" if !value.is_empty() => overrides.model = Some(value.to_string()),
            _ => {
                return Err(SiftError::Validation(format!(
                    "cannot set `{}`, type `help`",
                    args
                )))
            }
        }

        self.config.apply(overrides);
        writeln!(self.out, "ok")?;
        Ok(())
    }

    fn print_status(&mut self) -> Result<()> {
        let (processed, total) = self.orchestrator.progress();
        writeln!(self.out, "State: {}", self.orchestrator.state())?;
        writeln!(self.out, "Progress: {}/{}", processed, total)?;
        if let Some(elapsed) = self.orchestrator.last_elapsed() {
            writeln!(self.out, "Time taken: {}", format_elapsed(elapsed))?;
        }
        writeln!(self.out, "Placed: {}  Pending: {}",
            self.orchestrator.ledger().len(),
            self.orchestrator.pending().len()
        )?;

        let config = &self.config;
        let show = |p: &Option<PathBuf>| {
            p.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string())
        };
        writeln!(self.out, "Source: {}", show(&config.folders.source))?;
        writeln!(self.out, "Destination: {}", show(&config.folders.destination))?;
        writeln!(self.out, "Model: {}", config.ai_engine.model)?;
        writeln!(self.out, "Mode: {}", config.transfer.mode)?;
        writeln!(self.out, "Extensions: {}", config.effective_extensions().join(" "))?;
        Ok(())
    }
}
