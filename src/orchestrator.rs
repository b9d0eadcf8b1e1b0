// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background classification runs
//!
//! A run walks the source folder on a single worker task, asks the model about
//! each file in turn and places the matches. Everything the worker does is
//! reported as a [`PipelineEvent`] on an ordered queue. The [`Orchestrator`]
//! consumes that queue and is the only owner of the undo ledger and the
//! pending list, so the interactive side never shares state with the worker.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{ChatBackend, Classifier, PromptMode, Verdict};
use crate::ledger::{UndoLedger, UndoOutcome};
use crate::mover::{list_candidates, place_file, ActionKind, Placement, TransferMode};
use crate::{Result, SiftError};

/// Everything a run needs to know up front
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub extensions: Vec<String>,
    pub mode: TransferMode,
    pub model: String,
    pub prompt: PromptMode,
}

impl RunSettings {
    /// Reject a run that cannot do anything useful
    pub fn validate(&self) -> Result<()> {
        match &self.prompt {
            PromptMode::Level { concept, .. } if concept.trim().is_empty() => {
                return Err(SiftError::Validation(
                    "Please enter a classification concept".to_string(),
                ));
            }
            PromptMode::Custom { template } if template.trim().is_empty() => {
                return Err(SiftError::Validation("The custom prompt is empty".to_string()));
            }
            _ => {}
        }

        if self.extensions.iter().all(|e| e.trim().trim_start_matches('.').is_empty()) {
            return Err(SiftError::Validation(
                "No file extensions selected. Please select at least one".to_string(),
            ));
        }

        if !self.source.is_dir() {
            return Err(SiftError::Validation(format!(
                "Source folder not found: {}",
                self.source.display()
            )));
        }

        if self.model.trim().is_empty() {
            return Err(SiftError::Validation("No model selected".to_string()));
        }

        Ok(())
    }
}

/// Where the orchestrator is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
        })
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Messages from the worker, in the order things happened
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        run_id: Uuid,
        total: usize,
    },
    Status {
        message: String,
    },
    Progress {
        processed: usize,
        total: usize,
    },
    FileActed {
        file_name: String,
        source: PathBuf,
        destination: PathBuf,
        kind: ActionKind,
    },
    /// Left in place; can still be added by hand
    Pending {
        file_name: String,
        verdict: Verdict,
    },
    Failed {
        file_name: String,
        error: String,
    },
    Finished {
        outcome: RunOutcome,
        elapsed: Duration,
    },
}

/// `HH:MM:SS` for a run's wall-clock time
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

struct ActiveRun {
    id: Uuid,
    cancel: watch::Sender<bool>,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    worker: JoinHandle<()>,
}

/// Starts runs, applies their events and serves manual add/undo
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    state: RunState,
    active: Option<ActiveRun>,
    settings: Option<RunSettings>,
    ledger: UndoLedger,
    pending: Vec<String>,
    progress: (usize, usize),
    last_elapsed: Option<Duration>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            state: RunState::Idle,
            active: None,
            settings: None,
            ledger: UndoLedger::new(),
            pending: Vec::new(),
            progress: (0, 0),
            last_elapsed: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Files processed and total for the current or last run
    pub fn progress(&self) -> (usize, usize) {
        self.progress
    }

    /// Files the model did not match, in the order they were seen
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn ledger(&self) -> &UndoLedger {
        &self.ledger
    }

    pub fn settings(&self) -> Option<&RunSettings> {
        self.settings.as_ref()
    }

    pub fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|r| r.id)
    }

    /// Validate the settings and spawn a worker for them
    pub async fn start(&mut self, settings: RunSettings) -> Result<Uuid> {
        if self.is_running() {
            return Err(SiftError::State("A run is already in progress".to_string()));
        }
        settings.validate()?;

        // A cancelled worker may still be unwinding; apply what it sent
        while self.active.is_some() {
            if let Some(event) = self.next_event().await {
                info!("Previous run: {:?}", event);
            }
        }

        self.state = RunState::Idle;
        self.ledger.clear();
        self.pending.clear();
        self.progress = (0, 0);
        self.last_elapsed = None;

        let run_id = Uuid::new_v4();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let classifier = Classifier::new(
            self.backend.clone(),
            settings.model.clone(),
            settings.prompt.clone(),
        );
        let span = info_span!("run", id = %run_id);
        let worker = tokio::spawn(
            run_worker(settings.clone(), classifier, run_id, event_tx, cancel_rx).instrument(span),
        );

        info!("Started run {} on {:?}", run_id, settings.source);

        self.settings = Some(settings);
        self.active = Some(ActiveRun {
            id: run_id,
            cancel: cancel_tx,
            events: event_rx,
            worker,
        });
        self.state = RunState::Running;

        Ok(run_id)
    }

    /// Stop the current run; files already placed stay placed
    pub fn cancel(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(SiftError::State("No run in progress".to_string()));
        }
        if let Some(run) = &self.active {
            let _ = run.cancel.send(true);
        }
        self.state = RunState::Cancelled;
        info!("Run cancelled");
        Ok(())
    }

    /// Wait for the next worker event and apply it.
    ///
    /// Returns `None` once no run is attached.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        let received = self.active.as_mut()?.events.recv().await;
        match received {
            Some(event) => {
                self.apply(&event);
                Some(event)
            }
            None => {
                self.detach();
                None
            }
        }
    }

    fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Started { total, .. } => {
                self.progress = (0, *total);
            }
            PipelineEvent::Progress { processed, total } => {
                self.progress = (*processed, *total);
            }
            PipelineEvent::FileActed { file_name, source, destination, kind } => {
                self.ledger.record(file_name.clone(), source.clone(), destination.clone(), *kind);
                self.pending.retain(|p| p != file_name);
            }
            PipelineEvent::Pending { file_name, .. } => {
                if !self.pending.contains(file_name) {
                    self.pending.push(file_name.clone());
                }
            }
            PipelineEvent::Status { .. } | PipelineEvent::Failed { .. } => {}
            PipelineEvent::Finished { outcome, elapsed } => {
                self.last_elapsed = Some(*elapsed);
                if self.state == RunState::Running {
                    self.state = match outcome {
                        RunOutcome::Completed => RunState::Completed,
                        RunOutcome::Cancelled => RunState::Cancelled,
                    };
                }
                self.detach();
            }
        }
    }

    fn detach(&mut self) {
        if let Some(run) = self.active.take() {
            if !run.worker.is_finished() {
                debug!("Worker for run {} still winding down", run.id);
            }
        }
    }

    /// Place a pending file, exactly as a match would be placed
    pub fn add(&mut self, file_name: &str) -> Result<Placement> {
        let settings = self.settings.as_ref().ok_or_else(|| {
            SiftError::State("No run has been started yet".to_string())
        })?;

        if self.ledger.contains(file_name) {
            return Err(SiftError::State(format!("{} was already placed", file_name)));
        }
        if !self.pending.iter().any(|p| p == file_name) {
            return Err(SiftError::State(format!(
                "{} is not pending; only files the model did not match can be added",
                file_name
            )));
        }

        let source = settings.source.join(file_name);
        let destination = settings.destination.join(file_name);
        let placement = place_file(&source, &destination, settings.mode)?;

        if let Placement::Placed { destination, kind } = &placement {
            self.ledger.record(file_name, source, destination.clone(), *kind);
            self.pending.retain(|p| p != file_name);
        }

        Ok(placement)
    }

    /// Reverse the last move/copy of `file_name`
    pub fn undo(&mut self, file_name: &str) -> Result<UndoOutcome> {
        self.ledger.undo(file_name)
    }
}

async fn run_worker(
    settings: RunSettings,
    classifier: Classifier,
    run_id: Uuid,
    events: mpsc::UnboundedSender<PipelineEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let started = Instant::now();
    let outcome = process_files(&settings, &classifier, run_id, &events, &mut cancel).await;
    let elapsed = started.elapsed();

    info!("Run {:?} after {}", outcome, format_elapsed(elapsed));
    let _ = events.send(PipelineEvent::Finished { outcome, elapsed });
}

async fn process_files(
    settings: &RunSettings,
    classifier: &Classifier,
    run_id: Uuid,
    events: &mpsc::UnboundedSender<PipelineEvent>,
    cancel: &mut watch::Receiver<bool>,
) -> RunOutcome {
    let emit = |event: PipelineEvent| {
        let _ = events.send(event);
    };

    if let Err(e) = std::fs::create_dir_all(&settings.destination) {
        emit(PipelineEvent::Status {
            message: format!("Error: cannot create {}: {}", settings.destination.display(), e),
        });
        emit(PipelineEvent::Started { run_id, total: 0 });
        return RunOutcome::Completed;
    }

    let files = match list_candidates(&settings.source, &settings.extensions) {
        Ok(files) => files,
        Err(e) => {
            emit(PipelineEvent::Status { message: format!("Error: {}", e) });
            Vec::new()
        }
    };
    let total = files.len();
    emit(PipelineEvent::Started { run_id, total });

    for (index, file_name) in files.iter().enumerate() {
        let stop = *cancel.borrow() || events.is_closed();
        if stop {
            return RunOutcome::Cancelled;
        }

        let source = settings.source.join(file_name);
        let destination = settings.destination.join(file_name);

        if source == destination {
            emit(PipelineEvent::Status {
                message: format!("Skipping {}: Source and destination are the same.", file_name),
            });
        } else {
            let verdict = tokio::select! {
                biased;
                _ = cancelled(cancel) => return RunOutcome::Cancelled,
                result = classifier.try_classify(file_name) => match result {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!("Classification of {} failed: {}", file_name, e);
                        emit(PipelineEvent::Status { message: format!("Error: {}", e) });
                        Verdict::Indeterminate
                    }
                },
            };

            if verdict.is_match() {
                match place_off_runtime(source.clone(), destination, settings.mode).await {
                    Ok(Placement::Placed { destination, kind }) => emit(PipelineEvent::FileActed {
                        file_name: file_name.clone(),
                        source: source.clone(),
                        destination,
                        kind,
                    }),
                    Ok(Placement::Skipped) => emit(PipelineEvent::Status {
                        message: format!("Skipping {}: Source and destination are the same.", file_name),
                    }),
                    Err(e) => {
                        warn!("Placing {} failed: {}", file_name, e);
                        emit(PipelineEvent::Failed {
                            file_name: file_name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            } else {
                emit(PipelineEvent::Pending {
                    file_name: file_name.clone(),
                    verdict,
                });
            }
        }

        let processed = index + 1;
        emit(PipelineEvent::Progress { processed, total });
        emit(PipelineEvent::Status {
            message: format!("Processing {}/{}: {}", processed, total, file_name),
        });
    }

    RunOutcome::Completed
}

/// Run [`place_file`] on the blocking pool so large copies do not stall the runtime
async fn place_off_runtime(
    source: PathBuf,
    destination: PathBuf,
    mode: TransferMode,
) -> Result<Placement> {
    tokio::task::spawn_blocking(move || place_file(&source, &destination, mode))
        .await
        .map_err(|e| SiftError::Placement(format!("placement task failed: {}", e)))?
}

/// Resolves once cancellation is requested or the orchestrator is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        let requested = *cancel.borrow_and_update();
        if requested || cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::ScriptedBackend;
    use crate::classifier::RelevanceLevel;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Says yes to the first file, then never answers
    struct StallingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for StallingBackend {
        async fn chat(&self, _model: &str, _prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok("Yes".to_string())
            } else {
                std::future::pending::<Result<String>>().await
            }
        }
    }

    /// Deletes `victim` while answering the first question, then says yes
    struct VanishingBackend {
        victim: PathBuf,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for VanishingBackend {
        async fn chat(&self, _model: &str, _prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                fs::remove_file(&self.victim)?;
            }
            Ok("Yes".to_string())
        }
    }

    fn settings(source: &Path, destination: &Path, mode: TransferMode) -> RunSettings {
        RunSettings {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            extensions: vec![".jpg".to_string()],
            mode,
            model: "mistral:latest".to_string(),
            prompt: PromptMode::Level {
                concept: "animal".to_string(),
                level: RelevanceLevel::new(6).unwrap(),
            },
        }
    }

    fn folder_with(files: &[&str]) -> TempDir {
        let dir = tempdir().unwrap();
        for name in files {
            fs::write(dir.path().join(name), *name).unwrap();
        }
        dir
    }

    async fn next(orchestrator: &mut Orchestrator) -> Option<PipelineEvent> {
        tokio::time::timeout(Duration::from_secs(5), orchestrator.next_event())
            .await
            .expect("timed out waiting for an event")
    }

    async fn drain(orchestrator: &mut Orchestrator) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = next(orchestrator).await {
            events.push(event);
        }
        events
    }

    #[test]
    fn validation_rules() {
        let src = tempdir().unwrap();
        let base = settings(src.path(), &src.path().join("out"), TransferMode::Copy);
        assert!(base.validate().is_ok());

        let mut blank = base.clone();
        blank.prompt = PromptMode::Level {
            concept: "  ".to_string(),
            level: RelevanceLevel::new(2).unwrap(),
        };
        assert!(matches!(blank.validate(), Err(SiftError::Validation(_))));

        let mut custom = base.clone();
        custom.prompt = PromptMode::Custom { template: "is it a pet?".to_string() };
        assert!(custom.validate().is_ok());

        custom.prompt = PromptMode::Custom { template: String::new() };
        assert!(custom.validate().is_err());

        let mut no_ext = base.clone();
        no_ext.extensions.clear();
        assert!(matches!(no_ext.validate(), Err(SiftError::Validation(_))));

        let mut missing = base;
        missing.source = src.path().join("nope");
        assert!(missing.validate().is_err());
    }

    #[test]
    fn elapsed_is_formatted_as_clock() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "01:02:03");
    }

    #[tokio::test]
    async fn run_places_matches_and_lists_the_rest() {
        let src = folder_with(&["cat(1).jpg", "dog.jpg", "notes.txt", "table.jpg"]);
        let dst = folder_with(&["cat(1).jpg"]);
        let backend = Arc::new(ScriptedBackend::replying(&["Yes, clearly.", "Maybe", "No."]));
        let mut orchestrator = Orchestrator::new(backend.clone());

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Copy))
            .await
            .unwrap();
        assert_eq!(orchestrator.state(), RunState::Running);

        let events = drain(&mut orchestrator).await;

        assert!(matches!(events.first(), Some(PipelineEvent::Started { total: 3, .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::Finished { outcome: RunOutcome::Completed, .. })
        ));
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert_eq!(orchestrator.progress(), (3, 3));
        assert!(orchestrator.last_elapsed().is_some());

        let action = orchestrator.ledger().get("cat(1).jpg").unwrap();
        assert_eq!(action.destination, dst.path().join("cat(1)_1.jpg"));
        assert_eq!(action.kind, ActionKind::Copied);
        assert_eq!(fs::read_to_string(dst.path().join("cat(1).jpg")).unwrap(), "cat(1).jpg");
        assert!(src.path().join("cat(1).jpg").exists());

        assert_eq!(orchestrator.pending(), ["dog.jpg".to_string(), "table.jpg".to_string()]);

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("'cat'") && prompts[0].contains("'animal'"));

        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Status { message } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.last(), Some(&"Processing 3/3: table.jpg"));
    }

    #[tokio::test]
    async fn transport_errors_leave_the_file_pending() {
        let src = folder_with(&["a.jpg", "b.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(SiftError::BadReply("connection refused".to_string())),
            Ok("yes".to_string()),
        ]));
        let mut orchestrator = Orchestrator::new(backend);

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Move))
            .await
            .unwrap();
        let events = drain(&mut orchestrator).await;

        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Status { message } if message.starts_with("Error:")
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Pending { file_name, verdict: Verdict::Indeterminate } if file_name == "a.jpg"
        )));
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert!(src.path().join("a.jpg").exists());
        assert!(!src.path().join("b.jpg").exists());
        assert!(dst.path().join("b.jpg").exists());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let src = folder_with(&["a.jpg", "b.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(StallingBackend { calls: AtomicUsize::new(0) });
        let mut orchestrator = Orchestrator::new(backend);
        let run = settings(src.path(), dst.path(), TransferMode::Copy);

        orchestrator.start(run.clone()).await.unwrap();
        assert!(matches!(orchestrator.start(run).await, Err(SiftError::State(_))));

        orchestrator.cancel().unwrap();
        drain(&mut orchestrator).await;
    }

    #[tokio::test]
    async fn cancel_stops_classifying_and_keeps_placed_files() {
        let src = folder_with(&["a.jpg", "b.jpg", "c.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(StallingBackend { calls: AtomicUsize::new(0) });
        let mut orchestrator = Orchestrator::new(backend.clone());

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Move))
            .await
            .unwrap();

        // Wait until the first file has been placed and reported
        loop {
            match next(&mut orchestrator).await {
                Some(PipelineEvent::Status { message }) if message.starts_with("Processing 1/3") => break,
                Some(_) => continue,
                None => panic!("run ended early"),
            }
        }

        orchestrator.cancel().unwrap();
        assert_eq!(orchestrator.state(), RunState::Cancelled);

        let rest = drain(&mut orchestrator).await;
        assert!(matches!(
            rest.last(),
            Some(PipelineEvent::Finished { outcome: RunOutcome::Cancelled, .. })
        ));
        assert_eq!(orchestrator.state(), RunState::Cancelled);
        assert!(backend.calls.load(Ordering::SeqCst) <= 2);

        assert!(dst.path().join("a.jpg").exists());
        assert!(!src.path().join("a.jpg").exists());
        assert!(orchestrator.ledger().contains("a.jpg"));
        assert!(src.path().join("b.jpg").exists());
        assert!(src.path().join("c.jpg").exists());
    }

    #[tokio::test]
    async fn manual_add_then_undo() {
        let src = folder_with(&["dog.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying(&["No."]));
        let mut orchestrator = Orchestrator::new(backend);

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Move))
            .await
            .unwrap();
        drain(&mut orchestrator).await;
        assert_eq!(orchestrator.pending(), ["dog.jpg".to_string()]);

        let placement = orchestrator.add("dog.jpg").unwrap();
        assert_eq!(
            placement,
            Placement::Placed { destination: dst.path().join("dog.jpg"), kind: ActionKind::Moved }
        );
        assert!(orchestrator.pending().is_empty());
        assert!(!src.path().join("dog.jpg").exists());
        assert!(matches!(orchestrator.add("dog.jpg"), Err(SiftError::State(_))));

        let outcome = orchestrator.undo("dog.jpg").unwrap();
        assert_eq!(outcome, UndoOutcome::RestoredToSource(src.path().join("dog.jpg")));
        assert!(src.path().join("dog.jpg").exists());
        assert!(!dst.path().join("dog.jpg").exists());
        assert!(matches!(orchestrator.undo("dog.jpg"), Err(SiftError::State(_))));
    }

    #[tokio::test]
    async fn add_rejects_files_the_run_has_not_left_pending() {
        let src = folder_with(&["a.jpg", "b.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(StallingBackend { calls: AtomicUsize::new(0) });
        let mut orchestrator = Orchestrator::new(backend);

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Copy))
            .await
            .unwrap();

        // The worker has not reached b.jpg yet
        assert!(matches!(orchestrator.add("b.jpg"), Err(SiftError::State(_))));
        assert!(!dst.path().join("b.jpg").exists());
        assert!(orchestrator.ledger().get("b.jpg").is_none());

        loop {
            match next(&mut orchestrator).await {
                Some(PipelineEvent::Status { message }) if message.starts_with("Processing 1/2") => break,
                Some(_) => continue,
                None => panic!("run ended early"),
            }
        }

        // b.jpg is now being classified
        assert!(matches!(orchestrator.add("b.jpg"), Err(SiftError::State(_))));

        orchestrator.cancel().unwrap();
        drain(&mut orchestrator).await;

        // a.jpg was matched and placed, so it is not pending either
        assert!(orchestrator.ledger().contains("a.jpg"));
        assert!(matches!(orchestrator.add("a.jpg"), Err(SiftError::State(_))));
        assert!(matches!(orchestrator.add("b.jpg"), Err(SiftError::State(_))));

        let mut placed: Vec<_> = fs::read_dir(dst.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        placed.sort();
        assert_eq!(placed, vec!["a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn failed_placement_is_reported_and_the_run_continues() {
        let src = folder_with(&["a.jpg", "b.jpg"]);
        let dst = tempdir().unwrap();
        let backend = Arc::new(VanishingBackend {
            victim: src.path().join("a.jpg"),
            calls: AtomicUsize::new(0),
        });
        let mut orchestrator = Orchestrator::new(backend.clone());

        orchestrator
            .start(settings(src.path(), dst.path(), TransferMode::Move))
            .await
            .unwrap();
        let events = drain(&mut orchestrator).await;

        let failed = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::Failed { file_name, .. } if file_name == "a.jpg"))
            .expect("a.jpg should fail to place");
        let acted = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::FileActed { file_name, .. } if file_name == "b.jpg"))
            .expect("b.jpg should still be placed");
        assert!(failed < acted);

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.state(), RunState::Completed);
        assert_eq!(orchestrator.progress(), (2, 2));
        assert!(!orchestrator.ledger().contains("a.jpg"));
        assert!(orchestrator.ledger().contains("b.jpg"));
        assert!(dst.path().join("b.jpg").exists());
        assert!(!dst.path().join("a.jpg").exists());
    }

    #[tokio::test]
    async fn placement_runs_on_the_blocking_pool() {
        let src = folder_with(&["cat.jpg"]);
        let dst = folder_with(&["cat.jpg"]);

        let placement = place_off_runtime(
            src.path().join("cat.jpg"),
            dst.path().join("cat.jpg"),
            TransferMode::Copy,
        )
        .await
        .unwrap();
        assert_eq!(
            placement,
            Placement::Placed { destination: dst.path().join("cat_1.jpg"), kind: ActionKind::Copied }
        );

        let missing = place_off_runtime(
            src.path().join("ghost.jpg"),
            dst.path().join("ghost.jpg"),
            TransferMode::Move,
        )
        .await;
        assert!(matches!(missing, Err(SiftError::Placement(_))));
    }

    #[tokio::test]
    async fn idle_orchestrator_rejects_cancel_and_add() {
        let backend = Arc::new(ScriptedBackend::replying(&[]));
        let mut orchestrator = Orchestrator::new(backend);

        assert_eq!(orchestrator.state(), RunState::Idle);
        assert!(matches!(orchestrator.cancel(), Err(SiftError::State(_))));
        assert!(matches!(orchestrator.add("a.jpg"), Err(SiftError::State(_))));
        assert!(orchestrator.next_event().await.is_none());
    }

    #[tokio::test]
    async fn invalid_settings_keep_the_orchestrator_idle() {
        let src = tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::replying(&[]));
        let mut orchestrator = Orchestrator::new(backend);

        let mut run = settings(src.path(), &src.path().join("out"), TransferMode::Copy);
        run.extensions.clear();

        assert!(matches!(orchestrator.start(run).await, Err(SiftError::Validation(_))));
        assert_eq!(orchestrator.state(), RunState::Idle);
    }
}
