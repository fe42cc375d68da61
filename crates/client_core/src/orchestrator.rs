//! Workflow state machine for one reconstruction session.
//!
//! The orchestrator is the single owner of session state. Callers mutate it
//! only through the named transitions below and observe it through
//! [`WorkflowSnapshot`]s, either on demand or from the event channel.
//!
//! `step` doubles as the in-flight guard: a transition that would start a
//! network call is rejected unless the workflow is in the step that call
//! starts from, so at most one ingestion or reconstruction is outstanding.
//! Every async transition remembers the session generation it started in
//! and drops its result if a reset happened in the meantime.

use std::{collections::BTreeSet, sync::Arc};

use shared::{
    domain::{Config, Mode, Photo, ProcessStep, ReconstructionResult, UploadedArtifact},
    error::ApiError,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::AbortHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::Timings,
    gateway::{Operation, PhotogrammetryApi},
    progress::{advance_simulated, ProgressTicker},
    selection::SelectionSet,
};

pub const UPLOAD_CHECKPOINT: f32 = 20.0;
pub const PROCESSING_CHECKPOINT: f32 = 50.0;
pub const INGESTED_CHECKPOINT: f32 = 80.0;
pub const PROGRESS_COMPLETE: f32 = 100.0;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Guard or precondition failure; nothing was sent and nothing changed.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("result discarded: the workflow was reset while the request was in flight")]
    Stale,
}

impl WorkflowError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, WorkflowError::Rejected(_))
    }
}

/// Immutable view of the session handed to renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub mode: Mode,
    pub step: ProcessStep,
    pub uploaded_file: Option<Arc<UploadedArtifact>>,
    pub config: Config,
    pub message: String,
    pub progress: f32,
    pub photos: Arc<Vec<Photo>>,
    pub selection: SelectionSet,
    pub selection_confirmed: bool,
    pub confirming: bool,
    pub result: Option<ReconstructionResult>,
}

impl WorkflowSnapshot {
    pub fn photos_ready(&self) -> bool {
        self.step == ProcessStep::Idle && !self.photos.is_empty()
    }

    pub fn can_submit(&self) -> bool {
        self.step == ProcessStep::Idle && self.mode.is_chosen() && self.uploaded_file.is_some()
    }

    pub fn can_confirm(&self) -> bool {
        self.step == ProcessStep::Selecting && !self.confirming && !self.selection.is_empty()
    }

    pub fn can_run_reconstruction(&self) -> bool {
        self.step == ProcessStep::Idle
            && !self.confirming
            && !self.photos.is_empty()
            && self.selection_confirmed
    }
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Updated(WorkflowSnapshot),
    OperationFailed {
        operation: Operation,
        error: ApiError,
    },
}

struct WorkflowState {
    generation: u64,
    mode: Mode,
    step: ProcessStep,
    uploaded_file: Option<Arc<UploadedArtifact>>,
    config: Config,
    message: String,
    progress: f32,
    photos: Arc<Vec<Photo>>,
    selection: SelectionSet,
    selection_confirmed: bool,
    confirming: bool,
    result: Option<ReconstructionResult>,
    ticker: Option<AbortHandle>,
}

impl WorkflowState {
    fn initial(generation: u64) -> Self {
        Self {
            generation,
            mode: Mode::None,
            step: ProcessStep::Idle,
            uploaded_file: None,
            config: Config::default(),
            message: String::new(),
            progress: 0.0,
            photos: Arc::new(Vec::new()),
            selection: SelectionSet::new(),
            selection_confirmed: false,
            confirming: false,
            result: None,
            ticker: None,
        }
    }

    fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            mode: self.mode,
            step: self.step,
            uploaded_file: self.uploaded_file.clone(),
            config: self.config,
            message: self.message.clone(),
            progress: self.progress,
            photos: Arc::clone(&self.photos),
            selection: self.selection.clone(),
            selection_confirmed: self.selection_confirmed,
            confirming: self.confirming,
            result: self.result.clone(),
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn require_step(&self, action: &'static str, step: ProcessStep) -> Result<(), WorkflowError> {
        if self.step != step {
            return Err(reject(
                action,
                format!("workflow is {}, expected {step}", self.step),
            ));
        }
        Ok(())
    }

    fn require_editable_selection(&self, action: &'static str) -> Result<(), WorkflowError> {
        self.require_step(action, ProcessStep::Selecting)?;
        if self.confirming {
            return Err(reject(action, "selection is being confirmed"));
        }
        Ok(())
    }
}

fn reject(action: &'static str, reason: impl Into<String>) -> WorkflowError {
    let reason = reason.into();
    debug!(action, %reason, "transition rejected");
    WorkflowError::Rejected(reason)
}

pub struct Orchestrator {
    api: Arc<dyn PhotogrammetryApi>,
    timings: Timings,
    inner: Mutex<WorkflowState>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn PhotogrammetryApi>, timings: Timings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            api,
            timings,
            inner: Mutex::new(WorkflowState::initial(0)),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        self.inner.lock().await.snapshot()
    }

    fn publish(&self, state: &WorkflowState) {
        let _ = self.events.send(WorkflowEvent::Updated(state.snapshot()));
    }

    pub async fn choose_mode(&self, mode: Mode) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("choose_mode", ProcessStep::Idle)?;
        if !mode.is_chosen() {
            return Err(reject("choose_mode", "choose photos or video"));
        }
        if state.mode.is_chosen() {
            return Err(reject(
                "choose_mode",
                format!("mode is already {}; change mode first", state.mode),
            ));
        }
        state.mode = mode;
        info!(%mode, "input mode chosen");
        self.publish(&state);
        Ok(())
    }

    /// Returns to mode selection, discarding the selected file. Once photos
    /// are ingested the mode is fixed until reset.
    pub async fn change_mode(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("change_mode", ProcessStep::Idle)?;
        if !state.photos.is_empty() {
            return Err(reject(
                "change_mode",
                "photos are already ingested; reset to start over",
            ));
        }
        state.mode = Mode::None;
        state.uploaded_file = None;
        state.message.clear();
        self.publish(&state);
        Ok(())
    }

    pub async fn select_file(&self, file: UploadedArtifact) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("select_file", ProcessStep::Idle)?;
        if !state.mode.is_chosen() {
            return Err(reject("select_file", "no input mode chosen"));
        }
        if state.uploaded_file.is_some() {
            return Err(reject("select_file", "a file is already selected"));
        }
        if let Err(err) = file.validate_for(state.mode) {
            state.message = err.message.clone();
            self.publish(&state);
            return Err(err.into());
        }
        info!(file = %file.name, size = file.size, "input file selected");
        state.uploaded_file = Some(Arc::new(file));
        state.message.clear();
        self.publish(&state);
        Ok(())
    }

    pub async fn remove_file(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("remove_file", ProcessStep::Idle)?;
        if state.uploaded_file.take().is_none() {
            return Err(reject("remove_file", "no file selected"));
        }
        state.message.clear();
        self.publish(&state);
        Ok(())
    }

    pub async fn update_config(&self, config: Config) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("update_config", ProcessStep::Idle)?;
        config.validate()?;
        state.config = config;
        self.publish(&state);
        Ok(())
    }

    /// Uploads the selected file, then fetches the ingested photos and
    /// selects all of them. Returns the number of images the backend
    /// reported.
    pub async fn submit(&self) -> Result<u32, WorkflowError> {
        let (generation, mode, file, config) = {
            let mut state = self.inner.lock().await;
            state.require_step("submit", ProcessStep::Idle)?;
            if !state.mode.is_chosen() {
                return Err(reject("submit", "no input mode chosen"));
            }
            let Some(file) = state.uploaded_file.clone() else {
                return Err(reject("submit", "no file selected"));
            };
            state.step = ProcessStep::Uploading;
            state.progress = UPLOAD_CHECKPOINT;
            state.message = "Uploading file...".into();
            info!(mode = %state.mode, file = %file.name, "submitting input");
            self.publish(&state);
            (state.generation, state.mode, file, state.config)
        };

        let operation = match mode {
            Mode::Video => Operation::ExtractFrames,
            _ => Operation::UploadPhotos,
        };

        self.commit(generation, |state| {
            state.step = ProcessStep::Processing;
            state.progress = PROCESSING_CHECKPOINT;
            state.message = match mode {
                Mode::Video => "Extracting frames from video...",
                _ => "Processing ZIP archive...",
            }
            .into();
        })
        .await?;

        let ingested = match operation {
            Operation::ExtractFrames => self.api.extract_frames(&file, &config).await,
            _ => self.api.upload_photos(&file, &config).await,
        };
        let count = match ingested {
            Ok(body) => body.images_processed,
            Err(err) => return Err(self.fail(generation, operation, "Error", err).await),
        };

        self.commit(generation, |state| {
            state.progress = INGESTED_CHECKPOINT;
            state.message = match mode {
                Mode::Video => format!("Video processed successfully. {count} images extracted."),
                _ => format!("ZIP processed successfully. {count} images loaded."),
            };
        })
        .await?;

        let photos = match self.api.list_photos().await {
            Ok(photos) => photos,
            Err(err) => {
                return Err(self
                    .fail(generation, Operation::ListPhotos, "Error", err)
                    .await)
            }
        };
        if photos.len() != count as usize {
            warn!(
                reported = count,
                listed = photos.len(),
                "photo list does not match the ingestion report"
            );
        }

        self.commit(generation, |state| {
            state.progress = PROGRESS_COMPLETE;
            state.selection = SelectionSet::from_photos(&photos);
            state.photos = Arc::new(photos);
            state.selection_confirmed = false;
            state.result = None;
        })
        .await?;

        tokio::time::sleep(self.timings.ready_delay).await;

        self.commit(generation, |state| {
            state.step = ProcessStep::Idle;
            state.progress = 0.0;
            state.message = "File processed successfully. Select the photos you want to use.".into();
            info!(photos = state.photos.len(), "photos ready for selection");
        })
        .await?;

        Ok(count)
    }

    pub async fn open_selector(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_step("open_selector", ProcessStep::Idle)?;
        if state.photos.is_empty() {
            return Err(reject("open_selector", "no photos to select from"));
        }
        state.step = ProcessStep::Selecting;
        self.publish(&state);
        Ok(())
    }

    pub async fn close_selector(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_editable_selection("close_selector")?;
        state.step = ProcessStep::Idle;
        self.publish(&state);
        Ok(())
    }

    /// Flips one photo in the selection. Returns whether it is selected now.
    pub async fn toggle_photo(&self, filename: &str) -> Result<bool, WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_editable_selection("toggle_photo")?;
        if !state.photos.iter().any(|photo| photo.filename == filename) {
            return Err(reject(
                "toggle_photo",
                format!("unknown photo '{filename}'"),
            ));
        }
        let selected = state.selection.toggle(filename);
        state.selection_confirmed = false;
        self.publish(&state);
        Ok(selected)
    }

    pub async fn select_all(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_editable_selection("select_all")?;
        let photos = Arc::clone(&state.photos);
        state
            .selection
            .select_all(photos.iter().map(|photo| photo.filename.clone()));
        state.selection_confirmed = false;
        self.publish(&state);
        Ok(())
    }

    pub async fn deselect_all(&self) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        state.require_editable_selection("deselect_all")?;
        state.selection.deselect_all();
        state.selection_confirmed = false;
        self.publish(&state);
        Ok(())
    }

    /// Sends the selection to the backend, then replaces the photo list with
    /// the refreshed list restricted to what the backend kept. Returns the
    /// number of photos left.
    pub async fn confirm_selection(&self) -> Result<usize, WorkflowError> {
        let (generation, selected) = {
            let mut state = self.inner.lock().await;
            state.require_editable_selection("confirm_selection")?;
            if state.selection.is_empty() {
                return Err(reject("confirm_selection", "select at least one photo"));
            }
            state.confirming = true;
            self.publish(&state);
            (state.generation, state.selection.to_vec())
        };

        let confirmed = match self.api.confirm_selection(&selected).await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                let mut state = self.inner.lock().await;
                if state.generation != generation {
                    debug!(generation, "discarding stale confirm failure");
                    return Err(WorkflowError::Stale);
                }
                state.confirming = false;
                state.message = format!("Error confirming photo selection: {}", err.message);
                warn!(error = %err, "photo selection was not confirmed");
                self.publish(&state);
                let _ = self.events.send(WorkflowEvent::OperationFailed {
                    operation: Operation::ConfirmSelection,
                    error: err.clone(),
                });
                return Err(err.into());
            }
        };

        let remaining_count = confirmed.remaining_count;
        let authoritative: BTreeSet<String> = match confirmed.remaining_photos {
            Some(remaining) => remaining.into_iter().collect(),
            None => {
                if remaining_count as usize != selected.len() {
                    warn!(
                        selected = selected.len(),
                        remaining = remaining_count,
                        "backend kept a different number of photos than selected"
                    );
                }
                selected.into_iter().collect()
            }
        };

        let refreshed = self.api.list_photos().await;

        let mut state = self.inner.lock().await;
        if state.generation != generation {
            debug!(generation, "discarding stale confirm result");
            return Err(WorkflowError::Stale);
        }
        let (photos, refresh_error) = match refreshed {
            Ok(listed) => {
                let photos: Vec<Photo> = listed
                    .into_iter()
                    .filter(|photo| authoritative.contains(&photo.filename))
                    .collect();
                state.selection = SelectionSet::from_photos(&photos);
                (photos, None)
            }
            Err(err) => {
                warn!(error = %err, "photo list refresh failed after confirm");
                let photos: Vec<Photo> = state
                    .photos
                    .iter()
                    .filter(|photo| authoritative.contains(&photo.filename))
                    .cloned()
                    .collect();
                state.selection.retain_existing(&photos);
                (photos, Some(err))
            }
        };
        let remaining = photos.len();

        state.selection_confirmed = remaining > 0;
        state.photos = Arc::new(photos);
        state.confirming = false;
        state.step = ProcessStep::Idle;
        state.message = match refresh_error {
            None => format!("Selection confirmed. {remaining_count} photos ready for photogrammetry."),
            Some(err) => format!(
                "Selection confirmed, but the photo list could not be refreshed: {}",
                err.message
            ),
        };
        info!(remaining, "photo selection confirmed");
        self.publish(&state);
        Ok(remaining)
    }

    /// Runs the long reconstruction call while a ticker advances a
    /// simulated progress estimate.
    pub async fn run_reconstruction(
        self: &Arc<Self>,
    ) -> Result<ReconstructionResult, WorkflowError> {
        let (generation, ticker) = {
            let mut state = self.inner.lock().await;
            state.require_step("run_reconstruction", ProcessStep::Idle)?;
            if state.confirming {
                return Err(reject("run_reconstruction", "selection is being confirmed"));
            }
            if state.photos.is_empty() {
                return Err(reject("run_reconstruction", "no photos ingested"));
            }
            if !state.selection_confirmed {
                return Err(reject(
                    "run_reconstruction",
                    "confirm the photo selection first",
                ));
            }
            state.step = ProcessStep::Photogrammetry;
            state.progress = 0.0;
            state.result = None;
            state.message = "Running photogrammetry pipeline...".into();
            let ticker = self.spawn_progress_ticker(state.generation);
            state.ticker = Some(ticker.abort_handle());
            info!(photos = state.photos.len(), "reconstruction started");
            self.publish(&state);
            (state.generation, ticker)
        };

        let outcome = self.api.run_reconstruction().await;
        ticker.stop();

        match outcome {
            Ok(result) => {
                let mut state = self.inner.lock().await;
                if state.generation != generation {
                    debug!(generation, "discarding stale reconstruction result");
                    return Err(WorkflowError::Stale);
                }
                state.stop_ticker();
                state.progress = PROGRESS_COMPLETE;
                state.result = Some(result.clone());
                state.step = ProcessStep::Completed;
                state.message = "Done! Your 3D model is ready to download.".into();
                info!(download = %result.download_reference, "reconstruction completed");
                self.publish(&state);
                Ok(result)
            }
            Err(err) => Err(self
                .fail(
                    generation,
                    Operation::RunReconstruction,
                    "Photogrammetry error",
                    err,
                )
                .await),
        }
    }

    pub async fn download_artifact(&self) -> Result<Vec<u8>, WorkflowError> {
        let (generation, reference) = {
            let state = self.inner.lock().await;
            state.require_step("download_artifact", ProcessStep::Completed)?;
            let Some(result) = &state.result else {
                return Err(reject("download_artifact", "no reconstruction result"));
            };
            (state.generation, result.download_reference.clone())
        };

        match self.api.download_artifact(&reference).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "result downloaded");
                Ok(bytes)
            }
            Err(err) => {
                let mut state = self.inner.lock().await;
                if state.generation == generation {
                    state.message = format!("Download failed: {}", err.message);
                    self.publish(&state);
                }
                Err(err.into())
            }
        }
    }

    /// Discards all session state. A response still in flight will find a
    /// newer generation and be dropped.
    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        if state.step.is_busy() {
            info!(step = %state.step, "abandoning in-flight operation");
        }
        state.stop_ticker();
        let generation = state.generation.wrapping_add(1);
        *state = WorkflowState::initial(generation);
        info!(generation, "workflow reset");
        self.publish(&state);
    }

    fn spawn_progress_ticker(self: &Arc<Self>, generation: u64) -> ProgressTicker {
        let orchestrator = Arc::downgrade(self);
        ProgressTicker::spawn(self.timings.progress_tick, move || {
            let orchestrator = orchestrator.clone();
            async move {
                match orchestrator.upgrade() {
                    Some(orchestrator) => orchestrator.tick_progress(generation).await,
                    None => false,
                }
            }
        })
    }

    async fn tick_progress(&self, generation: u64) -> bool {
        let mut state = self.inner.lock().await;
        if state.generation != generation || state.step != ProcessStep::Photogrammetry {
            return false;
        }
        let next = advance_simulated(state.progress, &mut rand::rng());
        if next > state.progress {
            state.progress = next;
            self.publish(&state);
        }
        true
    }

    async fn commit(
        &self,
        generation: u64,
        apply: impl FnOnce(&mut WorkflowState),
    ) -> Result<(), WorkflowError> {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            debug!(generation, current = state.generation, "discarding stale result");
            return Err(WorkflowError::Stale);
        }
        apply(&mut state);
        self.publish(&state);
        Ok(())
    }

    /// Error policy for ingestion and reconstruction: stop the ticker, go
    /// back to idle with progress cleared, keep file and config.
    async fn fail(
        &self,
        generation: u64,
        operation: Operation,
        prefix: &str,
        err: ApiError,
    ) -> WorkflowError {
        let mut state = self.inner.lock().await;
        if state.generation != generation {
            debug!(generation, operation = operation.name(), "discarding stale failure");
            return WorkflowError::Stale;
        }
        state.stop_ticker();
        state.step = ProcessStep::Idle;
        state.progress = 0.0;
        state.message = format!("{prefix}: {}", err.message);
        warn!(operation = operation.name(), error = %err, "operation failed");
        self.publish(&state);
        let _ = self.events.send(WorkflowEvent::OperationFailed {
            operation,
            error: err.clone(),
        });
        WorkflowError::Api(err)
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
