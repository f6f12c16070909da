//! Polling engine
//!
//! Fetches the user's notes, hands each one to the filter and the
//! crossposter in chronological order, and advances the cursor after every
//! note it observes. The cursor moves whether or not the crosspost
//! succeeded, so a restart resumes right after the last note handed
//! downstream and never mirrors a note twice.
//!
//! ```text
//! Idle -> Fetching -> Dispatching -> Waiting(Poll) -> Fetching ...
//!            |
//!            +-- transport error --> Waiting(Backoff) -> Fetching ...
//! ```
//!
//! Any state moves to `Stopped` once a stop is requested. The flag is
//! checked before every fetch, between notes, and at least once a second
//! while sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::crosspost::Crossposter;
use crate::error::TransportError;
use crate::filter;
use crate::platforms::{with_timeout, SourceFeed};
use crate::state::CursorStore;
use crate::types::{CrosspostOutcome, Note, NoteId};

/// Longest uninterrupted sleep; bounds how long a stop request can go unnoticed
const STOP_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative stop flag shared between the engine and a signal handler
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep for `duration` in slices, returning early once a stop is
    /// requested. Returns `false` if the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.is_stopped();
        }
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_stopped() {
                return false;
            }
            let slice = remaining.min(STOP_CHECK_INTERVAL);
            sleep(slice).await;
            remaining -= slice;
        }
        !self.is_stopped()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// Nothing new; short poll interval
    Poll,
    /// The last fetch failed; long backoff
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Fetching,
    Dispatching,
    Waiting(WaitKind),
    Stopped,
}

/// Settings the engine needs from the config
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub user_id: String,
    pub fetch_limit: u32,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub request_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(user_id: &str, sync: &SyncConfig) -> Self {
        Self {
            user_id: user_id.to_string(),
            fetch_limit: sync.fetch_limit,
            poll_interval: sync.poll_interval,
            error_backoff: sync.error_backoff,
            request_timeout: sync.request_timeout,
        }
    }
}

/// Counts for one batch, or totals for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Notes newer than the cursor in the fetched batch
    pub observed: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Id of the last observed note
    pub newest: Option<NoteId>,
}

impl BatchReport {
    fn record(&mut self, outcome: &CrosspostOutcome) {
        self.observed += 1;
        match outcome {
            CrosspostOutcome::Skipped(_) => self.skipped += 1,
            CrosspostOutcome::Succeeded { .. } => self.succeeded += 1,
            CrosspostOutcome::Failed { .. } => self.failed += 1,
        }
    }

    fn absorb(&mut self, batch: &BatchReport) {
        self.observed += batch.observed;
        self.skipped += batch.skipped;
        self.succeeded += batch.succeeded;
        self.failed += batch.failed;
        if batch.newest.is_some() {
            self.newest = batch.newest.clone();
        }
    }
}

/// Pick the cursor to start from. An explicit starting id never moves the
/// cursor backwards past what was already observed.
pub fn starting_cursor(explicit: Option<NoteId>, persisted: Option<NoteId>) -> Option<NoteId> {
    match (explicit, persisted) {
        (Some(explicit), Some(persisted)) => Some(explicit.max(persisted)),
        (explicit, persisted) => explicit.or(persisted),
    }
}

pub struct SyncEngine {
    source: Arc<dyn SourceFeed>,
    crossposter: Crossposter,
    store: Box<dyn CursorStore>,
    settings: EngineSettings,
    cursor: Option<NoteId>,
    stop: StopHandle,
    state: EngineState,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SourceFeed>,
        crossposter: Crossposter,
        store: Box<dyn CursorStore>,
        settings: EngineSettings,
        cursor: Option<NoteId>,
    ) -> Self {
        Self {
            source,
            crossposter,
            store,
            settings,
            cursor,
            stop: StopHandle::new(),
            state: EngineState::Idle,
        }
    }

    /// Share an existing stop flag instead of the engine's own
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for requesting a stop from another task or a signal handler
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn cursor(&self) -> Option<&NoteId> {
        self.cursor.as_ref()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Engine state change");
            self.state = next;
        }
    }

    /// Fetch one batch newer than the cursor and process it.
    ///
    /// Fetch failures are returned with the cursor untouched. Failures while
    /// crossposting individual notes are only counted in the report.
    pub async fn run_batch(&mut self) -> Result<BatchReport, TransportError> {
        let mut report = BatchReport::default();
        if self.stop.is_stopped() {
            self.transition(EngineState::Stopped);
            return Ok(report);
        }

        self.transition(EngineState::Fetching);
        let fetched = with_timeout(
            self.settings.request_timeout,
            "note fetch",
            self.source.fetch_user_notes(
                &self.settings.user_id,
                self.settings.fetch_limit,
                self.cursor.as_ref(),
            ),
        )
        .await?;

        let notes = newer_than(fetched, self.cursor.as_ref());
        debug!(count = notes.len(), since_id = ?self.cursor.as_ref().map(NoteId::as_str), "Fetched batch");

        self.transition(EngineState::Dispatching);
        for note in notes {
            if self.stop.is_stopped() {
                info!(
                    since_id = ?self.cursor.as_ref().map(NoteId::as_str),
                    "Stop requested, leaving the rest of the batch for the next run"
                );
                break;
            }

            let outcome = self.dispatch(&note).await;
            report.record(&outcome);
            self.advance(note.id);
            report.newest = self.cursor.clone();
        }

        if report.observed > 0 {
            info!(
                observed = report.observed,
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed,
                "Batch complete"
            );
        }
        self.transition(EngineState::Idle);
        Ok(report)
    }

    /// Poll until a stop is requested.
    ///
    /// A batch with new notes is followed straight away by the next fetch,
    /// an empty one by the poll interval, and a failed fetch by the error
    /// backoff. The cursor is saved one last time before returning.
    pub async fn run(&mut self) -> BatchReport {
        let mut totals = BatchReport::default();
        info!(
            user_id = %self.settings.user_id,
            since_id = ?self.cursor.as_ref().map(NoteId::as_str),
            "Starting to watch for new notes"
        );

        while !self.stop.is_stopped() {
            match self.run_batch().await {
                Ok(batch) if batch.observed > 0 => totals.absorb(&batch),
                Ok(_) => {
                    self.transition(EngineState::Waiting(WaitKind::Poll));
                    self.stop.sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        since_id = ?self.cursor.as_ref().map(NoteId::as_str),
                        retry_in = ?self.settings.error_backoff,
                        "Failed to fetch notes"
                    );
                    self.transition(EngineState::Waiting(WaitKind::Backoff));
                    self.stop.sleep(self.settings.error_backoff).await;
                }
            }
        }

        self.shutdown();
        totals
    }

    /// Final cursor save; called when the loop exits
    pub fn shutdown(&mut self) {
        if let Some(cursor) = &self.cursor {
            match self.store.save(cursor) {
                Ok(()) => info!(since_id = %cursor, "Saved cursor before exit"),
                Err(e) => error!(since_id = %cursor, error = %e, "Failed to save cursor before exit"),
            }
        }
        self.transition(EngineState::Stopped);
    }

    async fn dispatch(&self, note: &Note) -> CrosspostOutcome {
        match filter::exclusion(note) {
            Some(reason) => {
                info!(note_id = %note.id, reason = %reason, "Skipping note");
                CrosspostOutcome::Skipped(reason)
            }
            None => self.crossposter.crosspost(note).await,
        }
    }

    /// Record `id` as observed and persist it before the next note
    fn advance(&mut self, id: NoteId) {
        if let Err(e) = self.store.save(&id) {
            // The in-memory cursor still moves; the next save retries the write
            warn!(since_id = %id, error = %e, "Failed to persist cursor");
        }
        self.cursor = Some(id);
    }
}

/// Chronological order, nothing at or before the cursor, no duplicates
fn newer_than(mut notes: Vec<Note>, cursor: Option<&NoteId>) -> Vec<Note> {
    notes.retain(|note| cursor.map_or(true, |cursor| note.id > *cursor));
    notes.sort_by(|a, b| a.id.cmp(&b.id));
    notes.dedup_by(|a, b| a.id == b.id);
    notes
}
