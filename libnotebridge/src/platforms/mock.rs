//! Mock adapters for testing
//!
//! Scriptable stand-ins for both networks and for the cursor store. They
//! record every call so tests can assert on what the bridge did. Clones
//! share their recorded state, so keep a clone before handing one to the
//! engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::engine::StopHandle;
use crate::error::{Result, StateError, TransportError};
use crate::platforms::{Destination, SourceFeed, TransportResult};
use crate::state::CursorStore;
use crate::types::{
    Attachment, DownloadedMedia, MediaUpload, Note, NoteId, StatusRequest, UploadedMedia,
};

/// In-memory source feed
#[derive(Clone, Default)]
pub struct MockSource {
    notes: Arc<Mutex<Vec<Note>>>,
    fetch_failures: Arc<Mutex<VecDeque<TransportError>>>,
    fetch_calls: Arc<Mutex<Vec<Option<NoteId>>>>,
    failing_downloads: Arc<Mutex<HashSet<String>>>,
    download_calls: Arc<Mutex<Vec<String>>>,
    download_delay: Duration,
    /// Request a stop once this many fetches have been served
    stop_after: Option<(usize, StopHandle)>,
}

impl MockSource {
    /// Feed holding `notes`. Fetches return notes newer than the cursor,
    /// newest first, the way Misskey does.
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            notes: Arc::new(Mutex::new(notes)),
            ..Default::default()
        }
    }

    /// Fail the next fetches with these errors, in order
    pub fn with_fetch_failures(self, failures: Vec<TransportError>) -> Self {
        self.fetch_failures.lock().unwrap().extend(failures);
        self
    }

    /// Fail every download of the attachment with this id
    pub fn with_failing_download(self, attachment_id: &str) -> Self {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(attachment_id.to_string());
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn stop_after_fetches(mut self, fetches: usize, stop: StopHandle) -> Self {
        self.stop_after = Some((fetches, stop));
        self
    }

    /// Publish a new note, as if the user just posted it
    pub fn push_note(&self, note: Note) {
        self.notes.lock().unwrap().push(note);
    }

    /// `since_id` of every fetch, in call order
    pub fn fetch_calls(&self) -> Vec<Option<NoteId>> {
        self.fetch_calls.lock().unwrap().clone()
    }

    /// Attachment ids of every download attempt, in call order
    pub fn download_calls(&self) -> Vec<String> {
        self.download_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFeed for MockSource {
    async fn fetch_user_notes(
        &self,
        _user_id: &str,
        limit: u32,
        since_id: Option<&NoteId>,
    ) -> TransportResult<Vec<Note>> {
        let calls = {
            let mut calls = self.fetch_calls.lock().unwrap();
            calls.push(since_id.cloned());
            calls.len()
        };
        if let Some((after, stop)) = &self.stop_after {
            if calls >= *after {
                stop.request_stop();
            }
        }

        if let Some(error) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut newer: Vec<Note> = self
            .notes
            .lock()
            .unwrap()
            .iter()
            .filter(|note| since_id.map_or(true, |since| note.id > *since))
            .cloned()
            .collect();
        newer.sort_by(|a, b| a.id.cmp(&b.id));
        newer.truncate(limit as usize);
        newer.reverse();
        Ok(newer)
    }

    async fn download_attachment(
        &self,
        attachment: &Attachment,
    ) -> TransportResult<DownloadedMedia> {
        self.download_calls
            .lock()
            .unwrap()
            .push(attachment.id.clone());

        if !self.download_delay.is_zero() {
            sleep(self.download_delay).await;
        }

        if self.failing_downloads.lock().unwrap().contains(&attachment.id) {
            return Err(TransportError::Network(format!(
                "mock download of {} failed",
                attachment.id
            )));
        }

        Ok(DownloadedMedia {
            bytes: attachment.id.as_bytes().to_vec(),
            filename: attachment
                .name
                .clone()
                .unwrap_or_else(|| format!("{}.bin", attachment.id)),
            content_type: attachment
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        })
    }
}

/// In-memory destination
#[derive(Clone, Default)]
pub struct MockDestination {
    uploads: Arc<Mutex<Vec<MediaUpload>>>,
    statuses: Arc<Mutex<Vec<StatusRequest>>>,
    status_attempts: Arc<Mutex<usize>>,
    failing_uploads: Arc<Mutex<HashSet<String>>>,
    failing_statuses: Arc<Mutex<HashSet<String>>>,
    fail_all_statuses: bool,
    /// Pending answers each upload gets before it reports ready
    processing_checks: usize,
    media_checks: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail uploads of files with this name
    pub fn with_failing_upload(self, filename: &str) -> Self {
        self.failing_uploads
            .lock()
            .unwrap()
            .insert(filename.to_string());
        self
    }

    /// Fail status creation for this exact text
    pub fn with_failing_status(self, text: &str) -> Self {
        self.failing_statuses
            .lock()
            .unwrap()
            .insert(text.to_string());
        self
    }

    pub fn failing_all_statuses(mut self) -> Self {
        self.fail_all_statuses = true;
        self
    }

    /// Uploads come back processing and stay that way for `checks`
    /// readiness checks. `usize::MAX` never finishes.
    pub fn with_processing_media(mut self, checks: usize) -> Self {
        self.processing_checks = checks;
        self
    }

    /// Readiness checks made for one media id
    pub fn media_checks(&self, media_id: &str) -> usize {
        self.media_checks
            .lock()
            .unwrap()
            .get(media_id)
            .copied()
            .unwrap_or(0)
    }

    /// Successful uploads
    pub fn uploads(&self) -> Vec<MediaUpload> {
        self.uploads.lock().unwrap().clone()
    }

    /// Successfully created statuses
    pub fn statuses(&self) -> Vec<StatusRequest> {
        self.statuses.lock().unwrap().clone()
    }

    /// Status creation calls, failed ones included
    pub fn status_attempts(&self) -> usize {
        *self.status_attempts.lock().unwrap()
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn upload_media(&self, upload: MediaUpload) -> TransportResult<UploadedMedia> {
        if self.failing_uploads.lock().unwrap().contains(&upload.filename) {
            return Err(TransportError::Rejected(format!(
                "mock upload of {} failed",
                upload.filename
            )));
        }

        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(upload);
        let id = format!("media-{}", uploads.len());
        if self.processing_checks > 0 {
            Ok(UploadedMedia::processing(id))
        } else {
            Ok(UploadedMedia::ready(id))
        }
    }

    async fn media_ready(&self, media_id: &str) -> TransportResult<bool> {
        let mut checks = self.media_checks.lock().unwrap();
        let count = checks.entry(media_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count > self.processing_checks)
    }

    async fn create_status(&self, request: &StatusRequest) -> TransportResult<String> {
        *self.status_attempts.lock().unwrap() += 1;

        if self.fail_all_statuses || self.failing_statuses.lock().unwrap().contains(&request.text) {
            return Err(TransportError::Network("mock status creation failed".to_string()));
        }
        if let Some(pending) = request
            .media_ids
            .iter()
            .find(|id| {
                self.processing_checks > 0 && self.media_checks(id) <= self.processing_checks
            })
        {
            // Mastodon answers 422 for media it has not finished processing
            return Err(TransportError::Rejected(format!(
                "media {} has not finished processing",
                pending
            )));
        }

        let mut statuses = self.statuses.lock().unwrap();
        statuses.push(request.clone());
        Ok(format!("status-{}", statuses.len()))
    }
}

/// In-memory cursor store that remembers every save
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    cursor: Arc<Mutex<Option<NoteId>>>,
    saves: Arc<Mutex<Vec<NoteId>>>,
    fail_saves: bool,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(since_id: &str) -> Self {
        let store = Self::default();
        *store.cursor.lock().unwrap() = Some(NoteId::new(since_id));
        store
    }

    /// Every save attempt errors, leaving the stored cursor untouched
    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Default::default()
        }
    }

    pub fn current(&self) -> Option<NoteId> {
        self.cursor.lock().unwrap().clone()
    }

    /// Successful saves, in order
    pub fn saves(&self) -> Vec<NoteId> {
        self.saves.lock().unwrap().clone()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Option<NoteId> {
        self.current()
    }

    fn save(&self, since_id: &NoteId) -> Result<()> {
        if self.fail_saves {
            return Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "mock state file is read-only",
            ))
            .into());
        }
        *self.cursor.lock().unwrap() = Some(since_id.clone());
        self.saves.lock().unwrap().push(since_id.clone());
        Ok(())
    }
}
