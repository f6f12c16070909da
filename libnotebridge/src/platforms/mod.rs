//! Source and destination network adapters
//!
//! The bridge only talks to the networks through the two traits below.
//! The production adapters are thin HTTP mappings; the decision logic
//! lives in the pipeline, orchestrator and engine, which are tested
//! against the doubles in [`mock`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{
    Attachment, DownloadedMedia, MediaUpload, Note, NoteId, StatusRequest, UploadedMedia,
};

pub mod mastodon;
pub mod misskey;

// Mock adapters are available for all builds (not just tests) to support integration tests
pub mod mock;

/// Result type for a single network call
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Where notes come from
#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Fetch up to `limit` of the user's notes newer than `since_id`.
    ///
    /// No ordering is promised; the engine sorts the batch itself.
    async fn fetch_user_notes(
        &self,
        user_id: &str,
        limit: u32,
        since_id: Option<&NoteId>,
    ) -> TransportResult<Vec<Note>>;

    /// Download one attachment's bytes along with a file name and content type
    async fn download_attachment(&self, attachment: &Attachment)
        -> TransportResult<DownloadedMedia>;
}

/// Where notes are mirrored to
#[async_trait]
pub trait Destination: Send + Sync {
    /// Upload one media file. Large files may come back still processing.
    async fn upload_media(&self, upload: MediaUpload) -> TransportResult<UploadedMedia>;

    /// Whether an uploaded media file has finished processing
    async fn media_ready(&self, media_id: &str) -> TransportResult<bool>;

    /// Create a status, returning its id
    async fn create_status(&self, request: &StatusRequest) -> TransportResult<String>;
}

/// Bound a network call so a hung request turns into a reported failure
pub async fn with_timeout<T, F>(limit: Duration, context: &str, call: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(format!(
            "{} did not complete within {}s",
            context,
            limit.as_secs_f32()
        ))),
    }
}
