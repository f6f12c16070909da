//! Attachment transfer
//!
//! Moves a note's drive files to the destination one at a time, in order.
//! A file that fails to download or upload is logged and left out; the
//! note is still posted with whatever made it across.
//!
//! Video and large images may still be processing when the upload returns.
//! Those are polled until ready, since a status referencing unprocessed
//! media is rejected. Media that never becomes ready counts as a failed
//! upload.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::platforms::{with_timeout, Destination, SourceFeed, TransportResult};
use crate::types::{Attachment, MediaUpload, NoteId};

/// Pause between checks on media that is still processing
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timing for the transfer loop
#[derive(Debug, Clone, Copy)]
pub struct TransferTiming {
    /// Pause after a successful upload before the next file
    pub pause: Duration,
    /// Bound for each download, upload and processing check
    pub request_timeout: Duration,
    /// Total wait for uploaded media to finish processing
    pub processing_timeout: Duration,
}

/// Transfer every attachment, returning destination media ids in the
/// original order. Failed files are skipped, so the result may be shorter
/// than `attachments` or empty.
pub async fn transfer_attachments(
    source: &dyn SourceFeed,
    destination: &dyn Destination,
    note_id: &NoteId,
    attachments: &[Attachment],
    timing: TransferTiming,
) -> Vec<String> {
    let mut media_ids = Vec::with_capacity(attachments.len());

    for (index, attachment) in attachments.iter().enumerate() {
        match transfer_one(source, destination, attachment, timing).await {
            Ok(media_id) => {
                debug!(
                    note_id = %note_id,
                    attachment = attachment.display_name(),
                    media_id = %media_id,
                    "Transferred attachment"
                );
                media_ids.push(media_id);

                if index + 1 < attachments.len() && !timing.pause.is_zero() {
                    sleep(timing.pause).await;
                }
            }
            Err(e) => {
                warn!(
                    note_id = %note_id,
                    attachment = attachment.display_name(),
                    error = %e,
                    "Skipping attachment"
                );
            }
        }
    }

    media_ids
}

async fn transfer_one(
    source: &dyn SourceFeed,
    destination: &dyn Destination,
    attachment: &Attachment,
    timing: TransferTiming,
) -> TransportResult<String> {
    let media = with_timeout(
        timing.request_timeout,
        "attachment download",
        source.download_attachment(attachment),
    )
    .await?;

    let upload = MediaUpload {
        bytes: media.bytes,
        filename: media.filename,
        content_type: media.content_type,
        description: attachment.comment.clone(),
    };

    let uploaded = with_timeout(
        timing.request_timeout,
        "media upload",
        destination.upload_media(upload),
    )
    .await?;

    if uploaded.processing {
        wait_until_processed(destination, &uploaded.id, timing).await?;
    }
    Ok(uploaded.id)
}

/// Poll `media_id` until the destination reports it ready
async fn wait_until_processed(
    destination: &dyn Destination,
    media_id: &str,
    timing: TransferTiming,
) -> TransportResult<()> {
    let deadline = Instant::now() + timing.processing_timeout;
    loop {
        let ready = with_timeout(
            timing.request_timeout,
            "media processing check",
            destination.media_ready(media_id),
        )
        .await?;
        if ready {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::Timeout(format!(
                "media {} still processing after {}s",
                media_id,
                timing.processing_timeout.as_secs_f32()
            )));
        }
        debug!(media_id, "Media still processing");
        sleep(PROCESSING_POLL_INTERVAL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockDestination, MockSource};
    use std::time::Instant;

    fn attachment(id: &str, comment: Option<&str>) -> Attachment {
        Attachment {
            id: id.to_string(),
            url: format!("https://cdn.example/{}.png", id),
            name: Some(format!("{}.png", id)),
            mime_type: Some("image/png".to_string()),
            comment: comment.map(str::to_string),
        }
    }

    fn timing() -> TransferTiming {
        TransferTiming {
            pause: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            processing_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_all_attachments_transferred_in_order() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new();
        let files = vec![attachment("f1", None), attachment("f2", None), attachment("f3", None)];

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;

        assert_eq!(ids, vec!["media-1", "media-2", "media-3"]);
        let uploads = destination.uploads();
        let names: Vec<_> = uploads.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["f1.png", "f2.png", "f3.png"]);
    }

    #[tokio::test]
    async fn test_failed_download_is_skipped() {
        let source = MockSource::new(vec![]).with_failing_download("f2");
        let destination = MockDestination::new();
        let files = vec![attachment("f1", None), attachment("f2", None), attachment("f3", None)];

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;

        assert_eq!(ids.len(), 2);
        let uploads = destination.uploads();
        assert_eq!(uploads[0].filename, "f1.png");
        assert_eq!(uploads[1].filename, "f3.png");
        assert_eq!(source.download_calls(), vec!["f1", "f2", "f3"]);
    }

    #[tokio::test]
    async fn test_failed_upload_is_skipped() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new().with_failing_upload("f1.png");
        let files = vec![attachment("f1", None), attachment("f2", None)];

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;

        assert_eq!(ids, vec!["media-1"]);
        assert_eq!(destination.uploads().len(), 1);
        assert_eq!(destination.uploads()[0].filename, "f2.png");
    }

    #[tokio::test]
    async fn test_all_failures_yield_empty() {
        let source = MockSource::new(vec![])
            .with_failing_download("f1")
            .with_failing_download("f2");
        let destination = MockDestination::new();
        let files = vec![attachment("f1", None), attachment("f2", None)];

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_description_carried_over() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new();
        let files = vec![attachment("f1", Some("a sleeping cat")), attachment("f2", None)];

        transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;

        let uploads = destination.uploads();
        assert_eq!(uploads[0].description.as_deref(), Some("a sleeping cat"));
        assert_eq!(uploads[1].description, None);
        assert_eq!(uploads[0].content_type, "image/png");
    }

    #[tokio::test]
    async fn test_pause_between_uploads() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new();
        let files = vec![attachment("f1", None), attachment("f2", None), attachment("f3", None)];
        let timing = TransferTiming {
            pause: Duration::from_millis(30),
            ..timing()
        };

        let started = Instant::now();
        transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing).await;

        // Two pauses: none after the last file
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_hung_download_times_out_and_is_skipped() {
        let source = MockSource::new(vec![]).with_download_delay(Duration::from_secs(5));
        let destination = MockDestination::new();
        let files = vec![attachment("f1", None)];
        let timing = TransferTiming {
            request_timeout: Duration::from_millis(20),
            ..timing()
        };

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing).await;
        assert!(ids.is_empty());
        assert!(destination.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_processing_media_waited_for() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new().with_processing_media(2);
        let files = vec![attachment("f1", None), attachment("f2", None)];

        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing()).await;

        assert_eq!(ids, vec!["media-1", "media-2"]);
        // Two pending answers then ready, for each file
        assert_eq!(destination.media_checks("media-1"), 3);
        assert_eq!(destination.media_checks("media-2"), 3);
    }

    #[tokio::test]
    async fn test_media_never_processed_is_skipped() {
        let source = MockSource::new(vec![]);
        let destination = MockDestination::new().with_processing_media(usize::MAX);
        let files = vec![attachment("f1", None)];
        let timing = TransferTiming {
            processing_timeout: Duration::from_millis(50),
            ..timing()
        };

        let started = Instant::now();
        let ids = transfer_attachments(&source, &destination, &NoteId::new("n1"), &files, timing).await;

        assert!(ids.is_empty());
        assert!(destination.media_checks("media-1") >= 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
