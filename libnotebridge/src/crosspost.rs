//! Crossposting a single note
//!
//! [`Crossposter`] turns one eligible note into one destination status:
//! attachments first, then the status itself. Nothing here returns an
//! error; every failure is folded into the [`CrosspostOutcome`] so one bad
//! note never stops the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::platforms::{with_timeout, Destination, SourceFeed};
use crate::transfer::{transfer_attachments, TransferTiming};
use crate::types::{CrosspostOutcome, Note, StatusRequest};
use crate::visibility::map_visibility;

/// Pauses that keep the bridge under the destination's rate limits
#[derive(Debug, Clone, Copy)]
pub struct CrosspostTiming {
    /// After every note, whether it succeeded or not
    pub post_delay: Duration,
    /// After every successful attachment upload
    pub attachment_delay: Duration,
    /// Bound for each network call
    pub request_timeout: Duration,
    /// Total wait for uploaded media to finish processing
    pub media_processing_timeout: Duration,
}

#[derive(Clone)]
pub struct Crossposter {
    source: Arc<dyn SourceFeed>,
    destination: Arc<dyn Destination>,
    timing: CrosspostTiming,
}

impl Crossposter {
    pub fn new(
        source: Arc<dyn SourceFeed>,
        destination: Arc<dyn Destination>,
        timing: CrosspostTiming,
    ) -> Self {
        Self {
            source,
            destination,
            timing,
        }
    }

    /// Build the status for `note`, transferring its attachments first
    pub async fn prepare(&self, note: &Note) -> StatusRequest {
        let media_ids = if note.files.is_empty() {
            Vec::new()
        } else {
            transfer_attachments(
                self.source.as_ref(),
                self.destination.as_ref(),
                &note.id,
                &note.files,
                TransferTiming {
                    pause: self.timing.attachment_delay,
                    request_timeout: self.timing.request_timeout,
                    processing_timeout: self.timing.media_processing_timeout,
                },
            )
            .await
        };

        StatusRequest {
            text: note.text().to_string(),
            media_ids,
            visibility: map_visibility(note.visibility),
            spoiler_text: note.cw.clone(),
        }
    }

    /// Mirror one note that already passed the eligibility filter
    pub async fn crosspost(&self, note: &Note) -> CrosspostOutcome {
        let request = self.prepare(note).await;

        if request.media_ids.len() < note.files.len() {
            info!(
                note_id = %note.id,
                transferred = request.media_ids.len(),
                attachments = note.files.len(),
                "Posting with a subset of attachments"
            );
        }

        let result = with_timeout(
            self.timing.request_timeout,
            "status creation",
            self.destination.create_status(&request),
        )
        .await;

        let outcome = match result {
            Ok(status_id) => {
                info!(
                    note_id = %note.id,
                    status_id = %status_id,
                    visibility = %request.visibility,
                    media = request.media_ids.len(),
                    "Crossposted note"
                );
                CrosspostOutcome::Succeeded { status_id }
            }
            Err(e) => {
                error!(note_id = %note.id, error = %e, "Failed to crosspost note");
                CrosspostOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if !self.timing.post_delay.is_zero() {
            sleep(self.timing.post_delay).await;
        }

        outcome
    }
}
