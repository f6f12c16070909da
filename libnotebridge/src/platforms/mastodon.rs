//! Mastodon destination adapter
//!
//! Uses the megalodon library, so any server that implements the Mastodon
//! client API (Mastodon, Pleroma, Akkoma, GoToSocial) works as a target.
//!
//! Media goes through `/api/v2/media`, which answers 202 with no URL for
//! files the server processes in the background. Readiness is checked with
//! a plain `GET /api/v1/media/:id`: megalodon's `get_media` expects a URL
//! and cannot represent media that is still processing.

use std::io::Cursor;

use async_trait::async_trait;
use megalodon::entities::{StatusVisibility, UploadMedia};
use megalodon::megalodon::{PostStatusInputOptions, PostStatusOutput, UploadMediaInputOptions};
use megalodon::{Megalodon, SNS};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::MastodonConfig;
use crate::error::{Result, TransportError};
use crate::platforms::{Destination, TransportResult};
use crate::types::{DestinationVisibility, MediaUpload, StatusRequest, UploadedMedia};

pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    http: reqwest::Client,
    /// The instance URL (e.g., "https://mastodon.social"), no trailing slash
    instance_url: String,
    token: SecretString,
}

impl MastodonClient {
    /// Create a new Mastodon client
    ///
    /// # Arguments
    ///
    /// * `instance_url` - Base URL of the instance (e.g., "https://mastodon.social")
    /// * `access_token` - OAuth access token with `write:statuses` and `write:media`
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let instance_url = instance_url.trim_end_matches('/').to_string();
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token.clone()),
            None,
        )
        .map_err(|e| {
            TransportError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("notebridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TransportError::Network(format!("Failed to build Mastodon HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            http,
            instance_url,
            token: SecretString::from(access_token),
        })
    }

    pub fn from_config(config: &MastodonConfig) -> Result<Self> {
        Self::new(config.instance.clone(), config.token.expose_secret().to_string())
    }
}

#[async_trait]
impl Destination for MastodonClient {
    async fn upload_media(&self, upload: MediaUpload) -> TransportResult<UploadedMedia> {
        // megalodon names the multipart part itself; the server sniffs the type
        debug!(
            filename = %upload.filename,
            content_type = %upload.content_type,
            size = upload.bytes.len(),
            "Uploading media"
        );
        let options = UploadMediaInputOptions {
            description: upload.description,
            focus: None,
        };
        let response = self
            .client
            .upload_media_reader(Box::new(Cursor::new(upload.bytes)), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        let uploaded = match response.json {
            UploadMedia::Attachment(attachment) => UploadedMedia::ready(attachment.id),
            UploadMedia::AsyncAttachment(attachment) => UploadedMedia::processing(attachment.id),
        };
        debug!(
            media_id = %uploaded.id,
            processing = uploaded.processing,
            "Uploaded media"
        );
        Ok(uploaded)
    }

    async fn media_ready(&self, media_id: &str) -> TransportResult<bool> {
        let context = "Mastodon media status";
        let response = self
            .http
            .get(format!("{}/api/v1/media/{}", self.instance_url, media_id))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(format!("{}: {}", context, e))
                } else {
                    TransportError::Network(format!("{}: {}", context, e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(media_processed(status));
        }
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        Err(TransportError::from_status(status.as_u16(), context, detail.trim()))
    }

    async fn create_status(&self, request: &StatusRequest) -> TransportResult<String> {
        let options = status_options(request);

        let response = self
            .client
            .post_status(request.text.clone(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let status_id = match response.json {
            PostStatusOutput::Status(status) => status.id,
            PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };
        Ok(status_id)
    }
}

/// 206 Partial Content means the server is still processing the file
fn media_processed(status: StatusCode) -> bool {
    status != StatusCode::PARTIAL_CONTENT
}

fn status_options(request: &StatusRequest) -> PostStatusInputOptions {
    PostStatusInputOptions {
        media_ids: (!request.media_ids.is_empty()).then(|| request.media_ids.clone()),
        spoiler_text: request.spoiler_text.clone(),
        visibility: Some(to_megalodon_visibility(request.visibility)),
        ..Default::default()
    }
}

fn to_megalodon_visibility(visibility: DestinationVisibility) -> StatusVisibility {
    match visibility {
        DestinationVisibility::Public => StatusVisibility::Public,
        DestinationVisibility::Unlisted => StatusVisibility::Unlisted,
        DestinationVisibility::Private => StatusVisibility::Private,
        DestinationVisibility::Direct => StatusVisibility::Direct,
    }
}

/// Map megalodon errors onto `TransportError`
///
/// megalodon does not expose the HTTP status as a field, so it is recovered
/// from the error text:
///
/// - 401/403 → `Authentication`
/// - 422 and other 4xx → `Rejected`
/// - 429 → `RateLimit`
/// - 5xx and anything unrecognized → `Network`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> TransportError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(status) => TransportError::from_status(status, &format!("Mastodon {}", context), &error_str),
        None => {
            if error_lower.contains("unauthorized") || error_lower.contains("forbidden") {
                TransportError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}. \
                        Suggestion: Verify the access token is valid and has not been revoked.",
                    context, error_str
                ))
            } else if error_lower.contains("timed out") || error_lower.contains("timeout") {
                TransportError::Timeout(format!("Mastodon {}: {}", context, error_str))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("deserialize")
            {
                TransportError::InvalidResponse(format!(
                    "Mastodon response parse error ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit") || error_lower.contains("too many requests") {
                TransportError::RateLimit(format!("Mastodon {}: {}", context, error_str))
            } else {
                TransportError::Network(format!("Mastodon error ({}): {}", context, error_str))
            }
        }
    }
}

/// Extract an HTTP status code from an error message.
///
/// Looks for "HTTP 401", "status 403", "code: 429", or a bare three digit
/// code followed by ':' or a space.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit());
        if !is_code {
            continue;
        }
        if let Some(code) = std::str::from_utf8(&window[..3]).ok().and_then(|s| s.parse::<u16>().ok()) {
            if (100..=599).contains(&code) {
                return Some(code);
            }
        }
    }

    None
}
