//! Misskey source adapter
//!
//! Reads a user's notes through `POST /api/users/notes` and downloads drive
//! files over plain HTTP. Replies and the user's own renotes are already
//! filtered server side; the eligibility filter still checks both.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use crate::config::MisskeyConfig;
use crate::error::{Result, TransportError};
use crate::platforms::{SourceFeed, TransportResult};
use crate::types::{Attachment, DownloadedMedia, Note, NoteId};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Error bodies are echoed into logs; keep them short
const MAX_ERROR_BODY: usize = 200;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserNotesRequest<'a> {
    i: &'a str,
    user_id: &'a str,
    limit: u32,
    include_replies: bool,
    include_my_renotes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    since_id: Option<&'a str>,
}

pub struct MisskeyClient {
    http: reqwest::Client,
    /// The instance URL (e.g., "https://misskey.io"), no trailing slash
    instance_url: String,
    token: SecretString,
}

impl MisskeyClient {
    /// Create a client whose every request is bounded by `timeout`
    pub fn new(instance_url: String, token: SecretString, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("notebridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TransportError::Network(format!("Failed to build Misskey HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &MisskeyConfig, timeout: Duration) -> Result<Self> {
        Self::new(
            config.instance.clone(),
            SecretString::from(config.token.expose_secret().to_string()),
            timeout,
        )
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/{}", self.instance_url, name)
    }

    /// Drive files served from the instance itself may come back as relative paths
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.instance_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl SourceFeed for MisskeyClient {
    async fn fetch_user_notes(
        &self,
        user_id: &str,
        limit: u32,
        since_id: Option<&NoteId>,
    ) -> TransportResult<Vec<Note>> {
        let context = "Misskey users/notes";
        let body = UserNotesRequest {
            i: self.token.expose_secret(),
            user_id,
            limit,
            include_replies: false,
            include_my_renotes: false,
            since_id: since_id.map(NoteId::as_str),
        };

        let response = self
            .http
            .post(self.endpoint("users/notes"))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, context))?;
        let response = check_status(response, context).await?;

        let notes: Vec<Note> = response
            .json()
            .await
            .map_err(|e| map_reqwest_error(e, context))?;

        debug!(count = notes.len(), since_id = ?since_id.map(NoteId::as_str), "Fetched notes");
        Ok(notes)
    }

    async fn download_attachment(
        &self,
        attachment: &Attachment,
    ) -> TransportResult<DownloadedMedia> {
        let url = self.resolve_url(&attachment.url);
        let context = format!("Misskey download of {}", attachment.display_name());

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &context))?;
        let response = check_status(response, &context).await?;

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_type = pick_content_type(header_type.as_deref(), attachment.mime_type.as_deref());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, &context))?;

        Ok(DownloadedMedia {
            bytes: bytes.to_vec(),
            filename: attachment_filename(attachment, &url, &content_type),
            content_type,
        })
    }
}

async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> TransportResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(TransportError::from_status(status.as_u16(), context, detail.trim()))
}

fn map_reqwest_error(error: reqwest::Error, context: &str) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(format!("{}: {}", context, error))
    } else if error.is_decode() {
        TransportError::InvalidResponse(format!(
            "{}: {}. The instance returned an unexpected payload.",
            context, error
        ))
    } else if let Some(status) = error.status() {
        TransportError::from_status(status.as_u16(), context, &error.to_string())
    } else {
        TransportError::Network(format!("{}: {}", context, error))
    }
}

/// Response header first, then the type the drive declared
fn pick_content_type(header: Option<&str>, declared: Option<&str>) -> String {
    header
        .or(declared)
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

/// File name for the upload. The destination guesses media type from the
/// extension, so one is appended when the name lacks it.
fn attachment_filename(attachment: &Attachment, url: &str, content_type: &str) -> String {
    let from_url = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty() && !segment.contains(':'));

    let base = attachment
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or(from_url)
        .map(|name| name.replace(['/', '\\'], "_"))
        .unwrap_or_else(|| format!("attachment_{}", attachment.id));

    if base.contains('.') {
        return base;
    }
    match extension_for(content_type) {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let ext = match content_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/heic" => "heic",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/flac" => "flac",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MisskeyClient {
        MisskeyClient::new(
            "https://misskey.example/".to_string(),
            SecretString::from("token".to_string()),
            Duration::from_secs(10),
        )
        .expect("Failed to create client")
    }

    fn attachment(name: Option<&str>) -> Attachment {
        Attachment {
            id: "9file".to_string(),
            url: "https://cdn.example/files/abc".to_string(),
            name: name.map(str::to_string),
            mime_type: Some("image/png".to_string()),
            comment: None,
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(client().endpoint("users/notes"), "https://misskey.example/api/users/notes");
    }

    #[test]
    fn test_resolve_relative_url() {
        let client = client();
        assert_eq!(
            client.resolve_url("/files/webpublic-1.png"),
            "https://misskey.example/files/webpublic-1.png"
        );
        assert_eq!(
            client.resolve_url("https://cdn.example/a.png"),
            "https://cdn.example/a.png"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = UserNotesRequest {
            i: "tok",
            user_id: "9abc",
            limit: 20,
            include_replies: false,
            include_my_renotes: false,
            since_id: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["userId"], "9abc");
        assert_eq!(json["includeReplies"], false);
        assert_eq!(json["includeMyRenotes"], false);
        assert!(json.get("sinceId").is_none());

        let body = UserNotesRequest {
            since_id: Some("9kq2"),
            ..body
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["sinceId"], "9kq2");
    }

    #[test]
    fn test_content_type_prefers_header() {
        assert_eq!(pick_content_type(Some("image/jpeg; q=1"), Some("image/png")), "image/jpeg");
        assert_eq!(pick_content_type(None, Some("image/png")), "image/png");
        assert_eq!(pick_content_type(None, None), FALLBACK_CONTENT_TYPE);
        assert_eq!(pick_content_type(Some(""), None), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn test_filename_uses_drive_name() {
        let name = attachment_filename(&attachment(Some("cat.png")), "https://cdn.example/x", "image/png");
        assert_eq!(name, "cat.png");
    }

    #[test]
    fn test_filename_appends_extension() {
        let name = attachment_filename(&attachment(Some("cat")), "https://cdn.example/x", "image/webp");
        assert_eq!(name, "cat.webp");
    }

    #[test]
    fn test_filename_from_url_segment() {
        let name = attachment_filename(
            &attachment(None),
            "https://cdn.example/files/photo.jpg?sensitive=true",
            "image/jpeg",
        );
        assert_eq!(name, "photo.jpg");
    }

    #[test]
    fn test_filename_falls_back_to_id() {
        let name = attachment_filename(&attachment(None), "https://cdn.example/", "video/mp4");
        assert_eq!(name, "attachment_9file.mp4");
    }

    #[test]
    fn test_filename_strips_path_separators() {
        let name = attachment_filename(&attachment(Some("../../etc/passwd")), "https://cdn.example/x", "text/plain");
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_unknown_content_type_has_no_extension() {
        assert_eq!(extension_for("application/x-unknown"), None);
        assert_eq!(extension_for("IMAGE/PNG"), Some("png"));
    }
}
