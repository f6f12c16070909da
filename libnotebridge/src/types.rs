//! Core types for Notebridge

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Misskey note identifier.
///
/// Misskey ids (aid, aidx, meid, ulid, objectid) encode creation time and
/// are fixed width for a given instance, so ordering by length and then
/// bytewise matches arrival order. A longer id sorts after a shorter one,
/// which also holds when an instance migrates from aid to aidx.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for NoteId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl PartialOrd for NoteId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Misskey note visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceVisibility {
    #[default]
    Public,
    /// Shown on the author's profile but kept off the public timelines
    Home,
    Followers,
    /// Only the users listed in `visibleUserIds`
    Specified,
    #[serde(other)]
    Unknown,
}

/// Mastodon status visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationVisibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl DestinationVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for DestinationVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A drive file attached to a note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub url: String,
    /// Original file name as uploaded to the drive
    #[serde(default)]
    pub name: Option<String>,
    /// MIME type declared by the source instance
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    /// Alt text
    #[serde(default)]
    pub comment: Option<String>,
}

impl Attachment {
    /// Name used in log lines
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A note as returned by `users/notes`.
///
/// Only the fields the bridge acts on are kept; everything else in the
/// payload is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub cw: Option<String>,
    #[serde(default)]
    pub visibility: SourceVisibility,
    #[serde(default)]
    pub reply_id: Option<String>,
    #[serde(default)]
    pub renote_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub files: Vec<Attachment>,
}

impl Note {
    /// A bare public text note, mostly useful in tests
    pub fn new(id: impl Into<NoteId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Some(text.into()),
            cw: None,
            visibility: SourceVisibility::Public,
            reply_id: None,
            renote_id: None,
            mentions: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Raw bytes fetched from the source instance
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

/// Media upload request for the destination
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    pub description: Option<String>,
}

/// Media accepted by the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub id: String,
    /// Still being processed; cannot be attached to a status yet
    pub processing: bool,
}

impl UploadedMedia {
    pub fn ready(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            processing: false,
        }
    }

    pub fn processing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            processing: true,
        }
    }
}

/// Status creation request for the destination
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRequest {
    pub text: String,
    pub media_ids: Vec<String>,
    pub visibility: DestinationVisibility,
    pub spoiler_text: Option<String>,
}

/// Result of handing one note to the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum CrosspostOutcome {
    /// Excluded by the eligibility filter
    Skipped(crate::filter::Exclusion),
    /// Status created on the destination
    Succeeded { status_id: String },
    Failed { reason: String },
}

impl CrosspostOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}
