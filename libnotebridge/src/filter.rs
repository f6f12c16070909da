//! Crosspost eligibility
//!
//! Only the author's own top-level notes are mirrored. The checks are
//! conservative: wrongly skipping a note is acceptable, leaking a reply or
//! a mention to the destination is not.

use std::fmt;

use crate::types::Note;

/// Why a note was not crossposted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Reply,
    /// Renotes and quote renotes both carry a renote target
    Renote,
    Mentions,
    /// `@` in the body; catches handles that were not parsed as mentions
    AtSign,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Exclusion::Reply => "note is a reply",
            Exclusion::Renote => "note is a renote or quote",
            Exclusion::Mentions => "note mentions other users",
            Exclusion::AtSign => "note text contains '@'",
        };
        f.write_str(reason)
    }
}

/// First rule the note fails, or `None` if it may be crossposted
pub fn exclusion(note: &Note) -> Option<Exclusion> {
    if note.reply_id.is_some() {
        return Some(Exclusion::Reply);
    }
    if note.renote_id.is_some() {
        return Some(Exclusion::Renote);
    }
    if !note.mentions.is_empty() {
        return Some(Exclusion::Mentions);
    }
    // Also matches e-mail addresses and decorative '@'
    if note.text().contains('@') {
        return Some(Exclusion::AtSign);
    }
    None
}

pub fn is_eligible(note: &Note) -> bool {
    exclusion(note).is_none()
}
