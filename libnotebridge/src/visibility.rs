//! Misskey to Mastodon visibility mapping

use crate::types::{DestinationVisibility, SourceVisibility};

/// Map a note's visibility onto the closest Mastodon equivalent.
///
/// Values this build does not know about map to public rather than
/// failing the note.
pub fn map_visibility(source: SourceVisibility) -> DestinationVisibility {
    match source {
        SourceVisibility::Public => DestinationVisibility::Public,
        SourceVisibility::Followers => DestinationVisibility::Private,
        SourceVisibility::Specified => DestinationVisibility::Direct,
        SourceVisibility::Home => DestinationVisibility::Unlisted,
        SourceVisibility::Unknown => DestinationVisibility::Public,
    }
}
