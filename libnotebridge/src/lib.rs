//! Notebridge - mirror a Misskey account's notes onto Mastodon
//!
//! This library holds everything the `notebridge-sync` binary needs:
//! configuration, the eligibility filter, attachment transfer, the
//! crossposter, cursor persistence and the polling engine.

pub mod config;
pub mod crosspost;
pub mod engine;
pub mod error;
pub mod filter;
pub mod logging;
pub mod platforms;
pub mod state;
pub mod transfer;
pub mod types;
pub mod visibility;

// Re-export commonly used types
pub use config::Config;
pub use crosspost::{CrosspostTiming, Crossposter};
pub use engine::{starting_cursor, BatchReport, EngineSettings, EngineState, StopHandle, SyncEngine};
pub use error::{BridgeError, ConfigError, Result, StateError, TransportError};
pub use state::{CursorStore, FileCursorStore};
pub use types::{CrosspostOutcome, Note, NoteId};
