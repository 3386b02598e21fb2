//! Core domain logic for SpaceNote.
//! This crate is the single source of truth for Space storage invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod space;
pub mod text;

pub use db::migrations::{
    Migration, MigrationContext, MigrationProgress, MigrationReport, MigrationStatus, Migrator,
};
pub use db::{DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, logging_status, EventLine, EventStatus, LogConfig, LogLevel,
};
pub use model::note::{Note, NoteId, NoteKind, NoteSummary, NoteVariant};
pub use model::reference::{NoteReference, NoteReferences, ReferenceLink};
pub use model::setting::Setting;
pub use model::ValidationError;
pub use repo::note_repo::{CascadeReport, RepoError, RepoResult};
pub use service::entry_service::{EntryUpdate, NewEntry};
pub use space::{ErrorKind, Space, SpaceError, SpaceManager, SpaceResult, STORE_FILE_NAME};
pub use text::{DocumentTextExtractor, TextExtractor};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
