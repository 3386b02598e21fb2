//! Flutter-facing boundary for SpaceNote.

pub mod api;
pub mod dispatch;
