//! Core use-case services.
//!
//! # Responsibility
//! - Turn caller input into validated note records before any write.
//! - Keep the Space handle and boundary layers free of storage details.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Writes read the stored row back so callers see persisted values.

pub mod entry_service;
pub mod page_service;
pub mod reference_service;
