//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose stable, use-case-level functions to Dart via FRB.
//! - Own the process-wide `SpaceManager` behind the request/response boundary.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Return values are UTF-8 strings with stable meaning.

use crate::dispatch::{Dispatcher, Response};
use spacenote_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    EventLine, SpaceManager,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

static SPACE_MANAGER: OnceLock<SpaceManager> = OnceLock::new();

fn space_manager() -> &'static SpaceManager {
    SPACE_MANAGER.get_or_init(SpaceManager::with_defaults)
}

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Executes one Space operation.
///
/// `method` names the operation (`space.open`, `entry.create`, ...) and
/// `args_json` carries its camelCase arguments. The result is always a JSON
/// envelope `{"success", "data", "error": {"kind", "message"}}`.
///
/// # FFI contract
/// - Sync call, DB-backed execution; calls on one Space are serialized.
/// - Never panics; a caught panic is reported with kind `internal`.
#[flutter_rust_bridge::frb(sync)]
pub fn invoke(method: String, args_json: String) -> String {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        Dispatcher::new(space_manager()).dispatch(&method, &args_json)
    }));
    match outcome {
        Ok(response) => response.to_json(),
        Err(_) => {
            EventLine::error("ffi_invoke", "ffi")
                .field("method", &method)
                .field("error_kind", "internal")
                .emit();
            Response::failure("internal", "operation panicked").to_json()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{core_version, init_logging, invoke, ping};
    use serde_json::Value;

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    #[test]
    fn invoke_on_unopened_space_reports_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let args = serde_json::json!({ "path": dir.path().join("never-opened") }).to_string();
        let response: Value =
            serde_json::from_str(&invoke("entry.listTopLevel".to_string(), args)).unwrap();
        assert_eq!(response["success"], false);
        assert_eq!(response["error"]["kind"], "not_open");
    }
}
