//! JSON request/response dispatcher over the Space Manager.
//!
//! # Responsibility
//! - Map `(method, args_json)` pairs 1:1 onto Space Manager operations.
//! - Translate core types into camelCase response DTOs.
//!
//! # Invariants
//! - Every call yields exactly one envelope; failures never escape as panics
//!   or Rust errors.
//! - Argument payloads are never logged.

use log::Level;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use spacenote_core::{
    CascadeReport, EntryUpdate, MigrationStatus, NewEntry, Note, NoteReference, NoteReferences,
    EventLine, NoteSummary, ReferenceLink, SpaceError, SpaceManager,
};
use uuid::Uuid;

/// Error kind for malformed argument payloads.
pub const INVALID_ARGUMENT: &str = "invalid_argument";
/// Error kind for method names the dispatcher does not route.
pub const UNKNOWN_METHOD: &str = "unknown_method";

/// Response envelope returned for every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    pub data: Value,
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl Response {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    /// Serializes the envelope; falls back to a fixed failure payload.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            json!({
                "success": false,
                "data": null,
                "error": { "kind": "internal", "message": err.to_string() },
            })
            .to_string()
        })
    }
}

/// Dispatch-level failure before it is folded into an envelope.
enum CallError {
    InvalidArgument(String),
    UnknownMethod(String),
    Space(SpaceError),
}

impl From<SpaceError> for CallError {
    fn from(value: SpaceError) -> Self {
        Self::Space(value)
    }
}

type CallResult = Result<Value, CallError>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntryArgs {
    path: String,
    content_json: String,
    #[serde(default)]
    parent_id: Option<Uuid>,
    #[serde(default)]
    started_at: Option<i64>,
    #[serde(default)]
    ended_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteIdArgs {
    path: String,
    id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    path: String,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    limit: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListChildrenArgs {
    path: String,
    parent_id: Uuid,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    limit: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEntryArgs {
    path: String,
    id: Uuid,
    content_json: String,
    #[serde(default)]
    started_at: Option<i64>,
    /// Absent keeps, `null` clears, a number sets.
    #[serde(default, deserialize_with = "present_or_null")]
    ended_at: Option<Option<i64>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePageArgs {
    path: String,
    title: String,
    content_json: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePageArgs {
    path: String,
    id: Uuid,
    title: String,
    content_json: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingGetArgs {
    path: String,
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingSetArgs {
    path: String,
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceArgs {
    path: String,
    source_id: Uuid,
    target_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceListArgs {
    path: String,
    note_id: Uuid,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteDto {
    id: Uuid,
    kind: &'static str,
    title: Option<String>,
    content_json: String,
    content_text: Option<String>,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    parent_id: Option<Uuid>,
}

impl From<Note> for NoteDto {
    fn from(note: Note) -> Self {
        Self {
            id: note.id,
            kind: note.kind().as_db_str(),
            started_at: note.started_at(),
            ended_at: note.ended_at(),
            parent_id: note.parent_id(),
            title: note.title,
            content_json: note.content_json,
            content_text: note.content_text,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceDto {
    id: Uuid,
    source_id: Uuid,
    target_id: Uuid,
    created_at: i64,
}

impl From<NoteReference> for ReferenceDto {
    fn from(reference: NoteReference) -> Self {
        Self {
            id: reference.id,
            source_id: reference.source_id,
            target_id: reference.target_id,
            created_at: reference.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDto {
    id: Uuid,
    title: Option<String>,
    preview: Option<String>,
    kind: &'static str,
}

impl From<NoteSummary> for SummaryDto {
    fn from(summary: NoteSummary) -> Self {
        Self {
            id: summary.id,
            kind: summary.kind.as_db_str(),
            title: summary.title,
            preview: summary.preview,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkDto {
    reference: ReferenceDto,
    note: SummaryDto,
}

impl From<ReferenceLink> for LinkDto {
    fn from(link: ReferenceLink) -> Self {
        Self {
            reference: link.reference.into(),
            note: link.note.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReferencesDto {
    outbound: Vec<LinkDto>,
    inbound: Vec<LinkDto>,
}

impl From<NoteReferences> for ReferencesDto {
    fn from(references: NoteReferences) -> Self {
        Self {
            outbound: references.outbound.into_iter().map(Into::into).collect(),
            inbound: references.inbound.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrationDto {
    id: u32,
    name: &'static str,
    applied_at: Option<i64>,
}

impl From<MigrationStatus> for MigrationDto {
    fn from(status: MigrationStatus) -> Self {
        Self {
            id: status.id,
            name: status.name,
            applied_at: status.applied_at,
        }
    }
}

fn cascade_json(report: CascadeReport) -> Value {
    json!({
        "commentsDeleted": report.comments_deleted,
        "referencesDeleted": report.references_deleted,
    })
}

fn to_value<T: Serialize>(value: T) -> CallResult {
    serde_json::to_value(value)
        .map_err(|err| CallError::InvalidArgument(format!("response encoding failed: {err}")))
}

fn notes_value(notes: Vec<Note>) -> CallResult {
    to_value(notes.into_iter().map(NoteDto::from).collect::<Vec<_>>())
}

fn parse_args<T: DeserializeOwned>(args_json: &str) -> Result<T, CallError> {
    let raw = if args_json.trim().is_empty() {
        "{}"
    } else {
        args_json
    };
    serde_json::from_str(raw).map_err(|err| CallError::InvalidArgument(err.to_string()))
}

/// Routes boundary calls to one `SpaceManager`.
pub struct Dispatcher<'m> {
    manager: &'m SpaceManager,
}

impl<'m> Dispatcher<'m> {
    pub fn new(manager: &'m SpaceManager) -> Self {
        Self { manager }
    }

    /// Executes one call and wraps the outcome in an envelope.
    pub fn dispatch(&self, method: &str, args_json: &str) -> Response {
        match self.route(method, args_json) {
            Ok(data) => {
                EventLine::ok("ffi_invoke", "ffi")
                    .field("method", method)
                    .at(Level::Debug)
                    .emit();
                Response::ok(data)
            }
            Err(CallError::Space(err)) => {
                invoke_failure(method, err.kind().as_str()).emit();
                Response::failure(err.kind().as_str(), err.to_string())
            }
            Err(CallError::InvalidArgument(message)) => {
                invoke_failure(method, INVALID_ARGUMENT).emit();
                Response::failure(INVALID_ARGUMENT, message)
            }
            Err(CallError::UnknownMethod(name)) => {
                EventLine::error("ffi_invoke", "ffi")
                    .field("error_kind", UNKNOWN_METHOD)
                    .at(Level::Warn)
                    .emit();
                Response::failure(UNKNOWN_METHOD, format!("unknown method `{name}`"))
            }
        }
    }

    fn route(&self, method: &str, args_json: &str) -> CallResult {
        let manager = self.manager;
        match method {
            "space.create" => {
                let args: PathArgs = parse_args(args_json)?;
                let report = manager.create(&args.path)?;
                Ok(json!({ "applied": report.applied }))
            }
            "space.open" => {
                let args: PathArgs = parse_args(args_json)?;
                let mut applied = Vec::new();
                let space = manager.open_with_progress(&args.path, &mut |step| {
                    applied.push(step.id)
                })?;
                Ok(json!({
                    "path": space.path().display().to_string(),
                    "applied": applied,
                }))
            }
            "space.close" => {
                let args: PathArgs = parse_args(args_json)?;
                manager.close(&args.path)?;
                Ok(Value::Null)
            }
            "space.migrations" => {
                let args: PathArgs = parse_args(args_json)?;
                let status = manager.migration_status(&args.path)?;
                to_value(status.into_iter().map(MigrationDto::from).collect::<Vec<_>>())
            }
            "entry.create" => {
                let args: CreateEntryArgs = parse_args(args_json)?;
                let entry = NewEntry {
                    content_json: args.content_json,
                    parent_id: args.parent_id,
                    started_at: args.started_at,
                    ended_at: args.ended_at,
                };
                to_value(NoteDto::from(manager.create_entry(&args.path, &entry)?))
            }
            "entry.get" => {
                let args: NoteIdArgs = parse_args(args_json)?;
                to_value(NoteDto::from(manager.get_entry(&args.path, args.id)?))
            }
            "entry.listTopLevel" => {
                let args: ListArgs = parse_args(args_json)?;
                notes_value(manager.get_top_level_entries(&args.path, args.offset, args.limit)?)
            }
            "entry.listChildren" => {
                let args: ListChildrenArgs = parse_args(args_json)?;
                notes_value(manager.get_child_entries(
                    &args.path,
                    args.parent_id,
                    args.offset,
                    args.limit,
                )?)
            }
            "entry.update" => {
                let args: UpdateEntryArgs = parse_args(args_json)?;
                let update = EntryUpdate {
                    content_json: args.content_json,
                    started_at: args.started_at,
                    ended_at: args.ended_at,
                };
                to_value(NoteDto::from(manager.update_entry(&args.path, args.id, &update)?))
            }
            "entry.delete" => {
                let args: NoteIdArgs = parse_args(args_json)?;
                Ok(cascade_json(manager.delete_entry(&args.path, args.id)?))
            }
            "page.create" => {
                let args: CreatePageArgs = parse_args(args_json)?;
                to_value(NoteDto::from(manager.create_page(
                    &args.path,
                    &args.title,
                    &args.content_json,
                )?))
            }
            "page.update" => {
                let args: UpdatePageArgs = parse_args(args_json)?;
                to_value(NoteDto::from(manager.update_page(
                    &args.path,
                    args.id,
                    &args.title,
                    &args.content_json,
                )?))
            }
            "page.list" => {
                let args: ListArgs = parse_args(args_json)?;
                notes_value(manager.list_pages(&args.path, args.offset, args.limit)?)
            }
            "page.delete" => {
                let args: NoteIdArgs = parse_args(args_json)?;
                Ok(cascade_json(manager.delete_page(&args.path, args.id)?))
            }
            "setting.get" => {
                let args: SettingGetArgs = parse_args(args_json)?;
                Ok(match manager.get_setting(&args.path, &args.key)? {
                    Some(setting) => json!({ "key": setting.key, "value": setting.value }),
                    None => Value::Null,
                })
            }
            "setting.set" => {
                let args: SettingSetArgs = parse_args(args_json)?;
                manager.set_setting(&args.path, &args.key, args.value.as_deref())?;
                Ok(Value::Null)
            }
            "reference.add" => {
                let args: ReferenceArgs = parse_args(args_json)?;
                to_value(ReferenceDto::from(manager.add_reference(
                    &args.path,
                    args.source_id,
                    args.target_id,
                )?))
            }
            "reference.addIfNotExists" => {
                let args: ReferenceArgs = parse_args(args_json)?;
                to_value(ReferenceDto::from(manager.add_reference_if_not_exists(
                    &args.path,
                    args.source_id,
                    args.target_id,
                )?))
            }
            "reference.list" => {
                let args: ReferenceListArgs = parse_args(args_json)?;
                to_value(ReferencesDto::from(
                    manager.get_references(&args.path, args.note_id)?,
                ))
            }
            "reference.remove" => {
                let args: ReferenceArgs = parse_args(args_json)?;
                let removed = manager.remove_reference(&args.path, args.source_id, args.target_id)?;
                Ok(json!({ "removed": removed }))
            }
            other => Err(CallError::UnknownMethod(other.to_string())),
        }
    }
}

fn invoke_failure(method: &str, kind: &str) -> EventLine {
    EventLine::error("ffi_invoke", "ffi")
        .field("method", method)
        .field("error_kind", kind)
        .at(Level::Warn)
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, Response, INVALID_ARGUMENT, UNKNOWN_METHOD};
    use serde_json::{json, Value};
    use spacenote_core::SpaceManager;

    const DOC: &str = r#"{"type":"doc","content":[{"type":"text","text":"hi"}]}"#;

    fn call(dispatcher: &Dispatcher<'_>, method: &str, args: Value) -> Response {
        dispatcher.dispatch(method, &args.to_string())
    }

    fn ok(dispatcher: &Dispatcher<'_>, method: &str, args: Value) -> Value {
        let response = call(dispatcher, method, args);
        assert!(response.success, "{method}: {:?}", response.error);
        response.data
    }

    fn error_kind(response: &Response) -> &str {
        response
            .error
            .as_ref()
            .map(|error| error.kind.as_str())
            .unwrap_or("")
    }

    #[test]
    fn entry_lifecycle_round_trips_through_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space").display().to_string();
        let manager = SpaceManager::with_defaults();
        let dispatcher = Dispatcher::new(&manager);

        let created = ok(&dispatcher, "space.create", json!({ "path": path }));
        assert_eq!(created["applied"], json!([1, 2, 3, 4, 5]));
        let opened = ok(&dispatcher, "space.open", json!({ "path": path }));
        assert_eq!(opened["applied"], json!([]));

        let entry = ok(
            &dispatcher,
            "entry.create",
            json!({ "path": path, "contentJson": DOC, "startedAt": 1000, "endedAt": 2000 }),
        );
        assert_eq!(entry["kind"], "log");
        assert_eq!(entry["contentText"], "hi");
        let id = entry["id"].as_str().unwrap().to_string();

        let kept = ok(
            &dispatcher,
            "entry.update",
            json!({ "path": path, "id": id, "contentJson": DOC }),
        );
        assert_eq!(kept["endedAt"], 2000);

        let cleared = ok(
            &dispatcher,
            "entry.update",
            json!({ "path": path, "id": id, "contentJson": DOC, "endedAt": null }),
        );
        assert_eq!(cleared["endedAt"], Value::Null);

        let listed = ok(&dispatcher, "entry.listTopLevel", json!({ "path": path }));
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let deleted = ok(&dispatcher, "entry.delete", json!({ "path": path, "id": id }));
        assert_eq!(deleted["commentsDeleted"], 0);

        ok(&dispatcher, "space.close", json!({ "path": path }));
        let response = call(&dispatcher, "entry.listTopLevel", json!({ "path": path }));
        assert!(!response.success);
        assert_eq!(error_kind(&response), "not_open");
        assert_eq!(response.data, Value::Null);
    }

    #[test]
    fn references_and_settings_are_routed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space").display().to_string();
        let manager = SpaceManager::with_defaults();
        let dispatcher = Dispatcher::new(&manager);
        ok(&dispatcher, "space.create", json!({ "path": path }));
        ok(&dispatcher, "space.open", json!({ "path": path }));

        let a = ok(&dispatcher, "entry.create", json!({ "path": path, "contentJson": DOC }));
        let page = ok(
            &dispatcher,
            "page.create",
            json!({ "path": path, "title": "Bob", "contentJson": DOC }),
        );
        let edge = json!({ "path": path, "sourceId": a["id"], "targetId": page["id"] });

        ok(&dispatcher, "reference.addIfNotExists", edge.clone());
        ok(&dispatcher, "reference.addIfNotExists", edge.clone());
        let duplicate = call(&dispatcher, "reference.add", edge.clone());
        assert_eq!(error_kind(&duplicate), "conflict");

        let refs = ok(
            &dispatcher,
            "reference.list",
            json!({ "path": path, "noteId": a["id"] }),
        );
        assert_eq!(refs["outbound"][0]["note"]["title"], "Bob");
        assert_eq!(refs["outbound"][0]["note"]["kind"], "page");

        let removed = ok(&dispatcher, "reference.remove", edge);
        assert_eq!(removed["removed"], true);

        assert_eq!(
            ok(&dispatcher, "setting.get", json!({ "path": path, "key": "theme" })),
            Value::Null
        );
        ok(
            &dispatcher,
            "setting.set",
            json!({ "path": path, "key": "theme", "value": "dark" }),
        );
        let setting = ok(&dispatcher, "setting.get", json!({ "path": path, "key": "theme" }));
        assert_eq!(setting["value"], "dark");

        let migrations = ok(&dispatcher, "space.migrations", json!({ "path": path }));
        assert_eq!(migrations.as_array().unwrap().len(), 5);
        assert!(migrations[0]["appliedAt"].is_i64());
    }

    #[test]
    fn malformed_calls_return_failure_envelopes() {
        let manager = SpaceManager::with_defaults();
        let dispatcher = Dispatcher::new(&manager);

        let response = dispatcher.dispatch("entry.create", "{not json");
        assert_eq!(error_kind(&response), INVALID_ARGUMENT);

        let response = dispatcher.dispatch("entry.get", r#"{"path":"/tmp/x","id":"nope"}"#);
        assert_eq!(error_kind(&response), INVALID_ARGUMENT);

        let response = dispatcher.dispatch("note.fly", "{}");
        assert_eq!(error_kind(&response), UNKNOWN_METHOD);

        let encoded: Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(encoded["success"], false);
        assert_eq!(encoded["data"], Value::Null);
        assert_eq!(encoded["error"]["kind"], UNKNOWN_METHOD);
    }
}
