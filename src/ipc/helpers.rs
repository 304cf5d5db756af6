use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Serializes a computed result; a failure here is `internal`.
pub fn to_result<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

/// Maps a rusqlite error onto a protocol code.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

/// Wraps a handler result into a response line, logging failures.
pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::warn!(method = %req.method, id = %req.id, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_library", "open a library first"))
}

pub fn require_user(state: &AppState) -> Result<&str, HandlerErr> {
    state
        .user
        .as_deref()
        .ok_or_else(|| HandlerErr::new("unauthorized", "sign in first"))
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Missing, null and blank all read as `None`.
pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn opt_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn string_array(v: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of strings", key)))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array of strings", key)))
        })
        .collect()
}

pub fn patch_obj<'a>(params: &'a Value) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "editor" => Some(Self::Editor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    pub fn can_edit(self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }
}

/// The user's role in a workspace; the recorded owner always counts as owner.
pub fn workspace_role(
    conn: &Connection,
    workspace_id: &str,
    user: &str,
) -> Result<Option<Role>, HandlerErr> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT owner FROM workspaces WHERE id = ?",
            [workspace_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some(owner) = owner else {
        return Err(HandlerErr::not_found("workspace not found"));
    };
    if owner == user {
        return Ok(Some(Role::Owner));
    }
    let role: Option<String> = conn
        .query_row(
            "SELECT member_role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
            (workspace_id, user),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    Ok(role.as_deref().and_then(Role::parse))
}

pub struct SubjectAccess {
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
}

pub fn subject_access(conn: &Connection, subject_id: &str) -> Result<SubjectAccess, HandlerErr> {
    conn.query_row(
        "SELECT user_id, workspace_id FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(SubjectAccess {
                user_id: r.get(0)?,
                workspace_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("subject not found"))
}

fn check_subject(
    conn: &Connection,
    user: Option<&str>,
    subject_id: &str,
    allowed: fn(Role) -> bool,
) -> Result<SubjectAccess, HandlerErr> {
    let access = subject_access(conn, subject_id)?;
    let Some(user) = user else {
        return Ok(access);
    };
    if access.user_id.as_deref() == Some(user) {
        return Ok(access);
    }
    if let Some(ws) = access.workspace_id.as_deref() {
        if let Some(role) = workspace_role(conn, ws, user)? {
            if allowed(role) {
                return Ok(access);
            }
        }
    }
    Err(HandlerErr::forbidden("no access to this subject"))
}

/// Owner of the subject, or owner/editor of its workspace.
pub fn ensure_subject_editable(
    conn: &Connection,
    user: Option<&str>,
    subject_id: &str,
) -> Result<SubjectAccess, HandlerErr> {
    check_subject(conn, user, subject_id, Role::can_edit)
}

/// Owner of the subject, or any member of its workspace.
pub fn ensure_subject_visible(
    conn: &Connection,
    user: Option<&str>,
    subject_id: &str,
) -> Result<SubjectAccess, HandlerErr> {
    check_subject(conn, user, subject_id, |_| true)
}

pub struct DocumentAccess {
    pub subject_id: String,
    pub user_id: Option<String>,
}

pub fn document_access(conn: &Connection, document_id: &str) -> Result<DocumentAccess, HandlerErr> {
    conn.query_row(
        "SELECT subject_id, user_id FROM documents WHERE id = ?",
        [document_id],
        |r| {
            Ok(DocumentAccess {
                subject_id: r.get(0)?,
                user_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("document not found"))
}

fn check_document(
    conn: &Connection,
    user: Option<&str>,
    document_id: &str,
    editable: bool,
) -> Result<DocumentAccess, HandlerErr> {
    let access = document_access(conn, document_id)?;
    if user.is_none() || access.user_id.as_deref() == user {
        return Ok(access);
    }
    if editable {
        ensure_subject_editable(conn, user, &access.subject_id)?;
    } else {
        ensure_subject_visible(conn, user, &access.subject_id)?;
    }
    Ok(access)
}

pub fn ensure_document_editable(
    conn: &Connection,
    user: Option<&str>,
    document_id: &str,
) -> Result<DocumentAccess, HandlerErr> {
    check_document(conn, user, document_id, true)
}

pub fn ensure_document_visible(
    conn: &Connection,
    user: Option<&str>,
    document_id: &str,
) -> Result<DocumentAccess, HandlerErr> {
    check_document(conn, user, document_id, false)
}

/// Deserializes a JSON text column, falling back to `fallback` when absent
/// or malformed.
pub fn json_column(raw: Option<String>, fallback: Value) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_parsers_treat_null_and_blank_as_absent() {
        let p = json!({ "a": null, "b": "  ", "c": " x ", "d": 3 });
        assert_eq!(opt_str(&p, "a").expect("a"), None);
        assert_eq!(opt_str(&p, "b").expect("b"), None);
        assert_eq!(opt_str(&p, "c").expect("c"), Some("x".to_string()));
        assert!(opt_str(&p, "d").is_err());
        assert_eq!(opt_i64(&p, "d").expect("d"), Some(3));
        assert_eq!(opt_i64(&p, "zz").expect("zz"), None);
    }

    #[test]
    fn required_str_rejects_blank() {
        let p = json!({ "name": "   " });
        let e = required_str(&p, "name").expect_err("blank");
        assert_eq!(e.code, "bad_params");
        assert_eq!(e.message, "missing name");
    }

    #[test]
    fn roles_parse_and_gate_edits() {
        assert_eq!(Role::parse("editor"), Some(Role::Editor));
        assert_eq!(Role::parse("admin"), None);
        assert!(Role::Owner.can_edit());
        assert!(!Role::Viewer.can_edit());
    }

    #[test]
    fn unserializable_results_map_to_internal() {
        let mut keyed = std::collections::BTreeMap::new();
        keyed.insert((1, 2), "cell");
        let e = to_result(&keyed).expect_err("tuple keys");
        assert_eq!(e.code, "internal");
        assert_eq!(to_result(&vec![1, 2]).expect("vec"), json!([1, 2]));
    }
}
