use super::documents::{delete_document_rows, remove_document_files};
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_subject_editable, new_id, opt_str, patch_obj, required_str, respond,
    workspace_role, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const SUBJECT_COLUMNS: &str = "id, name, describes, semester, user_id, workspace_id, created_at";

fn subject_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "describes": r.get::<_, Option<String>>(2)?,
        "semester": r.get::<_, Option<String>>(3)?,
        "userId": r.get::<_, Option<String>>(4)?,
        "workspaceId": r.get::<_, Option<String>>(5)?,
        "createdAt": r.get::<_, String>(6)?,
    }))
}

pub(super) fn load_subject(conn: &Connection, subject_id: &str) -> HandlerResult {
    conn.query_row(
        &format!("SELECT {} FROM subjects WHERE id = ?", SUBJECT_COLUMNS),
        [subject_id],
        subject_json,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("subject not found"))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let workspace_id = opt_str(&req.params, "workspaceId")?;

    let rows = if let Some(ws) = workspace_id {
        if let Some(user) = state.user.as_deref() {
            if workspace_role(conn, &ws, user)?.is_none() {
                return Err(HandlerErr::forbidden("not a member of this workspace"));
            }
        }
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM subjects WHERE workspace_id = ? ORDER BY name, created_at",
                SUBJECT_COLUMNS
            ))
            .map_err(db_err("db_query_failed"))?;
        let rows = stmt
            .query_map([&ws], subject_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        rows
    } else {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM subjects WHERE (?1 IS NULL OR user_id = ?1) ORDER BY name, created_at",
                SUBJECT_COLUMNS
            ))
            .map_err(db_err("db_query_failed"))?;
        let rows = stmt
            .query_map([state.user.as_deref()], subject_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        rows
    };
    Ok(json!({ "subjects": rows }))
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let name = required_str(&req.params, "name")?;
    let describes = opt_str(&req.params, "describes")?;
    let semester = opt_str(&req.params, "semester")?;
    let workspace_id = opt_str(&req.params, "workspaceId")?;
    if let Some(ws) = workspace_id.as_deref() {
        match state.user.as_deref() {
            Some(user) => {
                let role = workspace_role(conn, ws, user)?;
                if !role.map(|r| r.can_edit()).unwrap_or(false) {
                    return Err(HandlerErr::forbidden(
                        "owner or editor role required to add subjects to this workspace",
                    ));
                }
            }
            // Anonymous callers still need the workspace to exist.
            None => {
                let exists: Option<String> = conn
                    .query_row("SELECT id FROM workspaces WHERE id = ?", [ws], |r| r.get(0))
                    .optional()
                    .map_err(db_err("db_query_failed"))?;
                if exists.is_none() {
                    return Err(HandlerErr::not_found("workspace not found"));
                }
            }
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, name, describes, semester, user_id, workspace_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &describes,
            &semester,
            state.user.as_deref(),
            &workspace_id,
            db::now_ts(),
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    load_subject(conn, &id)
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    ensure_subject_editable(conn, state.user.as_deref(), &subject_id)?;
    let patch = patch_obj(&req.params)?;
    let patch_value = &req.params["patch"];

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Option<String>> = Vec::new();
    for (key, column) in [
        ("name", "name"),
        ("describes", "describes"),
        ("semester", "semester"),
    ] {
        if !patch.contains_key(key) {
            continue;
        }
        let v = opt_str(patch_value, key)?;
        if key == "name" && v.is_none() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        sets.push(format!("{} = ?", column));
        values.push(v);
    }
    if !sets.is_empty() {
        let sql = format!("UPDATE subjects SET {} WHERE id = ?", sets.join(", "));
        let mut bind: Vec<&dyn rusqlite::ToSql> =
            values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        bind.push(&subject_id);
        conn.execute(&sql, bind.as_slice())
            .map_err(db_err("db_update_failed"))?;
    }
    load_subject(conn, &subject_id)
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    ensure_subject_editable(conn, state.user.as_deref(), &subject_id)?;

    let doc_ids: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT id FROM documents WHERE subject_id = ?")
            .map_err(db_err("db_query_failed"))?;
        let ids = stmt
            .query_map([&subject_id], |r| r.get(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        ids
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    for doc_id in &doc_ids {
        delete_document_rows(&tx, doc_id)?;
    }
    for table in ["schedules", "grades", "tasks"] {
        tx.execute(
            &format!("UPDATE {} SET subject_id = NULL WHERE subject_id = ?", table),
            [&subject_id],
        )
        .map_err(db_err("db_update_failed"))?;
    }
    tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(db_err("db_delete_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    for doc_id in &doc_ids {
        remove_document_files(state.library.as_deref(), doc_id);
        state.jobs.forget(doc_id);
    }
    tracing::info!(subject = %subject_id, documents = doc_ids.len(), "subject deleted");
    Ok(json!({ "ok": true, "documentsDeleted": doc_ids.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => handle_list(state, req),
        "subjects.create" => handle_create(state, req),
        "subjects.update" => handle_update(state, req),
        "subjects.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
