use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_subject_visible, new_id, opt_i64, opt_str, patch_obj, required_str,
    respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};

pub(super) const STATUSES: [&str; 3] = ["todo", "doing", "done"];

const TASK_COLUMNS: &str =
    "id, title, description, status, sort_order, due_date, subject_id, user_id, created_at, updated_at";

fn task_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "description": r.get::<_, Option<String>>(2)?,
        "status": r.get::<_, String>(3)?,
        "sortOrder": r.get::<_, i64>(4)?,
        "dueDate": r.get::<_, Option<String>>(5)?,
        "subjectId": r.get::<_, Option<String>>(6)?,
        "userId": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, String>(9)?,
    }))
}

pub(super) fn parse_status(raw: &str) -> Result<&'static str, HandlerErr> {
    STATUSES
        .iter()
        .copied()
        .find(|s| *s == raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be one of: todo, doing, done"))
}

fn validate_due_date(raw: Option<String>) -> Result<Option<String>, HandlerErr> {
    match raw {
        None => Ok(None),
        Some(s) => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(|d| Some(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| HandlerErr::bad_params("dueDate must be YYYY-MM-DD")),
    }
}

fn load_task(conn: &Connection, user: Option<&str>, task_id: &str) -> HandlerResult {
    conn.query_row(
        &format!(
            "SELECT {} FROM tasks WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
            TASK_COLUMNS
        ),
        rusqlite::params![task_id, user],
        task_json,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("task not found"))
}

/// Task ids of one owner's column in board order, excluding `skip`.
/// Unowned tasks form their own board.
fn column_ids(conn: &Connection, owner: Option<&str>, status: &str, skip: Option<&str>) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM tasks
             WHERE status = ?1 AND user_id IS ?2 AND (?3 IS NULL OR id <> ?3)
             ORDER BY sort_order, created_at",
        )
        .map_err(db_err("db_query_failed"))?;
    let ids = stmt
        .query_map(rusqlite::params![status, owner, skip], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<String>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(ids)
}

fn renumber(conn: &Connection, status: &str, ids: &[String]) -> Result<(), HandlerErr> {
    let now = db::now_ts();
    for (i, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE tasks SET status = ?, sort_order = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![status, i as i64, now, id],
        )
        .map_err(db_err("db_update_failed"))?;
    }
    Ok(())
}

fn handle_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tasks WHERE (?1 IS NULL OR user_id = ?1) ORDER BY sort_order, created_at",
            TASK_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([state.user.as_deref()], task_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let mut columns = Map::new();
    for status in STATUSES {
        columns.insert(status.to_string(), Value::Array(Vec::new()));
    }
    for task in rows {
        let status = task["status"].as_str().unwrap_or("todo").to_string();
        if let Some(Value::Array(col)) = columns.get_mut(&status) {
            col.push(task);
        }
    }
    Ok(json!({ "columns": columns }))
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let p = &req.params;
    let title = required_str(p, "title")?;
    let status = parse_status(&opt_str(p, "status")?.unwrap_or_else(|| "todo".to_string()))?;
    let due_date = validate_due_date(opt_str(p, "dueDate")?)?;
    let subject_id = opt_str(p, "subjectId")?;
    if let Some(sid) = subject_id.as_deref() {
        ensure_subject_visible(conn, user, sid)?;
    }
    let next: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks
             WHERE status = ?1 AND user_id IS ?2",
            rusqlite::params![status, user],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;

    let id = new_id();
    let now = db::now_ts();
    conn.execute(
        &format!("INSERT INTO tasks({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)", TASK_COLUMNS),
        rusqlite::params![
            id,
            title,
            opt_str(p, "description")?,
            status,
            next,
            due_date,
            subject_id,
            user,
            now,
            now
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    load_task(conn, None, &id)
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let task_id = required_str(&req.params, "taskId")?;
    load_task(conn, user, &task_id)?;
    let patch = patch_obj(&req.params)?;
    let pv = &req.params["patch"];

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for key in patch.keys() {
        match key.as_str() {
            "title" => {
                let title = opt_str(pv, "title")?
                    .ok_or_else(|| HandlerErr::bad_params("title must not be empty"))?;
                sets.push("title = ?");
                values.push(title.into());
            }
            "description" => {
                sets.push("description = ?");
                values.push(opt_str(pv, "description")?.into());
            }
            "dueDate" => {
                sets.push("due_date = ?");
                values.push(validate_due_date(opt_str(pv, "dueDate")?)?.into());
            }
            "subjectId" => {
                let sid = opt_str(pv, "subjectId")?;
                if let Some(s) = sid.as_deref() {
                    ensure_subject_visible(conn, user, s)?;
                }
                sets.push("subject_id = ?");
                values.push(sid.into());
            }
            "status" => {
                return Err(HandlerErr::bad_params("use tasks.move to change status"));
            }
            other => return Err(HandlerErr::bad_params(format!("unknown task field: {}", other))),
        }
    }
    if !sets.is_empty() {
        sets.push("updated_at = ?");
        values.push(db::now_ts().into());
        values.push(task_id.clone().into());
        let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(db_err("db_update_failed"))?;
    }
    load_task(conn, None, &task_id)
}

fn handle_move(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let task_id = required_str(&req.params, "taskId")?;
    let target = parse_status(&required_str(&req.params, "status")?)?;
    let index = opt_i64(&req.params, "index")?.unwrap_or(i64::MAX);
    let task = load_task(conn, user, &task_id)?;
    let source = task["status"].as_str().unwrap_or("todo").to_string();
    let owner = task["userId"].as_str();

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut dest = column_ids(&tx, owner, target, Some(&task_id))?;
    let at = index.clamp(0, dest.len() as i64) as usize;
    dest.insert(at, task_id.clone());
    if source != target {
        let rest = column_ids(&tx, owner, &source, Some(&task_id))?;
        renumber(&tx, &source, &rest)?;
    }
    renumber(&tx, target, &dest)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    load_task(conn, None, &task_id)
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let task_id = required_str(&req.params, "taskId")?;
    let task = load_task(conn, user, &task_id)?;
    let status = task["status"].as_str().unwrap_or("todo").to_string();
    let owner = task["userId"].as_str();

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute("DELETE FROM tasks WHERE id = ?", [&task_id])
        .map_err(db_err("db_delete_failed"))?;
    let rest = column_ids(&tx, owner, &status, None)?;
    renumber(&tx, &status, &rest)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "tasks.list" => handle_list(state, req),
        "tasks.create" => handle_create(state, req),
        "tasks.update" => handle_update(state, req),
        "tasks.move" => handle_move(state, req),
        "tasks.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
