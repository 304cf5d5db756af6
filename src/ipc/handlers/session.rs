use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, opt_str, patch_obj, require_user, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<Value>, HandlerErr> {
    conn.query_row(
        "SELECT id, full_name, avatar_url, role, created_at FROM profiles WHERE id = ?",
        [user_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, Option<String>>(1)?,
                "avatarUrl": r.get::<_, Option<String>>(2)?,
                "role": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

/// Returns the user's profile, creating a student profile on first use.
fn ensure_profile(conn: &Connection, user_id: &str, full_name: Option<&str>) -> HandlerResult {
    if let Some(p) = load_profile(conn, user_id)? {
        return Ok(p);
    }
    conn.execute(
        "INSERT INTO profiles(id, full_name, avatar_url, role, created_at) VALUES(?, ?, NULL, 'student', ?)",
        (user_id, full_name, db::now_ts()),
    )
    .map_err(db_err("db_insert_failed"))?;
    tracing::info!(user = user_id, "profile created");
    load_profile(conn, user_id)?.ok_or_else(|| HandlerErr::not_found("profile not found"))
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> HandlerResult {
    let user_id = required_str(&req.params, "userId")?;
    let full_name = opt_str(&req.params, "fullName")?;
    let profile = {
        let conn = db_conn(state)?;
        ensure_profile(conn, &user_id, full_name.as_deref())?
    };
    state.user = Some(user_id);
    Ok(profile)
}

fn handle_sign_out(state: &mut AppState, _req: &Request) -> HandlerResult {
    state.user = None;
    Ok(json!({ "ok": true }))
}

fn handle_session_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({ "userId": state.user }))
}

fn handle_profile_get(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    ensure_profile(conn, user, None)
}

fn handle_profile_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let patch = patch_obj(&req.params)?;
    let patch_value = &req.params["patch"];
    let current = ensure_profile(conn, user, None)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Option<String>> = Vec::new();
    for (key, column) in [("fullName", "full_name = ?"), ("avatarUrl", "avatar_url = ?")] {
        if patch.contains_key(key) {
            values.push(opt_str(patch_value, key)?);
            sets.push(column);
        }
    }
    if sets.is_empty() {
        return Ok(current);
    }
    let sql = format!("UPDATE profiles SET {} WHERE id = ?", sets.join(", "));
    let mut bind: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    bind.push(&user);
    conn.execute(&sql, bind.as_slice())
        .map_err(db_err("db_update_failed"))?;
    load_profile(conn, user)?.ok_or_else(|| HandlerErr::not_found("profile not found"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.signIn" => handle_sign_in(state, req),
        "session.signOut" => handle_sign_out(state, req),
        "session.get" => handle_session_get(state, req),
        "profiles.me.get" => handle_profile_get(state, req),
        "profiles.me.update" => handle_profile_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
