use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, new_id, opt_str, patch_obj, require_user, required_str, respond,
    workspace_role, HandlerErr, HandlerResult, Role,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn workspace_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "owner": r.get::<_, String>(2)?,
        "createdAt": r.get::<_, String>(3)?,
    }))
}

fn load_workspace(conn: &Connection, workspace_id: &str) -> HandlerResult {
    conn.query_row(
        "SELECT id, name, owner, created_at FROM workspaces WHERE id = ?",
        [workspace_id],
        workspace_json,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("workspace not found"))
}

/// Owner-only actions check the recorded owner; an `owner` member role
/// grants edit rights on content but not control of the workspace.
fn ensure_owner(conn: &Connection, workspace_id: &str, user: &str, action: &str) -> Result<(), HandlerErr> {
    if owner_of(conn, workspace_id)? == user {
        Ok(())
    } else {
        Err(HandlerErr::forbidden(format!("only the owner can {}", action)))
    }
}

fn owner_of(conn: &Connection, workspace_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT owner FROM workspaces WHERE id = ?",
        [workspace_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("workspace not found"))
}

fn handle_list(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, owner, created_at FROM workspaces
             WHERE owner = ?1
                OR id IN (SELECT workspace_id FROM workspace_members WHERE user_id = ?1)
             ORDER BY name, created_at",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([user], workspace_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "workspaces": rows }))
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let name = required_str(&req.params, "name")?;
    let id = new_id();

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO workspaces(id, name, owner, created_at) VALUES(?, ?, ?, ?)",
        (&id, &name, user, db::now_ts()),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.execute(
        "INSERT INTO workspace_members(workspace_id, user_id, member_role) VALUES(?, ?, 'owner')",
        (&id, user),
    )
    .map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    load_workspace(conn, &id)
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let workspace_id = required_str(&req.params, "workspaceId")?;
    ensure_owner(conn, &workspace_id, user, "update a workspace")?;
    let patch = patch_obj(&req.params)?;
    if patch.contains_key("name") {
        let Some(name) = opt_str(&req.params["patch"], "name")? else {
            return Err(HandlerErr::bad_params("name must not be empty"));
        };
        conn.execute(
            "UPDATE workspaces SET name = ? WHERE id = ?",
            (&name, &workspace_id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    load_workspace(conn, &workspace_id)
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let workspace_id = required_str(&req.params, "workspaceId")?;
    ensure_owner(conn, &workspace_id, user, "delete a workspace")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "UPDATE subjects SET workspace_id = NULL WHERE workspace_id = ?",
        [&workspace_id],
    )
    .map_err(db_err("db_update_failed"))?;
    tx.execute(
        "DELETE FROM workspace_members WHERE workspace_id = ?",
        [&workspace_id],
    )
    .map_err(db_err("db_delete_failed"))?;
    tx.execute("DELETE FROM workspaces WHERE id = ?", [&workspace_id])
        .map_err(db_err("db_delete_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(workspace = %workspace_id, "workspace deleted");
    Ok(json!({ "ok": true }))
}

fn handle_members_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let workspace_id = required_str(&req.params, "workspaceId")?;
    if workspace_role(conn, &workspace_id, user)?.is_none() {
        return Err(HandlerErr::forbidden("not a member of this workspace"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT m.user_id, m.member_role, p.full_name
             FROM workspace_members m
             LEFT JOIN profiles p ON p.id = m.user_id
             WHERE m.workspace_id = ?
             ORDER BY CASE m.member_role WHEN 'owner' THEN 0 WHEN 'editor' THEN 1 ELSE 2 END, m.user_id",
        )
        .map_err(db_err("db_query_failed"))?;
    let members = stmt
        .query_map([&workspace_id], |r| {
            Ok(json!({
                "workspaceId": &workspace_id,
                "userId": r.get::<_, String>(0)?,
                "memberRole": r.get::<_, String>(1)?,
                "fullName": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "members": members }))
}

fn handle_members_add(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let workspace_id = required_str(&req.params, "workspaceId")?;
    let member = required_str(&req.params, "userId")?;
    ensure_owner(conn, &workspace_id, user, "add members")?;
    let role_raw = opt_str(&req.params, "memberRole")?.unwrap_or_else(|| "editor".to_string());
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params("memberRole must be one of: owner, editor, viewer"));
    };
    if member == owner_of(conn, &workspace_id)? && role != Role::Owner {
        return Err(HandlerErr::bad_params("the workspace owner keeps the owner role"));
    }
    conn.execute(
        "INSERT INTO workspace_members(workspace_id, user_id, member_role) VALUES(?, ?, ?)
         ON CONFLICT(workspace_id, user_id) DO UPDATE SET member_role = excluded.member_role",
        (&workspace_id, &member, role.as_str()),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({
        "workspaceId": workspace_id,
        "userId": member,
        "memberRole": role.as_str(),
    }))
}

fn handle_members_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = require_user(state)?;
    let workspace_id = required_str(&req.params, "workspaceId")?;
    let member = required_str(&req.params, "userId")?;
    ensure_owner(conn, &workspace_id, user, "remove members")?;
    if member == owner_of(conn, &workspace_id)? {
        return Err(HandlerErr::bad_params("the workspace owner cannot be removed"));
    }
    let removed = conn
        .execute(
            "DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
            (&workspace_id, &member),
        )
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "workspaces.list" => handle_list(state, req),
        "workspaces.create" => handle_create(state, req),
        "workspaces.update" => handle_update(state, req),
        "workspaces.delete" => handle_delete(state, req),
        "workspaces.members.list" => handle_members_list(state, req),
        "workspaces.members.add" => handle_members_add(state, req),
        "workspaces.members.remove" => handle_members_remove(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
