use crate::ipc::helpers::{
    db_conn, db_err, ensure_document_visible, ensure_subject_visible, opt_i64, opt_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::mindmap::{self, MindMap};
use serde_json::json;

const DEFAULT_MAX_NODES: i64 = 20;

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let subject_id = opt_str(&req.params, "subjectId")?;
    let document_id = opt_str(&req.params, "documentId")?;
    let max_nodes = opt_i64(&req.params, "maxNodes")?.unwrap_or(DEFAULT_MAX_NODES);
    if !(1..=500).contains(&max_nodes) {
        return Err(HandlerErr::bad_params("maxNodes must be 1..=500"));
    }
    let max_nodes = max_nodes as usize;

    let (map, from): (MindMap, &str) = if let Some(sid) = subject_id.as_deref() {
        ensure_subject_visible(conn, user, sid)?;
        let name: String = conn
            .query_row("SELECT name FROM subjects WHERE id = ?", [sid], |r| r.get(0))
            .map_err(db_err("db_query_failed"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name FROM documents WHERE subject_id = ?
                 ORDER BY created_at, rowid LIMIT ?",
            )
            .map_err(db_err("db_query_failed"))?;
        let docs = stmt
            .query_map(rusqlite::params![sid, max_nodes as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err("db_query_failed"))?;
        (mindmap::subject_map(sid, &name, &docs, max_nodes), "subject")
    } else if let Some(did) = document_id.as_deref() {
        ensure_document_visible(conn, user, did)?;
        let (name, describes): (String, Option<String>) = conn
            .query_row(
                "SELECT name, describes FROM documents WHERE id = ?",
                [did],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(db_err("db_query_failed"))?;
        (
            mindmap::document_map(did, &name, describes.as_deref().unwrap_or(""), max_nodes),
            "document",
        )
    } else {
        return Err(HandlerErr::bad_params("subjectId or documentId is required"));
    };

    Ok(json!({
        "nodes": map.nodes,
        "edges": map.edges,
        "meta": { "source": "heuristic", "from": from },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "mindmap.generate" => handle_generate(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
