use crate::db;
use crate::ipc::helpers::{required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "libraryPath": state.library.as_ref().map(|p| p.to_string_lossy().to_string()),
        "userId": state.user,
    }))
}

/// Opens (creating if needed) a library and makes it current.
pub fn open_library(state: &mut AppState, path: &Path) -> Result<(), HandlerErr> {
    // Old handle closes before the new one opens.
    state.db = None;
    state.library = None;
    let conn = db::open_db(path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(library = %path.display(), "library opened");
    state.library = Some(path.to_path_buf());
    state.db = Some(conn);
    Ok(())
}

fn handle_library_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = PathBuf::from(required_str(&req.params, "path")?);
    open_library(state, &path)?;
    Ok(json!({ "libraryPath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "library.open" => handle_library_open(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
