use crate::config;
use crate::ipc::helpers::{
    db_err, ensure_document_editable, ensure_document_visible, ensure_subject_visible, opt_i64,
    opt_str, required_str, respond, to_result, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::rag::extract::extension_of;
use crate::rag::store::SearchScope;
use crate::rag::{self, IndexTarget, RagEngine, RagError};
use rusqlite::Connection;
use serde_json::{json, Value};

const DEFAULT_TOP_K: i64 = 5;

fn no_library() -> HandlerErr {
    HandlerErr::new("no_library", "open a library first")
}

fn rag_err(e: RagError) -> HandlerErr {
    match e {
        RagError::Extract(e) => HandlerErr::new("extract_failed", e.to_string()),
        RagError::Store(e) => HandlerErr::new("index_failed", e.to_string()),
    }
}

fn engine(conn: &Connection) -> Result<RagEngine, HandlerErr> {
    let settings = config::rag_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(RagEngine::new(settings))
}

struct StoredFile {
    target: IndexTarget,
    rel_path: String,
}

fn stored_file(conn: &Connection, document_id: &str) -> Result<StoredFile, HandlerErr> {
    let (subject_id, user_id, name, file_path): (String, Option<String>, String, Option<String>) = conn
        .query_row(
            "SELECT subject_id, user_id, name, file_path FROM documents WHERE id = ?",
            [document_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => HandlerErr::not_found("document not found"),
            other => db_err("db_query_failed")(other),
        })?;
    let Some(rel_path) = file_path else {
        return Err(HandlerErr::bad_params("document has no stored file; upload one first"));
    };
    // Keep the stored extension so extraction picks the right parser.
    let file_name = match extension_of(&rel_path) {
        Some(ext) if extension_of(&name).as_deref() != Some(ext.as_str()) => format!("{}.{}", name, ext),
        _ => name,
    };
    Ok(StoredFile {
        target: IndexTarget {
            document_id: document_id.to_string(),
            subject_id: Some(subject_id),
            user_id,
            file_name,
        },
        rel_path,
    })
}

/// Indexes a document's stored file and reports the outcome as JSON.
pub(super) fn index_document(state: &mut AppState, document_id: &str) -> HandlerResult {
    let library = state.library.clone().ok_or_else(no_library)?;
    let conn = state.db.as_ref().ok_or_else(no_library)?;
    let file = stored_file(conn, document_id)?;
    let path = library.join(&file.rel_path);
    let bytes = std::fs::read(&path).map_err(|e| {
        state.jobs.fail(document_id, &e.to_string());
        HandlerErr::new("io_failed", format!("failed to read {}: {}", path.display(), e))
    })?;
    let engine = engine(conn)?;
    let outcome = engine
        .index_bytes(conn, &mut state.jobs, &file.target, &bytes)
        .map_err(rag_err)?;
    let mut out = json!({ "ok": outcome.ok(), "chunks": outcome.chunks });
    if let Some(msg) = outcome.message {
        out["message"] = Value::String(msg);
    }
    Ok(out)
}

fn handle_index(state: &mut AppState, req: &Request) -> HandlerResult {
    let document_id = required_str(&req.params, "documentId")?;
    {
        let conn = state.db.as_ref().ok_or_else(no_library)?;
        ensure_document_editable(conn, state.user.as_deref(), &document_id)?;
    }
    index_document(state, &document_id)
}

fn handle_query(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = state.db.as_ref().ok_or_else(no_library)?;
    let query = required_str(&req.params, "query")?;
    let subject_id = opt_str(&req.params, "subjectId")?;
    let requested = opt_i64(&req.params, "topK")?.unwrap_or(DEFAULT_TOP_K);

    // Members of a shared subject search all of its chunks.
    let scope = match subject_id.as_deref() {
        Some(sid) => {
            ensure_subject_visible(conn, state.user.as_deref(), sid)?;
            SearchScope {
                subject_id: Some(sid),
                user_id: None,
            }
        }
        None => SearchScope {
            subject_id: None,
            user_id: state.user.as_deref(),
        },
    };
    let engine = engine(conn)?;
    let top_k = engine.clamp_top_k(requested);
    let hits = engine.retrieve(conn, &query, &scope, top_k).map_err(rag_err)?;
    tracing::debug!(hits = hits.len(), top_k, "rag query");

    let answer = rag::answer(&hits);
    let contexts: Vec<&str> = hits.iter().map(|h| h.chunk.content.as_str()).collect();
    let sources: Vec<Value> = hits
        .iter()
        .map(|h| {
            json!({
                "documentId": h.chunk.document_id,
                "chunkIndex": h.chunk.chunk_index,
                "fileName": h.chunk.file_name,
                "score": h.score,
            })
        })
        .collect();
    Ok(json!({
        "answer": answer,
        "contexts": contexts,
        "sources": sources,
    }))
}

fn handle_job_status(state: &mut AppState, req: &Request) -> HandlerResult {
    let document_id = required_str(&req.params, "documentId")?;
    if let Some(conn) = state.db.as_ref() {
        match ensure_document_visible(conn, state.user.as_deref(), &document_id) {
            Ok(_) => {}
            // Jobs outlive deleted documents until the daemon exits.
            Err(e) if e.code == "not_found" => {}
            Err(e) => return Err(e),
        }
    }
    to_result(&state.jobs.get(&document_id))
}

fn handle_diag(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = state.db.as_ref().ok_or_else(no_library)?;
    let engine = engine(conn)?;
    let sample = engine.embedder().embed("diagnostic sample");
    let stats = engine.stats(conn).map_err(rag_err)?;
    Ok(json!({
        "ok": sample.len() == engine.embedder().dim(),
        "embDim": sample.len(),
        "chunkCount": stats.total,
        "staleChunks": stats.stale,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rag.index" => handle_index(state, req),
        "rag.query" => handle_query(state, req),
        "rag.jobStatus" => handle_job_status(state, req),
        "rag.diag" => handle_diag(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
