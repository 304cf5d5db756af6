use super::rag::index_document;
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_document_editable, ensure_document_visible, ensure_subject_editable,
    ensure_subject_visible, json_column, new_id, opt_bool, opt_str, patch_obj, required_str,
    respond, string_array, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::rag::extract::extension_of;
use crate::rag::store::delete_document_chunks;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const DOCUMENT_COLUMNS: &str = "id, subject_id, name, describes, author, link, favorite, tags,
    file_path, file_url, file_sha256, file_size, user_id, created_at";

fn document_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "subjectId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "describes": r.get::<_, Option<String>>(3)?,
        "author": r.get::<_, Option<String>>(4)?,
        "link": r.get::<_, Option<String>>(5)?,
        "favorite": r.get::<_, i64>(6)? != 0,
        "tags": json_column(r.get::<_, Option<String>>(7)?, json!([])),
        "filePath": r.get::<_, Option<String>>(8)?,
        "fileUrl": r.get::<_, Option<String>>(9)?,
        "fileSha256": r.get::<_, Option<String>>(10)?,
        "fileSize": r.get::<_, Option<i64>>(11)?,
        "userId": r.get::<_, Option<String>>(12)?,
        "createdAt": r.get::<_, String>(13)?,
    }))
}

pub(super) fn load_document(conn: &Connection, document_id: &str) -> HandlerResult {
    conn.query_row(
        &format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS),
        [document_id],
        document_json,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("document not found"))
}

/// Trimmed, non-empty, first occurrence wins.
pub(super) fn normalize_tags(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for t in raw {
        let t = t.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

pub(super) fn validate_link(link: Option<String>) -> Result<Option<String>, HandlerErr> {
    let Some(link) = link else {
        return Ok(None);
    };
    let lower = link.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !link.chars().any(char::is_whitespace) => Ok(Some(link)),
        _ => Err(HandlerErr::bad_params("link must be an http(s) URL")),
    }
}

fn tags_param(v: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(arr) => Ok(normalize_tags(string_array(arr, key)?)),
    }
}

/// Removes a document's annotations, chunks and row. Runs inside the
/// caller's transaction.
pub(super) fn delete_document_rows(tx: &Connection, document_id: &str) -> Result<(), HandlerErr> {
    tx.execute("DELETE FROM annotations WHERE document_id = ?", [document_id])
        .map_err(db_err("db_delete_failed"))?;
    delete_document_chunks(tx, document_id).map_err(db_err("db_delete_failed"))?;
    tx.execute("DELETE FROM documents WHERE id = ?", [document_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(())
}

pub(super) fn remove_document_files(library: Option<&Path>, document_id: &str) {
    let Some(library) = library else {
        return;
    };
    let dir = db::files_root(library).join(document_id);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "failed to remove document files"),
    }
}

/// Drops a document created earlier in the same request together with any
/// files written for it.
pub(super) fn discard_document(state: &AppState, document_id: &str) {
    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute("DELETE FROM documents WHERE id = ?", [document_id]) {
            tracing::warn!(document = document_id, error = %e, "failed to roll back document row");
        }
    }
    remove_document_files(state.library.as_deref(), document_id);
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = opt_str(&req.params, "subjectId")?;
    let favorite_only = opt_bool(&req.params, "favoriteOnly")?.unwrap_or(false);
    let tag = opt_str(&req.params, "tag")?;

    // A visible subject lists every document in it; otherwise rows are user-scoped.
    let scope_user = match subject_id.as_deref() {
        Some(sid) => {
            ensure_subject_visible(conn, state.user.as_deref(), sid)?;
            None
        }
        None => state.user.as_deref(),
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM documents
             WHERE (?1 IS NULL OR subject_id = ?1)
               AND (?2 IS NULL OR user_id = ?2)
               AND (?3 = 0 OR favorite = 1)
             ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map(
            rusqlite::params![subject_id, scope_user, favorite_only as i64],
            document_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    let documents: Vec<Value> = match tag {
        Some(tag) => rows
            .into_iter()
            .filter(|d| {
                d["tags"]
                    .as_array()
                    .map(|ts| ts.iter().any(|t| t.as_str() == Some(tag.as_str())))
                    .unwrap_or(false)
            })
            .collect(),
        None => rows,
    };
    Ok(json!({ "documents": documents }))
}

fn handle_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let document_id = required_str(&req.params, "documentId")?;
    ensure_document_visible(conn, state.user.as_deref(), &document_id)?;
    load_document(conn, &document_id)
}

pub(super) struct NewDocument {
    pub subject_id: String,
    pub name: String,
    pub describes: Option<String>,
    pub author: Option<String>,
    pub link: Option<String>,
    pub favorite: bool,
    pub tags: Vec<String>,
}

pub(super) fn insert_document(
    conn: &Connection,
    user: Option<&str>,
    doc: &NewDocument,
) -> Result<String, HandlerErr> {
    ensure_subject_editable(conn, user, &doc.subject_id)?;
    let id = new_id();
    let tags = serde_json::to_string(&doc.tags)
        .map_err(|e| HandlerErr::bad_params(format!("tags: {}", e)))?;
    conn.execute(
        "INSERT INTO documents(id, subject_id, name, describes, author, link, favorite, tags, user_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &doc.subject_id,
            &doc.name,
            &doc.describes,
            &doc.author,
            &doc.link,
            doc.favorite as i64,
            tags,
            user,
            db::now_ts(),
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(id)
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let p = &req.params;
    let doc = NewDocument {
        subject_id: required_str(p, "subjectId")?,
        name: required_str(p, "name")?,
        describes: opt_str(p, "describes")?,
        author: opt_str(p, "author")?,
        link: validate_link(opt_str(p, "link")?)?,
        favorite: opt_bool(p, "favorite")?.unwrap_or(false),
        tags: tags_param(p, "tags")?,
    };
    let id = insert_document(conn, state.user.as_deref(), &doc)?;
    load_document(conn, &id)
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let document_id = required_str(&req.params, "documentId")?;
    ensure_document_editable(conn, state.user.as_deref(), &document_id)?;
    let patch = patch_obj(&req.params)?;
    let pv = &req.params["patch"];

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for key in patch.keys() {
        match key.as_str() {
            "name" => {
                let name = opt_str(pv, "name")?
                    .ok_or_else(|| HandlerErr::bad_params("name must not be empty"))?;
                sets.push("name = ?");
                values.push(name.into());
            }
            "describes" => {
                sets.push("describes = ?");
                values.push(opt_str(pv, "describes")?.into());
            }
            "author" => {
                sets.push("author = ?");
                values.push(opt_str(pv, "author")?.into());
            }
            "link" => {
                sets.push("link = ?");
                values.push(validate_link(opt_str(pv, "link")?)?.into());
            }
            "favorite" => {
                sets.push("favorite = ?");
                values.push((opt_bool(pv, "favorite")?.unwrap_or(false) as i64).into());
            }
            "tags" => {
                let tags = serde_json::to_string(&tags_param(pv, "tags")?)
                    .map_err(|e| HandlerErr::bad_params(format!("tags: {}", e)))?;
                sets.push("tags = ?");
                values.push(tags.into());
            }
            other => return Err(HandlerErr::bad_params(format!("unknown document field: {}", other))),
        }
    }
    if !sets.is_empty() {
        values.push(document_id.clone().into());
        let sql = format!("UPDATE documents SET {} WHERE id = ?", sets.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(db_err("db_update_failed"))?;
    }
    load_document(conn, &document_id)
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let document_id = required_str(&req.params, "documentId")?;
    ensure_document_editable(conn, state.user.as_deref(), &document_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    delete_document_rows(&tx, &document_id)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    remove_document_files(state.library.as_deref(), &document_id);
    state.jobs.forget(&document_id);
    Ok(json!({ "ok": true }))
}

fn safe_extension(file_name: &str) -> String {
    extension_of(file_name)
        .filter(|e| e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn file_url(path: &Path) -> String {
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let s = abs.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{}", s)
    } else {
        format!("file:///{}", s)
    }
}

/// Copies a source file into the library as the document's only file and
/// drops chunks indexed from the previous one.
pub(super) fn store_document_file(
    state: &mut AppState,
    document_id: &str,
    source: &Path,
    file_name: &str,
) -> Result<(), HandlerErr> {
    let bytes = std::fs::read(source).map_err(|e| {
        HandlerErr::new("io_failed", format!("failed to read {}: {}", source.display(), e))
    })?;
    store_document_bytes(state, document_id, &bytes, file_name)
}

/// Deletes everything in `dir` except `keep`.
fn remove_previous_files(dir: &Path, keep: &str) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy() == keep {
            continue;
        }
        let path = entry.path();
        let res = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = res {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove previous file");
        }
    }
}

/// Writes `bytes` as the document's file. The previous file stays on disk
/// and in the row until the new one is written and recorded.
pub(super) fn store_document_bytes(
    state: &mut AppState,
    document_id: &str,
    bytes: &[u8],
    file_name: &str,
) -> Result<(), HandlerErr> {
    let library: PathBuf = state
        .library
        .clone()
        .ok_or_else(|| HandlerErr::new("no_library", "open a library first"))?;
    let dir = db::files_root(&library).join(document_id);
    std::fs::create_dir_all(&dir)
        .map_err(|e| HandlerErr::new("io_failed", format!("failed to create {}: {}", dir.display(), e)))?;
    let stored_name = format!("{}.{}", uuid::Uuid::new_v4().simple(), safe_extension(file_name));
    let dest = dir.join(&stored_name);
    if let Err(e) = std::fs::write(&dest, bytes) {
        let _ = std::fs::remove_file(&dest);
        return Err(HandlerErr::new(
            "io_failed",
            format!("failed to write {}: {}", dest.display(), e),
        ));
    }

    let rel = format!("{}/{}/{}", db::FILES_DIR, document_id, stored_name);
    let sha = format!("{:x}", Sha256::digest(bytes));
    let conn = db_conn(state)?;
    let updated = conn.execute(
        "UPDATE documents SET file_path = ?, file_url = ?, file_sha256 = ?, file_size = ? WHERE id = ?",
        (&rel, file_url(&dest), &sha, bytes.len() as i64, document_id),
    );
    if let Err(e) = updated {
        let _ = std::fs::remove_file(&dest);
        return Err(HandlerErr::new("db_update_failed", e.to_string()));
    }
    remove_previous_files(&dir, &stored_name);
    delete_document_chunks(conn, document_id).map_err(db_err("db_delete_failed"))?;
    state.jobs.forget(document_id);
    tracing::info!(document = document_id, size = bytes.len(), "file stored");
    Ok(())
}

pub(super) fn file_name_param(req_params: &Value, source: &Path) -> Result<String, HandlerErr> {
    Ok(opt_str(req_params, "fileName")?.unwrap_or_else(|| {
        source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file.bin".to_string())
    }))
}

fn handle_upload(state: &mut AppState, req: &Request) -> HandlerResult {
    let document_id = required_str(&req.params, "documentId")?;
    let source = PathBuf::from(required_str(&req.params, "sourcePath")?);
    let file_name = file_name_param(&req.params, &source)?;
    let enable_rag = opt_bool(&req.params, "enableRag")?.unwrap_or(false);
    {
        let conn = db_conn(state)?;
        ensure_document_editable(conn, state.user.as_deref(), &document_id)?;
    }
    store_document_file(state, &document_id, &source, &file_name)?;

    let index = if enable_rag {
        Some(index_document(state, &document_id)?)
    } else {
        None
    };
    let document = load_document(db_conn(state)?, &document_id)?;
    Ok(json!({ "document": document, "index": index }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "documents.list" => handle_list(state, req),
        "documents.get" => handle_get(state, req),
        "documents.create" => handle_create(state, req),
        "documents.update" => handle_update(state, req),
        "documents.delete" => handle_delete(state, req),
        "documents.upload" => handle_upload(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = normalize_tags(vec![" exam ".into(), "".into(), "exam".into(), "ch1".into()]);
        assert_eq!(tags, vec!["exam", "ch1"]);
    }

    #[test]
    fn links_must_be_http() {
        assert!(validate_link(Some("https://example.edu/notes".into())).is_ok());
        assert!(validate_link(Some("ftp://example.edu".into())).is_err());
        assert!(validate_link(Some("http://".into())).is_err());
        assert_eq!(validate_link(None).expect("none"), None);
    }

    #[test]
    fn extension_falls_back_to_bin() {
        assert_eq!(safe_extension("Slides.PDF"), "pdf");
        assert_eq!(safe_extension("notes"), "bin");
        assert_eq!(safe_extension("weird.p d f"), "bin");
    }
}
