use super::core::open_library;
use super::documents::{normalize_tags, validate_link};
use super::schedules::normalize_schedule;
use super::tasks::parse_status;
use crate::backup;
use crate::db;
use crate::gpa;
use crate::ipc::helpers::{
    db_conn, db_err, json_column, new_id, opt_f64, opt_str, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

pub const EXCHANGE_FORMAT_V1: &str = "studyd-export-v1";

fn library_param(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    opt_str(&req.params, "libraryPath")?
        .map(PathBuf::from)
        .or_else(|| state.library.clone())
        .ok_or_else(|| HandlerErr::new("no_library", "open a library first"))
}

fn handle_backup_export_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let out_path = required_str(&req.params, "outPath")?;
    let library = library_param(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_library_bundle(&library, &PathBuf::from(&out_path)).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(
        path = %out_path,
        entries = export.entry_count,
        files = export.file_count,
        "library bundle exported"
    );
    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "fileCount": export.file_count,
        "dbSha256": export.db_sha256,
    }))
}

fn handle_backup_import_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let in_path = required_str(&req.params, "inPath")?;
    let library = library_param(state, req)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;
    let import = backup::import_library_bundle(&src, &library);
    // Reopen whatever is on disk now, restored or not.
    open_library(state, &library)?;
    let import = import.map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    state.jobs = Default::default();
    tracing::info!(
        path = %in_path,
        format = %import.bundle_format_detected,
        files = import.files_restored,
        "library bundle imported"
    );
    Ok(json!({
        "ok": true,
        "libraryPath": library.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "filesRestored": import.files_restored,
    }))
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    user: Option<&str>,
    map: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Value>,
) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([user], map)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(rows)
}

fn export_snapshot(conn: &Connection, user: Option<&str>) -> HandlerResult {
    let mut subjects = collect_rows(
        conn,
        "SELECT id, name, describes, semester FROM subjects
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY name, created_at",
        user,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "describes": r.get::<_, Option<String>>(2)?,
                "semester": r.get::<_, Option<String>>(3)?,
            }))
        },
    )?;
    let documents = collect_rows(
        conn,
        "SELECT subject_id, name, describes, author, link, favorite, tags FROM documents
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at, rowid",
        user,
        |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "describes": r.get::<_, Option<String>>(2)?,
                "author": r.get::<_, Option<String>>(3)?,
                "link": r.get::<_, Option<String>>(4)?,
                "favorite": r.get::<_, i64>(5)? != 0,
                "tags": json_column(r.get::<_, Option<String>>(6)?, json!([])),
            }))
        },
    )?;
    let mut by_subject: HashMap<String, Vec<Value>> = HashMap::new();
    for mut doc in documents {
        let sid = doc["subjectId"].as_str().unwrap_or_default().to_string();
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("subjectId");
        }
        by_subject.entry(sid).or_default().push(doc);
    }
    for subject in subjects.iter_mut() {
        let sid = subject["id"].as_str().unwrap_or_default().to_string();
        subject["documents"] = Value::Array(by_subject.remove(&sid).unwrap_or_default());
    }

    let schedules = collect_rows(
        conn,
        "SELECT subject_id, title, starts_at, ends_at, location, note, recurrence_rule FROM schedules
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY starts_at, created_at",
        user,
        |r| {
            Ok(json!({
                "subjectId": r.get::<_, Option<String>>(0)?,
                "title": r.get::<_, Option<String>>(1)?,
                "startsAt": r.get::<_, String>(2)?,
                "endsAt": r.get::<_, String>(3)?,
                "location": r.get::<_, Option<String>>(4)?,
                "note": r.get::<_, Option<String>>(5)?,
                "recurrenceRule": json_column(r.get::<_, Option<String>>(6)?, Value::Null),
            }))
        },
    )?;
    let grades = collect_rows(
        conn,
        "SELECT subject_id, course_name, semester, credits, score FROM grades
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY semester, course_name",
        user,
        |r| {
            Ok(json!({
                "subjectId": r.get::<_, Option<String>>(0)?,
                "courseName": r.get::<_, String>(1)?,
                "semester": r.get::<_, Option<String>>(2)?,
                "credits": r.get::<_, f64>(3)?,
                "score": r.get::<_, Option<f64>>(4)?,
            }))
        },
    )?;
    let tasks = collect_rows(
        conn,
        "SELECT subject_id, title, description, status, sort_order, due_date FROM tasks
         WHERE (?1 IS NULL OR user_id = ?1) ORDER BY status, sort_order",
        user,
        |r| {
            Ok(json!({
                "subjectId": r.get::<_, Option<String>>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "status": r.get::<_, String>(3)?,
                "sortOrder": r.get::<_, i64>(4)?,
                "dueDate": r.get::<_, Option<String>>(5)?,
            }))
        },
    )?;

    Ok(json!({
        "format": EXCHANGE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": db::now_ts(),
        "subjects": subjects,
        "schedules": schedules,
        "grades": grades,
        "tasks": tasks,
    }))
}

fn handle_exchange_export_json(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let out_path = required_str(&req.params, "outPath")?;
    let snapshot = export_snapshot(conn, state.user.as_deref())?;
    let text = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;
    }
    std::fs::write(&out, text).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;

    let count = |key: &str| snapshot[key].as_array().map(Vec::len).unwrap_or(0);
    let documents: usize = snapshot["subjects"]
        .as_array()
        .map(|subs| {
            subs.iter()
                .map(|s| s["documents"].as_array().map(Vec::len).unwrap_or(0))
                .sum()
        })
        .unwrap_or(0);
    tracing::info!(path = %out_path, subjects = count("subjects"), "exchange exported");
    Ok(json!({
        "ok": true,
        "path": out_path,
        "format": EXCHANGE_FORMAT_V1,
        "counts": {
            "subjects": count("subjects"),
            "documents": documents,
            "schedules": count("schedules"),
            "grades": count("grades"),
            "tasks": count("tasks"),
        },
    }))
}

#[derive(Default)]
struct ImportCounts {
    subjects: usize,
    documents: usize,
    schedules: usize,
    grades: usize,
    tasks: usize,
    warnings: Vec<Value>,
}

impl ImportCounts {
    fn warn(&mut self, section: &str, index: usize, message: impl Into<String>) {
        self.warnings.push(json!({
            "section": section,
            "index": index,
            "message": message.into(),
        }));
    }
}

fn section<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Maps an exported subject id onto the freshly inserted one; unknown ids detach.
fn remap_subject(
    item: &Value,
    subject_ids: &HashMap<String, String>,
    counts: &mut ImportCounts,
    section: &str,
    index: usize,
) -> Option<String> {
    let old = item.get("subjectId").and_then(Value::as_str)?;
    match subject_ids.get(old) {
        Some(new) => Some(new.clone()),
        None => {
            counts.warn(section, index, format!("unknown subjectId {} dropped", old));
            None
        }
    }
}

fn import_subjects(
    tx: &Connection,
    user: Option<&str>,
    doc: &Value,
    now: &str,
    counts: &mut ImportCounts,
) -> Result<HashMap<String, String>, HandlerErr> {
    let mut subject_ids = HashMap::new();
    for (i, s) in section(doc, "subjects").iter().enumerate() {
        let Ok(name) = required_str(s, "name") else {
            counts.warn("subjects", i, "missing name");
            continue;
        };
        let id = new_id();
        tx.execute(
            "INSERT INTO subjects(id, name, describes, semester, user_id, workspace_id, created_at)
             VALUES(?, ?, ?, ?, ?, NULL, ?)",
            rusqlite::params![
                id,
                name,
                opt_str(s, "describes").ok().flatten(),
                opt_str(s, "semester").ok().flatten(),
                user,
                now
            ],
        )
        .map_err(db_err("db_insert_failed"))?;
        if let Some(old) = s.get("id").and_then(Value::as_str) {
            subject_ids.insert(old.to_string(), id.clone());
        }
        counts.subjects += 1;

        for (j, d) in section(s, "documents").iter().enumerate() {
            let Ok(doc_name) = required_str(d, "name") else {
                counts.warn("documents", j, format!("missing name in subject {}", i));
                continue;
            };
            let link = match validate_link(opt_str(d, "link").ok().flatten()) {
                Ok(link) => link,
                Err(e) => {
                    counts.warn("documents", j, format!("link dropped: {}", e.message));
                    None
                }
            };
            let tags: Vec<String> = d
                .get("tags")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let tags = serde_json::to_string(&normalize_tags(tags))
                .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
            tx.execute(
                "INSERT INTO documents(id, subject_id, name, describes, author, link, favorite, tags, user_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    new_id(),
                    id,
                    doc_name,
                    opt_str(d, "describes").ok().flatten(),
                    opt_str(d, "author").ok().flatten(),
                    link,
                    d.get("favorite").and_then(Value::as_bool).unwrap_or(false) as i64,
                    tags,
                    user,
                    now
                ],
            )
            .map_err(db_err("db_insert_failed"))?;
            counts.documents += 1;
        }
    }
    Ok(subject_ids)
}

fn import_snapshot(tx: &Connection, user: Option<&str>, doc: &Value) -> Result<ImportCounts, HandlerErr> {
    let now = db::now_ts();
    let mut counts = ImportCounts::default();
    let subject_ids = import_subjects(tx, user, doc, &now, &mut counts)?;

    for (i, s) in section(doc, "schedules").iter().enumerate() {
        let (Ok(starts_at), Ok(ends_at)) = (required_str(s, "startsAt"), required_str(s, "endsAt")) else {
            counts.warn("schedules", i, "missing startsAt or endsAt");
            continue;
        };
        let (starts_at, ends_at, rule) = match normalize_schedule(&starts_at, &ends_at, s.get("recurrenceRule")) {
            Ok(v) => v,
            Err(e) => {
                counts.warn("schedules", i, e.message);
                continue;
            }
        };
        let subject_id = remap_subject(s, &subject_ids, &mut counts, "schedules", i);
        tx.execute(
            "INSERT INTO schedules(id, subject_id, title, starts_at, ends_at, location, note, recurrence_rule, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                subject_id,
                opt_str(s, "title").ok().flatten(),
                starts_at,
                ends_at,
                opt_str(s, "location").ok().flatten(),
                opt_str(s, "note").ok().flatten(),
                rule,
                user,
                now
            ],
        )
        .map_err(db_err("db_insert_failed"))?;
        counts.schedules += 1;
    }

    for (i, g) in section(doc, "grades").iter().enumerate() {
        let Ok(course_name) = required_str(g, "courseName") else {
            counts.warn("grades", i, "missing courseName");
            continue;
        };
        let credits = match opt_f64(g, "credits").ok().flatten().map(gpa::validate_credits) {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                counts.warn("grades", i, e.to_string());
                continue;
            }
            None => {
                counts.warn("grades", i, "missing credits");
                continue;
            }
        };
        let score = match opt_f64(g, "score") {
            Ok(None) => None,
            Ok(Some(v)) => match gpa::validate_score(v) {
                Ok(v) => Some(v),
                Err(e) => {
                    counts.warn("grades", i, e.to_string());
                    continue;
                }
            },
            Err(e) => {
                counts.warn("grades", i, e.message);
                continue;
            }
        };
        let subject_id = remap_subject(g, &subject_ids, &mut counts, "grades", i);
        tx.execute(
            "INSERT INTO grades(id, subject_id, course_name, semester, credits, score, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                subject_id,
                course_name,
                opt_str(g, "semester").ok().flatten(),
                credits,
                score,
                user,
                now
            ],
        )
        .map_err(db_err("db_insert_failed"))?;
        counts.grades += 1;
    }

    for (i, t) in section(doc, "tasks").iter().enumerate() {
        let Ok(title) = required_str(t, "title") else {
            counts.warn("tasks", i, "missing title");
            continue;
        };
        let raw_status = opt_str(t, "status").ok().flatten().unwrap_or_else(|| "todo".to_string());
        let Ok(status) = parse_status(&raw_status) else {
            counts.warn("tasks", i, format!("unknown status {}", raw_status));
            continue;
        };
        let due_date = opt_str(t, "dueDate")
            .ok()
            .flatten()
            .filter(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
        let subject_id = remap_subject(t, &subject_ids, &mut counts, "tasks", i);
        // Imported tasks append after the existing board.
        let next: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks
                 WHERE status = ?1 AND (?2 IS NULL OR user_id = ?2)",
                rusqlite::params![status, user],
                |r| r.get(0),
            )
            .map_err(db_err("db_query_failed"))?;
        tx.execute(
            "INSERT INTO tasks(id, title, description, status, sort_order, due_date, subject_id, user_id, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                title,
                opt_str(t, "description").ok().flatten(),
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
        counts.tasks += 1;
    }
    Ok(counts)
}

fn handle_exchange_import_json(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let in_path = required_str(&req.params, "inPath")?;
    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": in_path }))
    })?;
    let doc: Value = serde_json::from_str(&text)
        .map_err(|e| HandlerErr::bad_params(format!("export file is not valid JSON: {}", e)))?;
    let format = doc.get("format").and_then(Value::as_str).unwrap_or("");
    if format != EXCHANGE_FORMAT_V1 {
        return Err(HandlerErr::bad_params(format!("unsupported export format: {}", format))
            .with_details(json!({ "expected": EXCHANGE_FORMAT_V1 })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let counts = import_snapshot(&tx, state.user.as_deref(), &doc)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(
        path = %in_path,
        subjects = counts.subjects,
        warnings = counts.warnings.len(),
        "exchange imported"
    );

    let mut imported = Map::new();
    imported.insert("subjects".into(), counts.subjects.into());
    imported.insert("documents".into(), counts.documents.into());
    imported.insert("schedules".into(), counts.schedules.into());
    imported.insert("grades".into(), counts.grades.into());
    imported.insert("tasks".into(), counts.tasks.into());
    Ok(json!({
        "ok": true,
        "imported": imported,
        "warnings": counts.warnings,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportBundle" => handle_backup_export_bundle(state, req),
        "backup.importBundle" => handle_backup_import_bundle(state, req),
        "exchange.exportJson" => handle_exchange_export_json(state, req),
        "exchange.importJson" => handle_exchange_import_json(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
