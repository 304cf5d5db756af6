use crate::annotations::{self, AnnotationError, Kind, Rect};
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_document_visible, new_id, opt_f64, opt_i64, opt_str, patch_obj,
    required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const ANNOTATION_COLUMNS: &str =
    "id, document_id, page, kind, color, rects, note, quote, user_id, created_at, updated_at";

struct AnnotationRow {
    id: String,
    document_id: String,
    page: i64,
    kind: String,
    color: String,
    rects: Vec<Rect>,
    note: Option<String>,
    quote: Option<String>,
    user_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl AnnotationRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = r.get(5)?;
        Ok(Self {
            id: r.get(0)?,
            document_id: r.get(1)?,
            page: r.get(2)?,
            kind: r.get(3)?,
            color: r.get(4)?,
            rects: serde_json::from_str(&raw).unwrap_or_default(),
            note: r.get(6)?,
            quote: r.get(7)?,
            user_id: r.get(8)?,
            created_at: r.get(9)?,
            updated_at: r.get(10)?,
        })
    }

    fn anchor(&self) -> (f64, f64) {
        self.rects.first().map(|r| (r.y, r.x)).unwrap_or((0.0, 0.0))
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "documentId": self.document_id,
            "page": self.page,
            "kind": self.kind,
            "color": self.color,
            "rects": self.rects,
            "note": self.note,
            "quote": self.quote,
            "userId": self.user_id,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

fn annotation_err(e: AnnotationError) -> HandlerErr {
    HandlerErr::bad_params(e.to_string())
}

fn load_annotation(conn: &Connection, user: Option<&str>, annotation_id: &str) -> Result<AnnotationRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM annotations WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
            ANNOTATION_COLUMNS
        ),
        rusqlite::params![annotation_id, user],
        AnnotationRow::from_row,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("annotation not found"))
}

/// Page, then top, then left.
fn list_rows(
    conn: &Connection,
    user: Option<&str>,
    document_id: &str,
    page: Option<i64>,
) -> Result<Vec<AnnotationRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM annotations
             WHERE document_id = ?1 AND (?2 IS NULL OR user_id = ?2) AND (?3 IS NULL OR page = ?3)",
            ANNOTATION_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let mut rows = stmt
        .query_map(rusqlite::params![document_id, user, page], AnnotationRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    rows.sort_by(|a, b| {
        let (ay, ax) = a.anchor();
        let (by, bx) = b.anchor();
        a.page
            .cmp(&b.page)
            .then(ay.total_cmp(&by))
            .then(ax.total_cmp(&bx))
    });
    Ok(rows)
}

fn page_param(params: &Value) -> Result<Option<i64>, HandlerErr> {
    match opt_i64(params, "page")? {
        Some(p) if p < 1 => Err(HandlerErr::bad_params("page must be >= 1")),
        other => Ok(other),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let p = &req.params;
    let document_id = required_str(p, "documentId")?;
    ensure_document_visible(conn, user, &document_id)?;
    let page = page_param(p)?.ok_or_else(|| HandlerErr::bad_params("missing page"))?;
    let kind = Kind::parse(&required_str(p, "kind")?).map_err(annotation_err)?;
    let color = match opt_str(p, "color")? {
        Some(c) => annotations::validate_color(&c).map_err(annotation_err)?,
        None => kind.default_color().to_string(),
    };
    let note = opt_str(p, "note")?;
    if kind == Kind::Note && note.is_none() {
        return Err(annotation_err(AnnotationError::NoteTextRequired));
    }
    let page_size = match (opt_f64(p, "pageWidth")?, opt_f64(p, "pageHeight")?) {
        (Some(w), Some(h)) => Some((w, h)),
        (None, None) => None,
        _ => return Err(annotation_err(AnnotationError::BadPageSize)),
    };
    let raw = annotations::parse_rects(p.get("rects").unwrap_or(&Value::Null)).map_err(annotation_err)?;
    let rects = annotations::prepare_rects(kind, &raw, page_size).map_err(annotation_err)?;
    let rects_text = serde_json::to_string(&rects).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let id = new_id();
    let now = db::now_ts();
    conn.execute(
        &format!(
            "INSERT INTO annotations({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ANNOTATION_COLUMNS
        ),
        rusqlite::params![
            id,
            document_id,
            page,
            kind.as_str(),
            color,
            rects_text,
            note,
            opt_str(p, "quote")?,
            user,
            now,
            now
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(load_annotation(conn, None, &id)?.to_json())
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let document_id = required_str(&req.params, "documentId")?;
    ensure_document_visible(conn, user, &document_id)?;
    let page = page_param(&req.params)?;
    let rows = list_rows(conn, user, &document_id, page)?;
    let annotations: Vec<Value> = rows.iter().map(AnnotationRow::to_json).collect();
    Ok(json!({ "annotations": annotations }))
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let annotation_id = required_str(&req.params, "annotationId")?;
    let row = load_annotation(conn, state.user.as_deref(), &annotation_id)?;
    let patch = patch_obj(&req.params)?;
    let pv = &req.params["patch"];

    let mut color = row.color.clone();
    let mut note = row.note.clone();
    for key in patch.keys() {
        match key.as_str() {
            "color" => {
                color = match opt_str(pv, "color")? {
                    Some(c) => annotations::validate_color(&c).map_err(annotation_err)?,
                    None => Kind::parse(&row.kind)
                        .map(|k| k.default_color().to_string())
                        .unwrap_or(row.color.clone()),
                };
            }
            "note" => note = opt_str(pv, "note")?,
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown annotation field: {}",
                    other
                )))
            }
        }
    }
    if row.kind == Kind::Note.as_str() && note.is_none() {
        return Err(annotation_err(AnnotationError::NoteTextRequired));
    }
    conn.execute(
        "UPDATE annotations SET color = ?, note = ?, updated_at = ? WHERE id = ?",
        rusqlite::params![color, note, db::now_ts(), annotation_id],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(load_annotation(conn, None, &annotation_id)?.to_json())
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let annotation_id = required_str(&req.params, "annotationId")?;
    load_annotation(conn, state.user.as_deref(), &annotation_id)?;
    conn.execute("DELETE FROM annotations WHERE id = ?", [&annotation_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true }))
}

fn handle_layout(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let p = &req.params;
    let document_id = required_str(p, "documentId")?;
    ensure_document_visible(conn, user, &document_id)?;
    let page = page_param(p)?.ok_or_else(|| HandlerErr::bad_params("missing page"))?;
    let vw = opt_f64(p, "viewportWidth")?.filter(|v| *v > 0.0);
    let vh = opt_f64(p, "viewportHeight")?.filter(|v| *v > 0.0);
    let (Some(vw), Some(vh)) = (vw, vh) else {
        return Err(HandlerErr::bad_params(
            "viewportWidth and viewportHeight must be positive",
        ));
    };

    let rows = list_rows(conn, user, &document_id, Some(page))?;
    let overlays: Vec<Value> = rows
        .iter()
        .map(|row| {
            let boxes: Vec<Rect> = row
                .rects
                .iter()
                .map(|r| annotations::to_viewport(r, vw, vh))
                .collect();
            json!({
                "annotationId": row.id,
                "kind": row.kind,
                "color": row.color,
                "note": row.note,
                "boxes": boxes,
            })
        })
        .collect();
    Ok(json!({
        "page": page,
        "viewportWidth": vw,
        "viewportHeight": vh,
        "overlays": overlays,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "annotations.create" => handle_create(state, req),
        "annotations.list" => handle_list(state, req),
        "annotations.update" => handle_update(state, req),
        "annotations.delete" => handle_delete(state, req),
        "annotations.layout" => handle_layout(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
