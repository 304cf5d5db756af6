use crate::config;
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_subject_visible, json_column, new_id, opt_str, patch_obj,
    required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::recurrence::{self, Recurrence, ScheduleError};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const SCHEDULE_COLUMNS: &str =
    "id, subject_id, title, starts_at, ends_at, location, note, recurrence_rule, user_id, created_at";

#[derive(Debug, Clone)]
struct ScheduleRow {
    id: String,
    subject_id: Option<String>,
    title: Option<String>,
    starts_at: String,
    ends_at: String,
    location: Option<String>,
    note: Option<String>,
    recurrence_rule: Option<String>,
    user_id: Option<String>,
    created_at: String,
}

impl ScheduleRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            subject_id: r.get(1)?,
            title: r.get(2)?,
            starts_at: r.get(3)?,
            ends_at: r.get(4)?,
            location: r.get(5)?,
            note: r.get(6)?,
            recurrence_rule: r.get(7)?,
            user_id: r.get(8)?,
            created_at: r.get(9)?,
        })
    }

    fn rule_json(&self) -> Value {
        json_column(self.recurrence_rule.clone(), Value::Null)
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "subjectId": self.subject_id,
            "title": self.title,
            "startsAt": self.starts_at,
            "endsAt": self.ends_at,
            "location": self.location,
            "note": self.note,
            "recurrenceRule": self.rule_json(),
            "userId": self.user_id,
            "createdAt": self.created_at,
        })
    }
}

fn schedule_err(e: ScheduleError) -> HandlerErr {
    HandlerErr::bad_params(e.to_string())
}

/// Validated span plus the rule in its stored JSON form.
pub(super) fn normalize_schedule(
    starts_at: &str,
    ends_at: &str,
    rule: Option<&Value>,
) -> Result<(String, String, Option<String>), HandlerErr> {
    let (start, end) = recurrence::validate_span(starts_at, ends_at).map_err(schedule_err)?;
    let rule = Recurrence::parse(rule, start).map_err(schedule_err)?;
    let rule_text = match rule.to_json() {
        Some(v) => Some(
            serde_json::to_string(&v).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
        ),
        None => None,
    };
    Ok((
        recurrence::format_datetime(start),
        recurrence::format_datetime(end),
        rule_text,
    ))
}

fn bound_param(params: &Value, key: &'static str) -> Result<Option<String>, HandlerErr> {
    match opt_str(params, key)? {
        None => Ok(None),
        Some(raw) => recurrence::parse_datetime(&raw)
            .map(|dt| Some(recurrence::format_datetime(dt)))
            .ok_or_else(|| schedule_err(ScheduleError::BadDateTime(key))),
    }
}

fn required_bound(params: &Value, key: &'static str) -> Result<NaiveDateTime, HandlerErr> {
    let raw = required_str(params, key)?;
    recurrence::parse_datetime(&raw).ok_or_else(|| schedule_err(ScheduleError::BadDateTime(key)))
}

fn check_subject_ref(conn: &Connection, user: Option<&str>, subject_id: Option<&str>) -> Result<(), HandlerErr> {
    if let Some(sid) = subject_id {
        ensure_subject_visible(conn, user, sid)?;
    }
    Ok(())
}

fn load_schedule(conn: &Connection, user: Option<&str>, schedule_id: &str) -> Result<ScheduleRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM schedules WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
            SCHEDULE_COLUMNS
        ),
        rusqlite::params![schedule_id, user],
        ScheduleRow::from_row,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("schedule not found"))
}

fn query_schedules(
    conn: &Connection,
    user: Option<&str>,
    subject_id: Option<&str>,
    extra_where: &str,
    extra: &[&dyn rusqlite::ToSql],
) -> Result<Vec<ScheduleRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM schedules
         WHERE (?1 IS NULL OR user_id = ?1)
           AND (?2 IS NULL OR subject_id = ?2)
           {}
         ORDER BY starts_at, created_at",
        SCHEDULE_COLUMNS, extra_where
    );
    let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&user, &subject_id];
    bind.extend_from_slice(extra);
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map(bind.as_slice(), ScheduleRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(rows)
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let from = bound_param(&req.params, "from")?;
    let to = bound_param(&req.params, "to")?;
    let subject_id = opt_str(&req.params, "subjectId")?;
    let rows = query_schedules(
        conn,
        state.user.as_deref(),
        subject_id.as_deref(),
        "AND (?3 IS NULL OR starts_at >= ?3) AND (?4 IS NULL OR ends_at <= ?4)",
        &[&from, &to],
    )?;
    let schedules: Vec<Value> = rows.iter().map(ScheduleRow::to_json).collect();
    Ok(json!({ "schedules": schedules }))
}

fn handle_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let p = &req.params;
    let starts_at = required_str(p, "startsAt")?;
    let ends_at = required_str(p, "endsAt")?;
    let subject_id = opt_str(p, "subjectId")?;
    check_subject_ref(conn, state.user.as_deref(), subject_id.as_deref())?;
    let (starts_at, ends_at, rule) = normalize_schedule(&starts_at, &ends_at, p.get("recurrenceRule"))?;

    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO schedules({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SCHEDULE_COLUMNS
        ),
        rusqlite::params![
            id,
            subject_id,
            opt_str(p, "title")?,
            starts_at,
            ends_at,
            opt_str(p, "location")?,
            opt_str(p, "note")?,
            rule,
            state.user.as_deref(),
            db::now_ts(),
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(load_schedule(conn, None, &id)?.to_json())
}

fn handle_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let schedule_id = required_str(&req.params, "scheduleId")?;
    let mut row = load_schedule(conn, state.user.as_deref(), &schedule_id)?;
    let patch = patch_obj(&req.params)?;
    let pv = &req.params["patch"];

    let mut rule = row.rule_json();
    for key in patch.keys() {
        match key.as_str() {
            "subjectId" => {
                row.subject_id = opt_str(pv, "subjectId")?;
                check_subject_ref(conn, state.user.as_deref(), row.subject_id.as_deref())?;
            }
            "title" => row.title = opt_str(pv, "title")?,
            "startsAt" => row.starts_at = required_str(pv, "startsAt")?,
            "endsAt" => row.ends_at = required_str(pv, "endsAt")?,
            "location" => row.location = opt_str(pv, "location")?,
            "note" => row.note = opt_str(pv, "note")?,
            "recurrenceRule" => rule = pv["recurrenceRule"].clone(),
            other => return Err(HandlerErr::bad_params(format!("unknown schedule field: {}", other))),
        }
    }
    let (starts_at, ends_at, rule_text) = normalize_schedule(&row.starts_at, &row.ends_at, Some(&rule))?;

    conn.execute(
        "UPDATE schedules
         SET subject_id = ?, title = ?, starts_at = ?, ends_at = ?, location = ?, note = ?, recurrence_rule = ?
         WHERE id = ?",
        rusqlite::params![
            row.subject_id,
            row.title,
            starts_at,
            ends_at,
            row.location,
            row.note,
            rule_text,
            schedule_id,
        ],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(load_schedule(conn, None, &schedule_id)?.to_json())
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let schedule_id = required_str(&req.params, "scheduleId")?;
    load_schedule(conn, state.user.as_deref(), &schedule_id)?;
    conn.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true }))
}

fn handle_expand(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let from = required_bound(&req.params, "from")?;
    let to = required_bound(&req.params, "to")?;
    if to <= from {
        return Err(HandlerErr::bad_params("to must be after from"));
    }
    let subject_id = opt_str(&req.params, "subjectId")?;
    let limit = config::max_occurrences(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    // Nothing starting at or after `to` can overlap the window.
    let to_text = recurrence::format_datetime(to);
    let rows = query_schedules(
        conn,
        state.user.as_deref(),
        subject_id.as_deref(),
        "AND starts_at < ?3",
        &[&to_text],
    )?;

    let mut truncated = false;
    let mut occurrences: Vec<(NaiveDateTime, Value)> = Vec::new();
    for row in &rows {
        let Ok((start, end)) = recurrence::validate_span(&row.starts_at, &row.ends_at) else {
            tracing::warn!(schedule = %row.id, "skipping schedule with invalid span");
            continue;
        };
        let rule = match Recurrence::parse(Some(&row.rule_json()), start) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!(schedule = %row.id, error = %e, "skipping schedule with invalid rule");
                continue;
            }
        };
        let (occ, capped) = recurrence::expand(start, end, &rule, from, to, limit);
        truncated |= capped;
        for o in occ {
            occurrences.push((
                o.start,
                json!({
                    "scheduleId": row.id,
                    "subjectId": row.subject_id,
                    "title": row.title,
                    "location": row.location,
                    "note": row.note,
                    "startsAt": recurrence::format_datetime(o.start),
                    "endsAt": recurrence::format_datetime(o.end),
                    "recurring": rule != Recurrence::Once,
                }),
            ));
        }
    }
    occurrences.sort_by(|a, b| a.0.cmp(&b.0));
    if occurrences.len() > limit {
        occurrences.truncate(limit);
        truncated = true;
    }
    let occurrences: Vec<Value> = occurrences.into_iter().map(|(_, v)| v).collect();
    Ok(json!({ "occurrences": occurrences, "truncated": truncated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedules.list" => handle_list(state, req),
        "schedules.create" => handle_create(state, req),
        "schedules.update" => handle_update(state, req),
        "schedules.delete" => handle_delete(state, req),
        "schedules.expand" => handle_expand(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
