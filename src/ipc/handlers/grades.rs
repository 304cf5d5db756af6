use crate::db;
use crate::gpa::{self, GradeEntry};
use crate::ipc::helpers::{
    db_conn, db_err, ensure_subject_visible, new_id, opt_f64, opt_str, required_str, respond,
    to_result, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const GRADE_COLUMNS: &str = "id, subject_id, course_name, semester, credits, score, user_id, created_at";

struct GradeRow {
    id: String,
    subject_id: Option<String>,
    course_name: String,
    semester: Option<String>,
    credits: f64,
    score: Option<f64>,
    user_id: Option<String>,
    created_at: String,
}

impl GradeRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            subject_id: r.get(1)?,
            course_name: r.get(2)?,
            semester: r.get(3)?,
            credits: r.get(4)?,
            score: r.get(5)?,
            user_id: r.get(6)?,
            created_at: r.get(7)?,
        })
    }

    fn to_json(&self) -> Value {
        let letter = self.score.map(|s| gpa::letter_for(s).0);
        json!({
            "id": self.id,
            "subjectId": self.subject_id,
            "courseName": self.course_name,
            "semester": self.semester,
            "credits": self.credits,
            "score": self.score,
            "letter": letter,
            "userId": self.user_id,
            "createdAt": self.created_at,
        })
    }
}

fn load_grade(conn: &Connection, user: Option<&str>, grade_id: &str) -> Result<GradeRow, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {} FROM grades WHERE id = ?1 AND (?2 IS NULL OR user_id = ?2)",
            GRADE_COLUMNS
        ),
        rusqlite::params![grade_id, user],
        GradeRow::from_row,
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("grade not found"))
}

fn list_grades(conn: &Connection, user: Option<&str>, semester: Option<&str>) -> Result<Vec<GradeRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM grades
             WHERE (?1 IS NULL OR user_id = ?1)
               AND (?2 IS NULL OR semester = ?2)
             ORDER BY semester, course_name, created_at",
            GRADE_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map(rusqlite::params![user, semester], GradeRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(rows)
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let semester = opt_str(&req.params, "semester")?;
    let rows = list_grades(conn, state.user.as_deref(), semester.as_deref())?;
    let grades: Vec<Value> = rows.iter().map(GradeRow::to_json).collect();
    Ok(json!({ "grades": grades }))
}

fn handle_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let grade_id = opt_str(&req.params, "gradeId")?;
    let input = req
        .params
        .get("input")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("input must be an object"))?;

    let existing = match grade_id.as_deref() {
        Some(id) => Some(load_grade(conn, user, id)?),
        None => None,
    };
    // Updates keep fields the input leaves out.
    let has = |key: &str| input.get(key).is_some();
    let course_name = match (&existing, has("courseName")) {
        (Some(row), false) => row.course_name.clone(),
        _ => required_str(input, "courseName")?,
    };
    let subject_id = match (&existing, has("subjectId")) {
        (Some(row), false) => row.subject_id.clone(),
        _ => opt_str(input, "subjectId")?,
    };
    let semester = match (&existing, has("semester")) {
        (Some(row), false) => row.semester.clone(),
        _ => opt_str(input, "semester")?,
    };
    let credits = match (&existing, has("credits")) {
        (Some(row), false) => row.credits,
        _ => opt_f64(input, "credits")?.ok_or_else(|| HandlerErr::bad_params("missing credits"))?,
    };
    let score = match (&existing, has("score")) {
        (Some(row), false) => row.score,
        _ => opt_f64(input, "score")?,
    };

    let credits = gpa::validate_credits(credits).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let score = score
        .map(gpa::validate_score)
        .transpose()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    if let Some(sid) = subject_id.as_deref() {
        ensure_subject_visible(conn, user, sid)?;
    }

    let id = match existing {
        Some(row) => {
            conn.execute(
                "UPDATE grades SET subject_id = ?, course_name = ?, semester = ?, credits = ?, score = ?
                 WHERE id = ?",
                rusqlite::params![subject_id, course_name, semester, credits, score, row.id],
            )
            .map_err(db_err("db_update_failed"))?;
            row.id
        }
        None => {
            let id = new_id();
            conn.execute(
                &format!("INSERT INTO grades({}) VALUES(?, ?, ?, ?, ?, ?, ?, ?)", GRADE_COLUMNS),
                rusqlite::params![id, subject_id, course_name, semester, credits, score, user, db::now_ts()],
            )
            .map_err(db_err("db_insert_failed"))?;
            id
        }
    };
    Ok(load_grade(conn, None, &id)?.to_json())
}

fn handle_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let grade_id = required_str(&req.params, "gradeId")?;
    load_grade(conn, state.user.as_deref(), &grade_id)?;
    conn.execute("DELETE FROM grades WHERE id = ?", [&grade_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true }))
}

fn handle_summary(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let rows = list_grades(conn, state.user.as_deref(), None)?;
    let entries: Vec<GradeEntry> = rows
        .into_iter()
        .map(|r| GradeEntry {
            semester: r.semester,
            credits: r.credits,
            score: r.score,
        })
        .collect();
    to_result(&gpa::summarize(&entries))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.list" => handle_list(state, req),
        "grades.upsert" => handle_upsert(state, req),
        "grades.delete" => handle_delete(state, req),
        "grades.summary" => handle_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
