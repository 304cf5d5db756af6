use crate::config;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_document_visible, opt_i64, opt_str, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::quiz::{self, Difficulty, Language, QuizError, QuizOptions};
use crate::rag::store;
use serde_json::json;

const MAX_QUESTIONS: i64 = 50;

fn quiz_err(e: QuizError) -> HandlerErr {
    HandlerErr::bad_params(e.to_string())
}

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let p = &req.params;
    let document_id = required_str(p, "documentId")?;
    ensure_document_visible(conn, state.user.as_deref(), &document_id)?;

    let mode = opt_str(p, "mode")?.unwrap_or_else(|| "rule".to_string());
    match mode.as_str() {
        "rule" => {}
        "llm" | "hybrid" => {
            return Err(HandlerErr::bad_params(format!(
                "mode {} needs a language model provider; none is configured",
                mode
            )))
        }
        other => return Err(HandlerErr::bad_params(format!("unknown mode: {}", other))),
    }
    let difficulty =
        Difficulty::parse(&opt_str(p, "difficulty")?.unwrap_or_else(|| "medium".to_string()))
            .map_err(quiz_err)?;
    let language = Language::parse(&opt_str(p, "language")?.unwrap_or_else(|| "vi".to_string()))
        .map_err(quiz_err)?;
    let num_questions = match opt_i64(p, "numQuestions")? {
        Some(n) if !(1..=MAX_QUESTIONS).contains(&n) => {
            return Err(HandlerErr::bad_params(format!(
                "numQuestions must be 1..={}",
                MAX_QUESTIONS
            )))
        }
        Some(n) => n as usize,
        None => config::default_num_questions(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?,
    };
    let seed = match p.get("seed").filter(|v| !v.is_null()) {
        None => rand::random::<u64>(),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| HandlerErr::bad_params("seed must be a non-negative integer"))?,
    };

    let chunks: Vec<String> = store::document_chunks(conn, &document_id, quiz::fetch_limit(num_questions))
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|c| c.content)
        .collect();
    if chunks.is_empty() {
        return Err(HandlerErr::not_found(
            "no indexed content for this document; run rag.index first",
        ));
    }
    tracing::info!(
        document = %document_id,
        num_questions,
        chunks = chunks.len(),
        "quiz.generate"
    );

    let questions = quiz::generate(
        &chunks,
        QuizOptions {
            num_questions,
            language,
            seed,
        },
    )
    .map_err(quiz_err)?;
    Ok(json!({
        "questions": questions,
        "meta": {
            "mode": "rule",
            "difficulty": difficulty,
            "language": language,
            "documentId": document_id,
            "seed": seed,
        },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "quiz.generate" => handle_generate(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
