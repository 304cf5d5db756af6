use super::documents::{
    discard_document, file_name_param, insert_document, load_document, store_document_bytes,
    store_document_file, validate_link, NewDocument,
};
use super::rag::index_document;
use crate::image_pdf::{self, ImagePdfError, SourceImage};
use crate::ipc::helpers::{
    db_conn, ensure_subject_editable, opt_bool, opt_str, required_str, respond, string_array,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_local_file(state: &mut AppState, req: &Request) -> HandlerResult {
    let source = PathBuf::from(required_str(&req.params, "path")?);
    let subject_id = required_str(&req.params, "subjectId")?;
    let enable_rag = opt_bool(&req.params, "enableRag")?.unwrap_or(false);
    if !source.is_file() {
        return Err(HandlerErr::new(
            "io_failed",
            format!("not a readable file: {}", source.display()),
        ));
    }
    let file_name = file_name_param(&req.params, &source)?;
    let name = opt_str(&req.params, "name")?.unwrap_or_else(|| file_name.clone());
    let doc = NewDocument {
        subject_id,
        name,
        describes: None,
        author: None,
        link: validate_link(opt_str(&req.params, "link")?)?,
        favorite: false,
        tags: Vec::new(),
    };

    let document_id = insert_document(db_conn(state)?, state.user.as_deref(), &doc)?;
    if let Err(e) = store_document_file(state, &document_id, &source, &file_name) {
        discard_document(state, &document_id);
        return Err(e);
    }
    tracing::info!(document = %document_id, source = %source.display(), "local file imported");

    let index = if enable_rag {
        match index_document(state, &document_id) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(document = %document_id, code = e.code, "{}", e.message);
                Some(json!({ "ok": false, "chunks": 0, "error": { "code": e.code, "message": e.message } }))
            }
        }
    } else {
        None
    };
    let document = load_document(db_conn(state)?, &document_id)?;
    Ok(json!({ "document": document, "index": index }))
}

fn image_pdf_err(e: ImagePdfError) -> HandlerErr {
    match e {
        ImagePdfError::NoImages | ImagePdfError::BadImage { .. } => {
            HandlerErr::bad_params(e.to_string())
        }
        ImagePdfError::Write(_) => HandlerErr::new("io_failed", e.to_string()),
        ImagePdfError::Build(_) => HandlerErr::new("internal", e.to_string()),
    }
}

fn handle_images_to_pdf(state: &mut AppState, req: &Request) -> HandlerResult {
    let p = &req.params;
    let paths = string_array(p.get("paths").unwrap_or(&serde_json::Value::Null), "paths")?;
    if paths.is_empty() || paths.iter().any(|s| s.is_empty()) {
        return Err(HandlerErr::bad_params("paths must list at least one image"));
    }
    let subject_id = opt_str(p, "subjectId")?;
    let output_path = opt_str(p, "outputPath")?.map(PathBuf::from);
    if subject_id.is_none() && output_path.is_none() {
        return Err(HandlerErr::bad_params("subjectId or outputPath is required"));
    }
    if let Some(sid) = subject_id.as_deref() {
        ensure_subject_editable(db_conn(state)?, state.user.as_deref(), sid)?;
    }

    let mut images = Vec::with_capacity(paths.len());
    for raw in &paths {
        let path = Path::new(raw);
        let bytes = std::fs::read(path).map_err(|e| {
            HandlerErr::new("io_failed", format!("failed to read {}: {}", path.display(), e))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| raw.clone());
        images.push(SourceImage { name, bytes });
    }
    let names: Vec<String> = images.iter().map(|i| i.name.clone()).collect();
    let file_name = image_pdf::output_name(&names);
    let pdf = image_pdf::images_to_pdf(&images).map_err(image_pdf_err)?;

    if let Some(out) = output_path.as_deref() {
        std::fs::write(out, &pdf.bytes).map_err(|e| {
            HandlerErr::new("io_failed", format!("failed to write {}: {}", out.display(), e))
        })?;
    }
    let document = match subject_id {
        Some(subject_id) => {
            let doc = NewDocument {
                subject_id,
                name: opt_str(p, "name")?.unwrap_or_else(|| file_name.clone()),
                describes: None,
                author: None,
                link: None,
                favorite: false,
                tags: Vec::new(),
            };
            let document_id = insert_document(db_conn(state)?, state.user.as_deref(), &doc)?;
            if let Err(e) = store_document_bytes(state, &document_id, &pdf.bytes, &file_name) {
                discard_document(state, &document_id);
                return Err(e);
            }
            Some(load_document(db_conn(state)?, &document_id)?)
        }
        None => None,
    };
    tracing::info!(pages = pdf.pages, size = pdf.bytes.len(), "images combined into pdf");
    Ok(json!({
        "fileName": file_name,
        "pages": pdf.pages,
        "size": pdf.bytes.len(),
        "document": document,
        "outputPath": output_path.map(|o| o.to_string_lossy().to_string()),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "imports.localFile" => handle_local_file(state, req),
        "imports.imagesToPdf" => handle_images_to_pdf(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
