use std::path::PathBuf;

use crate::rag::jobs::JobStore;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub library: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Signed-in user; `None` means anonymous access to every row.
    pub user: Option<String>,
    pub jobs: JobStore,
}
