use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Upload,
    Chunking,
    Embedding,
    Storing,
    Indexed,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub document_id: String,
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    pub updated_at: Option<String>,
}

/// Indexing progress per document, held in memory for the daemon's lifetime.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<String, JobStatus>,
}

impl JobStore {
    pub fn start(&mut self, document_id: &str) {
        self.jobs.insert(
            document_id.to_string(),
            JobStatus {
                document_id: document_id.to_string(),
                stage: Stage::Upload,
                progress: 0,
                message: "file received".to_string(),
                updated_at: Some(crate::db::now_ts()),
            },
        );
    }

    pub fn update(&mut self, document_id: &str, stage: Stage, progress: i64, message: &str) {
        let job = self
            .jobs
            .entry(document_id.to_string())
            .or_insert_with(|| JobStatus {
                document_id: document_id.to_string(),
                stage,
                progress: 0,
                message: String::new(),
                updated_at: None,
            });
        job.stage = stage;
        job.progress = progress.clamp(0, 100) as u8;
        job.message = message.to_string();
        job.updated_at = Some(crate::db::now_ts());
    }

    pub fn fail(&mut self, document_id: &str, message: &str) {
        self.update(document_id, Stage::Failed, 100, message);
    }

    pub fn success(&mut self, document_id: &str) {
        self.update(document_id, Stage::Indexed, 100, "indexing complete");
    }

    pub fn get(&self, document_id: &str) -> JobStatus {
        self.jobs.get(document_id).cloned().unwrap_or_else(|| JobStatus {
            document_id: document_id.to_string(),
            stage: Stage::Unknown,
            progress: 0,
            message: "no job".to_string(),
            updated_at: None,
        })
    }

    pub fn forget(&mut self, document_id: &str) {
        self.jobs.remove(document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_job_reads_as_unknown() {
        let store = JobStore::default();
        let s = store.get("doc-1");
        assert_eq!(s.stage, Stage::Unknown);
        assert_eq!(s.progress, 0);
    }

    #[test]
    fn progress_is_clamped_and_terminal_states_are_full() {
        let mut store = JobStore::default();
        store.start("d");
        store.update("d", Stage::Chunking, 250, "chunking");
        assert_eq!(store.get("d").progress, 100);
        store.update("d", Stage::Embedding, -5, "embedding");
        assert_eq!(store.get("d").progress, 0);
        store.fail("d", "boom");
        let s = store.get("d");
        assert_eq!(s.stage, Stage::Failed);
        assert_eq!(s.progress, 100);
        assert_eq!(s.message, "boom");
    }

    #[test]
    fn stage_serializes_lowercase() {
        let v = serde_json::to_value(Stage::Indexed).expect("serialize");
        assert_eq!(v, serde_json::json!("indexed"));
    }
}
