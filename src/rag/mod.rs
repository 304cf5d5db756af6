//! Local retrieval: text extraction, chunking, hashed embeddings and a
//! SQLite-backed chunk store.

pub mod chunker;
pub mod embed;
pub mod extract;
pub mod jobs;
pub mod store;

use crate::config::RagSettings;
use chunker::{split_text, ChunkConfig};
use embed::{Embedder, HashingEmbedder};
use extract::ExtractError;
use jobs::{JobStore, Stage};
use rusqlite::Connection;
use store::{ChunkOwner, ScoredChunk, SearchScope};
use thiserror::Error;

pub const NO_MODEL_PREFACE: &str = "(no language model configured; answering from the closest context)";
pub const NO_CONTEXT_ANSWER: &str = "No relevant context was found in the indexed documents.";

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("chunk store: {0}")]
    Store(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct IndexTarget {
    pub document_id: String,
    pub subject_id: Option<String>,
    pub user_id: Option<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexOutcome {
    pub chunks: usize,
    pub message: Option<String>,
}

impl IndexOutcome {
    pub fn ok(&self) -> bool {
        self.chunks > 0
    }
}

pub struct RagEngine {
    settings: RagSettings,
    embedder: HashingEmbedder,
}

impl RagEngine {
    pub fn new(settings: RagSettings) -> Self {
        Self {
            embedder: HashingEmbedder::new(settings.embed_dim),
            settings,
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        &self.embedder
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig::new(self.settings.chunk_size, self.settings.chunk_overlap)
    }

    pub fn clamp_top_k(&self, requested: i64) -> usize {
        requested.clamp(1, self.settings.max_top_k.max(1) as i64) as usize
    }

    /// Extracts, chunks, embeds and stores one document, reporting each stage
    /// to `jobs`. A failure marks the job failed before it is returned.
    pub fn index_bytes(
        &self,
        conn: &Connection,
        jobs: &mut JobStore,
        target: &IndexTarget,
        bytes: &[u8],
    ) -> Result<IndexOutcome, RagError> {
        let doc = target.document_id.as_str();
        jobs.start(doc);
        let result = self.run_index(conn, jobs, target, bytes);
        match &result {
            Ok(outcome) if outcome.ok() => {
                jobs.success(doc);
                tracing::info!(document = doc, chunks = outcome.chunks, "document indexed");
            }
            Ok(outcome) => {
                let msg = outcome.message.as_deref().unwrap_or("nothing indexed");
                jobs.fail(doc, msg);
                tracing::info!(document = doc, "no text extracted");
            }
            Err(e) => {
                jobs.fail(doc, &e.to_string());
                tracing::warn!(document = doc, error = %e, "indexing failed");
            }
        }
        result
    }

    fn run_index(
        &self,
        conn: &Connection,
        jobs: &mut JobStore,
        target: &IndexTarget,
        bytes: &[u8],
    ) -> Result<IndexOutcome, RagError> {
        let doc = target.document_id.as_str();
        jobs.update(doc, Stage::Upload, 5, "extracting text");
        let text = extract::extract_text(bytes, &target.file_name)?;
        if text.trim().is_empty() {
            return Ok(IndexOutcome {
                chunks: 0,
                message: Some("No text extracted".to_string()),
            });
        }

        jobs.update(doc, Stage::Chunking, 25, "splitting text");
        let chunks = split_text(&text, self.chunk_config());

        jobs.update(doc, Stage::Embedding, 50, "embedding chunks");
        let embeddings = self.embedder.embed_batch(&chunks);

        jobs.update(doc, Stage::Storing, 80, "storing chunks");
        let owner = ChunkOwner {
            document_id: doc,
            subject_id: target.subject_id.as_deref(),
            user_id: target.user_id.as_deref(),
            file_name: &target.file_name,
        };
        let stored = store::replace_document_chunks(conn, &owner, &chunks, &embeddings)?;
        Ok(IndexOutcome {
            chunks: stored,
            message: None,
        })
    }

    pub fn retrieve(
        &self,
        conn: &Connection,
        query: &str,
        scope: &SearchScope<'_>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let q = self.embedder.embed(query);
        Ok(store::search(conn, &q, scope, top_k)?)
    }

    pub fn stats(&self, conn: &Connection) -> Result<store::StoreStats, RagError> {
        Ok(store::stats(conn, self.embedder.dim())?)
    }
}

/// Extractive answer built from the two best contexts.
pub fn answer(contexts: &[ScoredChunk]) -> String {
    if contexts.is_empty() {
        return NO_CONTEXT_ANSWER.to_string();
    }
    let joined = contexts
        .iter()
        .take(2)
        .map(|c| c.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n\n{}", NO_MODEL_PREFACE, joined)
}
