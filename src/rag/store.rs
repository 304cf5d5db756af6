use super::embed::{cosine, from_blob, to_blob};
use rusqlite::{params, Connection};

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: i64,
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// Where a search looks: one subject and/or one owner.
#[derive(Debug, Clone, Default)]
pub struct SearchScope<'a> {
    pub subject_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
}

pub struct ChunkOwner<'a> {
    pub document_id: &'a str,
    pub subject_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub file_name: &'a str,
}

/// Replaces every chunk of a document in one transaction.
pub fn replace_document_chunks(
    conn: &Connection,
    owner: &ChunkOwner<'_>,
    chunks: &[String],
    embeddings: &[Vec<f32>],
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM rag_chunks WHERE document_id = ?",
        [owner.document_id],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO rag_chunks(id, document_id, subject_id, user_id, file_name, chunk_index, content, embedding)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (i, (content, emb)) in chunks.iter().zip(embeddings).enumerate() {
            stmt.execute(params![
                uuid::Uuid::new_v4().to_string(),
                owner.document_id,
                owner.subject_id,
                owner.user_id,
                owner.file_name,
                i as i64,
                content,
                to_blob(emb),
            ])?;
        }
    }
    tx.commit()?;
    Ok(chunks.len().min(embeddings.len()))
}

pub fn delete_document_chunks(conn: &Connection, document_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM rag_chunks WHERE document_id = ?", [document_id])
}

/// Chunks of one document in index order.
pub fn document_chunks(
    conn: &Connection,
    document_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(
        "SELECT document_id, chunk_index, file_name, content
         FROM rag_chunks
         WHERE document_id = ?
         ORDER BY chunk_index
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![document_id, limit as i64], |r| {
        Ok(ChunkRecord {
            document_id: r.get(0)?,
            chunk_index: r.get(1)?,
            file_name: r.get(2)?,
            content: r.get(3)?,
        })
    })?;
    rows.collect()
}

/// Brute-force cosine ranking. Chunks embedded at another dimension are
/// skipped.
pub fn search(
    conn: &Connection,
    query: &[f32],
    scope: &SearchScope<'_>,
    top_k: usize,
) -> rusqlite::Result<Vec<ScoredChunk>> {
    let mut stmt = conn.prepare(
        "SELECT document_id, chunk_index, file_name, content, embedding
         FROM rag_chunks
         WHERE (?1 IS NULL OR subject_id = ?1)
           AND (?2 IS NULL OR user_id = ?2)",
    )?;
    let mut rows = stmt.query(params![scope.subject_id, scope.user_id])?;
    let mut scored = Vec::new();
    while let Some(r) = rows.next()? {
        let blob: Vec<u8> = r.get(4)?;
        let emb = from_blob(&blob);
        if emb.len() != query.len() {
            continue;
        }
        scored.push(ScoredChunk {
            chunk: ChunkRecord {
                document_id: r.get(0)?,
                chunk_index: r.get(1)?,
                file_name: r.get(2)?,
                content: r.get(3)?,
            },
            score: cosine(query, &emb),
        });
    }
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    scored.truncate(top_k);
    Ok(scored)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub stale: usize,
}

/// Counts chunks, and those whose embedding width differs from `dim`.
pub fn stats(conn: &Connection, dim: usize) -> rusqlite::Result<StoreStats> {
    let (total, stale): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN length(embedding) != ? THEN 1 ELSE 0 END), 0)
         FROM rag_chunks",
        [(dim * 4) as i64],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(StoreStats {
        total: total.max(0) as usize,
        stale: stale.max(0) as usize,
    })
}
