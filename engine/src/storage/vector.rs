//! Dense-vector side of the store.
//!
//! Vectors live in a plain `chunk_vectors` table as little-endian `f32`
//! blobs; search is exact brute-force cosine over all rows. That scales
//! linearly but produces exactly the scores an ANN index would, so the two
//! paths are interchangeable without reordering results.

use rusqlite::Connection;
use rusqlite::params;

use crate::error::EngineError;
use crate::error::Result;
use crate::types::ChunkId;

/// Serialize a vector as raw little-endian f32 bytes.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

/// Deserialize a raw little-endian f32 blob.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]; 0 for zero-length or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Reject vectors whose length differs from the store dimension.
pub fn check_dimension(v: &[f32], expected: i32) -> Result<()> {
    if v.len() as i32 != expected {
        return Err(EngineError::EmbeddingDimensionMismatch {
            expected,
            actual: v.len() as i32,
        });
    }
    Ok(())
}

/// Upsert one chunk's embedding.
pub fn insert_vector(conn: &Connection, chunk_id: ChunkId, embedding: &[f32]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO chunk_vectors (chunk_id, embedding) VALUES (?1, ?2)",
        params![chunk_id, encode_vector(embedding)],
    )
    .map_err(|e| EngineError::sqlite_op("insert vector", e))?;
    Ok(())
}

/// Exact top-k by cosine similarity over every stored vector.
pub fn search_top_k(conn: &Connection, query: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
    let mut stmt = conn
        .prepare("SELECT chunk_id, embedding FROM chunk_vectors")
        .map_err(|e| EngineError::sqlite_op("prepare vector scan", e))?;

    let rows = stmt
        .query_map([], |row| {
            let id: ChunkId = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob))
        })
        .map_err(|e| EngineError::sqlite_op("vector scan", e))?;

    let mut scored: Vec<(ChunkId, f32)> = Vec::new();
    for row in rows {
        let (id, blob) = row.map_err(|e| EngineError::sqlite_op("read vector row", e))?;
        let score = cosine_similarity(query, &decode_vector(&blob));
        scored.push((id, score));
    }

    // Descending by score; ties broken by id for determinism.
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);
    Ok(scored)
}
