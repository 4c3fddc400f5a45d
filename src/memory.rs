//! Semantic memory: one embedding per conversation message, brute-force
//! cosine-similarity retrieval. O(N) per query, which is fine for a
//! personal-scale history; swap in an ANN index if that ever stops being true.

use crate::db::Database;
use crate::llm::Provider;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct MemoryHit {
    pub message_id: i64,
    pub content: String,
    pub role: String,
    pub timestamp: String,
    pub score: f32,
}

pub struct SemanticMemory {
    db: Database,
    llm: Arc<dyn Provider>,
}

impl SemanticMemory {
    pub fn new(db: Database, llm: Arc<dyn Provider>) -> Self {
        Self { db, llm }
    }

    /// Embed and store one message. Runs as a detached background task; any
    /// failure is logged and swallowed so the calling turn never blocks or
    /// breaks on indexing.
    pub async fn index(&self, message_id: i64, text: &str) {
        let vector = match self.llm.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to embed message {}: {:#}", message_id, e);
                return;
            }
        };
        if vector.is_empty() {
            warn!("Empty embedding for message {}, skipping", message_id);
            return;
        }
        if let Err(e) = self.db.save_embedding(message_id, &encode_vector(&vector)) {
            warn!("Failed to store embedding for message {}: {:#}", message_id, e);
        }
    }

    /// Top-k most similar stored messages. Returns an empty list when the
    /// query cannot be embedded or nothing is indexed yet.
    pub async fn query(&self, text: &str, k: usize) -> Vec<MemoryHit> {
        let query_vec = match self.llm.embed(text).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) | Err(_) => return Vec::new(),
        };

        let rows = match self.db.load_embeddings() {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load embeddings: {:#}", e);
                return Vec::new();
            }
        };

        let mut hits: Vec<MemoryHit> = rows
            .into_iter()
            .map(|row| {
                let stored = decode_vector(&row.embedding);
                MemoryHit {
                    message_id: row.message_id,
                    content: row.content,
                    role: row.role,
                    timestamp: row.timestamp,
                    score: cosine_similarity(&query_vec, &stored),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        debug!("Semantic query returned {} hits", hits.len());
        hits
    }
}

/// Fixed-width little-endian f32 storage. Dimensionality is whatever the
/// embedding model returns; mixing models in one store silently degrades
/// scores (mismatched lengths compare as 0).
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
