//! Knowledge retriever adapter: semantic + keyword search over an external
//! vector store, behind traits so the core never sees the store directly.
//!
//! Reranking model (weights configurable, defaults sum to 1.0):
//! ```text
//! score = similarity(0.55) + recency(0.05) + source_authority(0.20) + phase_match(0.20)
//! ```
//! The in-memory store implements the same traits over locally held vectors
//! and is the test/offline backend.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use atelier_types::DesignPhase;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),
}

// ── Passages ──────────────────────────────────────────────────────────────────

/// A ranked passage returned by search, with enough metadata for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Raw semantic similarity to the query, `[0, 1]`.
    pub score: f32,
    pub source: String,
    /// Editorial authority of the source, `[0, 1]`.
    pub authority: f32,
    /// Recency of the source, `[0, 1]` (1.0 = current).
    pub recency: f32,
    /// Design phases this passage is most relevant to.
    pub phase_tags: Vec<DesignPhase>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict results to passages tagged with this phase, softly: phase
    /// match contributes to the rerank score instead of hard-filtering.
    pub phase: Option<DesignPhase>,
}

// ── Traits ────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

// ── Vector & lexical helpers ──────────────────────────────────────────────────

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
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

/// Lowercased word set, punctuation stripped, short tokens dropped.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(ToString::to_string)
        .collect()
}

/// Jaccard overlap of the token sets of two texts.
pub fn jaccard(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    intersection / union
}

// ── Reranker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub similarity: f32,
    pub recency: f32,
    pub authority: f32,
    pub phase_match: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self { similarity: 0.55, recency: 0.05, authority: 0.2, phase_match: 0.2 }
    }
}

/// Sort passages by the weighted rerank score, best first.
pub fn rerank(passages: &mut [Passage], weights: RerankWeights, phase: Option<DesignPhase>) {
    let score = |p: &Passage| -> f32 {
        let phase_match = match phase {
            Some(ph) if p.phase_tags.contains(&ph) => 1.0,
            Some(_) => 0.0,
            // Without a phase filter the term is neutral rather than zero.
            None => 0.5,
        };
        weights.similarity * p.score
            + weights.recency * p.recency
            + weights.authority * p.authority
            + weights.phase_match * phase_match
    };
    passages.sort_by(|a, b| score(b).total_cmp(&score(a)));
}

// ── Deterministic hashing embedder ────────────────────────────────────────────

/// Feature-hashing embedder: each token is hashed into one of `dim` buckets
/// and the vector is L2-normalized.  Deterministic, dependency-free, and
/// cosine-meaningful for overlapping vocabulary — the offline stand-in for
/// the external embedding model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize % self.dim;
            // Sign bit from the hash halves bucket-collision bias.
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// One indexed document chunk.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source: String,
    pub authority: f32,
    pub recency: f32,
    pub phase_tags: Vec<DesignPhase>,
    embedding: Vec<f32>,
}

/// Read-only in-memory knowledge store.  Search merges semantic similarity
/// with lexical overlap (`0.7·cosine + 0.3·jaccard`) before reranking.
pub struct InMemoryStore {
    documents: Vec<Document>,
    embedder: HashingEmbedder,
    weights: RerankWeights,
}

impl InMemoryStore {
    pub fn new(weights: RerankWeights) -> Self {
        Self { documents: Vec::new(), embedder: HashingEmbedder::default(), weights }
    }

    pub fn add_document(
        &mut self,
        text: impl Into<String>,
        source: impl Into<String>,
        authority: f32,
        recency: f32,
        phase_tags: Vec<DesignPhase>,
    ) {
        let text = text.into();
        let embedding = self.embedder.embed_one(&text);
        self.documents.push(Document {
            text,
            source: source.into(),
            authority: authority.clamp(0.0, 1.0),
            recency: recency.clamp(0.0, 1.0),
            phase_tags,
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait::async_trait]
impl Retriever for InMemoryStore {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let query_embedding = self.embedder.embed_one(query);

        let mut passages: Vec<Passage> = self
            .documents
            .iter()
            .map(|doc| {
                let semantic = cosine_similarity(&doc.embedding, &query_embedding).max(0.0);
                let lexical = jaccard(&doc.text, query);
                Passage {
                    text: doc.text.clone(),
                    score: (0.7 * semantic + 0.3 * lexical).clamp(0.0, 1.0),
                    source: doc.source.clone(),
                    authority: doc.authority,
                    recency: doc.recency,
                    phase_tags: doc.phase_tags.clone(),
                    metadata: HashMap::new(),
                }
            })
            .collect();

        rerank(&mut passages, self.weights, filters.phase);
        passages.truncate(k);
        debug!(query_len = query.len(), hits = passages.len(), "in-memory search");
        Ok(passages)
    }
}

#[async_trait::async_trait]
impl Embedder for InMemoryStore {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.embedder.embed(texts).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
