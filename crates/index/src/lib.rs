use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Hands out a fresh generation number for a new build.
///
/// Every rebuild of the knowledge base stamps its handles with a new
/// generation so handles from a superseded build can be detected.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Opaque handle to an indexed text unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    generation: u64,
    slot: u32,
}

impl UnitId {
    pub fn new(generation: u64, slot: u32) -> Self {
        Self { generation, slot }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}#{}", self.generation, self.slot)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("stale handle {handle}: index is at generation {current}")]
    StaleHandle { handle: UnitId, current: u64 },
    #[error("unknown handle {0}")]
    UnknownHandle(UnitId),
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredUnit {
    pub id: UnitId,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Entry {
    id: UnitId,
    vector: Vec<f32>,
}

/// In-memory vector index scored by cosine similarity.
///
/// Search is a linear scan over every entry, which is fine for
/// table-sized corpora. Larger corpora want an ANN structure behind the
/// same `search` signature.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    generation: u64,
    dimensions: Option<usize>,
    entries: Vec<Entry>,
}

impl EmbeddingIndex {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            dimensions: None,
            entries: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores the vector for `id`. The first insert fixes the dimensionality.
    pub fn insert(&mut self, id: UnitId, vector: Vec<f32>) -> Result<()> {
        self.check_generation(id)?;
        if vector.is_empty() {
            return Err(IndexError::InvalidArgument(format!(
                "empty vector for unit {id}"
            )));
        }
        match self.dimensions {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimensions = Some(vector.len()),
        }
        if self.entries.iter().any(|entry| entry.id == id) {
            return Err(IndexError::InvalidArgument(format!(
                "unit {id} is already indexed"
            )));
        }
        self.entries.push(Entry { id, vector });
        Ok(())
    }

    pub fn vector(&self, id: UnitId) -> Result<&[f32]> {
        self.check_generation(id)?;
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.vector.as_slice())
            .ok_or(IndexError::UnknownHandle(id))
    }

    /// Returns up to `k` entries ordered by descending cosine similarity.
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredUnit>> {
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be greater than zero".to_string(),
            ));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimensions {
            if expected != query.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        let mut hits: Vec<ScoredUnit> = self
            .entries
            .iter()
            .map(|entry| ScoredUnit {
                id: entry.id,
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();
        // stable sort: ties stay in insertion order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        tracing::trace!(
            generation = self.generation,
            scanned = self.entries.len(),
            returned = hits.len(),
            "vector search"
        );
        Ok(hits)
    }

    fn check_generation(&self, id: UnitId) -> Result<()> {
        if id.generation != self.generation {
            return Err(IndexError::StaleHandle {
                handle: id,
                current: self.generation,
            });
        }
        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for zero-norm or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
