use datachat_index::{next_generation, EmbeddingIndex, UnitId};

use crate::document::{DocumentConfig, DocumentStore, TextUnit};
use crate::embedding::Embedder;
use crate::error::{CoreError, Result};
use crate::table::Table;

/// A scored unit borrowed from the knowledge base that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub unit: &'a TextUnit,
    pub score: f32,
}

/// Document store and embedding index from a single table load.
///
/// Both halves share one generation, so handles are only valid against the
/// build that issued them. A knowledge base is never mutated after `build`;
/// replacing data means building a new one.
#[derive(Debug)]
pub struct KnowledgeBase {
    store: DocumentStore,
    index: EmbeddingIndex,
    embedder_model: String,
}

impl KnowledgeBase {
    pub fn build(table: &Table, embedder: &dyn Embedder, config: &DocumentConfig) -> Result<Self> {
        let generation = next_generation();
        let store = DocumentStore::build(table, config, generation)?;
        let mut index = EmbeddingIndex::new(generation);
        let texts: Vec<&str> = store.units().iter().map(|unit| unit.content.as_str()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .map_err(|e| CoreError::Embedding(format!("{e:#}")))?;
        if vectors.len() != texts.len() {
            return Err(CoreError::Embedding(format!(
                "embedder returned {} vectors for {} units",
                vectors.len(),
                texts.len()
            )));
        }
        for (unit, vector) in store.units().iter().zip(vectors) {
            index.insert(unit.id, vector)?;
        }
        tracing::info!(
            generation,
            units = store.len(),
            dimensions = index.dimensions().unwrap_or(0),
            model = embedder.model_name(),
            "knowledge base built"
        );
        Ok(Self {
            store,
            index,
            embedder_model: embedder.model_name().to_string(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn embedder_model(&self) -> &str {
        &self.embedder_model
    }

    pub fn unit(&self, id: UnitId) -> Result<&TextUnit> {
        Ok(self.store.get(id)?)
    }

    /// Top-`k` units for an already-embedded query, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit<'_>>> {
        let scored = self.index.search(query, k)?;
        scored
            .into_iter()
            .map(|hit| {
                Ok(Hit {
                    unit: self.unit(hit.id)?,
                    score: hit.score,
                })
            })
            .collect()
    }
}
