use std::ops::Range;
use std::sync::Arc;

use datachat_core::{CoreError, DocumentConfig, Embedder, KnowledgeBase, Table, UnitId, UnitKind};
use datachat_llm::truncate_chars;
use parking_lot::RwLock;

/// Returned by `query` before any table has been indexed.
pub const NO_DATA_LOADED: &str = "No data loaded. Please load a table before asking questions.";

const UNIT_SEPARATOR: &str = "\n\n";

/// An owned view of one search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub rows: Option<Range<usize>>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Build the hits were read from.
    pub generation: u64,
    pub hits: Vec<RetrievedUnit>,
    pub context: String,
}

/// Owns the current knowledge base and answers similarity queries against it.
///
/// Loads build a complete knowledge base off to the side and then swap the
/// shared reference, so a query holds either the old build or the new one.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    document: DocumentConfig,
    context_budget: usize,
    current: RwLock<Option<Arc<KnowledgeBase>>>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, document: DocumentConfig, context_budget: usize) -> Self {
        Self {
            embedder,
            document,
            context_budget,
            current: RwLock::new(None),
        }
    }

    pub fn context_budget(&self) -> usize {
        self.context_budget
    }

    /// Builds a knowledge base for `table` and makes it current. On error the
    /// previous knowledge base stays in place.
    pub fn index(&self, table: &Table) -> Result<Arc<KnowledgeBase>, CoreError> {
        let knowledge = Arc::new(KnowledgeBase::build(table, self.embedder.as_ref(), &self.document)?);
        let previous = self.current.write().replace(Arc::clone(&knowledge));
        tracing::info!(
            generation = knowledge.generation(),
            replaced = previous.map(|kb| kb.generation()),
            "index swapped"
        );
        Ok(knowledge)
    }

    pub fn clear(&self) {
        self.current.write().take();
    }

    pub fn snapshot(&self) -> Option<Arc<KnowledgeBase>> {
        self.current.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Top-`k` units for `text` plus their assembled context. `None` when
    /// nothing is indexed.
    pub fn retrieve(&self, text: &str, k: usize) -> Result<Option<Retrieval>, CoreError> {
        let Some(knowledge) = self.snapshot() else {
            return Ok(None);
        };
        let query = self
            .embedder
            .embed(text)
            .map_err(|e| CoreError::Embedding(format!("{e:#}")))?;
        let hits = knowledge.search(&query, k)?;
        let context = assemble_context(hits.iter().map(|hit| hit.unit.content.as_str()), self.context_budget);
        tracing::debug!(
            generation = knowledge.generation(),
            hits = hits.len(),
            context_chars = context.chars().count(),
            "retrieved context"
        );
        Ok(Some(Retrieval {
            generation: knowledge.generation(),
            hits: hits
                .iter()
                .map(|hit| RetrievedUnit {
                    id: hit.unit.id,
                    kind: hit.unit.kind,
                    rows: hit.unit.rows.clone(),
                    score: hit.score,
                })
                .collect(),
            context,
        }))
    }

    /// Context string for `text`, or [`NO_DATA_LOADED`] when nothing is indexed.
    pub fn query(&self, text: &str, k: usize) -> Result<String, CoreError> {
        Ok(self
            .retrieve(text, k)?
            .map(|retrieval| retrieval.context)
            .unwrap_or_else(|| NO_DATA_LOADED.to_string()))
    }
}

/// Joins whole units with blank lines while they fit in `budget` characters.
/// Only a first unit longer than the budget is cut.
pub fn assemble_context<'a>(contents: impl IntoIterator<Item = &'a str>, budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;
    for content in contents {
        let separator = if context.is_empty() { 0 } else { UNIT_SEPARATOR.len() };
        let len = content.chars().count();
        if used + separator + len <= budget {
            if separator > 0 {
                context.push_str(UNIT_SEPARATOR);
            }
            context.push_str(content);
            used += separator + len;
            continue;
        }
        if context.is_empty() {
            context.push_str(truncate_chars(content, budget));
        }
        break;
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_core::{HashEmbedder, IndexError, Value};

    fn retriever(budget: usize) -> Retriever {
        Retriever::new(Arc::new(HashEmbedder::default()), DocumentConfig::default(), budget)
    }

    fn table() -> Table {
        Table::new(
            vec!["city".into(), "units".into()],
            vec![
                vec![Value::Text("Pune".into()), Value::Int(12)],
                vec![Value::Text("Surat".into()), Value::Int(7)],
            ],
        )
    }

    #[test]
    fn unindexed_query_returns_sentinel() {
        assert_eq!(retriever(1000).query("anything", 5).unwrap(), NO_DATA_LOADED);
    }

    #[test]
    fn context_respects_budget() {
        let retriever = retriever(40);
        retriever.index(&table()).unwrap();
        let context = retriever.query("units in Pune", 5).unwrap();
        assert!(!context.is_empty());
        assert!(context.chars().count() <= 40);
    }

    #[test]
    fn hits_come_from_one_generation() {
        let retriever = retriever(1000);
        let kb = retriever.index(&table()).unwrap();
        let retrieval = retriever.retrieve("Surat", 5).unwrap().unwrap();
        assert_eq!(retrieval.generation, kb.generation());
        assert_eq!(retrieval.hits.len(), 3);
        assert!(retrieval.hits.iter().all(|hit| hit.id.generation() == kb.generation()));
    }

    #[test]
    fn zero_k_is_rejected() {
        let retriever = retriever(1000);
        retriever.index(&table()).unwrap();
        assert!(matches!(
            retriever.query("x", 0),
            Err(CoreError::Index(IndexError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn failed_index_keeps_previous_build() {
        let retriever = retriever(1000);
        let kb = retriever.index(&table()).unwrap();
        let empty = Table::new(vec!["city".into()], Vec::new());
        assert!(retriever.index(&empty).is_err());
        assert_eq!(retriever.snapshot().map(|kb| kb.generation()), Some(kb.generation()));
    }

    #[test]
    fn assembly_keeps_whole_units() {
        let units = ["aaaa", "bbbb", "cccc"];
        assert_eq!(assemble_context(units, 10), "aaaa\n\nbbbb");
        assert_eq!(assemble_context(units, 9), "aaaa");
        assert_eq!(assemble_context(["abcdefgh"], 5), "abcde");
        assert_eq!(assemble_context(units, 0), "");
        assert_eq!(assemble_context(Vec::<&str>::new(), 10), "");
    }
}
