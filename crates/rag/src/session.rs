use std::path::Path;
use std::sync::Arc;

use datachat_core::{KnowledgeBase, Table, NO_DATA_PREVIEW};
use datachat_llm::{BackendDescriptor, BackendRegistry, Language, PromptFormatter, RegistryError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::embedding::EmbeddingClient;
use crate::orchestrator::{Orchestrator, ERROR_PREFIX};
use crate::retriever::{Retriever, NO_DATA_LOADED};

pub const EMPTY_QUESTION: &str = "Please enter a question.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug)]
struct Conversation {
    backend: String,
    language: Language,
    history: Vec<Turn>,
}

/// One user's engine state: the loaded table, the current backend and
/// language, and the chat history tied to that backend.
///
/// All methods take `&self`; a session can be shared across threads.
pub struct Session {
    config: EngineConfig,
    retriever: Retriever,
    orchestrator: Orchestrator,
    table: RwLock<Option<Arc<Table>>>,
    conversation: Mutex<Conversation>,
    /// Held across an index swap and the matching table write.
    loads: Mutex<()>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self, SessionError> {
        let registry = BackendRegistry::from_configs(config.backends.clone())?;
        let backend = config.generation.default_backend.clone();
        if registry.get(&backend).is_none() {
            return Err(SessionError::UnknownBackend(backend));
        }
        let embedder = Arc::new(EmbeddingClient::from_config(&config.embedding));
        let retriever = Retriever::new(
            embedder,
            config.retrieval.document,
            config.retrieval.context_budget,
        );
        let orchestrator = Orchestrator::new(
            registry,
            PromptFormatter::new(config.retrieval.context_budget),
            config.generation.persona.clone(),
            config.generation.max_response_chars,
        );
        tracing::debug!(backend = %backend, backends = orchestrator.registry().len(), "session created");
        Ok(Self {
            conversation: Mutex::new(Conversation {
                backend,
                language: config.generation.language,
                history: Vec::new(),
            }),
            config,
            retriever,
            orchestrator,
            table: RwLock::new(None),
            loads: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Indexes `table`, replacing any previous data and clearing history.
    /// Returns a status line for display.
    pub fn load(&self, table: Table) -> String {
        let errors = table.validate();
        if !errors.is_empty() {
            let reasons = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            tracing::warn!(reasons = %reasons, "table rejected");
            return format!("{ERROR_PREFIX}cannot load table: {reasons}");
        }
        let _loading = self.loads.lock();
        match self.retriever.index(&table) {
            Ok(knowledge) => {
                let message = format!(
                    "Loaded {} rows and {} columns into {} searchable units.",
                    table.row_count(),
                    table.column_count(),
                    knowledge.store().len()
                );
                tracing::info!(
                    generation = knowledge.generation(),
                    fingerprint = %table.fingerprint(),
                    "table loaded"
                );
                *self.table.write() = Some(Arc::new(table));
                self.conversation.lock().history.clear();
                message
            }
            Err(err) => {
                tracing::warn!(error = %err, "indexing failed");
                format!("{ERROR_PREFIX}failed to index table: {err}")
            }
        }
    }

    pub fn load_file(&self, path: &Path) -> String {
        match Table::from_path(path) {
            Ok(table) => self.load(table),
            Err(err) => format!("{ERROR_PREFIX}failed to read {}: {err}", path.display()),
        }
    }

    /// Answers in the session language with the current backend.
    pub fn query(&self, question: &str) -> String {
        let language = self.conversation.lock().language;
        self.query_in(question, language)
    }

    pub fn query_in(&self, question: &str, language: Language) -> String {
        let question = question.trim();
        if question.is_empty() {
            return EMPTY_QUESTION.to_string();
        }
        let retrieval = match self.retriever.retrieve(question, self.config.retrieval.top_k) {
            Ok(Some(retrieval)) => retrieval,
            Ok(None) => return NO_DATA_LOADED.to_string(),
            Err(err) => return format!("{ERROR_PREFIX}retrieval failed: {err}"),
        };
        let backend = self.conversation.lock().backend.clone();
        let answer = self
            .orchestrator
            .answer(question, Some(&retrieval.context), language, &backend);

        let mut conversation = self.conversation.lock();
        // a backend switch during generation already reset the history
        if conversation.backend == backend {
            conversation.history.push(Turn {
                role: Role::User,
                content: question.to_string(),
            });
            conversation.history.push(Turn {
                role: Role::Assistant,
                content: answer.clone(),
            });
        }
        answer
    }

    /// First rows of the loaded table, or the no-data sentinel.
    pub fn get_preview(&self) -> String {
        match self.table.read().as_ref() {
            Some(table) => table.preview(self.config.retrieval.preview_rows),
            None => NO_DATA_PREVIEW.to_string(),
        }
    }

    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.orchestrator.registry().list()
    }

    /// Switches backend. Choosing a different backend clears the history.
    pub fn select_backend(&self, id: &str) -> Result<(), SessionError> {
        if self.orchestrator.registry().get(id).is_none() {
            return Err(SessionError::UnknownBackend(id.to_string()));
        }
        let mut conversation = self.conversation.lock();
        if conversation.backend != id {
            tracing::info!(from = %conversation.backend, to = id, "backend selected, history reset");
            conversation.backend = id.to_string();
            conversation.history.clear();
        }
        Ok(())
    }

    pub fn current_backend(&self) -> String {
        self.conversation.lock().backend.clone()
    }

    pub fn current_descriptor(&self) -> Option<BackendDescriptor> {
        let id = self.current_backend();
        self.orchestrator.registry().get(&id).map(|backend| backend.describe())
    }

    pub fn language(&self) -> Language {
        self.conversation.lock().language
    }

    pub fn set_language(&self, language: Language) {
        self.conversation.lock().language = language;
    }

    pub fn history(&self) -> Vec<Turn> {
        self.conversation.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.conversation.lock().history.clear();
    }

    pub fn has_data(&self) -> bool {
        self.retriever.is_loaded()
    }

    /// The loaded table and the knowledge base built from it, read as a pair.
    pub fn loaded(&self) -> Option<(Arc<Table>, Arc<KnowledgeBase>)> {
        let _loading = self.loads.lock();
        let table = self.table.read().clone()?;
        let knowledge = self.retriever.snapshot()?;
        Some((table, knowledge))
    }

    /// Drops the loaded data and the history. Backend and language stay.
    pub fn reset(&self) {
        let _loading = self.loads.lock();
        self.retriever.clear();
        self.table.write().take();
        self.conversation.lock().history.clear();
        tracing::info!("session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_core::Value;

    fn session() -> Session {
        Session::new(EngineConfig::default()).unwrap()
    }

    fn table() -> Table {
        Table::new(
            vec!["name".into(), "city".into()],
            vec![
                vec![Value::Text("Alpha".into()), Value::Text("Pune".into())],
                vec![Value::Text("Beta".into()), Value::Text("Surat".into())],
            ],
        )
    }

    #[test]
    fn blank_question_is_rejected() {
        assert_eq!(session().query("   "), EMPTY_QUESTION);
    }

    #[test]
    fn preview_before_and_after_load() {
        let session = session();
        assert_eq!(session.get_preview(), NO_DATA_PREVIEW);
        let status = session.load(table());
        assert_eq!(status, "Loaded 2 rows and 2 columns into 3 searchable units.");
        assert!(session.get_preview().starts_with("name | city\n"));
    }

    #[test]
    fn invalid_table_is_reported_not_indexed() {
        let session = session();
        let status = session.load(Table::default());
        assert!(status.starts_with(ERROR_PREFIX));
        assert!(status.contains("table has no rows"));
        assert!(status.contains("table has no columns"));
        assert!(!session.has_data());
    }

    #[test]
    fn switching_backend_resets_history() {
        let session = session();
        session.select_backend("extractive").unwrap();
        session.load(table());
        session.query("Where is Alpha?");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].role, Role::User);

        session.select_backend("extractive").unwrap();
        assert_eq!(session.history().len(), 2);
        session.select_backend("openai").unwrap();
        assert!(session.history().is_empty());
        assert!(matches!(
            session.select_backend("missing"),
            Err(SessionError::UnknownBackend(_))
        ));
        assert_eq!(session.current_backend(), "openai");
    }

    #[test]
    fn unknown_default_backend_is_an_error() {
        let mut config = EngineConfig::default();
        config.generation.default_backend = "ghost".to_string();
        assert!(matches!(Session::new(config), Err(SessionError::UnknownBackend(_))));
    }

    #[test]
    fn reset_drops_data() {
        let session = session();
        session.load(table());
        session.reset();
        assert_eq!(session.get_preview(), NO_DATA_PREVIEW);
        assert_eq!(session.query("Alpha?"), NO_DATA_LOADED);
    }
}
