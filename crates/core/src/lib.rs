mod chunk;
mod document;
mod embedding;
mod error;
mod knowledge;
mod stats;
mod table;

pub use chunk::{split_text, ChunkConfig, Chunker};
pub use document::{DocumentConfig, DocumentStore, TextUnit, UnitKind};
pub use embedding::{Embedder, HashEmbedder, HashEmbedderConfig};
pub use error::{CoreError, Result, ValidationError};
pub use knowledge::{Hit, KnowledgeBase};
pub use stats::{ColumnStats, DatasetProfile, DISTINCT_CAP};
pub use table::{ColumnType, Table, Value, NO_DATA_PREVIEW};

pub use datachat_index::{cosine_similarity, IndexError, UnitId};
