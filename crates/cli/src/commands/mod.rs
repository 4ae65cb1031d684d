//! Command handlers for the Dossier CLI.

pub mod ask;
pub mod history;
pub mod ingest;
pub mod stats;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use history::HistoryCommand;
pub use ingest::IngestCommand;
pub use stats::StatsCommand;

use dossier_core::{config::AppConfig, AppResult};
use dossier_rag::{EmbeddingProvider, OllamaProvider, SqliteArchive, SqliteStore};
use std::sync::Arc;

/// Open the shared SQLite database under `.dossier/` as a chunk store.
pub(crate) fn open_store(config: &AppConfig) -> AppResult<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(&config.index_path())?))
}

/// Open the shared SQLite database under `.dossier/` as an answer archive.
pub(crate) fn open_archive(config: &AppConfig) -> AppResult<Arc<SqliteArchive>> {
    Ok(Arc::new(SqliteArchive::open(&config.index_path())?))
}

/// Build the embedding provider from configuration.
pub(crate) fn embedding_provider(config: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    Arc::new(OllamaProvider::new(
        config.endpoint.clone(),
        config.embedding_model.clone(),
        config.embedding_dim,
    ))
}
