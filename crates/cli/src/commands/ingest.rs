//! Ingest command handler.
//!
//! Reads a cleaned text file, splits it into chunks, embeds them with
//! document context, and appends them to the index as the next version of
//! the document.

use clap::Args;
use dossier_core::{config::AppConfig, AppError, AppResult};
use dossier_rag::Ingestor;
use std::path::PathBuf;

use super::{embedding_provider, open_store};

/// Ingest a document into the chunk index
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Path to the cleaned text file (pages separated by form feeds)
    pub file: PathBuf,

    /// Document identifier (defaults to the file stem)
    #[arg(short, long)]
    pub document_id: Option<String>,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ingest command for {:?}", self.file);

        let text = std::fs::read_to_string(&self.file)
            .map_err(|e| AppError::Config(format!("Failed to read {:?}: {}", self.file, e)))?;

        let document_id = match &self.document_id {
            Some(id) => id.clone(),
            None => self
                .file
                .file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "Cannot derive a document id from {:?}; pass --document-id",
                        self.file
                    ))
                })?,
        };

        let store = open_store(config)?;
        let ingestor = Ingestor::new(embedding_provider(config), store);

        let document = ingestor.ingest_document(&document_id, &text).await?;

        println!(
            "Ingested '{}' as version {} ({} pages)",
            document.id, document.version, document.page_count
        );
        Ok(())
    }
}
