//! Stats command handler.

use clap::Args;
use dossier_core::{config::AppConfig, AppResult};
use dossier_rag::{AnswerArchive, ChunkStore};

use super::{open_archive, open_store};

/// Show index and archive statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let store = open_store(config)?;
        let archive = open_archive(config)?;

        let stats = store.stats().await?;
        let answers = archive.count().await?;

        if self.json {
            let output = serde_json::json!({
                "documents": stats.documents,
                "activeChunks": stats.active_chunks,
                "totalChunks": stats.total_chunks,
                "answers": answers,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Documents:     {}", stats.documents);
            println!("Active chunks: {}", stats.active_chunks);
            println!("Total chunks:  {}", stats.total_chunks);
            println!("Answers:       {}", answers);
        }
        Ok(())
    }
}
