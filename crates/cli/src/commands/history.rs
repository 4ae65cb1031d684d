//! History command handler.

use clap::Args;
use dossier_core::{config::AppConfig, AppResult};
use dossier_rag::AnswerArchive;

use super::open_archive;

/// List previously answered questions
#[derive(Args, Debug)]
pub struct HistoryCommand {
    /// Maximum number of records to show
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl HistoryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing history command");

        let archive = open_archive(config)?;
        let records = archive.list(self.limit).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("No answers recorded yet.");
            return Ok(());
        }

        for record in &records {
            println!(
                "{}  {}  ({} citations, {} revisions)",
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.query,
                record.citations.len(),
                record.revision_count
            );
        }
        Ok(())
    }
}
