//! Ask command handler.
//!
//! Runs a question through the full answering pipeline and prints the
//! answer with its citations.

use clap::Args;
use dossier_core::{config::AppConfig, AppResult};
use dossier_llm::create_client;
use dossier_rag::{
    AnswerEngine, AnswerOptions, HttpReranker, LlmCritic, LlmDrafter, Reranker, ScopeFilter,
};
use std::sync::Arc;
use std::time::Duration;

use super::{embedding_provider, open_archive, open_store};

/// Ask a question against the ingested documents
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Restrict retrieval to these document ids (repeatable)
    #[arg(short = 'd', long = "document")]
    pub documents: Vec<String>,

    /// Overall deadline in seconds for the run
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");

        let client = create_client(&config.provider, Some(&config.endpoint), None)?;
        let drafter = Arc::new(LlmDrafter::new(client.clone(), config.model.clone()));
        let critic = Arc::new(LlmCritic::new(client, config.model.clone()));

        let reranker: Option<Arc<dyn Reranker>> =
            config.reranker_endpoint.as_ref().map(|endpoint| {
                Arc::new(HttpReranker::new(
                    endpoint.clone(),
                    config.reranker_model.clone(),
                    config.reranker_api_key.clone(),
                )) as Arc<dyn Reranker>
            });

        let engine = AnswerEngine::new(
            embedding_provider(config),
            open_store(config)?,
            reranker,
            drafter,
            critic,
            Some(open_archive(config)?),
            config.engine.clone(),
        );

        let scope = if self.documents.is_empty() {
            ScopeFilter::all()
        } else {
            ScopeFilter::documents(self.documents.clone())
        };
        let options = AnswerOptions {
            scope,
            deadline: self.deadline.map(Duration::from_secs),
        };

        let answer = engine.answer_query(&self.question, options).await?;

        if self.json {
            let output = serde_json::json!({
                "answer": answer.answer,
                "citations": answer.citations,
                "retrievedCount": answer.retrieved_count,
                "revisionCount": answer.revision_count,
                "degradedConfidence": answer.degraded_confidence,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", answer.answer);

            if !answer.citations.is_empty() {
                println!("\nSources:");
                for citation in &answer.citations {
                    match &citation.section {
                        Some(section) => println!(
                            "  {} (page {}, {})",
                            citation.chunk_id, citation.page, section
                        ),
                        None => println!("  {} (page {})", citation.chunk_id, citation.page),
                    }
                }
            }

            if answer.degraded_confidence {
                eprintln!(
                    "note: answer accepted after {} revisions without passing review",
                    answer.revision_count
                );
            }
        }

        Ok(())
    }
}
