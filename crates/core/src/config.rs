//! Configuration management for the Dossier CLI and engine.
//!
//! This module handles loading and merging configuration from multiple
//! sources:
//! - Environment variables
//! - Config files (.dossier/config.yaml)
//! - Command-line flags
//!
//! The configuration is workspace-centric, with all local state stored in
//! `.dossier/` under the workspace root.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Main application configuration.
///
/// This struct holds all global configuration options that affect
/// CLI and engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .dossier/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Generation provider identifier (e.g., "ollama")
    pub provider: String,

    /// Generation model identifier
    pub model: String,

    /// Generation provider endpoint
    pub endpoint: String,

    /// Embedding model identifier
    pub embedding_model: String,

    /// Embedding vector dimension
    pub embedding_dim: usize,

    /// Reranker endpoint; None disables the HTTP reranker entirely
    /// (retrieval then always uses similarity ordering)
    pub reranker_endpoint: Option<String>,

    /// API key for the reranker, resolved from RERANKER_API_KEY
    pub reranker_api_key: Option<String>,

    /// Reranker model identifier
    pub reranker_model: String,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Engine tuning knobs
    pub engine: EngineConfig,
}

/// Tuning knobs for the answering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidates over-fetched from the chunk store per iteration
    pub fetch_k: usize,

    /// Candidates kept after reranking
    pub top_k: usize,

    /// Retry budget for each external call class (embedding, generation)
    pub max_retries: u32,

    /// Per-call timeout in seconds for external provider calls
    pub call_timeout_secs: u64,

    /// Maximum number of queries answered concurrently
    pub max_concurrent_queries: usize,

    /// Blend keyword-overlap signal into vector ranking (hybrid search)
    pub hybrid: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_k: 10,
            top_k: 3,
            max_retries: 3,
            call_timeout_secs: 30,
            max_concurrent_queries: 4,
            hybrid: true,
        }
    }
}

/// Full configuration file structure (.dossier/config.yaml).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    providers: Option<ProvidersSection>,
    engine: Option<EngineConfig>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProvidersSection {
    generation: Option<GenerationSection>,
    embedding: Option<EmbeddingSection>,
    reranker: Option<RerankerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerationSection {
    provider: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingSection {
    model: Option<String>,
    dimensions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RerankerSection {
    endpoint: Option<String>,
    model: Option<String>,
    #[serde(rename = "apiKeyEnv")]
    api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: 384,
            reranker_endpoint: None,
            reranker_api_key: None,
            reranker_model: "bge-reranker-base".to_string(),
            log_level: None,
            verbose: false,
            no_color: false,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional
    /// `.dossier/config.yaml` in the workspace.
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("DOSSIER_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(provider) = std::env::var("DOSSIER_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("DOSSIER_MODEL") {
            config.model = model;
        }

        if let Ok(endpoint) = std::env::var("DOSSIER_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Ok(endpoint) = std::env::var("RERANKER_ENDPOINT") {
            config.reranker_endpoint = Some(endpoint);
        }

        if let Ok(key) = std::env::var("RERANKER_API_KEY") {
            config.reranker_api_key = Some(key);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        // Merge config file if present
        let default_path = config.dossier_dir().join("config.yaml");
        let config_path = std::env::var("DOSSIER_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(|| default_path.exists().then_some(default_path));

        if let Some(path) = config_path {
            config = config.merge_yaml(&path)?;
            config.config_file = Some(path);
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &PathBuf) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(providers) = config_file.providers {
            if let Some(generation) = providers.generation {
                if let Some(provider) = generation.provider {
                    result.provider = provider;
                }
                if let Some(model) = generation.model {
                    result.model = model;
                }
                if let Some(endpoint) = generation.endpoint {
                    result.endpoint = endpoint;
                }
            }

            if let Some(embedding) = providers.embedding {
                if let Some(model) = embedding.model {
                    result.embedding_model = model;
                }
                if let Some(dimensions) = embedding.dimensions {
                    result.embedding_dim = dimensions;
                }
            }

            if let Some(reranker) = providers.reranker {
                if let Some(endpoint) = reranker.endpoint {
                    result.reranker_endpoint = Some(endpoint);
                }
                if let Some(model) = reranker.model {
                    result.reranker_model = model;
                }
                if let Some(env) = reranker.api_key_env {
                    if let Ok(key) = std::env::var(&env) {
                        result.reranker_api_key = Some(key);
                    }
                }
            }
        }

        if let Some(engine) = config_file.engine {
            result.engine = engine;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the config
    /// file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .dossier directory.
    pub fn dossier_dir(&self) -> PathBuf {
        self.workspace.join(".dossier")
    }

    /// Get the path to the shared SQLite database (chunk index + archive).
    pub fn index_path(&self) -> PathBuf {
        self.dossier_dir().join("index.db")
    }

    /// Ensure the .dossier directory exists.
    pub fn ensure_dossier_dir(&self) -> AppResult<()> {
        let dir = self.dossier_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .dossier directory: {}", e))
            })?;
        }
        Ok(())
    }
}
