mod interactive;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use atelier_config::AppConfig;
use atelier_knowledge::{HashingEmbedder, InMemoryStore, RerankWeights};
use atelier_llm::{Gateway, HttpBackend, TokenBudgets};
use atelier_runtime::Runtime;

#[derive(Debug, Parser)]
#[command(
    name = "atelier",
    version,
    about = "Multi-agent tutoring runtime for architectural design education"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "atelier.toml")]
    config: String,
    /// Experimental condition for this session; defaults to the configured
    /// `session.default_mode`.
    #[arg(long, value_enum)]
    mode: Option<CliMode>,
    #[arg(long, default_value = "local")]
    participant: String,
    /// Student skill level: beginner, intermediate, advanced, expert.
    #[arg(long, default_value = "intermediate")]
    skill: String,
    /// The design brief the student works against.
    #[arg(long, default_value = "an architectural design project")]
    brief: String,
    /// Directory of plain-text knowledge files to index for retrieval.
    #[arg(long)]
    knowledge: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Mentor,
    Generic,
    Control,
}

impl CliMode {
    fn as_str(&self) -> &'static str {
        match self {
            CliMode::Mentor => "MENTOR",
            CliMode::Generic => "GENERIC",
            CliMode::Control => "CONTROL",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("load config from {}", cli.config))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone())),
        )
        .init();

    let api_key = std::env::var(&config.llm.api_key_env).ok();
    let backend = HttpBackend::new(config.llm.base_url.clone(), api_key);
    let gateway = Gateway::new(
        Arc::new(backend),
        TokenBudgets {
            socratic: config.budgets.socratic,
            domain: config.budgets.domain,
            cognitive: config.budgets.cognitive,
            analysis: config.budgets.analysis,
            context: config.budgets.context,
            synthesis: config.budgets.synthesis,
        },
        config.llm.cache_capacity,
    );

    let store = build_store(&cli.knowledge, &config)?;
    let mode = cli
        .mode
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| config.session.default_mode.clone());
    let runtime = Runtime::new(config, gateway, Arc::new(store), Arc::new(HashingEmbedder::default()));

    interactive::run(&runtime, &mode, &cli.participant, &cli.skill, &cli.brief).await
}

/// Index `*.txt`/`*.md` files from the knowledge directory, one document per
/// file, filename as the citation source.
fn build_store(knowledge: &Option<PathBuf>, config: &AppConfig) -> Result<InMemoryStore> {
    let weights = RerankWeights {
        similarity: config.retrieval.weight_similarity,
        recency: config.retrieval.weight_recency,
        authority: config.retrieval.weight_authority,
        phase_match: config.retrieval.weight_phase_match,
    };
    let mut store = InMemoryStore::new(weights);
    let Some(dir) = knowledge else {
        return Ok(store);
    };

    for entry in fs::read_dir(dir).with_context(|| format!("read knowledge dir {}", dir.display()))? {
        let path = entry?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "txt" | "md"));
        if !is_text {
            continue;
        }
        let source = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("knowledge")
            .to_string();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read knowledge file {}", path.display()))?;
        // Paragraph-level chunks keep citations specific.
        for chunk in text.split("\n\n").filter(|c| c.split_whitespace().count() >= 20) {
            store.add_document(chunk.trim(), source.clone(), 0.7, 0.5, vec![]);
        }
    }
    tracing::info!(documents = store.len(), "knowledge store indexed");
    Ok(store)
}
