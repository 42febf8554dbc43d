//! # PubRAG CLI
//!
//! Conversational, citation-grounded question answering over the
//! two-tier literature index.
//!
//! Usage:
//!   pubrag ask "Does bevacizumab reduce epistaxis in HHT?"
//!   pubrag chat                          # Interactive session (/clear, /quit)
//!   pubrag --corpus index.jsonl chat     # Offline, against a local JSONL corpus
//!   pubrag health                        # Probe generation and search services
//!   pubrag config                        # Print the effective configuration

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pubrag_agent::{ChatEngine, ChatResponse, ResponseKind};
use pubrag_core::PubragConfig;
use pubrag_memory::SessionStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pubrag",
    version,
    about = "🔬 PubRAG — citation-grounded answers from the biomedical literature"
)]
struct Cli {
    /// Config file (default: ~/.pubrag/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Search a local JSONL corpus instead of the configured service
    #[arg(long)]
    corpus: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: Vec<String>,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start an interactive session
    Chat {
        /// Resume a named session instead of starting a fresh one
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the effective configuration
    Config,
    /// Check the generation and search services
    Health,
    /// List built-in generation providers
    Providers,
}

fn load_config(cli: &Cli) -> Result<PubragConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            PubragConfig::load_from(Path::new(&path))?
        }
        None => PubragConfig::load()?,
    };
    if let Some(corpus) = &cli.corpus {
        config.search.backend = "memory".into();
        config.search.corpus_path = corpus.clone();
    }
    for problem in config.validate() {
        tracing::warn!("⚠️ config: {problem}");
    }
    Ok(config)
}

fn build_engine(config: &PubragConfig) -> Result<ChatEngine> {
    let provider = pubrag_providers::create_provider(config).context("generation service")?;
    let search = pubrag_search::create_search(&config.search).context("search service")?;
    tracing::debug!("engine: provider {}, search {}", provider.name(), search.name());
    Ok(ChatEngine::new(config, Arc::from(provider), Arc::from(search)))
}

fn print_response(resp: &ChatResponse) {
    match resp.kind {
        ResponseKind::Clarification => println!("❓ {}", resp.answer),
        ResponseKind::NoEvidence => println!("📭 {}", resp.answer),
        ResponseKind::Answer => println!("{}", resp.answer),
    }
    if !resp.citations.is_empty() {
        println!("\nSources:");
        for c in &resp.citations {
            println!("  • {} [PMID: {}]", c.label, c.doc_id);
        }
    }
    if let Some(path) = &resp.retrieval_path {
        tracing::debug!("retrieval path: {path:?}, trace: {:?}", resp.trace);
    }
}

async fn run_chat(config: &PubragConfig, session: Option<String>) -> Result<()> {
    let sessions = Arc::new(SessionStore::from_config(&config.session));
    let sweeper = sessions
        .clone()
        .spawn_sweeper(Duration::from_secs(config.session.sweep_interval_secs.max(1)));
    let engine = build_engine(config)?.with_sessions(sessions);
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("🔬 PubRAG v{} — {}", env!("CARGO_PKG_VERSION"), config.synthesis.subject);
    println!("   Session: {session_id}");
    println!("   Commands: /clear, /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you › ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                engine.clear(&session_id).await;
                println!("🧹 Conversation cleared.\n");
                continue;
            }
            _ => {}
        }
        match engine.chat(&session_id, line).await {
            Ok(resp) => print_response(&resp),
            Err(e) => println!("⚠️ {e}"),
        }
        println!();
    }

    sweeper.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pubrag=debug,pubrag_agent=debug,pubrag_retrieval=debug,pubrag_search=debug,pubrag_providers=debug"
    } else {
        "pubrag=info,pubrag_agent=info,pubrag_retrieval=info,pubrag_providers=warn,pubrag_search=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ask { question, json } => {
            let question = question.join(" ");
            anyhow::ensure!(!question.trim().is_empty(), "no question given");
            let engine = build_engine(&config)?;
            let session_id = uuid::Uuid::new_v4().to_string();
            let resp = engine.chat(&session_id, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
            } else {
                print_response(&resp);
            }
        }
        Commands::Chat { session } => run_chat(&config, session).await?,
        Commands::Config => {
            let mut shown = config.clone();
            if !shown.llm.api_key.is_empty() {
                shown.llm.api_key = "***".into();
            }
            if !shown.search.api_key.is_empty() {
                shown.search.api_key = "***".into();
            }
            println!("# {}", PubragConfig::default_path().display());
            println!("{}", shown.to_toml()?);
        }
        Commands::Health => {
            let engine = build_engine(&config)?;
            let report = engine.health().await;
            let mark = |ok: bool| if ok { "✅" } else { "❌" };
            println!("{} generation ({})", mark(report.generation), config.llm.provider);
            println!("{} search ({})", mark(report.search), config.search.backend);
            anyhow::ensure!(report.is_healthy(), "one or more services are unavailable");
        }
        Commands::Providers => {
            for name in pubrag_providers::available_providers() {
                let marker = if name == config.llm.provider { " (active)" } else { "" };
                println!("  {name}{marker}");
            }
        }
    }

    Ok(())
}
