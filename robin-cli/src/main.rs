//! Robin CLI
//!
//! Dark web OSINT investigations with persistent indicator memory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use robin_agents::{
    create_anthropic_backend, create_backend, AnthropicConfig, OpenAIBackendConfig, SharedBackend, ToolSupport,
};
use robin_core::IndicatorType;
use robin_memory::MemoryStore;
use robin_runtime::{tool_specs, Pipeline, RobinConfig, RunOptions, ToolDispatcher};
use robin_tor::TorTransport;

#[derive(Parser)]
#[command(name = "robin")]
#[command(author, version, about = "Robin: Dark Web OSINT with investigation memory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "ROBIN_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::Args)]
struct BackendArgs {
    /// LLM model to use
    #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenRouter API key
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    openrouter_key: Option<String>,

    /// Use OpenAI instead of Anthropic
    #[arg(long)]
    openai: bool,

    /// Use OpenRouter instead of Anthropic
    #[arg(long)]
    openrouter: bool,

    /// Use a local OpenAI-compatible server at this base URL
    #[arg(long)]
    local: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an OSINT investigation
    Query {
        /// The search query
        #[arg(short, long)]
        query: String,

        #[command(flatten)]
        backend: BackendArgs,

        /// Directory for the summary file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Don't write a summary file
        #[arg(long)]
        no_file: bool,
    },

    /// Check Tor connection and memory status
    Status,

    /// Show recent investigations
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Find past investigations similar to a query
    Similar {
        query: String,

        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Show memory statistics
    Stats,

    /// Look up an indicator and the investigations that saw it
    Entity { value: String },

    /// Most frequently seen indicators
    Top {
        /// Restrict to one indicator type (e.g. bitcoin, onion_domain)
        #[arg(short = 't', long = "type")]
        entity_type: Option<IndicatorType>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete investigations older than the retention window
    Cleanup {
        /// Days to keep (default: store.retention_days)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Export memory to a JSON file
    Export { path: PathBuf },

    /// Merge a JSON export into memory
    Import { path: PathBuf },

    /// List callable tools, or call one
    Tools {
        /// Tool to call
        #[arg(long)]
        call: Option<String>,

        /// JSON arguments for --call
        #[arg(long, default_value = "{}")]
        args: String,

        /// Show how a provider/model pair would invoke tools
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "anthropic", requires = "model")]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = RobinConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Query {
            query,
            backend,
            output_dir,
            no_file,
        } => {
            let summary_dir = if no_file { None } else { Some(output_dir) };
            run_query(&config, &query, backend, summary_dir).await?;
        }
        Commands::Status => check_status(&config).await?,
        Commands::History { limit } => show_history(&open_store(&config)?, limit)?,
        Commands::Similar { query, limit } => show_similar(&open_store(&config)?, &query, limit)?,
        Commands::Stats => show_stats(&open_store(&config)?)?,
        Commands::Entity { value } => show_entity(&open_store(&config)?, &value)?,
        Commands::Top { entity_type, limit } => show_top(&open_store(&config)?, entity_type, limit)?,
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.store.retention_days);
            let deleted = open_store(&config)?.cleanup_older_than(days)?;
            println!("🧹 Removed {} investigations older than {} days", deleted, days);
        }
        Commands::Export { path } => {
            let snapshot = open_store(&config)?.export_to_file(&path)?;
            println!(
                "📦 Exported {} investigations and {} entities to {}",
                snapshot.investigations.len(),
                snapshot.entities.len(),
                path.display()
            );
        }
        Commands::Import { path } => {
            let summary = open_store(&config)?.import_from_file(&path)?;
            println!(
                "📥 Imported {} investigations ({} skipped) and {} entities ({} skipped)",
                summary.investigations_added,
                summary.investigations_skipped,
                summary.entities_added,
                summary.entities_skipped
            );
        }
        Commands::Tools {
            call,
            args,
            model,
            provider,
        } => run_tools(&config, call, &args, model, &provider).await?,
    }

    Ok(())
}

fn open_store(config: &RobinConfig) -> Result<MemoryStore> {
    MemoryStore::open(&config.store.path)
        .with_context(|| format!("opening memory at {}", config.store.path.display()))
}

fn build_backend(args: &BackendArgs) -> Result<SharedBackend> {
    let backend = if let Some(base_url) = &args.local {
        create_backend(OpenAIBackendConfig::local(base_url, &args.model))?
    } else if args.openrouter {
        let key = args.openrouter_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("OpenRouter API key required. Set OPENROUTER_API_KEY or use --openrouter-key")
        })?;
        create_backend(OpenAIBackendConfig::openrouter(key, &args.model))?
    } else if args.openai {
        let key = args
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OpenAI API key required. Set OPENAI_API_KEY or use --api-key"))?;
        create_backend(OpenAIBackendConfig::openai(key, &args.model))?
    } else {
        let key = args.anthropic_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("Anthropic API key required. Set ANTHROPIC_API_KEY or use --anthropic-key")
        })?;
        create_anthropic_backend(AnthropicConfig::new(key, &args.model))?
    };
    Ok(backend)
}

async fn run_query(config: &RobinConfig, query: &str, args: BackendArgs, summary_dir: Option<PathBuf>) -> Result<()> {
    println!("🕵️ Robin - Dark Web OSINT\n");

    let backend = build_backend(&args)?;
    println!("📡 Provider: {} | Model: {}", backend.provider(), backend.model_name());
    println!("🔍 Query: {}", query);
    println!("🌐 Sources: {}\n", config.engines().len());

    println!("🔌 Checking Tor connection...");
    match robin_tor::check_tor_connection(&config.tor).await {
        Ok(true) => println!("✅ Tor connection OK\n"),
        Ok(false) => {
            println!("⚠️  Tor .onion check timed out (continuing anyway)");
            println!("   Tip: Ensure Tor is running at {}\n", config.tor.socks_addr);
        }
        Err(e) => println!("⚠️  Tor check error: {} (continuing anyway)\n", e),
    }

    let store = Arc::new(open_store(config)?);
    let pipeline = Pipeline::builder(config.clone())
        .backend(backend)
        .store(store.clone())
        .build()?;

    let session_id = store.start_session()?;
    let report = pipeline
        .run(
            query,
            RunOptions {
                session_id: Some(session_id.clone()),
                summary_dir,
                capture_count: 0,
            },
        )
        .await;
    store.end_session(&session_id)?;
    let report = report?;

    if !report.similar.is_empty() {
        println!("🧠 Related past investigations:");
        for similar in &report.similar {
            println!(
                "   #{} \"{}\" ({})",
                similar.investigation.id,
                similar.investigation.query,
                similar.investigation.created_at.format("%Y-%m-%d")
            );
        }
        println!();
    }

    println!("✅ Investigation #{} complete in {:.1}s", report.investigation_id, report.duration.as_secs_f64());
    println!("   Refined query: {}", report.refined_query);
    println!(
        "   Results: {} | Selected: {} | Retrieved: {}",
        report.results.len(),
        report.selected.len(),
        report.pages.iter().filter(|p| p.succeeded).count()
    );
    if let Some(path) = &report.summary_file {
        println!("📄 Summary saved to: {}", path.display());
    }
    if report.is_degraded() {
        println!("\n⚠️  Completed with {} degradations:", report.degradations.len());
        for degradation in &report.degradations {
            println!("   - {}", degradation);
        }
    }

    println!("\n{}", "=".repeat(60));
    let preview: String = report.summary.chars().take(1000).collect();
    println!("{}", preview);
    if report.summary.chars().count() > 1000 {
        println!("...\n[truncated - see full summary in output file]");
    }

    Ok(())
}

async fn check_status(config: &RobinConfig) -> Result<()> {
    println!("🔌 Checking Tor connection...\n");

    match robin_tor::check_tor_connection(&config.tor).await {
        Ok(true) => {
            println!("✅ Tor is running and accessible");
            println!("   Proxy: {}", config.tor.socks_addr);
        }
        Ok(false) => {
            println!("❌ Tor is not accessible");
            println!("   Expected proxy at: {}", config.tor.socks_addr);
            println!("\n   To install Tor:");
            println!("   - Linux: sudo apt install tor");
            println!("   - Mac: brew install tor");
            println!("   - Then start: sudo systemctl start tor (or brew services start tor)");
        }
        Err(e) => println!("❌ Error checking Tor: {}", e),
    }

    let stats = open_store(config)?.get_statistics()?;
    println!("\n🧠 Memory: {}", config.store.path.display());
    println!(
        "   {} investigations, {} indicators",
        stats.total_investigations, stats.total_entities
    );

    Ok(())
}

fn show_history(store: &MemoryStore, limit: usize) -> Result<()> {
    let history = store.get_investigation_history(limit)?;
    if history.is_empty() {
        println!("No investigations yet.");
        return Ok(());
    }
    for inv in history {
        println!(
            "#{:<5} {}  {:<40}  {} results, {} selected  [{}]",
            inv.id,
            inv.created_at.format("%Y-%m-%d %H:%M"),
            inv.query,
            inv.result_count,
            inv.filtered_count,
            inv.model
        );
    }
    Ok(())
}

fn show_similar(store: &MemoryStore, query: &str, limit: usize) -> Result<()> {
    let similar = store.get_similar_investigations(query, limit)?;
    if similar.is_empty() {
        println!("No similar investigations for \"{}\".", query);
        return Ok(());
    }
    for found in similar {
        let inv = &found.investigation;
        println!(
            "#{:<5} score {}  {}  {}",
            inv.id,
            found.score,
            inv.created_at.format("%Y-%m-%d"),
            inv.query
        );
    }
    Ok(())
}

fn show_stats(store: &MemoryStore) -> Result<()> {
    let stats = store.get_statistics()?;
    println!("📊 Memory statistics\n");
    println!("   Investigations: {}", stats.total_investigations);
    println!("   Indicators:     {}", stats.total_entities);
    println!("   Captures:       {}", stats.total_captures);
    println!("   Avg results:    {:.1}", stats.avg_results);

    if !stats.entity_breakdown.is_empty() {
        println!("\n   By type:");
        for (entity_type, count) in &stats.entity_breakdown {
            println!("     {:<14} {}", entity_type, count);
        }
    }
    if !stats.top_models.is_empty() {
        println!("\n   Models:");
        for usage in &stats.top_models {
            println!("     {:<30} {}", usage.model, usage.count);
        }
    }
    Ok(())
}

fn show_entity(store: &MemoryStore, value: &str) -> Result<()> {
    let Some(found) = store.search_entity(value)? else {
        println!("\"{}\" has not been seen.", value);
        return Ok(());
    };
    let entity = &found.entity;
    println!("🔎 {} ({})", entity.value, entity.entity_type);
    println!("   Seen {} times", entity.frequency);
    println!("   First: {}", entity.first_seen.format("%Y-%m-%d %H:%M"));
    println!("   Last:  {}", entity.last_seen.format("%Y-%m-%d %H:%M"));
    for inv in &found.investigations {
        println!("   #{:<5} {}  {}", inv.id, inv.created_at.format("%Y-%m-%d"), inv.query);
    }
    Ok(())
}

fn show_top(store: &MemoryStore, entity_type: Option<IndicatorType>, limit: usize) -> Result<()> {
    let entities = store.get_top_entities(entity_type, limit)?;
    if entities.is_empty() {
        println!("No indicators recorded.");
        return Ok(());
    }
    for entity in entities {
        println!("{:>5}  {:<14} {}", entity.frequency, entity.entity_type, entity.value);
    }
    Ok(())
}

async fn run_tools(
    config: &RobinConfig,
    call: Option<String>,
    args: &str,
    model: Option<String>,
    provider: &str,
) -> Result<()> {
    if let Some(model) = model {
        let provider = serde_json::from_value(serde_json::Value::String(provider.to_lowercase()))
            .with_context(|| format!("unknown provider: {}", provider))?;
        let support = ToolSupport::negotiate(provider, &model);
        println!("{} / {}: tool support {:?}\n", provider, model, support);
    }

    let Some(name) = call else {
        println!("{}", serde_json::to_string_pretty(&tool_specs())?);
        return Ok(());
    };

    let args: serde_json::Value = serde_json::from_str(args).context("--args must be JSON")?;
    let store = Arc::new(open_store(config)?);
    let transport = TorTransport::shared(&config.tor)?;
    let result = ToolDispatcher::new(transport, store, config).call(&name, args).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
