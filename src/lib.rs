pub mod config;
pub mod model;
pub mod search;
pub mod sources;
pub mod storage;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use config::RegistryConfig;
use model::SearchQuery;
use search::{AllowAll, Identity, LocalIndex, SearchAggregator};
use storage::{FsStore, LocalStore};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "registry-search",
    version,
    about = "Federated package search over a local store and upstream registries"
)]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the storage directory from the config
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search local storage and every uplink, print the result set as JSON
    Search {
        /// Query terms; `author:<name>` matches the author field
        text: Vec<String>,

        /// End index of the page
        #[arg(long)]
        size: Option<String>,

        /// Start index of the page
        #[arg(long)]
        from: Option<String>,

        /// Search local storage only
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Build the local full-text index and query it
    Index {
        /// Index query; `*` lists every package
        #[arg(long, default_value = "*")]
        query: String,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            text,
            size,
            from,
            offline,
        } => {
            let cfg = load_config(cli.config, cli.storage)?;
            run_search(&cfg, text.join(" "), size, from, offline).await
        }
        Commands::Index { query } => {
            let cfg = load_config(cli.config, cli.storage)?;
            run_index(&cfg, &query).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "registry-search", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>, storage: Option<PathBuf>) -> Result<RegistryConfig> {
    let mut cfg = RegistryConfig::load(path.as_deref()).context("loading configuration")?;
    if let Some(storage) = storage {
        cfg.storage = storage;
    }
    Ok(cfg)
}

fn local_store(cfg: &RegistryConfig) -> Arc<dyn LocalStore> {
    Arc::new(FsStore::new(cfg.storage.clone(), cfg.storages.clone()))
}

async fn run_search(
    cfg: &RegistryConfig,
    text: String,
    size: Option<String>,
    from: Option<String>,
    offline: bool,
) -> Result<()> {
    let mut params = HashMap::from([("text".to_string(), text)]);
    if let Some(size) = size {
        params.insert("size".to_string(), size);
    }
    if let Some(from) = from {
        params.insert("from".to_string(), from);
    }
    let query = SearchQuery::from_params(&params);

    let mut aggregator =
        SearchAggregator::new(local_store(cfg), Arc::new(AllowAll)).with_settings(cfg.search);
    if !offline {
        aggregator = aggregator.with_uplinks(cfg.build_uplinks().context("building uplinks")?);
    }

    let abort = CancellationToken::new();
    let on_interrupt = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("search_interrupted");
            on_interrupt.cancel();
        }
    });

    let result = aggregator
        .search(&query, &Identity::anonymous(), abort)
        .await
        .context("search failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_index(cfg: &RegistryConfig, query: &str) -> Result<()> {
    let index = LocalIndex::new(local_store(cfg)).context("creating index")?;
    let count = index.reindex().await.context("rebuilding index")?;
    tracing::info!(packages = count, "index_ready");

    let hits: Vec<_> = index
        .query(query)
        .context("querying index")?
        .into_iter()
        .map(|hit| serde_json::json!({ "ref": hit.ref_name, "score": hit.score }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}
