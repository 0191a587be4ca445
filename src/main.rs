use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discipline_cache::{CacheConfig, CacheKey, DescriptionCache};

#[derive(Parser)]
#[command(name = "discipline-cache")]
#[command(about = "Download and cache discipline descriptions", long_about = None)]
struct Cli {
    /// Cache directory (overrides DESCRIPTION_CACHE_DIR)
    #[arg(short, long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download descriptions in the background while requesting them one per second
    Fetch {
        /// Discipline names, e.g. "Cycling Road"
        #[arg(required = true)]
        disciplines: Vec<String>,

        /// Maximum wait per request in milliseconds
        #[arg(long)]
        max_wait_ms: Option<u64>,

        /// Wipe the cache before starting
        #[arg(long)]
        clear: bool,
    },

    /// Print the stored description of one discipline
    Show {
        discipline: String,

        /// Maximum wait in milliseconds
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },

    /// List stored disciplines
    List,

    /// Delete every stored description
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "discipline_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::from_env()?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let cache = DescriptionCache::open_default(config).await?;
    let max_wait = |ms: Option<u64>| {
        ms.map(Duration::from_millis)
            .unwrap_or(cache.config().default_max_wait)
    };

    match cli.command {
        Commands::Fetch {
            disciplines,
            max_wait_ms,
            clear,
        } => {
            if clear {
                cache.clear_all().await?;
            }
            fetch_all(&cache, &disciplines, max_wait(max_wait_ms)).await;
        }
        Commands::Show {
            discipline,
            max_wait_ms,
        } => {
            let key = CacheKey::from_name(&discipline);
            let paragraphs = cache
                .describe(&key, max_wait(max_wait_ms))
                .await?;
            for paragraph in paragraphs {
                println!("{}\n", paragraph);
            }
        }
        Commands::List => {
            let keys: BTreeSet<_> = cache.list_keys().into_iter().collect();
            for key in keys {
                println!("{}\t{}", key, cache.status(&key));
            }
        }
        Commands::Clear => {
            cache.clear_all().await?;
            println!("Cache cleared");
        }
    }

    cache.close().await;
    Ok(())
}

/// Register `disciplines`, start the sweeper and request one description per
/// second until nothing is pending any more
async fn fetch_all(cache: &DescriptionCache, disciplines: &[String], max_wait: Duration) {
    let keys: Vec<CacheKey> = disciplines.iter().map(|d| CacheKey::from_name(d)).collect();
    cache.register_keys(keys.iter().cloned());
    cache.start_sweep();

    let mut handles = Vec::new();
    for key in keys {
        if cache.list_pending().is_empty() {
            break;
        }

        let shown = key.clone();
        let failed = key.clone();
        handles.push(cache.resolve(
            key,
            move |paragraphs| println!("{}: {}", shown, paragraphs.join(" ")),
            move |e| warn!("No description for {}: {}", failed, e),
            max_wait,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    for handle in handles {
        handle.join().await;
    }

    cache.stop_sweep().await;

    let pending: BTreeSet<_> = cache.list_pending().into_iter().collect();
    info!("Still pending: {:?}", pending);
    info!("{}", cache.stats());
}
