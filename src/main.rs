use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use refeed::config::Config;
use refeed::content::{ContentResolver, SelectorExtractor};
use refeed::feed::{FeedAssembler, FeedDescriptor, HookRegistry};
use refeed::fetch::{ContentFetcher, Identity};
use refeed::media::{MediaStore, MediaTools, PodcastResolver};
use refeed::storage::{janitor, Database};

#[derive(Parser, Debug)]
#[command(
    name = "refeed",
    about = "Feed proxy: readable-content extraction with a persistent cache"
)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "refeed.toml", value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the output XML for one configured feed
    Generate {
        /// Feed name from the configuration file
        feed: String,

        /// Write the document here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Evict cache rows past their retention and reclaim storage
    Janitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let db = Database::open(&config.cache_db).await?;
    let identity = Identity {
        user_agent: config.user_agent.clone(),
        headers: config.headers.clone(),
    };
    let fetcher = Arc::new(ContentFetcher::new(&identity, &config.outbound_ips)?);
    let store = MediaStore::new(config.storage_dir.clone(), &config.public_base_url);
    let tools = MediaTools {
        downloader: config.downloader.clone(),
        prober: config.prober.clone(),
    };

    // Compiled-in hook sets bound by feed name. Plain configurations need
    // none; deployments with custom transforms register them here.
    let registry = HookRegistry::default();

    match args.command {
        Command::Generate { feed, output } => {
            let feed_config = config
                .feed(&feed)
                .with_context(|| format!("Feed '{feed}' is not configured"))?
                .clone();
            let descriptor = FeedDescriptor::new(feed_config, registry.hooks_for(&feed))?;

            std::fs::create_dir_all(&config.storage_dir).with_context(|| {
                format!(
                    "Failed to create storage directory '{}'",
                    config.storage_dir.display()
                )
            })?;

            let resolver =
                ContentResolver::new(db.clone(), fetcher.clone(), Arc::new(SelectorExtractor));
            let podcast = PodcastResolver::new(db, store, fetcher.clone(), tools);
            let assembler = FeedAssembler::new(resolver, podcast, fetcher);

            let xml = assembler.assemble(&descriptor).await?;
            match output {
                Some(path) => std::fs::write(&path, &xml)
                    .with_context(|| format!("Failed to write '{}'", path.display()))?,
                None => println!("{xml}"),
            }
        }

        Command::Janitor => {
            let mut descriptors = Vec::new();
            for feed_config in &config.feeds {
                match FeedDescriptor::new(
                    feed_config.clone(),
                    registry.hooks_for(&feed_config.name),
                ) {
                    Ok(d) => descriptors.push(d),
                    Err(e) => {
                        tracing::warn!(feed = %feed_config.name, error = %e, "Skipping invalid feed descriptor")
                    }
                }
            }

            let report =
                janitor::run(&db, &store, &descriptors, Path::new(&config.cache_db)).await?;
            for feed in &report.feeds {
                println!(
                    "{}: {} articles, {} enclosures, {} images evicted",
                    feed.feed, feed.articles_evicted, feed.enclosures_deleted, feed.images_deleted
                );
            }
            println!(
                "cache db: {} -> {} bytes",
                report.db_bytes_before, report.db_bytes_after
            );
        }
    }

    Ok(())
}
