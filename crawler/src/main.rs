use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crawler::{CrawlConfig, Crawler, HtmlExtractor, HttpFetcher};
use search_core::IndexStore;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl pages breadth-first and index them")]
struct Cli {
    /// Path to a file with seed URLs (one per line)
    #[arg(long)]
    seeds: String,
    /// Index database directory
    #[arg(long, default_value = "./searchindex")]
    db: String,
    /// Link levels to follow beyond the seeds
    #[arg(long, default_value_t = 2)]
    max_depth: usize,
    /// Only follow links starting with this prefix
    #[arg(long, default_value = "http")]
    url_prefix: String,
    /// Concurrency (number of fetch workers)
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
    /// Per-page fetch timeout in seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// User-Agent string to use for crawling
    #[arg(long, default_value = "click-search-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
    /// Also write fetched page text to this JSONL file
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn load_seeds(path: &str) -> Result<Vec<String>> {
    let mut seeds = Vec::new();
    let file = File::open(path).with_context(|| format!("opening seeds file {path}"))?;
    for line in BufReader::new(file).lines() {
        let s = line?.trim().to_string();
        if s.is_empty() || s.starts_with('#') { continue; }
        let u = Url::parse(&s).or_else(|_| Url::parse(&format!("https://{}", s)));
        match u {
            Ok(u) => seeds.push(u.to_string()),
            Err(e) => tracing::warn!(seed = %s, error = %e, "ignoring invalid seed"),
        }
    }
    Ok(seeds)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let seeds = load_seeds(&args.seeds)?;
    if seeds.is_empty() { return Err(anyhow!("no valid seeds")); }

    let timeout = Duration::from_secs(args.timeout_secs);
    let store = Arc::new(IndexStore::open(&args.db).with_context(|| format!("opening index at {}", args.db))?);
    let fetcher = HttpFetcher::new(&args.user_agent, timeout)?;
    let extractor = HtmlExtractor::new()?;
    let config = CrawlConfig {
        max_depth: args.max_depth,
        url_prefix: args.url_prefix,
        concurrency: args.concurrency,
        fetch_timeout: timeout,
        dump: args.dump,
    };
    tracing::info!(
        seeds = seeds.len(),
        max_depth = config.max_depth,
        concurrency = config.concurrency,
        prefix = %config.url_prefix,
        db = %args.db,
        "starting crawl"
    );

    let report = Crawler::new(store.clone(), fetcher, extractor, config).crawl(seeds).await?;
    let stats = store.stats()?;
    tracing::info!(?report, urls = stats.urls, words = stats.words, postings = stats.postings, "done");
    Ok(())
}
