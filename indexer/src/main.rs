use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use search_core::{IndexOutcome, IndexStore};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One page of a crawl dump. `body` is accepted as an alias of `text`.
#[derive(Debug, Deserialize)]
struct InputDoc {
    url: String,
    #[serde(alias = "body")]
    text: String,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and inspect the positional page index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index pages from input JSON/JSONL files or a directory of them
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Index database directory
        #[arg(long, default_value = "./searchindex")]
        db: String,
    },
    /// Print url, word, posting and link counts
    Stats {
        /// Index database directory
        #[arg(long, default_value = "./searchindex")]
        db: String,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BuildSummary {
    indexed: usize,
    skipped: usize,
}

impl BuildSummary {
    fn record(&mut self, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Indexed { .. } => self.indexed += 1,
            IndexOutcome::AlreadyIndexed { .. } => self.skipped += 1,
        }
    }
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, db } => {
            let store = IndexStore::open(&db).with_context(|| format!("opening index at {db}"))?;
            let summary = build_index(&store, Path::new(&input))?;
            store.flush()?;
            tracing::info!(indexed = summary.indexed, skipped = summary.skipped, db, "index build complete");
            Ok(())
        }
        Commands::Stats { db } => {
            let store = IndexStore::open(&db).with_context(|| format!("opening index at {db}"))?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
            Ok(())
        }
    }
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
        files.sort();
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn build_index(store: &IndexStore, input_path: &Path) -> Result<BuildSummary> {
    let mut summary = BuildSummary::default();
    for file in input_files(input_path) {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            index_jsonl(store, &file, &mut summary)?;
        } else {
            index_json(store, &file, &mut summary)?;
        }
    }
    let stats = store.stats()?;
    tracing::info!(urls = stats.urls, words = stats.words, postings = stats.postings, "ingested documents");
    Ok(summary)
}

fn index_jsonl(store: &IndexStore, file: &Path, summary: &mut BuildSummary) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: InputDoc = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        summary.record(store.index_page(&doc.url, &doc.text)?);
    }
    Ok(())
}

fn index_json(store: &IndexStore, file: &Path, summary: &mut BuildSummary) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing {}", file.display()))?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                let doc: InputDoc = serde_json::from_value(v)?;
                summary.record(store.index_page(&doc.url, &doc.text)?);
            }
        }
        serde_json::Value::Object(_) => {
            let doc: InputDoc = serde_json::from_value(json)?;
            summary.record(store.index_page(&doc.url, &doc.text)?);
        }
        _ => tracing::warn!(file = %file.display(), "ignoring json that is neither object nor array"),
    }
    Ok(())
}
