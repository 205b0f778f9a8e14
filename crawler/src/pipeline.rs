use crate::extract::{ExtractedPage, Extractor, ParseError};
use crate::fetch::{FetchError, Fetcher};
use search_core::{IndexOutcome, IndexStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Link levels followed beyond the seeds. 0 indexes the seeds only.
    pub max_depth: usize,
    /// Only links starting with this prefix are followed.
    pub url_prefix: String,
    /// Pages fetched and parsed at the same time.
    pub concurrency: usize,
    /// Per-page fetch deadline; expiry counts as a fetch failure.
    pub fetch_timeout: Duration,
    /// Optional JSONL file receiving the text of every fetched page.
    pub dump: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            url_prefix: "http".to_string(),
            concurrency: 8,
            fetch_timeout: Duration::from_secs(12),
            dump: None,
        }
    }
}

/// Failures that abort a crawl. Page-level failures never do.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("writing crawl dump: {0}")]
    Dump(#[from] std::io::Error),

    #[error("encoding crawl dump: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a single page was skipped.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("crawl worker for {url} stopped: {reason}")]
    Worker { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    /// Pages newly written to the index.
    pub indexed: usize,
    /// Pages fetched that were already indexed.
    pub skipped: usize,
    /// Pages dropped after a fetch or parse failure.
    pub failed: usize,
    /// Depth levels processed, including the seed level.
    pub levels: usize,
}

#[derive(Serialize)]
struct DumpRecord<'a> {
    url: &'a str,
    text: &'a str,
    timestamp: String,
}

/// Breadth-first crawler feeding an [`IndexStore`].
///
/// Fetching and parsing run on a bounded pool of tasks; every index write
/// happens on the calling task, one page at a time.
pub struct Crawler<F, E> {
    store: Arc<IndexStore>,
    fetcher: Arc<F>,
    extractor: Arc<E>,
    config: CrawlConfig,
}

impl<F, E> Crawler<F, E>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    pub fn new(store: Arc<IndexStore>, fetcher: F, extractor: E, config: CrawlConfig) -> Self {
        Self { store, fetcher: Arc::new(fetcher), extractor: Arc::new(extractor), config }
    }

    /// Links worth recording: no quote characters (script hrefs) and under
    /// the configured prefix.
    pub fn accepts(&self, link: &str) -> bool {
        !link.contains('\'') && !link.contains('"') && link.starts_with(&self.config.url_prefix)
    }

    pub async fn crawl<I, S>(&self, seeds: I) -> Result<CrawlReport, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frontier: BTreeSet<String> = seeds.into_iter().map(Into::into).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut report = CrawlReport::default();
        let mut dump = match &self.config.dump {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                Some(BufWriter::new(File::create(path)?))
            }
            None => None,
        };

        for depth in 0..=self.config.max_depth {
            let pages: Vec<String> = frontier.into_iter().filter(|u| visited.insert(u.clone())).collect();
            if pages.is_empty() {
                break;
            }
            report.levels += 1;
            info!(depth, pages = pages.len(), "crawling level");

            let mut next: BTreeSet<String> = BTreeSet::new();
            for (url, outcome) in self.fetch_level(pages).await {
                let page = match outcome {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(url = %url, error = %e, "skipping page");
                        report.failed += 1;
                        continue;
                    }
                };

                let from = match self.store.index_page(&url, &page.text)? {
                    IndexOutcome::Indexed { url_id, .. } => {
                        report.indexed += 1;
                        url_id
                    }
                    IndexOutcome::AlreadyIndexed { url_id } => {
                        report.skipped += 1;
                        url_id
                    }
                };
                if let Some(w) = dump.as_mut() {
                    write_dump(w, &url, &page)?;
                }

                for link in page.links.iter().filter(|l| self.accepts(l)) {
                    let to = self.store.get_or_create_url_id(link)?;
                    self.store.add_link(from, to, &[])?;
                    if depth < self.config.max_depth && !visited.contains(link) && !self.store.is_indexed(link)? {
                        next.insert(link.clone());
                    }
                }
            }
            frontier = next;
        }

        if let Some(mut w) = dump {
            w.flush()?;
        }
        self.store.flush()?;
        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            levels = report.levels,
            "crawl finished"
        );
        Ok(report)
    }

    /// Fetch and parse every page, at most `concurrency` at a time.
    /// Results come back ordered by url, one per page; a worker that
    /// panicked reports its page as failed.
    async fn fetch_level(&self, pages: Vec<String>) -> Vec<(String, Result<ExtractedPage, PageError>)> {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: Vec<(String, JoinHandle<Result<ExtractedPage, PageError>>)> = Vec::with_capacity(pages.len());
        for url in pages {
            let permits = permits.clone();
            let fetcher = self.fetcher.clone();
            let extractor = self.extractor.clone();
            let timeout = self.config.fetch_timeout;
            let page_url = url.clone();
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                fetch_page(fetcher.as_ref(), extractor.as_ref(), &page_url, timeout).await
            });
            tasks.push((url, handle));
        }

        let mut out = Vec::with_capacity(tasks.len());
        for (url, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(url = %url, error = %e, "crawl worker failed");
                    Err(PageError::Worker { url: url.clone(), reason: e.to_string() })
                }
            };
            out.push((url, outcome));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

async fn fetch_page<F, E>(fetcher: &F, extractor: &E, url: &str, timeout: Duration) -> Result<ExtractedPage, PageError>
where
    F: Fetcher + ?Sized,
    E: Extractor + ?Sized,
{
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl { url: url.to_string(), reason: e.to_string() })?;
    let raw = match tokio::time::timeout(timeout, fetcher.fetch(&parsed)).await {
        Ok(result) => result?,
        Err(_) => return Err(FetchError::Timeout { url: url.to_string() }.into()),
    };
    Ok(extractor.extract(&raw, &parsed)?)
}

fn write_dump<W: Write>(w: &mut W, url: &str, page: &ExtractedPage) -> Result<(), CrawlError> {
    let timestamp = time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    serde_json::to_writer(&mut *w, &DumpRecord { url, text: &page.text, timestamp })?;
    w.write_all(b"\n")?;
    Ok(())
}
