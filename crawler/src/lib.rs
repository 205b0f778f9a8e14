pub mod extract;
pub mod fetch;
pub mod pipeline;

pub use extract::{ExtractedPage, Extractor, HtmlExtractor, ParseError};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use pipeline::{CrawlConfig, CrawlError, CrawlReport, Crawler, PageError};
