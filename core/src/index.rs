use serde::{Deserialize, Serialize};

pub type UrlId = u64;
pub type WordId = u64;
/// Zero-based token index within a page's extracted text.
pub type Position = u32;

/// One combination of positions for every matched query word on a page.
///
/// `positions[i]` is the location of the i-th matched query word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRow {
    pub url_id: UrlId,
    pub positions: Vec<Position>,
}

impl MatchRow {
    /// Sum of the word positions; lower means the words appear earlier.
    pub fn location(&self) -> u64 {
        self.positions.iter().map(|&p| p as u64).sum()
    }

    /// Sum of gaps between consecutive query word positions.
    pub fn distance(&self) -> u64 {
        self.positions
            .windows(2)
            .map(|w| (w[1] as i64 - w[0] as i64).unsigned_abs())
            .sum()
    }
}

/// Result of joining postings across the matched words of a query.
#[derive(Debug, Clone, Default)]
pub struct MatchRows {
    pub rows: Vec<MatchRow>,
    /// Word ids of the query terms that exist in the index, in query order.
    pub word_ids: Vec<WordId>,
}

impl MatchRows {
    /// Distinct url ids in ascending order.
    pub fn url_ids(&self) -> Vec<UrlId> {
        let mut ids: Vec<UrlId> = self.rows.iter().map(|r| r.url_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The url already had postings; nothing was written.
    AlreadyIndexed { url_id: UrlId },
    Indexed { url_id: UrlId, postings: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub urls: u64,
    pub words: u64,
    pub postings: u64,
    pub links: u64,
}
