//! Multi-signal ranking over joined posting rows.

use crate::config::SearchConfig;
use crate::error::{ConfigError, QueryError, StoreError};
use crate::feedback::FeedbackNetwork;
use crate::store::IndexStore;
use crate::{MatchRow, MatchRows, UrlId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Score paired with the fallback url when no query word is indexed.
pub const NO_MATCH_SCORE: f64 = -1.0;

/// Floor for divisors during normalization.
const EPSILON: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Number of matching rows on the page.
    Frequency,
    /// How early the query words appear.
    Location,
    /// How close together the query words appear.
    Distance,
    /// Learned relevance from past clicks.
    Feedback,
    Topic,
    UrlName,
}

pub const ALL_SIGNALS: [Signal; 6] = [
    Signal::Frequency,
    Signal::Location,
    Signal::Distance,
    Signal::Feedback,
    Signal::Topic,
    Signal::UrlName,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredUrl {
    pub score: f64,
    pub url: String,
}

impl ScoredUrl {
    pub fn is_no_match(&self) -> bool {
        self.score == NO_MATCH_SCORE
    }
}

/// Scale scores into [0, 1] with the best raw value mapping to 1.0.
///
/// With `small_is_better` the smallest value is best and scores become
/// `min / value`; otherwise `value / max`.
pub fn normalize(scores: &HashMap<UrlId, f64>, small_is_better: bool) -> HashMap<UrlId, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    if small_is_better {
        let min = scores.values().copied().fold(f64::INFINITY, f64::min).max(EPSILON);
        scores.iter().map(|(&u, &v)| (u, min / v.max(EPSILON))).collect()
    } else {
        let mut max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == 0.0 {
            max = EPSILON;
        }
        scores.iter().map(|(&u, &v)| (u, v / max)).collect()
    }
}

pub fn frequency_scores(rows: &[MatchRow]) -> HashMap<UrlId, f64> {
    let mut counts: HashMap<UrlId, f64> = HashMap::new();
    for row in rows {
        *counts.entry(row.url_id).or_insert(0.0) += 1.0;
    }
    normalize(&counts, false)
}

pub fn location_scores(rows: &[MatchRow]) -> HashMap<UrlId, f64> {
    normalize(&min_per_url(rows, MatchRow::location), true)
}

/// Single-word queries have no distance, so every page scores 1.0.
pub fn distance_scores(rows: &[MatchRow]) -> HashMap<UrlId, f64> {
    if rows.first().map_or(true, |r| r.positions.len() < 2) {
        return rows.iter().map(|r| (r.url_id, 1.0)).collect();
    }
    normalize(&min_per_url(rows, MatchRow::distance), true)
}

fn min_per_url(rows: &[MatchRow], f: impl Fn(&MatchRow) -> u64) -> HashMap<UrlId, f64> {
    let mut best: HashMap<UrlId, u64> = HashMap::new();
    for row in rows {
        let v = f(row);
        best.entry(row.url_id).and_modify(|b| *b = (*b).min(v)).or_insert(v);
    }
    best.into_iter().map(|(u, v)| (u, v as f64)).collect()
}

/// Answers free-text queries from an [`IndexStore`], optionally blending in
/// a [`FeedbackNetwork`].
pub struct Searcher {
    store: Arc<IndexStore>,
    network: Option<Arc<FeedbackNetwork>>,
    config: SearchConfig,
}

impl Searcher {
    /// Fails when a weight is negative or not finite.
    pub fn new(store: Arc<IndexStore>, config: SearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, network: None, config })
    }

    /// Attach a feedback network. It only affects ranking when
    /// `feedback_weight` is set in the config.
    pub fn with_feedback(mut self, network: Arc<FeedbackNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn store(&self) -> &Arc<IndexStore> { &self.store }
    pub fn network(&self) -> Option<&Arc<FeedbackNetwork>> { self.network.as_ref() }
    pub fn config(&self) -> &SearchConfig { &self.config }

    pub fn query(&self, text: &str) -> Result<Vec<ScoredUrl>, StoreError> {
        self.query_top(text, self.config.result_limit)
    }

    /// Ranked `(score, url)` pairs, best first, at most `limit` of them.
    ///
    /// A query with no indexed word yields the single no-match sentinel.
    pub fn query_top(&self, text: &str, limit: usize) -> Result<Vec<ScoredUrl>, StoreError> {
        let matched = match self.store.match_rows(text) {
            Ok(m) => m,
            Err(QueryError::Unresolved { .. }) => {
                debug!(query = text, "no query word indexed");
                return Ok(vec![ScoredUrl { score: NO_MATCH_SCORE, url: self.config.fallback_url.clone() }]);
            }
            Err(QueryError::Store(e)) => return Err(e),
        };

        let mut ranked: Vec<(UrlId, f64)> = self.score_rows(&matched)?.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut results = Vec::with_capacity(limit.min(ranked.len()));
        for (url_id, score) in ranked.into_iter().take(limit) {
            let url = self.store.url_name(url_id)?.ok_or(StoreError::UnknownUrl(url_id))?;
            results.push(ScoredUrl { score, url });
        }
        debug!(query = text, results = results.len(), "ranked query");
        Ok(results)
    }

    /// Weighted sum of every enabled signal, per url.
    pub fn score_rows(&self, matched: &MatchRows) -> Result<HashMap<UrlId, f64>, StoreError> {
        let mut totals: HashMap<UrlId, f64> = matched.rows.iter().map(|r| (r.url_id, 0.0)).collect();
        for signal in ALL_SIGNALS {
            let Some(weight) = self.weight(signal) else { continue };
            let scores = self.signal_scores(signal, matched)?;
            for (url_id, total) in totals.iter_mut() {
                *total += weight * scores.get(url_id).copied().unwrap_or(0.0);
            }
        }
        Ok(totals)
    }

    fn weight(&self, signal: Signal) -> Option<f64> {
        let w = &self.config.weights;
        let weight = match signal {
            Signal::Frequency => w.frequency,
            Signal::Location => w.location,
            Signal::Distance => w.distance,
            Signal::Feedback => {
                self.network.as_ref()?;
                self.config.feedback_weight?
            }
            Signal::Topic => w.topic,
            Signal::UrlName => w.url_name,
        };
        (weight != 0.0).then_some(weight)
    }

    fn signal_scores(&self, signal: Signal, matched: &MatchRows) -> Result<HashMap<UrlId, f64>, StoreError> {
        Ok(match signal {
            Signal::Frequency => frequency_scores(&matched.rows),
            Signal::Location => location_scores(&matched.rows),
            Signal::Distance => distance_scores(&matched.rows),
            Signal::Feedback => self.feedback_scores(matched)?,
            // Hooks without a model behind them yet.
            Signal::Topic | Signal::UrlName => HashMap::new(),
        })
    }

    fn feedback_scores(&self, matched: &MatchRows) -> Result<HashMap<UrlId, f64>, StoreError> {
        let Some(network) = &self.network else { return Ok(HashMap::new()) };
        let url_ids = matched.url_ids();
        let outputs = network.score(&matched.word_ids, &url_ids)?;
        // negative outputs count as zero
        let raw: HashMap<UrlId, f64> = url_ids.into_iter().zip(outputs.into_iter().map(|o| o.max(0.0))).collect();
        Ok(normalize(&raw, false))
    }
}
