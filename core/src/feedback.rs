//! Click-trained relevance network.
//!
//! Query words feed hidden nodes, hidden nodes feed urls. A hidden node is
//! created for every distinct small word set seen in a click, and the edge
//! strengths are nudged toward the clicked url by one backpropagation step
//! per click. The network lives in its own sled database; a [`QueryNetwork`]
//! is the dense in-memory slice of it relevant to one query.

use crate::config::FeedbackConfig;
use crate::error::{FeedbackError, StoreError};
use crate::{UrlId, WordId};
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

pub type HiddenId = u64;

/// Most word ids that take part in a hidden node key.
pub const MAX_KEY_WORDS: usize = 3;
const HIDDEN_COUNTER: &[u8] = b"#hidden";
const EMPTY: &[u8] = &[];
const NEW_NODE_URL_STRENGTH: f64 = 0.1;
/// Placeholder id of a hidden node not yet written. Real ids start at 1.
const PENDING_HIDDEN: HiddenId = 0;

/// The two weight layers of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    WordHidden,
    HiddenUrl,
}

impl Layer {
    /// Strength of an edge that has never been written.
    pub fn default_strength(self) -> f64 {
        match self {
            Layer::WordHidden => -0.2,
            Layer::HiddenUrl => 0.0,
        }
    }
}

/// Word ids that key a hidden node: deduplicated, ascending, at most three.
pub fn key_words(word_ids: &[WordId]) -> Vec<WordId> {
    let set: BTreeSet<WordId> = word_ids.iter().copied().collect();
    set.into_iter().take(MAX_KEY_WORDS).collect()
}

pub fn canonical_key(word_ids: &[WordId]) -> String {
    key_words(word_ids).iter().map(|id| id.to_string()).collect::<Vec<_>>().join("_")
}

fn edge_key(from: u64, to: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&from.to_be_bytes());
    key.extend_from_slice(&to.to_be_bytes());
    key
}

fn decode_u64(raw: &[u8], tree: &'static str) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::Corrupt { tree, what: "id" })?;
    Ok(u64::from_be_bytes(bytes))
}

fn decode_strength(raw: &[u8], tree: &'static str) -> Result<f64, StoreError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::Corrupt { tree, what: "strength" })?;
    Ok(f64::from_be_bytes(bytes))
}

fn dedup(ids: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(ids.len());
    for &id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Id of the hidden node for `key`, allocating the next one if absent.
/// The flag is true when the node was created here.
fn claim_hidden_node(nodes: &TransactionalTree, key: &str) -> ConflictableTransactionResult<(HiddenId, bool), StoreError> {
    if let Some(raw) = nodes.get(key.as_bytes())? {
        let id = decode_u64(&raw, "hidden_nodes").map_err(ConflictableTransactionError::Abort)?;
        return Ok((id, false));
    }
    let id = match nodes.get(HIDDEN_COUNTER)? {
        Some(raw) => decode_u64(&raw, "hidden_nodes").map_err(ConflictableTransactionError::Abort)? + 1,
        None => 1,
    };
    nodes.insert(HIDDEN_COUNTER, id.to_be_bytes().to_vec())?;
    nodes.insert(key.as_bytes(), id.to_be_bytes().to_vec())?;
    Ok((id, true))
}

/// Hidden node of a training step that exists only in memory so far.
struct PendingNode {
    key: String,
    column: usize,
}

fn put_strength(tree: &TransactionalTree, from: u64, to: u64, strength: f64) -> ConflictableTransactionResult<(), StoreError> {
    tree.insert(edge_key(from, to), strength.to_be_bytes().to_vec())?;
    Ok(())
}

/// Dense weights and activations for one (words, urls) query.
#[derive(Debug, Clone)]
pub struct QueryNetwork {
    word_ids: Vec<WordId>,
    hidden_ids: Vec<HiddenId>,
    url_ids: Vec<UrlId>,
    ai: Vec<f64>,
    ah: Vec<f64>,
    ao: Vec<f64>,
    /// words x hidden
    wi: Vec<Vec<f64>>,
    /// hidden x urls
    wo: Vec<Vec<f64>>,
}

impl QueryNetwork {
    pub fn word_ids(&self) -> &[WordId] { &self.word_ids }
    pub fn hidden_ids(&self) -> &[HiddenId] { &self.hidden_ids }
    pub fn url_ids(&self) -> &[UrlId] { &self.url_ids }
    pub fn outputs(&self) -> &[f64] { &self.ao }

    /// Activations of the url nodes, in url order. Every active word
    /// contributes an input of 1.0.
    pub fn feed_forward(&mut self) -> Vec<f64> {
        self.ai.iter_mut().for_each(|a| *a = 1.0);

        for j in 0..self.hidden_ids.len() {
            let sum: f64 = (0..self.word_ids.len()).map(|i| self.ai[i] * self.wi[i][j]).sum();
            self.ah[j] = sum.tanh();
        }
        for k in 0..self.url_ids.len() {
            let sum: f64 = (0..self.hidden_ids.len()).map(|j| self.ah[j] * self.wo[j][k]).sum();
            self.ao[k] = sum.tanh();
        }
        self.ao.clone()
    }

    /// One backpropagation step toward `targets` using the activations of
    /// the last forward pass.
    pub fn back_propagate(&mut self, targets: &[f64], learning_rate: f64) {
        let output_deltas: Vec<f64> = (0..self.url_ids.len())
            .map(|k| dtanh(self.ao[k]) * (targets[k] - self.ao[k]))
            .collect();

        let hidden_deltas: Vec<f64> = (0..self.hidden_ids.len())
            .map(|j| {
                let error: f64 = (0..self.url_ids.len()).map(|k| output_deltas[k] * self.wo[j][k]).sum();
                dtanh(self.ah[j]) * error
            })
            .collect();

        for j in 0..self.hidden_ids.len() {
            for k in 0..self.url_ids.len() {
                self.wo[j][k] += learning_rate * output_deltas[k] * self.ah[j];
            }
        }
        for i in 0..self.word_ids.len() {
            for j in 0..self.hidden_ids.len() {
                self.wi[i][j] += learning_rate * hidden_deltas[j] * self.ai[i];
            }
        }
    }
}

/// Derivative of tanh expressed through its output.
fn dtanh(y: f64) -> f64 {
    1.0 - y * y
}

pub struct FeedbackNetwork {
    db: Db,
    hidden_nodes: Tree,
    word_hidden: Tree,
    hidden_url: Tree,
    url_hidden: Tree,
    config: FeedbackConfig,
    train_lock: Mutex<()>,
}

impl FeedbackNetwork {
    pub fn open<P: AsRef<Path>>(path: P, config: FeedbackConfig) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?, config)
    }

    pub fn temporary(config: FeedbackConfig) -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?, config)
    }

    fn from_db(db: Db, config: FeedbackConfig) -> Result<Self, StoreError> {
        Ok(Self {
            hidden_nodes: db.open_tree("hidden_nodes")?,
            word_hidden: db.open_tree("word_hidden")?,
            hidden_url: db.open_tree("hidden_url")?,
            url_hidden: db.open_tree("url_hidden")?,
            db,
            config,
            train_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &FeedbackConfig { &self.config }

    fn layer_tree(&self, layer: Layer) -> &Tree {
        match layer {
            Layer::WordHidden => &self.word_hidden,
            Layer::HiddenUrl => &self.hidden_url,
        }
    }

    /// Stored strength of an edge, or the layer default if never written.
    pub fn strength(&self, from: u64, to: u64, layer: Layer) -> Result<f64, StoreError> {
        match self.layer_tree(layer).get(edge_key(from, to))? {
            Some(raw) => decode_strength(&raw, "weights"),
            None => Ok(layer.default_strength()),
        }
    }

    pub fn hidden_node(&self, word_ids: &[WordId]) -> Result<Option<HiddenId>, StoreError> {
        match self.hidden_nodes.get(canonical_key(word_ids))? {
            Some(raw) => Ok(Some(decode_u64(&raw, "hidden_nodes")?)),
            None => Ok(None),
        }
    }

    /// Create the hidden node for this word set unless it already exists.
    ///
    /// A new node gets word->hidden strength `1/n` from each of its `n` key
    /// words and hidden->url strength 0.1 to every candidate url.
    pub fn generate_hidden_node(&self, word_ids: &[WordId], url_ids: &[UrlId]) -> Result<HiddenId, FeedbackError> {
        let words = key_words(word_ids);
        if words.is_empty() {
            return Err(FeedbackError::EmptyQuery);
        }
        if let Some(id) = self.hidden_node(&words)? {
            return Ok(id);
        }

        let key = canonical_key(&words);
        let word_strength = 1.0 / words.len() as f64;
        let (id, created) = (&self.hidden_nodes, &self.word_hidden, &self.hidden_url, &self.url_hidden)
            .transaction(|(nodes, word_hidden, hidden_url, url_hidden)| -> ConflictableTransactionResult<(HiddenId, bool), StoreError> {
                let (id, created) = claim_hidden_node(nodes, &key)?;
                if created {
                    for &word_id in &words {
                        put_strength(word_hidden, word_id, id, word_strength)?;
                    }
                    for &url_id in url_ids {
                        put_strength(hidden_url, id, url_id, NEW_NODE_URL_STRENGTH)?;
                        url_hidden.insert(edge_key(url_id, id), EMPTY)?;
                    }
                }
                Ok((id, created))
            })
            .map_err(StoreError::from)?;

        if created {
            info!(hidden_id = id, key = %key, urls = url_ids.len(), "created hidden node");
        }
        Ok(id)
    }

    /// Hidden nodes wired to any of the words or any of the urls, ascending.
    pub fn hidden_ids(&self, word_ids: &[WordId], url_ids: &[UrlId]) -> Result<Vec<HiddenId>, StoreError> {
        let mut ids = BTreeSet::new();
        for &word_id in word_ids {
            for item in self.word_hidden.scan_prefix(word_id.to_be_bytes()) {
                let (key, _) = item?;
                ids.insert(decode_u64(&key[8..], "word_hidden")?);
            }
        }
        for &url_id in url_ids {
            for item in self.url_hidden.scan_prefix(url_id.to_be_bytes()) {
                let (key, _) = item?;
                ids.insert(decode_u64(&key[8..], "url_hidden")?);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Load the slice of the network relevant to a query.
    pub fn setup(&self, word_ids: &[WordId], url_ids: &[UrlId]) -> Result<QueryNetwork, StoreError> {
        let hidden_ids = self.hidden_ids(word_ids, url_ids)?;

        let mut wi = Vec::with_capacity(word_ids.len());
        for &word_id in word_ids {
            let row = hidden_ids
                .iter()
                .map(|&h| self.strength(word_id, h, Layer::WordHidden))
                .collect::<Result<Vec<_>, _>>()?;
            wi.push(row);
        }
        let mut wo = Vec::with_capacity(hidden_ids.len());
        for &hidden_id in &hidden_ids {
            let row = url_ids
                .iter()
                .map(|&u| self.strength(hidden_id, u, Layer::HiddenUrl))
                .collect::<Result<Vec<_>, _>>()?;
            wo.push(row);
        }

        Ok(QueryNetwork {
            ai: vec![1.0; word_ids.len()],
            ah: vec![1.0; hidden_ids.len()],
            ao: vec![1.0; url_ids.len()],
            word_ids: word_ids.to_vec(),
            url_ids: url_ids.to_vec(),
            hidden_ids,
            wi,
            wo,
        })
    }

    /// Learned relevance of each url for the query words, in url order.
    /// Values lie in (-1, 1); 0.0 means the network knows nothing yet.
    pub fn score(&self, word_ids: &[WordId], url_ids: &[UrlId]) -> Result<Vec<f64>, StoreError> {
        let mut net = self.setup(word_ids, url_ids)?;
        Ok(net.feed_forward())
    }

    /// Train on one click: `selected` was chosen among `url_ids` for a query
    /// made of `word_ids`. Repeated ids are ignored.
    ///
    /// Training steps are serialized. A missing hidden node and every
    /// updated weight are written in one transaction, so a failed step
    /// leaves the stored network untouched.
    pub fn train(&self, word_ids: &[WordId], url_ids: &[UrlId], selected: UrlId) -> Result<(), FeedbackError> {
        let word_ids = dedup(word_ids);
        let url_ids = dedup(url_ids);
        if word_ids.is_empty() {
            return Err(FeedbackError::EmptyQuery);
        }
        let target_idx = url_ids
            .iter()
            .position(|&u| u == selected)
            .ok_or(FeedbackError::SelectedNotCandidate { selected })?;

        let _guard = self.train_lock.lock();
        let (mut net, pending) = self.prepare_step(&word_ids, &url_ids)?;
        net.feed_forward();
        let mut targets = vec![0.0; url_ids.len()];
        targets[target_idx] = 1.0;
        net.back_propagate(&targets, self.config.learning_rate);

        let hidden_id = self.persist(&net, pending.as_ref())?;
        if let Some(p) = &pending {
            info!(hidden_id, key = %p.key, urls = url_ids.len(), "created hidden node");
        }
        debug!(words = word_ids.len(), urls = url_ids.len(), hidden = net.hidden_ids.len(), selected, "trained click");
        Ok(())
    }

    /// Load the query network for a training step without writing anything.
    ///
    /// When the word set has no hidden node yet, one is added in memory as
    /// the last hidden column with the strengths a new node starts with.
    fn prepare_step(&self, word_ids: &[WordId], url_ids: &[UrlId]) -> Result<(QueryNetwork, Option<PendingNode>), StoreError> {
        let mut net = self.setup(word_ids, url_ids)?;
        let words = key_words(word_ids);
        if self.hidden_node(&words)?.is_some() {
            return Ok((net, None));
        }

        let word_strength = 1.0 / words.len() as f64;
        for (i, word_id) in net.word_ids.iter().enumerate() {
            let strength = if words.contains(word_id) { word_strength } else { Layer::WordHidden.default_strength() };
            net.wi[i].push(strength);
        }
        net.wo.push(vec![NEW_NODE_URL_STRENGTH; url_ids.len()]);
        net.ah.push(1.0);
        net.hidden_ids.push(PENDING_HIDDEN);
        let pending = PendingNode { key: canonical_key(&words), column: net.hidden_ids.len() - 1 };
        Ok((net, Some(pending)))
    }

    /// Overwrite every weight of `net` in storage, first claiming an id for
    /// the pending hidden node if there is one. Returns that id, or 0.
    fn persist(&self, net: &QueryNetwork, pending: Option<&PendingNode>) -> Result<HiddenId, StoreError> {
        let claimed = (&self.hidden_nodes, &self.word_hidden, &self.hidden_url, &self.url_hidden).transaction(
            |(nodes, word_hidden, hidden_url, url_hidden)| -> ConflictableTransactionResult<HiddenId, StoreError> {
                let claimed = match pending {
                    Some(p) => claim_hidden_node(nodes, &p.key)?.0,
                    None => PENDING_HIDDEN,
                };
                let hidden_at = |j: usize| match pending {
                    Some(p) if p.column == j => claimed,
                    _ => net.hidden_ids[j],
                };
                for (i, &word_id) in net.word_ids.iter().enumerate() {
                    for j in 0..net.hidden_ids.len() {
                        put_strength(word_hidden, word_id, hidden_at(j), net.wi[i][j])?;
                    }
                }
                for j in 0..net.hidden_ids.len() {
                    let hidden_id = hidden_at(j);
                    for (k, &url_id) in net.url_ids.iter().enumerate() {
                        put_strength(hidden_url, hidden_id, url_id, net.wo[j][k])?;
                        url_hidden.insert(edge_key(url_id, hidden_id), EMPTY)?;
                    }
                }
                Ok(claimed)
            },
        )?;
        Ok(claimed)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_order_and_duplicates() {
        assert_eq!(canonical_key(&[3, 1, 2]), "1_2_3");
        assert_eq!(canonical_key(&[2, 2, 1]), canonical_key(&[1, 2]));
        assert_eq!(canonical_key(&[9, 4, 7, 1]), canonical_key(&[1, 7, 4, 9, 9]));
    }

    #[test]
    fn unseen_edges_read_layer_defaults() {
        let net = FeedbackNetwork::temporary(FeedbackConfig::default()).unwrap();
        assert_eq!(net.strength(1, 1, Layer::WordHidden).unwrap(), -0.2);
        assert_eq!(net.strength(1, 1, Layer::HiddenUrl).unwrap(), 0.0);
    }

    #[test]
    fn training_step_is_prepared_without_writes() {
        let net = FeedbackNetwork::temporary(FeedbackConfig::default()).unwrap();
        let (mut prepared, pending) = net.prepare_step(&[1, 2], &[10, 11]).unwrap();
        assert_eq!(pending.as_ref().map(|p| p.key.as_str()), Some("1_2"));
        assert_eq!(prepared.hidden_ids(), &[PENDING_HIDDEN]);
        assert!(net.hidden_nodes.is_empty());
        assert!(net.word_hidden.is_empty());
        assert!(net.hidden_url.is_empty());
        assert!(net.url_hidden.is_empty());
        assert_eq!(net.score(&[1, 2], &[10, 11]).unwrap(), vec![0.0, 0.0]);

        // same activations as a node created up front
        net.generate_hidden_node(&[1, 2], &[10, 11]).unwrap();
        assert_eq!(prepared.feed_forward(), net.score(&[1, 2], &[10, 11]).unwrap());

        let (_, pending) = net.prepare_step(&[1, 2], &[10, 11]).unwrap();
        assert!(pending.is_none());
    }

    #[test]
    fn persist_claims_the_pending_node_with_its_weights() {
        let net = FeedbackNetwork::temporary(FeedbackConfig::default()).unwrap();
        let (prepared, pending) = net.prepare_step(&[4], &[10]).unwrap();
        let id = net.persist(&prepared, pending.as_ref()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(net.hidden_node(&[4]).unwrap(), Some(1));
        assert_eq!(net.strength(4, 1, Layer::WordHidden).unwrap(), 1.0);
        assert_eq!(net.strength(1, 10, Layer::HiddenUrl).unwrap(), 0.1);
        assert_eq!(net.hidden_ids(&[], &[10]).unwrap(), vec![1]);
    }

    #[test]
    fn forward_pass_uses_tanh() {
        let mut net = QueryNetwork {
            word_ids: vec![1],
            hidden_ids: vec![1],
            url_ids: vec![10, 11],
            ai: vec![1.0],
            ah: vec![1.0],
            ao: vec![1.0, 1.0],
            wi: vec![vec![1.0]],
            wo: vec![vec![0.1, 0.1]],
        };
        let out = net.feed_forward();
        let expected = (1.0f64.tanh() * 0.1).tanh();
        assert!((out[0] - expected).abs() < 1e-12);
        assert_eq!(out[0], out[1]);
    }
}
