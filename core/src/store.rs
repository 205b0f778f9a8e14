//! Persistent inverted index on top of sled.
//!
//! Layout:
//! - `dictionary`: `u{url}` -> url id, `U{id}` -> url, `w{word}` -> word id,
//!   `W{id}` -> word, plus the `#url` / `#word` id counters.
//! - `postings`: `{word id}{url id}{position}` -> empty, scanned per word.
//! - `doc_postings`: `{url id}{position}` -> word id, scanned per page.
//! - `links`: `{from url id}{to url id}` -> bincode list of anchor word ids.
//!
//! Integers are stored big-endian so prefix scans come back ordered.

use crate::error::{QueryError, StoreError};
use crate::tokenizer::tokenize;
use crate::{IndexOutcome, MatchRow, MatchRows, Position, StoreStats, UrlId, WordId};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

const URL_COUNTER: &[u8] = b"#url";
const WORD_COUNTER: &[u8] = b"#word";
const EMPTY: &[u8] = &[];

#[derive(Debug, Clone, Copy)]
enum IdKind {
    Url,
    Word,
}

impl IdKind {
    fn forward_key(self, name: &str) -> Vec<u8> {
        let tag = match self { IdKind::Url => b'u', IdKind::Word => b'w' };
        let mut key = Vec::with_capacity(name.len() + 1);
        key.push(tag);
        key.extend_from_slice(name.as_bytes());
        key
    }

    fn reverse_key(self, id: u64) -> Vec<u8> {
        let tag = match self { IdKind::Url => b'U', IdKind::Word => b'W' };
        let mut key = Vec::with_capacity(9);
        key.push(tag);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    fn counter_key(self) -> &'static [u8] {
        match self { IdKind::Url => URL_COUNTER, IdKind::Word => WORD_COUNTER }
    }

    fn what(self) -> &'static str {
        match self { IdKind::Url => "url id", IdKind::Word => "word id" }
    }
}

fn decode_u64(raw: &[u8], tree: &'static str, what: &'static str) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::Corrupt { tree, what })?;
    Ok(u64::from_be_bytes(bytes))
}

fn posting_key(word_id: WordId, url_id: UrlId, pos: Position) -> Vec<u8> {
    let mut key = Vec::with_capacity(20);
    key.extend_from_slice(&word_id.to_be_bytes());
    key.extend_from_slice(&url_id.to_be_bytes());
    key.extend_from_slice(&pos.to_be_bytes());
    key
}

fn decode_posting_key(raw: &[u8]) -> Result<(WordId, UrlId, Position), StoreError> {
    if raw.len() != 20 {
        return Err(StoreError::Corrupt { tree: "postings", what: "posting key" });
    }
    let word_id = decode_u64(&raw[..8], "postings", "word id")?;
    let url_id = decode_u64(&raw[8..16], "postings", "url id")?;
    let pos_bytes: [u8; 4] = raw[16..]
        .try_into()
        .map_err(|_| StoreError::Corrupt { tree: "postings", what: "position" })?;
    Ok((word_id, url_id, Position::from_be_bytes(pos_bytes)))
}

fn doc_posting_key(url_id: UrlId, pos: Position) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&url_id.to_be_bytes());
    key.extend_from_slice(&pos.to_be_bytes());
    key
}

fn link_key(from: UrlId, to: UrlId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&from.to_be_bytes());
    key.extend_from_slice(&to.to_be_bytes());
    key
}

/// Look up `name`, assigning the next id from the kind's counter if absent.
fn get_or_create(dict: &TransactionalTree, kind: IdKind, name: &str) -> ConflictableTransactionResult<u64, StoreError> {
    let key = kind.forward_key(name);
    if let Some(raw) = dict.get(&key)? {
        return decode_u64(&raw, "dictionary", kind.what()).map_err(ConflictableTransactionError::Abort);
    }
    let next = match dict.get(kind.counter_key())? {
        Some(raw) => decode_u64(&raw, "dictionary", "counter").map_err(ConflictableTransactionError::Abort)? + 1,
        None => 1,
    };
    dict.insert(kind.counter_key(), next.to_be_bytes().to_vec())?;
    dict.insert(key, next.to_be_bytes().to_vec())?;
    dict.insert(kind.reverse_key(next), name.as_bytes())?;
    Ok(next)
}

/// Every combination of one position per list, in lexicographic order.
fn position_combinations(lists: &[&Vec<Position>], mut emit: impl FnMut(Vec<Position>)) {
    if lists.iter().any(|l| l.is_empty()) { return; }
    let mut idx = vec![0usize; lists.len()];
    loop {
        emit(idx.iter().zip(lists).map(|(&i, l)| l[i]).collect());
        let mut d = lists.len();
        loop {
            if d == 0 { return; }
            d -= 1;
            idx[d] += 1;
            if idx[d] < lists[d].len() { break; }
            idx[d] = 0;
        }
    }
}

pub struct IndexStore {
    db: Db,
    dictionary: Tree,
    postings: Tree,
    doc_postings: Tree,
    links: Tree,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            dictionary: db.open_tree("dictionary")?,
            postings: db.open_tree("postings")?,
            doc_postings: db.open_tree("doc_postings")?,
            links: db.open_tree("links")?,
            db,
        })
    }

    fn lookup(&self, kind: IdKind, name: &str) -> Result<Option<u64>, StoreError> {
        match self.dictionary.get(kind.forward_key(name))? {
            Some(raw) => Ok(Some(decode_u64(&raw, "dictionary", kind.what())?)),
            None => Ok(None),
        }
    }

    fn lookup_or_create(&self, kind: IdKind, name: &str) -> Result<u64, StoreError> {
        if let Some(id) = self.lookup(kind, name)? {
            return Ok(id);
        }
        let id = self.dictionary.transaction(|dict| get_or_create(dict, kind, name))?;
        Ok(id)
    }

    pub fn url_id(&self, url: &str) -> Result<Option<UrlId>, StoreError> {
        self.lookup(IdKind::Url, url)
    }

    pub fn word_id(&self, word: &str) -> Result<Option<WordId>, StoreError> {
        self.lookup(IdKind::Word, word)
    }

    pub fn get_or_create_url_id(&self, url: &str) -> Result<UrlId, StoreError> {
        self.lookup_or_create(IdKind::Url, url)
    }

    pub fn get_or_create_word_id(&self, word: &str) -> Result<WordId, StoreError> {
        self.lookup_or_create(IdKind::Word, word)
    }

    pub fn url_name(&self, url_id: UrlId) -> Result<Option<String>, StoreError> {
        match self.dictionary.get(IdKind::Url.reverse_key(url_id))? {
            Some(raw) => Ok(Some(String::from_utf8_lossy(&raw).into_owned())),
            None => Ok(None),
        }
    }

    /// True only if the url is known and has at least one posting.
    pub fn is_indexed(&self, url: &str) -> Result<bool, StoreError> {
        let Some(url_id) = self.url_id(url)? else { return Ok(false) };
        Ok(self.doc_postings.scan_prefix(url_id.to_be_bytes()).next().transpose()?.is_some())
    }

    /// Tokenize `text` and write one posting per surviving token.
    ///
    /// All ids and postings for the page are written in a single transaction,
    /// so a failure leaves the page unindexed rather than half-indexed.
    pub fn index_page(&self, url: &str, text: &str) -> Result<IndexOutcome, StoreError> {
        if self.is_indexed(url)? {
            let url_id = self.url_id(url)?.ok_or(StoreError::Corrupt { tree: "dictionary", what: "url id" })?;
            debug!(url, url_id, "already indexed");
            return Ok(IndexOutcome::AlreadyIndexed { url_id });
        }
        let tokens = tokenize(text);

        let url_id = (&self.dictionary, &self.postings, &self.doc_postings).transaction(
            |(dict, postings, doc_postings)| -> ConflictableTransactionResult<UrlId, StoreError> {
                let url_id = get_or_create(dict, IdKind::Url, url)?;
                let mut word_ids: HashMap<&str, WordId> = HashMap::new();
                for (term, pos) in &tokens {
                    let word_id = match word_ids.get(term.as_str()) {
                        Some(&id) => id,
                        None => {
                            let id = get_or_create(dict, IdKind::Word, term)?;
                            word_ids.insert(term.as_str(), id);
                            id
                        }
                    };
                    let pos = *pos as Position;
                    postings.insert(posting_key(word_id, url_id, pos), EMPTY)?;
                    doc_postings.insert(doc_posting_key(url_id, pos), word_id.to_be_bytes().to_vec())?;
                }
                Ok(url_id)
            },
        )?;

        info!(url, url_id, postings = tokens.len(), "indexed page");
        Ok(IndexOutcome::Indexed { url_id, postings: tokens.len() })
    }

    /// Record a link edge, optionally annotated with the anchor's word ids.
    pub fn add_link(&self, from: UrlId, to: UrlId, anchor_words: &[WordId]) -> Result<(), StoreError> {
        let value = bincode::serialize(anchor_words)?;
        self.links.insert(link_key(from, to), value)?;
        Ok(())
    }

    /// Outgoing edges of `from` with their anchor word ids, ordered by target id.
    pub fn links_from(&self, from: UrlId) -> Result<Vec<(UrlId, Vec<WordId>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.links.scan_prefix(from.to_be_bytes()) {
            let (key, value) = item?;
            if key.len() != 16 {
                return Err(StoreError::Corrupt { tree: "links", what: "link key" });
            }
            let to = decode_u64(&key[8..], "links", "url id")?;
            let anchor: Vec<WordId> = bincode::deserialize(&value)?;
            out.push((to, anchor));
        }
        Ok(out)
    }

    /// Word ids of the query stems known to the index, in order of first
    /// occurrence. A repeated word is kept once.
    pub fn resolve_query(&self, query: &str) -> Result<Vec<WordId>, StoreError> {
        let mut ids = Vec::new();
        for (term, _) in tokenize(query) {
            if let Some(id) = self.word_id(&term)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Join postings across every matched query word.
    ///
    /// Pages must contain all matched words. Each page yields one row per
    /// combination of positions, ordered by url id and then positions.
    pub fn match_rows(&self, query: &str) -> Result<MatchRows, QueryError> {
        let word_ids = self.resolve_query(query)?;
        if word_ids.is_empty() {
            return Err(QueryError::Unresolved { query: query.to_string() });
        }

        let mut per_word: Vec<BTreeMap<UrlId, Vec<Position>>> = Vec::with_capacity(word_ids.len());
        for &word_id in &word_ids {
            let mut by_url: BTreeMap<UrlId, Vec<Position>> = BTreeMap::new();
            for item in self.postings.scan_prefix(word_id.to_be_bytes()) {
                let (key, _) = item.map_err(StoreError::from)?;
                let (_, url_id, pos) = decode_posting_key(&key)?;
                by_url.entry(url_id).or_default().push(pos);
            }
            per_word.push(by_url);
        }

        let mut rows = Vec::new();
        for &url_id in per_word[0].keys() {
            let lists: Option<Vec<&Vec<Position>>> = per_word.iter().map(|m| m.get(&url_id)).collect();
            if let Some(lists) = lists {
                position_combinations(&lists, |positions| rows.push(MatchRow { url_id, positions }));
            }
        }
        debug!(query, words = word_ids.len(), rows = rows.len(), "matched rows");
        Ok(MatchRows { rows, word_ids })
    }

    fn counter(&self, key: &[u8]) -> Result<u64, StoreError> {
        match self.dictionary.get(key)? {
            Some(raw) => decode_u64(&raw, "dictionary", "counter"),
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            urls: self.counter(URL_COUNTER)?,
            words: self.counter(WORD_COUNTER)?,
            postings: self.postings.len() as u64,
            links: self.links.len() as u64,
        })
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
    fn combinations_cover_every_pairing() {
        let a = vec![1, 5];
        let b = vec![2, 3];
        let mut out = Vec::new();
        position_combinations(&[&a, &b], |p| out.push(p));
        assert_eq!(out, vec![vec![1, 2], vec![1, 3], vec![5, 2], vec![5, 3]]);
    }

    #[test]
    fn posting_key_round_trips() {
        let key = posting_key(7, 42, 9);
        assert_eq!(decode_posting_key(&key).unwrap(), (7, 42, 9));
    }

    #[test]
    fn ids_are_dense_and_stable() {
        let store = IndexStore::temporary().unwrap();
        assert_eq!(store.get_or_create_url_id("http://a").unwrap(), 1);
        assert_eq!(store.get_or_create_url_id("http://b").unwrap(), 2);
        assert_eq!(store.get_or_create_url_id("http://a").unwrap(), 1);
        assert_eq!(store.get_or_create_word_id("doctor").unwrap(), 1);
        assert_eq!(store.url_name(2).unwrap().as_deref(), Some("http://b"));
    }
}
