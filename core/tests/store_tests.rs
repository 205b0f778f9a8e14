use search_core::error::QueryError;
use search_core::{IndexOutcome, IndexStore};
use tempfile::tempdir;

fn postings_of(store: &IndexStore, query: &str) -> Vec<(u64, Vec<u32>)> {
    store
        .match_rows(query)
        .unwrap()
        .rows
        .into_iter()
        .map(|r| (r.url_id, r.positions))
        .collect()
}

#[test]
fn index_page_is_idempotent() {
    let store = IndexStore::temporary().unwrap();
    let first = store.index_page("http://a.test/", "doctor hospital doctor").unwrap();
    let before = store.stats().unwrap();
    let rows_before = postings_of(&store, "doctor");

    let second = store.index_page("http://a.test/", "doctor hospital doctor").unwrap();
    assert_eq!(first, IndexOutcome::Indexed { url_id: 1, postings: 3 });
    assert_eq!(second, IndexOutcome::AlreadyIndexed { url_id: 1 });
    assert_eq!(store.stats().unwrap(), before);
    assert_eq!(postings_of(&store, "doctor"), rows_before);
}

#[test]
fn known_url_without_postings_is_not_indexed() {
    let store = IndexStore::temporary().unwrap();
    store.get_or_create_url_id("http://known.test/").unwrap();
    assert!(!store.is_indexed("http://known.test/").unwrap());
    assert!(!store.is_indexed("http://never.test/").unwrap());

    store.index_page("http://known.test/", "shelter").unwrap();
    assert!(store.is_indexed("http://known.test/").unwrap());
}

#[test]
fn stopword_only_page_stays_unindexed() {
    let store = IndexStore::temporary().unwrap();
    let out = store.index_page("http://empty.test/", "the of and").unwrap();
    assert!(matches!(out, IndexOutcome::Indexed { postings: 0, .. }));
    assert!(!store.is_indexed("http://empty.test/").unwrap());
}

#[test]
fn match_rows_joins_all_position_combinations() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "doctor hospital doctor").unwrap();
    store.index_page("http://b.test/", "doctor appointment").unwrap();

    let matched = store.match_rows("doctor hospital").unwrap();
    assert_eq!(matched.word_ids.len(), 2);
    let rows: Vec<(u64, Vec<u32>)> = matched.rows.into_iter().map(|r| (r.url_id, r.positions)).collect();
    // b.test lacks "hospital" and is joined out
    assert_eq!(rows, vec![(1, vec![0, 1]), (1, vec![2, 1])]);
}

#[test]
fn unknown_words_are_dropped_from_the_join() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "doctor hospital").unwrap();
    let matched = store.match_rows("doctor zebra").unwrap();
    assert_eq!(matched.word_ids.len(), 1);
    assert_eq!(matched.rows.len(), 1);
}

#[test]
fn repeated_query_words_join_once() {
    let store = IndexStore::temporary().unwrap();
    let page = vec!["doctor"; 100].join(" ") + " hospital";
    store.index_page("http://a.test/", &page).unwrap();

    let single = store.match_rows("doctor").unwrap();
    let repeated = store.match_rows("doctor doctor doctor doctor doctor").unwrap();
    assert_eq!(single.rows.len(), 100);
    assert_eq!(repeated.rows.len(), 100);
    assert_eq!(repeated.word_ids, single.word_ids);

    let mixed = store.match_rows("hospital doctor hospital").unwrap();
    assert_eq!(mixed.word_ids, vec![store.word_id("hospit").unwrap().unwrap(), single.word_ids[0]]);
    assert_eq!(mixed.rows.len(), 100);
}

#[test]
fn fully_unknown_query_is_unresolved() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "doctor hospital").unwrap();
    assert!(matches!(store.match_rows("zebra giraffe"), Err(QueryError::Unresolved { .. })));
    assert!(matches!(store.match_rows(""), Err(QueryError::Unresolved { .. })));
}

#[test]
fn matched_words_with_no_common_page_is_empty_not_unresolved() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "doctor").unwrap();
    store.index_page("http://b.test/", "shelter").unwrap();
    let matched = store.match_rows("doctor shelter").unwrap();
    assert!(matched.rows.is_empty());
    assert_eq!(matched.word_ids.len(), 2);
}

#[test]
fn links_keep_anchor_words() {
    let store = IndexStore::temporary().unwrap();
    let a = store.get_or_create_url_id("http://a.test/").unwrap();
    let b = store.get_or_create_url_id("http://b.test/").unwrap();
    let c = store.get_or_create_url_id("http://c.test/").unwrap();
    let w = store.get_or_create_word_id("clinic").unwrap();
    store.add_link(a, c, &[]).unwrap();
    store.add_link(a, b, &[w]).unwrap();

    assert_eq!(store.links_from(a).unwrap(), vec![(b, vec![w]), (c, vec![])]);
    assert!(store.links_from(b).unwrap().is_empty());
    assert_eq!(store.stats().unwrap().links, 2);
}

#[test]
fn index_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = IndexStore::open(dir.path()).unwrap();
        store.index_page("http://a.test/", "asylum shelter").unwrap();
        store.flush().unwrap();
    }
    let store = IndexStore::open(dir.path()).unwrap();
    assert!(store.is_indexed("http://a.test/").unwrap());
    assert_eq!(store.url_id("http://a.test/").unwrap(), Some(1));
    assert_eq!(store.get_or_create_url_id("http://b.test/").unwrap(), 2);
}
