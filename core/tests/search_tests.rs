use search_core::config::SearchConfig;
use search_core::{ConfigError, FeedbackConfig, FeedbackNetwork, IndexStore, Searcher, SignalWeights, NO_MATCH_SCORE};
use std::sync::Arc;

fn medical_index() -> Arc<IndexStore> {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "doctor hospital emergency").unwrap();
    store.index_page("http://b.test/", "doctor appointment").unwrap();
    Arc::new(store)
}

#[test]
fn closer_and_earlier_matches_rank_first() {
    let searcher = Searcher::new(medical_index(), SearchConfig::default()).unwrap();
    let results = searcher.query("doctor hospital").unwrap();
    assert_eq!(results[0].url, "http://a.test/");
    let b_rank = results.iter().position(|r| r.url == "http://b.test/");
    assert!(b_rank.map_or(true, |i| i > 0));
    // Best page takes every signal: 1 + 2 + 3
    assert!((results[0].score - 6.0).abs() < 1e-9);
}

#[test]
fn unknown_term_returns_sentinel() {
    let config = SearchConfig::default();
    let fallback = config.fallback_url.clone();
    let searcher = Searcher::new(medical_index(), config).unwrap();
    let results = searcher.query("xylophone").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, NO_MATCH_SCORE);
    assert_eq!(results[0].url, fallback);
    assert!(results[0].is_no_match());
}

#[test]
fn equal_scores_break_ties_by_url_id() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://z.test/", "shelter").unwrap();
    store.index_page("http://y.test/", "shelter").unwrap();
    store.index_page("http://x.test/", "shelter").unwrap();
    let searcher = Searcher::new(Arc::new(store), SearchConfig::default()).unwrap();

    let urls: Vec<String> = searcher.query("shelter").unwrap().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["http://z.test/", "http://y.test/", "http://x.test/"]);
}

#[test]
fn result_limit_caps_output() {
    let store = IndexStore::temporary().unwrap();
    for i in 0..15 {
        store.index_page(&format!("http://p{i}.test/"), "water food").unwrap();
    }
    let searcher = Searcher::new(Arc::new(store), SearchConfig::default()).unwrap();
    assert_eq!(searcher.query("water").unwrap().len(), 10);
    assert_eq!(searcher.query_top("water", 3).unwrap().len(), 3);
}

#[test]
fn scores_are_descending() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://1.test/", "food water food water food").unwrap();
    store.index_page("http://2.test/", "shelter shelter food shelter water").unwrap();
    store.index_page("http://3.test/", "water then later some food").unwrap();
    let searcher = Searcher::new(Arc::new(store), SearchConfig::default()).unwrap();
    let results = searcher.query("food water").unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn feedback_blending_is_opt_in() {
    let store = IndexStore::temporary().unwrap();
    store.index_page("http://a.test/", "shelter").unwrap();
    store.index_page("http://b.test/", "shelter").unwrap();
    let store = Arc::new(store);
    let network = Arc::new(FeedbackNetwork::temporary(FeedbackConfig::default()).unwrap());

    let word_ids = store.resolve_query("shelter").unwrap();
    for _ in 0..5 {
        network.train(&word_ids, &[1, 2], 2).unwrap();
    }

    let plain = Searcher::new(store.clone(), SearchConfig::default()).unwrap().with_feedback(network.clone());
    assert_eq!(plain.query("shelter").unwrap()[0].url, "http://a.test/");

    let config = SearchConfig { feedback_weight: Some(1.0), ..SearchConfig::default() };
    let blended = Searcher::new(store, config).unwrap().with_feedback(network);
    let results = blended.query("shelter").unwrap();
    assert_eq!(results[0].url, "http://b.test/");
    assert!(results[0].score > results[1].score);
}

#[test]
fn negative_weights_are_refused() {
    let mut config = SearchConfig::default();
    config.weights = SignalWeights { frequency: -1.0, location: 0.0, distance: 0.0, topic: 0.0, url_name: 0.0 };
    let err = Searcher::new(medical_index(), config).err().unwrap();
    assert_eq!(err, ConfigError::InvalidWeight { signal: "frequency", value: -1.0 });
}

#[test]
fn real_results_never_look_like_no_match() {
    let mut config = SearchConfig::default();
    config.weights = SignalWeights { frequency: 0.0, location: 0.0, distance: 0.0, topic: 0.0, url_name: 0.0 };
    let searcher = Searcher::new(medical_index(), config).unwrap();
    let results = searcher.query("doctor").unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.score >= 0.0 && !r.is_no_match()));
}
