use search_core::tokenizer::{stem_terms, tokenize};

#[test]
fn it_normalizes_and_stems() {
    let words = stem_terms("Running Runners RUN! The ﬁle menu.");
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // NFKC folds the "ﬁ" ligature
    assert!(words.contains(&"file".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let words = stem_terms("The quick brown fox and the lazy dog is in it");
    for stop in ["the", "and", "is", "in", "it"] {
        assert!(!words.contains(&stop.to_string()));
    }
    assert!(words.contains(&"quick".to_string()));
}

#[test]
fn positions_follow_document_order() {
    let toks = tokenize("Hospital of the city, hospital again");
    let positions: Vec<usize> = toks.iter().map(|(_, p)| *p).collect();
    assert_eq!(positions, vec![0, 3, 4, 5]);
    assert_eq!(toks[0].0, toks[2].0);
}

#[test]
fn it_is_deterministic() {
    let text = "Doctors, hospitals & emergency-services: 24/7 care.";
    assert_eq!(tokenize(text), tokenize(text));
}

#[test]
fn empty_and_symbol_only_text_yield_nothing() {
    assert!(tokenize("").is_empty());
    assert!(tokenize("!!! --- ???").is_empty());
}
