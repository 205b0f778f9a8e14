pub mod config;
pub mod error;
pub mod feedback;
pub mod index;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use config::{FeedbackConfig, SearchConfig, SignalWeights};
pub use error::{ConfigError, FeedbackError, QueryError, StoreError};
pub use feedback::FeedbackNetwork;
pub use index::*;
pub use search::{ScoredUrl, Searcher, NO_MATCH_SCORE};
pub use store::IndexStore;
