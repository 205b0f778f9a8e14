//! Error taxonomy shared by the index store, the scorer and the feedback network.

use thiserror::Error;

use crate::UrlId;

/// Failure of the backing store. Fatal to the operation that hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt {what} value in tree `{tree}`")]
    Corrupt { tree: &'static str, what: &'static str },

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("unknown url id {0}")]
    UnknownUrl(UrlId),
}

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(err: sled::transaction::TransactionError<StoreError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

/// A configuration value outside its accepted range.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("weight `{signal}` must be finite and non-negative, got {value}")]
    InvalidWeight { signal: &'static str, value: f64 },

    #[error("learning rate must be finite and positive, got {0}")]
    InvalidLearningRate(f64),
}

/// Errors from resolving a query against the index.
#[derive(Debug, Error)]
pub enum QueryError {
    /// None of the query words exist in the index. Callers treat this
    /// differently from a query that matched words but no page.
    #[error("no query word is indexed: {query:?}")]
    Unresolved { query: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from scoring or training the feedback network.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("training requires at least one query word")]
    EmptyQuery,

    #[error("selected url {selected} is not among the candidates")]
    SelectedNotCandidate { selected: UrlId },
}
