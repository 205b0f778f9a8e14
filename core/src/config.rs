use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const DEFAULT_RESULT_LIMIT: usize = 10;
pub const DEFAULT_FALLBACK_URL: &str = "http://www.unhcr.org/";
pub const DEFAULT_LEARNING_RATE: f64 = 0.5;

/// Per-signal weights of the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub frequency: f64,
    pub location: f64,
    pub distance: f64,
    pub topic: f64,
    pub url_name: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self { frequency: 1.0, location: 2.0, distance: 3.0, topic: 0.0, url_name: 0.0 }
    }
}

impl SignalWeights {
    /// Every weight must be finite and non-negative. Real scores then stay
    /// at or above zero and never collide with the no-match score.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("frequency", self.frequency),
            ("location", self.location),
            ("distance", self.distance),
            ("topic", self.topic),
            ("url_name", self.url_name),
        ];
        named.into_iter().try_for_each(|(signal, value)| check_weight(signal, value))
    }
}

fn check_weight(signal: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeight { signal, value })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of ranked results returned by a query.
    pub result_limit: usize,
    /// Url returned alongside the no-match sentinel.
    pub fallback_url: String,
    pub weights: SignalWeights,
    /// Weight of the learned feedback score. `None` leaves it out of ranking.
    pub feedback_weight: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            result_limit: DEFAULT_RESULT_LIMIT,
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            weights: SignalWeights::default(),
            feedback_weight: None,
        }
    }
}

impl SearchConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("opening search config {}", path.display()))?;
        let config: SearchConfig = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parsing search config {}", path.display()))?;
        config.validate().with_context(|| format!("invalid search config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        match self.feedback_weight {
            Some(w) => check_weight("feedback", w),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub learning_rate: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { learning_rate: DEFAULT_LEARNING_RATE }
    }
}

impl FeedbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_rate.is_finite() && self.learning_rate > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidLearningRate(self.learning_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: SearchConfig = serde_json::from_str(r#"{"result_limit": 3, "weights": {"distance": 5.0}}"#).unwrap();
        assert_eq!(cfg.result_limit, 3);
        assert_eq!(cfg.fallback_url, DEFAULT_FALLBACK_URL);
        assert_eq!(cfg.weights.frequency, 1.0);
        assert_eq!(cfg.weights.distance, 5.0);
        assert!(cfg.feedback_weight.is_none());
    }

    #[test]
    fn negative_or_non_finite_weights_are_rejected() {
        let mut cfg = SearchConfig::default();
        cfg.weights.frequency = -1.0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidWeight { signal: "frequency", value: -1.0 }));

        let mut cfg = SearchConfig::default();
        cfg.weights.distance = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let cfg = SearchConfig { feedback_weight: Some(-0.5), ..SearchConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidWeight { signal: "feedback", .. })));

        let cfg = SearchConfig { feedback_weight: Some(2.0), ..SearchConfig::default() };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn json_file_with_negative_weight_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(&path, r#"{"weights": {"frequency": -1.0, "location": 0.0, "distance": 0.0}}"#).unwrap();
        assert!(SearchConfig::from_json_file(&path).is_err());

        std::fs::write(&path, r#"{"weights": {"frequency": 2.0}}"#).unwrap();
        assert_eq!(SearchConfig::from_json_file(&path).unwrap().weights.frequency, 2.0);
    }

    #[test]
    fn learning_rate_must_be_positive() {
        assert!(FeedbackConfig::default().validate().is_ok());
        assert_eq!(
            FeedbackConfig { learning_rate: 0.0 }.validate(),
            Err(ConfigError::InvalidLearningRate(0.0))
        );
        assert!(FeedbackConfig { learning_rate: f64::NAN }.validate().is_err());
    }
}
