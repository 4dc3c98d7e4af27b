use serde::{Deserialize, Serialize};

use crate::error::{LexMatchError, Result};

use super::env::{override_with, read_env_f64, read_env_usize};

const ENV_WEIGHT_SPECIALISM: &str = "LEXMATCH_WEIGHT_SPECIALISM";
const ENV_WEIGHT_LOCATION: &str = "LEXMATCH_WEIGHT_LOCATION";
const ENV_WEIGHT_AVAILABILITY: &str = "LEXMATCH_WEIGHT_AVAILABILITY";
const ENV_WEIGHT_RATING: &str = "LEXMATCH_WEIGHT_RATING";
const ENV_WEIGHT_EXPERIENCE: &str = "LEXMATCH_WEIGHT_EXPERIENCE";
const ENV_WEIGHT_LANGUAGE: &str = "LEXMATCH_WEIGHT_LANGUAGE";
const ENV_MIN_MATCH_SCORE: &str = "LEXMATCH_MIN_MATCH_SCORE";
const ENV_MAX_MATCHES: &str = "LEXMATCH_MAX_MATCHES";

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringWeights {
    pub specialism: f64,
    pub location: f64,
    pub availability: f64,
    pub rating: f64,
    pub experience: f64,
    pub language: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            specialism: 0.35,
            location: 0.15,
            availability: 0.15,
            rating: 0.15,
            experience: 0.10,
            language: 0.10,
        }
    }
}

impl ScoringWeights {
    fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("specialism", self.specialism),
            ("location", self.location),
            ("availability", self.availability),
            ("rating", self.rating),
            ("experience", self.experience),
            ("language", self.language),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.named().iter().map(|(_, weight)| weight).sum()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.named() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(LexMatchError::Config(format!(
                    "scoring weight {name} must be a non-negative number, got {weight}"
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(LexMatchError::Config(format!(
                "scoring weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub min_match_score: f64,
    pub max_matches: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            min_match_score: 0.5,
            max_matches: 5,
        }
    }
}

impl ScoringConfig {
    pub(super) fn apply_env(&mut self) {
        override_with(
            &mut self.weights.specialism,
            read_env_f64(ENV_WEIGHT_SPECIALISM),
        );
        override_with(&mut self.weights.location, read_env_f64(ENV_WEIGHT_LOCATION));
        override_with(
            &mut self.weights.availability,
            read_env_f64(ENV_WEIGHT_AVAILABILITY),
        );
        override_with(&mut self.weights.rating, read_env_f64(ENV_WEIGHT_RATING));
        override_with(
            &mut self.weights.experience,
            read_env_f64(ENV_WEIGHT_EXPERIENCE),
        );
        override_with(&mut self.weights.language, read_env_f64(ENV_WEIGHT_LANGUAGE));
        override_with(&mut self.min_match_score, read_env_f64(ENV_MIN_MATCH_SCORE));
        override_with(&mut self.max_matches, read_env_usize(ENV_MAX_MATCHES));
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.min_match_score) {
            return Err(LexMatchError::Config(format!(
                "min_match_score must be within [0, 1], got {}",
                self.min_match_score
            )));
        }
        if self.max_matches == 0 {
            return Err(LexMatchError::Config(
                "max_matches must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
