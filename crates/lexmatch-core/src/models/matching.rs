use serde::{Deserialize, Serialize};

use super::profile::Location;
use super::search::SearchDocument;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MatchRequest {
    /// Category hints produced upstream, matched against specialisms and practice areas.
    #[serde(default)]
    pub specialisms: Vec<String>,
    #[serde(default)]
    pub urgency: Urgency,
    /// Scored as proximity, never used to exclude candidates.
    #[serde(default)]
    pub location: Option<Location>,
    /// Country the professional must practise in. Hard filter.
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub require_available: bool,
    /// Reject the request instead of running a filter-only search when no embedding is given.
    #[serde(default)]
    pub require_similarity: bool,
    #[serde(default)]
    pub max_hourly_rate: Option<f64>,
    #[serde(default)]
    pub min_years_experience: Option<u32>,
    /// Overall latency budget; falls back to the configured default.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Index,
    Fallback,
}

impl RetrievalSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub doc: SearchDocument,
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchEntry {
    pub profile_id: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub matches: Vec<MatchEntry>,
    pub served_from: RetrievalSource,
    pub candidates_considered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}
