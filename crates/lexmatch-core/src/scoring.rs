use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{Datelike, Utc};
use serde::Serialize;

use crate::config::{ScoringConfig, ScoringWeights};
use crate::models::{
    Candidate, Location, MatchEntry, MatchRequest, SearchDocument, Urgency, normalize_place,
};
use crate::projection::normalize_tag;

const NEUTRAL: f64 = 0.5;
const EXACT_CITY: f64 = 1.0;
const POSTAL_PREFIX: f64 = 0.8;
const OTHER_LOCATION: f64 = 0.3;
const POSTAL_PREFIX_LEN: usize = 3;
const CRITICAL_UNAVAILABLE_CAP: f64 = 0.3;
const YEARS_SATURATION: f64 = 20.0;
const CASES_SATURATION: f64 = 500.0;

const EXCELLENT_BANNER: f64 = 0.8;
const GOOD_BANNER: f64 = 0.6;
const EXPERIENCE_CLAUSE_YEARS: u32 = 10;
const RATING_CLAUSE_MIN: f64 = 4.5;
const SCORE_PRECISION: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMatch {
    NotRequested,
    City,
    PostalArea,
    Other,
}

/// Sub-scores for one candidate, each in `[0, 1]`, plus the facts the
/// reason text is built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub specialism: f64,
    pub location: f64,
    pub availability: f64,
    pub rating: f64,
    pub experience: f64,
    pub language: f64,
    pub matched_specialisms: Vec<String>,
    pub location_match: LocationMatch,
    pub years_experience: u32,
    pub language_matched: bool,
}

impl ScoreBreakdown {
    /// Weighted sum, clamped to `[0, 1]` and rounded to six decimals so equal
    /// inputs compare equal regardless of summation order.
    pub fn total(&self, weights: &ScoringWeights) -> f64 {
        let raw = self.specialism * weights.specialism
            + self.location * weights.location
            + self.availability * weights.availability
            + self.rating * weights.rating
            + self.experience * weights.experience
            + self.language * weights.language;
        (raw.clamp(0.0, 1.0) * SCORE_PRECISION).round() / SCORE_PRECISION
    }
}

/// Pure scoring of candidate snapshots against a request.
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    reference_year: i32,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self::with_reference_year(config, Utc::now().year())
    }

    /// Years of experience are measured against `reference_year`.
    pub fn with_reference_year(config: ScoringConfig, reference_year: i32) -> Self {
        Self {
            config,
            reference_year,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    #[must_use]
    pub const fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn breakdown(&self, doc: &SearchDocument, request: &MatchRequest) -> ScoreBreakdown {
        let (specialism, matched_specialisms) = specialism_score(doc, &request.specialisms);
        let (location, location_match) = location_score(doc, request.location.as_ref());
        let years_experience = doc
            .qualified_since
            .map_or(0, |since| {
                u32::try_from(self.reference_year.saturating_sub(since)).unwrap_or(0)
            });
        let (language, language_matched) = language_score(doc, request.language.as_deref());
        ScoreBreakdown {
            specialism,
            location,
            availability: availability_score(doc, request.urgency),
            rating: rating_score(doc),
            experience: experience_score(years_experience, doc.case_count),
            language,
            matched_specialisms,
            location_match,
            years_experience,
            language_matched,
        }
    }

    /// Score in `[0, 1]` and the explanation derived from the same sub-scores.
    pub fn score(&self, doc: &SearchDocument, request: &MatchRequest) -> (f64, String) {
        let breakdown = self.breakdown(doc, request);
        let score = breakdown.total(&self.config.weights);
        let reason = build_reason(score, &breakdown, doc, request);
        (score, reason)
    }

    /// Scores every candidate, drops those under `min_match_score`, and
    /// returns at most `max_matches` entries by score descending then id.
    pub fn rank(&self, candidates: &[Candidate], request: &MatchRequest) -> Vec<MatchEntry> {
        let mut seen = BTreeSet::new();
        let mut entries = candidates
            .iter()
            .filter(|candidate| seen.insert(candidate.doc.id.as_str()))
            .map(|candidate| {
                let (score, reason) = self.score(&candidate.doc, request);
                MatchEntry {
                    profile_id: candidate.doc.id.clone(),
                    score,
                    reason,
                }
            })
            .filter(|entry| entry.score >= self.config.min_match_score)
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.profile_id.cmp(&b.profile_id))
        });
        entries.truncate(self.config.max_matches);
        entries
    }
}

fn specialism_score(doc: &SearchDocument, requested: &[String]) -> (f64, Vec<String>) {
    let requested = requested
        .iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect::<BTreeSet<_>>();
    if requested.is_empty() {
        return (NEUTRAL, Vec::new());
    }
    let offered = doc.area_tags().collect::<BTreeSet<_>>();
    let matched = requested
        .iter()
        .filter(|tag| offered.contains(tag.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    (matched.len() as f64 / requested.len() as f64, matched)
}

fn location_score(doc: &SearchDocument, requested: Option<&Location>) -> (f64, LocationMatch) {
    let Some(requested) = requested.filter(|location| !location.is_empty()) else {
        return (NEUTRAL, LocationMatch::NotRequested);
    };
    if let (Some(wanted), Some(city)) = (non_blank(&requested.city), non_blank(&doc.location.city))
        && normalize_place(wanted) == normalize_place(city)
    {
        return (EXACT_CITY, LocationMatch::City);
    }
    if let (Some(wanted), Some(postal)) = (
        postal_prefix(requested.postal_code.as_deref()),
        postal_prefix(doc.location.postal_code.as_deref()),
    ) && wanted == postal
    {
        return (POSTAL_PREFIX, LocationMatch::PostalArea);
    }
    (OTHER_LOCATION, LocationMatch::Other)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn postal_prefix(postal: Option<&str>) -> Option<String> {
    let compact = postal?
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .map(|ch| ch.to_ascii_uppercase())
        .collect::<String>();
    (compact.chars().count() >= POSTAL_PREFIX_LEN)
        .then(|| compact.chars().take(POSTAL_PREFIX_LEN).collect())
}

fn availability_score(doc: &SearchDocument, urgency: Urgency) -> f64 {
    let slots = &doc.availability.slots;
    let score = doc.availability.active_slot_count() as f64 / slots.len().max(1) as f64;
    if urgency == Urgency::Critical && !doc.availability.accepts_urgent {
        score.min(CRITICAL_UNAVAILABLE_CAP)
    } else {
        score
    }
}

fn rating_score(doc: &SearchDocument) -> f64 {
    if doc.rating.count == 0 {
        return NEUTRAL;
    }
    (doc.rating.average / 5.0).clamp(0.0, 1.0)
}

fn experience_score(years: u32, cases: u32) -> f64 {
    0.5 * (f64::from(years) / YEARS_SATURATION).min(1.0)
        + 0.5 * (f64::from(cases) / CASES_SATURATION).min(1.0)
}

fn language_score(doc: &SearchDocument, requested: Option<&str>) -> (f64, bool) {
    match requested.and_then(normalize_tag) {
        None => (1.0, false),
        Some(language) if doc.languages.contains(&language) => (1.0, true),
        Some(_) => (0.0, false),
    }
}

fn build_reason(
    score: f64,
    breakdown: &ScoreBreakdown,
    doc: &SearchDocument,
    request: &MatchRequest,
) -> String {
    let mut clauses = Vec::new();
    if !breakdown.matched_specialisms.is_empty() {
        clauses.push(format!(
            "specialises in {}",
            breakdown.matched_specialisms.join(", ")
        ));
    }
    match breakdown.location_match {
        LocationMatch::City => {
            if let Some(city) = non_blank(&doc.location.city) {
                clauses.push(format!("based in {city}"));
            }
        }
        LocationMatch::PostalArea => {
            if let Some(prefix) = postal_prefix(doc.location.postal_code.as_deref()) {
                clauses.push(format!("practises in postal area {prefix}"));
            }
        }
        LocationMatch::NotRequested | LocationMatch::Other => {}
    }
    if breakdown.years_experience > EXPERIENCE_CLAUSE_YEARS {
        clauses.push(format!("{} years of experience", breakdown.years_experience));
    }
    if doc.rating.count > 0 && doc.rating.average >= RATING_CLAUSE_MIN {
        clauses.push(format!(
            "rated {:.1}/5 across {} reviews",
            doc.rating.average, doc.rating.count
        ));
    }
    if request.urgency.is_urgent()
        && doc.availability.has_active_slot()
        && breakdown.availability > CRITICAL_UNAVAILABLE_CAP
    {
        clauses.push("available for urgent requests".to_string());
    }
    if breakdown.language_matched
        && let Some(language) = request.language.as_deref().map(str::trim)
    {
        clauses.push(format!("speaks {language}"));
    }

    let banner = if score >= EXCELLENT_BANNER {
        Some("Excellent match")
    } else if score >= GOOD_BANNER {
        Some("Good match")
    } else {
        None
    };
    match (banner, clauses.is_empty()) {
        (Some(banner), true) => banner.to_string(),
        (Some(banner), false) => format!("{banner}: {}", clauses.join("; ")),
        (None, false) => {
            let mut reason = clauses.join("; ");
            if let Some(first) = reason.get(..1) {
                let upper = first.to_uppercase();
                reason.replace_range(..1, &upper);
            }
            reason
        }
        (None, true) => "Meets the requested filters".to_string(),
    }
}
