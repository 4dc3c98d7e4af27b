use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::profile::{Availability, Location, Rating};
use crate::projection::normalize_tag;

/// Indexed projection of a [`super::Profile`].
///
/// Tags are lowercase, trimmed, sorted and deduplicated. Nothing here is owned
/// by the index: every field is derived from the profile and can be rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchDocument {
    pub id: String,
    pub specialisms: Vec<String>,
    pub practice_areas: Vec<String>,
    pub location: Location,
    pub hourly_rate: Option<f64>,
    pub free_consultation: bool,
    pub languages: Vec<String>,
    pub rating: Rating,
    pub verified: bool,
    pub active: bool,
    pub qualified_since: Option<i32>,
    pub case_count: u32,
    pub availability: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl SearchDocument {
    /// Specialisms and practice areas, the tag space specialism filters match against.
    pub fn area_tags(&self) -> impl Iterator<Item = &str> {
        self.specialisms
            .iter()
            .chain(self.practice_areas.iter())
            .map(String::as_str)
    }

    pub fn fingerprint(&self) -> String {
        crate::projection::document_fingerprint(self)
    }
}

/// A document as read back from the index, with the fingerprint recorded at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub doc: SearchDocument,
    pub fingerprint: String,
}

/// Structured filters shared by the index and the profile store. All set
/// fields are AND-combined.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SearchFilter {
    /// Any-of membership against specialisms and practice areas.
    #[serde(default)]
    pub specialisms: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub require_available: bool,
    #[serde(default)]
    pub min_hourly_rate: Option<f64>,
    #[serde(default)]
    pub max_hourly_rate: Option<f64>,
    /// Experience floor expressed as the latest acceptable qualification year.
    #[serde(default)]
    pub qualified_no_later_than: Option<i32>,
}

impl SearchFilter {
    /// Evaluates the filter against a projected document. Range filters
    /// exclude documents that do not carry the ranged field.
    pub fn matches(&self, doc: &SearchDocument) -> bool {
        let wanted = self.area_tags();
        if !wanted.is_empty() && !doc.area_tags().any(|tag| wanted.iter().any(|w| w == tag)) {
            return false;
        }
        if let Some(language) = self.language.as_deref().and_then(normalize_tag)
            && !doc.languages.contains(&language)
        {
            return false;
        }
        if let Some(city) = &self.city
            && !same_place(doc.location.city.as_deref(), city)
        {
            return false;
        }
        if let Some(country) = &self.country
            && !same_place(doc.location.country.as_deref(), country)
        {
            return false;
        }
        if self.verified.is_some_and(|verified| verified != doc.verified)
            || self.active.is_some_and(|active| active != doc.active)
        {
            return false;
        }
        if self.require_available && !doc.availability.has_active_slot() {
            return false;
        }
        if let Some(min) = self.min_hourly_rate
            && doc.hourly_rate.is_none_or(|rate| rate < min)
        {
            return false;
        }
        if let Some(max) = self.max_hourly_rate
            && doc.hourly_rate.is_none_or(|rate| rate > max)
        {
            return false;
        }
        if let Some(year) = self.qualified_no_later_than
            && doc.qualified_since.is_none_or(|since| since > year)
        {
            return false;
        }
        true
    }

    /// Requested specialism tags in indexed form.
    pub fn area_tags(&self) -> Vec<String> {
        let mut tags = self
            .specialisms
            .iter()
            .filter_map(|tag| normalize_tag(tag))
            .collect::<Vec<_>>();
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn normalized_language(&self) -> Option<String> {
        self.language.as_deref().and_then(normalize_tag)
    }
}

/// Case-insensitive comparison used for city and country filters.
pub fn normalize_place(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn same_place(value: Option<&str>, wanted: &str) -> bool {
    value.is_some_and(|value| normalize_place(value) == normalize_place(wanted))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileFilter {
    pub search: SearchFilter,
    pub updated_since: Option<DateTime<Utc>>,
}

impl ProfileFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn updated_since(since: DateTime<Utc>) -> Self {
        Self {
            search: SearchFilter::default(),
            updated_since: Some(since),
        }
    }
}

impl From<SearchFilter> for ProfileFilter {
    fn from(search: SearchFilter) -> Self {
        Self {
            search,
            updated_since: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub filter: SearchFilter,
    /// Ranks hits by cosine similarity when present. Documents without a
    /// comparable vector follow the ranked hits, with no similarity.
    pub vector: Option<Vec<f32>>,
    pub limit: usize,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc: SearchDocument,
    pub similarity: Option<f32>,
}
