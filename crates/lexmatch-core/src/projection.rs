use std::collections::BTreeSet;

use crate::models::{Location, Profile, SearchDocument};

/// Pure projection of a stored entity into its indexed form.
///
/// One implementation exists per indexed entity; the synchronizer only
/// depends on this trait, so a second entity type needs a projector and
/// nothing else.
pub trait Project {
    type Document;

    fn project(&self, embedding_dim: usize) -> Self::Document;
}

impl Project for Profile {
    type Document = SearchDocument;

    fn project(&self, embedding_dim: usize) -> SearchDocument {
        SearchDocument {
            id: self.id.clone(),
            specialisms: normalize_tags(&self.specialisms),
            practice_areas: normalize_tags(&self.practice_areas),
            location: normalize_location(&self.location),
            hourly_rate: self.hourly_rate,
            free_consultation: self.free_consultation,
            languages: normalize_tags(&self.languages),
            rating: self.rating,
            verified: self.verified,
            active: self.active,
            qualified_since: self.qualified_since,
            case_count: self.case_count,
            availability: self.availability.clone(),
            embedding: self
                .embedding
                .as_ref()
                .filter(|vector| vector.len() == embedding_dim)
                .cloned(),
        }
    }
}

/// Lowercases, trims and collapses inner whitespace. Returns `None` for blank input.
#[must_use]
pub fn normalize_tag(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.to_lowercase())
    }
}

fn normalize_tags(raw: &BTreeSet<String>) -> Vec<String> {
    raw.iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn normalize_location(raw: &Location) -> Location {
    let clean = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };
    Location {
        city: clean(&raw.city),
        postal_code: clean(&raw.postal_code),
        country: clean(&raw.country),
    }
}

/// Deterministic content hash of an indexed document.
///
/// Fields are written in a fixed order with length prefixes; floats are
/// hashed by bit pattern. Two documents share a fingerprint exactly when
/// every projected field is equal.
#[must_use]
pub fn document_fingerprint(doc: &SearchDocument) -> String {
    let mut hasher = Fingerprinter::default();
    hasher.str(&doc.id);
    hasher.strs(&doc.specialisms);
    hasher.strs(&doc.practice_areas);
    hasher.opt_str(doc.location.city.as_deref());
    hasher.opt_str(doc.location.postal_code.as_deref());
    hasher.opt_str(doc.location.country.as_deref());
    hasher.opt_f64(doc.hourly_rate);
    hasher.flag(doc.free_consultation);
    hasher.strs(&doc.languages);
    hasher.f64(doc.rating.average);
    hasher.u64(u64::from(doc.rating.count));
    hasher.flag(doc.verified);
    hasher.flag(doc.active);
    hasher.opt_i64(doc.qualified_since.map(i64::from));
    hasher.u64(u64::from(doc.case_count));
    hasher.flag(doc.availability.accepts_urgent);
    hasher.u64(doc.availability.slots.len() as u64);
    for slot in &doc.availability.slots {
        hasher.str(slot.weekday.as_str());
        hasher.str(&slot.start);
        hasher.str(&slot.end);
        hasher.flag(slot.active);
    }
    match &doc.embedding {
        Some(vector) => {
            hasher.flag(true);
            hasher.u64(vector.len() as u64);
            for value in vector {
                hasher.inner.update(&value.to_bits().to_le_bytes());
            }
        }
        None => hasher.flag(false),
    }
    hasher.inner.finalize().to_hex().to_string()
}

#[derive(Default)]
struct Fingerprinter {
    inner: blake3::Hasher,
}

impl Fingerprinter {
    fn u64(&mut self, value: u64) {
        self.inner.update(&value.to_le_bytes());
    }

    fn flag(&mut self, value: bool) {
        self.inner.update(&[u8::from(value)]);
    }

    fn str(&mut self, value: &str) {
        self.u64(value.len() as u64);
        self.inner.update(value.as_bytes());
    }

    fn strs(&mut self, values: &[String]) {
        self.u64(values.len() as u64);
        for value in values {
            self.str(value);
        }
    }

    fn opt_str(&mut self, value: Option<&str>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.str(value);
        }
    }

    fn f64(&mut self, value: f64) {
        self.u64(value.to_bits());
    }

    fn opt_f64(&mut self, value: Option<f64>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.f64(value);
        }
    }

    fn opt_i64(&mut self, value: Option<i64>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.inner.update(&value.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn sample() -> Profile {
        let mut profile = Profile::new("p-7");
        profile.specialisms = ["Immigration Law ", "immigration law", "Visas"]
            .into_iter()
            .map(ToString::to_string)
            .collect();
        profile.languages = ["Spanish", "english"].into_iter().map(ToString::to_string).collect();
        profile.location = Location {
            city: Some("  New York ".to_string()),
            postal_code: Some(" ".to_string()),
            country: Some("US".to_string()),
        };
        profile.rating = Rating {
            average: 4.6,
            count: 12,
        };
        profile.embedding = Some(vec![0.1, 0.2, 0.3]);
        profile
    }

    #[test]
    fn tags_are_normalized_sorted_and_deduplicated() {
        let doc = sample().project(3);
        assert_eq!(doc.specialisms, vec!["immigration law", "visas"]);
        assert_eq!(doc.languages, vec!["english", "spanish"]);
        assert_eq!(doc.location.city.as_deref(), Some("New York"));
        assert_eq!(doc.location.postal_code, None);
    }

    #[test]
    fn embedding_is_dropped_on_dimension_mismatch() {
        let profile = sample();
        assert!(profile.project(3).embedding.is_some());
        assert!(profile.project(1536).embedding.is_none());
    }

    #[test]
    fn projection_is_deterministic() {
        let profile = sample();
        assert_eq!(profile.project(3), profile.project(3));
        assert_eq!(
            profile.project(3).fingerprint(),
            profile.project(3).fingerprint()
        );
    }

    #[test]
    fn fingerprint_changes_with_any_projected_field() {
        let base = sample().project(3);
        let mut moved = base.clone();
        moved.location.city = Some("Boston".to_string());
        let mut rerated = base.clone();
        rerated.rating.count += 1;
        let mut reembedded = base.clone();
        reembedded.embedding = Some(vec![0.1, 0.2, 0.31]);

        let fingerprint = base.fingerprint();
        assert_ne!(fingerprint, moved.fingerprint());
        assert_ne!(fingerprint, rerated.fingerprint());
        assert_ne!(fingerprint, reembedded.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_non_projected_profile_fields() {
        let mut profile = sample();
        let before = profile.project(3).fingerprint();
        profile.bio = "Twenty years in federal court".to_string();
        profile.employer = "Legal Aid NYC".to_string();
        assert_eq!(before, profile.project(3).fingerprint());
    }

    #[test]
    fn tag_length_prefixes_prevent_concatenation_collisions() {
        let mut a = sample().project(3);
        let mut b = a.clone();
        a.specialisms = vec!["ab".to_string(), "c".to_string()];
        b.specialisms = vec!["a".to_string(), "bc".to_string()];
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
