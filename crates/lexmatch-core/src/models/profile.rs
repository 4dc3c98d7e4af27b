use std::collections::BTreeSet;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LexMatchError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Tue => "tue",
            Self::Wed => "wed",
            Self::Thu => "thu",
            Self::Fri => "fri",
            Self::Sat => "sat",
            Self::Sun => "sun",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailabilitySlot {
    pub weekday: Weekday,
    /// `HH:MM`, 24h clock.
    pub start: String,
    pub end: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Availability {
    #[serde(default)]
    pub slots: Vec<AvailabilitySlot>,
    #[serde(default)]
    pub accepts_urgent: bool,
}

impl Availability {
    pub fn active_slot_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.active).count()
    }

    pub fn has_active_slot(&self) -> bool {
        self.slots.iter().any(|slot| slot.active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Location {
    pub fn city(city: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        [&self.city, &self.postal_code, &self.country]
            .iter()
            .all(|field| field.as_deref().is_none_or(|value| value.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Rating {
    pub average: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub specialisms: BTreeSet<String>,
    #[serde(default)]
    pub practice_areas: BTreeSet<String>,
    #[serde(default)]
    pub qualified_since: Option<i32>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub employer: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub free_consultation: bool,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub rating: Rating,
    #[serde(default)]
    pub case_count: u32,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specialisms: BTreeSet::new(),
            practice_areas: BTreeSet::new(),
            qualified_since: None,
            role: String::new(),
            employer: String::new(),
            bio: String::new(),
            languages: BTreeSet::new(),
            location: Location::default(),
            hourly_rate: None,
            free_consultation: false,
            availability: Availability::default(),
            rating: Rating::default(),
            case_count: 0,
            verified: false,
            verified_at: None,
            active: true,
            embedding: None,
            updated_at: None,
        }
    }

    /// Checks the invariants every stored profile must hold.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LexMatchError::Validation("profile id is empty".to_string()));
        }
        if self.verified && self.specialisms.iter().all(|tag| tag.trim().is_empty()) {
            return Err(LexMatchError::Validation(format!(
                "verified profile {} must list at least one specialism",
                self.id
            )));
        }
        if !(0.0..=5.0).contains(&self.rating.average) {
            return Err(LexMatchError::Validation(format!(
                "profile {} rating average {} is outside [0, 5]",
                self.id, self.rating.average
            )));
        }
        if self.rating.count == 0 && self.rating.average != 0.0 {
            return Err(LexMatchError::Validation(format!(
                "profile {} has a non-zero rating average without ratings",
                self.id
            )));
        }
        if let Some(rate) = self.hourly_rate
            && !(rate.is_finite() && rate >= 0.0)
        {
            return Err(LexMatchError::Validation(format!(
                "profile {} hourly rate must be a non-negative number",
                self.id
            )));
        }
        for slot in &self.availability.slots {
            let start = parse_slot_time(&slot.start, &self.id)?;
            let end = parse_slot_time(&slot.end, &self.id)?;
            if end <= start {
                return Err(LexMatchError::Validation(format!(
                    "profile {} has an empty {} slot {}-{}",
                    self.id,
                    slot.weekday.as_str(),
                    slot.start,
                    slot.end
                )));
            }
        }
        Ok(())
    }
}

fn parse_slot_time(raw: &str, profile_id: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|err| {
        LexMatchError::Validation(format!(
            "profile {profile_id} has invalid slot time {raw:?}: {err}"
        ))
    })
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(weekday: Weekday, start: &str, end: &str, active: bool) -> AvailabilitySlot {
        AvailabilitySlot {
            weekday,
            start: start.to_string(),
            end: end.to_string(),
            active,
        }
    }

    #[test]
    fn verified_profile_requires_specialisms() {
        let mut profile = Profile::new("p-1");
        profile.verified = true;
        assert!(profile.validate().is_err());

        profile.specialisms.insert("family-law".to_string());
        profile.validate().expect("valid");
    }

    #[test]
    fn rating_without_count_must_be_zero() {
        let mut profile = Profile::new("p-1");
        profile.rating = Rating {
            average: 4.0,
            count: 0,
        };
        assert!(profile.validate().is_err());

        profile.rating.count = 3;
        profile.validate().expect("valid");
    }

    #[test]
    fn slot_times_are_validated() {
        let mut profile = Profile::new("p-1");
        profile.availability.slots = vec![slot(Weekday::Mon, "09:00", "12:30", true)];
        profile.validate().expect("valid");

        profile.availability.slots = vec![slot(Weekday::Tue, "14:00", "09:00", true)];
        assert!(profile.validate().is_err());

        profile.availability.slots = vec![slot(Weekday::Wed, "9am", "10:00", true)];
        assert!(profile.validate().is_err());
    }

    #[test]
    fn active_defaults_to_true_when_missing_from_json() {
        let profile: Profile =
            serde_json::from_str(r#"{"id": "p-9", "specialisms": ["tax-law"]}"#).expect("parse");
        assert!(profile.active);
        assert!(profile.specialisms.contains("tax-law"));
        assert_eq!(profile.rating.count, 0);
    }

    #[test]
    fn availability_counts_active_slots() {
        let availability = Availability {
            slots: vec![
                slot(Weekday::Mon, "09:00", "10:00", true),
                slot(Weekday::Tue, "09:00", "10:00", false),
            ],
            accepts_urgent: false,
        };
        assert_eq!(availability.active_slot_count(), 1);
        assert!(availability.has_active_slot());
        assert!(!Availability::default().has_active_slot());
    }
}
