//! Weighted candidate scoring
//!
//! Each criterion the caller supplied contributes `weight * sub_score` to the
//! numerator and `weight` to the denominator. Criteria that were not
//! supplied are left out of both, so the total stays in `[0, 1]`.

use chrono::{Datelike, NaiveDate};
use pco_sdk_client::SearchKind;
use pco_sdk_core::Resource;
use serde::Serialize;
use serde_json::Value;

use crate::criteria::{normalize_name, MatchCriteria};

pub const EMAIL_WEIGHT: f64 = 0.35;
pub const PHONE_WEIGHT: f64 = 0.25;
pub const NAME_WEIGHT: f64 = 0.2;
/// Name weight when neither email nor phone was supplied
pub const NAME_ONLY_WEIGHT: f64 = 0.4;
pub const AGE_WEIGHT: f64 = 0.15;
pub const EXTRA_WEIGHT: f64 = 0.05;

/// Per-criterion sub-scores; `None` where the criterion was not applicable
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub email: Option<f64>,
    pub phone: Option<f64>,
    pub name: Option<f64>,
    pub name_weight: f64,
    pub age: f64,
    pub extra: Option<f64>,
    pub total: f64,
}

impl ScoreBreakdown {
    /// Human-readable summary of what matched
    pub fn reason(&self) -> String {
        let mut parts = Vec::new();
        if let Some(email) = self.email {
            parts.push(if email > 0.0 { "email match" } else { "email mismatch" }.to_string());
        }
        if let Some(phone) = self.phone {
            parts.push(if phone > 0.0 { "phone match" } else { "phone mismatch" }.to_string());
        }
        if let Some(name) = self.name {
            let label = match name {
                n if n >= 1.0 => "full name match",
                n if n > 0.0 => "partial name match",
                _ => "name mismatch",
            };
            parts.push(label.to_string());
        }
        parts.push(format!("age {:.2}", self.age));
        if let Some(extra) = self.extra {
            parts.push(format!("extra {:.2}", extra));
        }
        format!("{} (score {:.3})", parts.join(", "), self.total)
    }
}

fn attribute_str<'a>(person: &'a Resource, key: &str) -> Option<&'a str> {
    person.attributes.get(key).and_then(Value::as_str)
}

/// The person's `birthdate` attribute (`YYYY-MM-DD`)
pub fn birthdate(person: &Resource) -> Option<NaiveDate> {
    attribute_str(person, "birthdate")
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
}

/// Whole years between `birthdate` and `today`
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Exact normalized equality per supplied name field, half the score each
pub fn name_score(criteria: &MatchCriteria, person: &Resource) -> f64 {
    let equal = |wanted: Option<String>, key: &str| {
        wanted.is_some_and(|wanted| attribute_str(person, key).map(normalize_name) == Some(wanted))
    };
    let mut score = 0.0;
    if equal(criteria.normalized_first_name(), "first_name") {
        score += 0.5;
    }
    if equal(criteria.normalized_last_name(), "last_name") {
        score += 0.5;
    }
    score
}

pub fn age_score(criteria: &MatchCriteria, person: &Resource, today: NaiveDate) -> f64 {
    if !criteria.has_age_constraint() {
        return 0.5;
    }
    let Some(born) = birthdate(person) else {
        return 0.1;
    };
    let age = age_on(born, today);

    let fails = !criteria.age_preference.accepts(age)
        || criteria.min_age.is_some_and(|min| age < min)
        || criteria.max_age.is_some_and(|max| age > max)
        || criteria.birth_year.is_some_and(|year| born.year() != year);
    if fails {
        return 0.0;
    }

    let mut score = 0.6;
    if criteria.has_age_range() {
        score += 0.3;
    }
    if criteria.birth_year.is_some() {
        score += 0.4;
    }
    f64::min(score, 1.0)
}

/// Fraction of extra criteria whose attribute equals case-insensitively
pub fn extra_score(criteria: &MatchCriteria, person: &Resource) -> Option<f64> {
    if criteria.extra.is_empty() {
        return None;
    }
    let matched = criteria
        .extra
        .iter()
        .filter(|(key, wanted)| {
            let actual = match person.attributes.get(key.as_str()) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => return false,
                Some(other) => other.to_string(),
            };
            actual.trim().to_lowercase() == wanted.trim().to_lowercase()
        })
        .count();
    Some(matched as f64 / criteria.extra.len() as f64)
}

/// Score one candidate. `matched_by` lists the searches that returned it.
pub fn score(
    criteria: &MatchCriteria,
    person: &Resource,
    matched_by: &[SearchKind],
    today: NaiveDate,
) -> ScoreBreakdown {
    let has_email = criteria.normalized_email().is_some();
    let has_phone = criteria.phone_digits().is_some();
    let binary = |kind: SearchKind| if matched_by.contains(&kind) { 1.0 } else { 0.0 };

    let email = has_email.then(|| binary(SearchKind::Email));
    let phone = has_phone.then(|| binary(SearchKind::Phone));
    let name = criteria.has_name().then(|| name_score(criteria, person));
    let name_weight = if has_email || has_phone {
        NAME_WEIGHT
    } else {
        NAME_ONLY_WEIGHT
    };
    let age = age_score(criteria, person, today);
    let extra = extra_score(criteria, person);

    let weighted = [
        (email, EMAIL_WEIGHT),
        (phone, PHONE_WEIGHT),
        (name, name_weight),
        (Some(age), AGE_WEIGHT),
        (extra, EXTRA_WEIGHT),
    ];
    let (numerator, denominator) = weighted
        .iter()
        .filter_map(|(sub, weight)| sub.map(|sub| (sub * weight, *weight)))
        .fold((0.0, 0.0), |(n, d), (sn, sd)| (n + sn, d + sd));

    ScoreBreakdown {
        email,
        phone,
        name,
        name_weight,
        age,
        extra,
        total: if denominator > 0.0 {
            (numerator / denominator).clamp(0.0, 1.0)
        } else {
            0.0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person(attributes: Value) -> Resource {
        let mut resource = Resource::new("Person", "1");
        if let Value::Object(map) = attributes {
            resource.attributes = map;
        }
        resource
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_age_on_birthday_boundary() {
        let born = NaiveDate::from_ymd_opt(2006, 6, 15).unwrap();
        assert_eq!(age_on(born, today()), 18);
        let born = NaiveDate::from_ymd_opt(2006, 6, 16).unwrap();
        assert_eq!(age_on(born, today()), 17);
    }

    #[test]
    fn test_age_score_rules() {
        let adult = person(json!({"birthdate": "1990-03-01"}));
        let undated = person(json!({}));

        assert_eq!(age_score(&MatchCriteria::new(), &adult, today()), 0.5);
        let constrained = MatchCriteria::new().age_preference(crate::AgePreference::Adults);
        assert_eq!(age_score(&constrained, &undated, today()), 0.1);
        assert_eq!(age_score(&constrained, &adult, today()), 0.6);

        let children = MatchCriteria::new().age_preference(crate::AgePreference::Children);
        assert_eq!(age_score(&children, &adult, today()), 0.0);

        let ranged = MatchCriteria::new().age_range(30, 40);
        assert!((age_score(&ranged, &adult, today()) - 0.9).abs() < 1e-9);
        assert_eq!(age_score(&MatchCriteria::new().age_range(40, 50), &adult, today()), 0.0);

        let year = MatchCriteria::new().age_range(30, 40).birth_year(1990);
        assert_eq!(age_score(&year, &adult, today()), 1.0);
        assert_eq!(age_score(&MatchCriteria::new().birth_year(1991), &adult, today()), 0.0);
    }

    #[test]
    fn test_name_halves() {
        let ada = person(json!({"first_name": "Ada", "last_name": "Lovelace"}));
        let criteria = MatchCriteria::new().first_name("ADA ").last_name("Byron");
        assert_eq!(name_score(&criteria, &ada), 0.5);
        assert_eq!(name_score(&criteria.clone().last_name("lovelace"), &ada), 1.0);
    }

    #[test]
    fn test_unsupplied_criteria_are_excluded() {
        let ada = person(json!({"first_name": "Ada", "last_name": "Lovelace"}));
        let criteria = MatchCriteria::new().first_name("Ada").last_name("Lovelace");
        let breakdown = score(&criteria, &ada, &[SearchKind::Name], today());

        assert_eq!(breakdown.email, None);
        assert_eq!(breakdown.name_weight, NAME_ONLY_WEIGHT);
        // (0.4 * 1.0 + 0.15 * 0.5) / 0.55
        assert!((breakdown.total - 0.475 / 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_email_and_phone_are_binary() {
        let ada = person(json!({"first_name": "Ada"}));
        let criteria = MatchCriteria::new().email("ada@example.com").phone("5550100199");

        let both = score(&criteria, &ada, &[SearchKind::Email, SearchKind::Phone], today());
        let email_only = score(&criteria, &ada, &[SearchKind::Email], today());

        // (0.35 + 0.25 + 0.075) / 0.75
        assert!((both.total - 0.9).abs() < 1e-9);
        // (0.35 + 0.075) / 0.75
        assert!((email_only.total - 0.425 / 0.75).abs() < 1e-9);
        assert!(email_only.reason().contains("phone mismatch"));
    }

    #[test]
    fn test_extra_criteria() {
        let ada = person(json!({"gender": "F", "status": "active", "grade": 3}));
        let criteria = MatchCriteria::new()
            .extra("gender", "f")
            .extra("grade", "3")
            .extra("status", "inactive");
        let extra = extra_score(&criteria, &ada).unwrap();
        assert!((extra - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(extra_score(&MatchCriteria::new(), &ada), None);
    }
}
