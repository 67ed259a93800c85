//! Identity criteria for person matching

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

/// Age bucket a match must fall in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgePreference {
    /// 18 and over
    Adults,
    /// Under 18
    Children,
    #[default]
    Any,
}

impl AgePreference {
    pub const ADULT_AGE: u32 = 18;

    pub fn accepts(self, age: u32) -> bool {
        match self {
            Self::Adults => age >= Self::ADULT_AGE,
            Self::Children => age < Self::ADULT_AGE,
            Self::Any => true,
        }
    }
}

/// Compare form of a name: NFC, trimmed, lowercase
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect::<String>().trim().to_lowercase()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// What the caller knows about the person being looked up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age_preference: AgePreference,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub birth_year: Option<i32>,
    /// Attribute equality checks, compared case-insensitively
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    pub fn last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn age_preference(mut self, preference: AgePreference) -> Self {
        self.age_preference = preference;
        self
    }

    pub fn min_age(mut self, min_age: u32) -> Self {
        self.min_age = Some(min_age);
        self
    }

    pub fn max_age(mut self, max_age: u32) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn age_range(self, min_age: u32, max_age: u32) -> Self {
        self.min_age(min_age).max_age(max_age)
    }

    pub fn birth_year(mut self, birth_year: i32) -> Self {
        self.birth_year = Some(birth_year);
        self
    }

    pub fn extra(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(attribute.into(), value.into());
        self
    }

    pub fn normalized_first_name(&self) -> Option<String> {
        self.first_name.as_deref().map(normalize_name).and_then(non_empty)
    }

    pub fn normalized_last_name(&self) -> Option<String> {
        self.last_name.as_deref().map(normalize_name).and_then(non_empty)
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email.as_deref().map(normalize_email).and_then(non_empty)
    }

    pub fn phone_digits(&self) -> Option<String> {
        self.phone.as_deref().map(phone_digits).and_then(non_empty)
    }

    pub fn has_name(&self) -> bool {
        self.normalized_first_name().is_some() || self.normalized_last_name().is_some()
    }

    pub fn has_age_constraint(&self) -> bool {
        self.age_preference != AgePreference::Any
            || self.min_age.is_some()
            || self.max_age.is_some()
            || self.birth_year.is_some()
    }

    pub fn has_age_range(&self) -> bool {
        self.min_age.is_some() || self.max_age.is_some()
    }

    /// True when nothing usable was supplied
    pub fn is_empty(&self) -> bool {
        !self.has_name()
            && self.normalized_email().is_none()
            && self.phone_digits().is_none()
            && !self.has_age_constraint()
            && self.extra.is_empty()
    }
}
