//! Match strategies and options

use serde::{Deserialize, Serialize};

/// Absorbs float error so a score computed as exactly the cutoff passes
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    #[default]
    Fuzzy,
    Aggressive,
}

impl MatchStrategy {
    /// Minimum score a candidate needs to be selected
    pub fn selection_threshold(self) -> f64 {
        match self {
            Self::Exact => 0.8,
            Self::Fuzzy | Self::Aggressive => 0.5,
        }
    }

    /// Published threshold table. Selection does not use these values: exact
    /// and fuzzy select at [`Self::selection_threshold`] instead.
    pub fn advertised_threshold(self) -> f64 {
        match self {
            Self::Exact => 0.9,
            Self::Fuzzy => 0.7,
            Self::Aggressive => 0.5,
        }
    }

    /// Inclusive cutoff check
    pub fn accepts(self, score: f64) -> bool {
        score + SCORE_EPSILON >= self.selection_threshold()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub strategy: MatchStrategy,
    /// Create a person when no candidate is selected
    pub create_if_not_found: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::Fuzzy,
            create_if_not_found: true,
        }
    }
}

impl MatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn create_if_not_found(mut self, create: bool) -> Self {
        self.create_if_not_found = create;
        self
    }
}
