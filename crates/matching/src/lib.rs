//! Person matching for the People API
//!
//! Candidates are gathered from email, phone and name searches (falling back
//! to a single-token search when those find nothing), scored with weighted
//! sub-scores, and resolved against a [`MatchStrategy`] cutoff.

pub mod criteria;
pub mod matcher;
pub mod scoring;
pub mod strategy;

pub use criteria::{AgePreference, MatchCriteria};
pub use matcher::{MatchCandidate, PersonMatcher};
pub use scoring::ScoreBreakdown;
pub use strategy::{MatchOptions, MatchStrategy};
