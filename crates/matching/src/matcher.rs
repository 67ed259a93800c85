//! Person matching and entity resolution
//!
//! Gathers candidates from several searches, scores them against the
//! criteria, and resolves to one person or creates a new one.

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use pco_sdk_client::{PcoClient, PeopleApi, PersonSearch, SearchKind};
use pco_sdk_core::{PcoError, Resource, Result};
use pco_sdk_monitoring::{Event, EventEmitter, EventType};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::criteria::MatchCriteria;
use crate::scoring::{score, ScoreBreakdown};
use crate::strategy::{MatchOptions, MatchStrategy};

/// A scored candidate record
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub person: Resource,
    /// Normalized score in `[0, 1]`
    pub score: f64,
    pub reason: String,
    /// Searches that returned this person
    pub matched_by: Vec<SearchKind>,
    pub breakdown: ScoreBreakdown,
}

/// Union of search results, deduplicated by id in first-seen order
#[derive(Default)]
struct CandidatePool {
    people: Vec<(Resource, Vec<SearchKind>)>,
    positions: HashMap<String, usize>,
}

impl CandidatePool {
    fn add(&mut self, kind: SearchKind, people: Vec<Resource>) {
        for person in people {
            match self.positions.get(&person.id) {
                Some(&position) => {
                    let matched_by = &mut self.people[position].1;
                    if !matched_by.contains(&kind) {
                        matched_by.push(kind);
                    }
                }
                None => {
                    self.positions.insert(person.id.clone(), self.people.len());
                    self.people.push((person, vec![kind]));
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

/// Resolves identity criteria to people
#[derive(Clone)]
pub struct PersonMatcher {
    api: Arc<dyn PeopleApi>,
    options: MatchOptions,
    today: Option<NaiveDate>,
    events: Option<EventEmitter>,
}

impl PersonMatcher {
    pub fn new(api: Arc<dyn PeopleApi>) -> Self {
        Self {
            api,
            options: MatchOptions::default(),
            today: None,
            events: None,
        }
    }

    /// Matcher over a client's People API, reporting to its event bus
    pub fn for_client(client: &PcoClient) -> Self {
        Self::new(Arc::new(client.people())).with_events(client.events().clone())
    }

    pub fn with_options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.options.strategy = strategy;
        self
    }

    /// Fix the date ages are computed against
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn targeted_searches(criteria: &MatchCriteria) -> Vec<PersonSearch> {
        let mut searches = Vec::new();
        if let Some(email) = criteria.normalized_email() {
            searches.push(PersonSearch::ByEmail(email));
        }
        if let Some(phone) = criteria.phone_digits() {
            searches.push(PersonSearch::ByPhone(phone));
        }
        if criteria.has_name() {
            searches.push(PersonSearch::ByName {
                first: criteria.normalized_first_name(),
                last: criteria.normalized_last_name(),
            });
        }
        searches
    }

    /// Single token for the fallback search, last name first
    fn broad_token(criteria: &MatchCriteria) -> Option<String> {
        criteria
            .normalized_last_name()
            .or_else(|| criteria.normalized_first_name())
    }

    async fn run_search(&self, search: &PersonSearch) -> Option<Vec<Resource>> {
        match self.api.search_people(search).await {
            Ok(people) => {
                debug!(search = ?search.kind(), found = people.len(), "Person search complete");
                Some(people)
            }
            Err(e) => {
                warn!(
                    search = ?search.kind(),
                    error = %e,
                    "Person search failed, continuing without it"
                );
                None
            }
        }
    }

    async fn gather(&self, criteria: &MatchCriteria) -> CandidatePool {
        let searches = Self::targeted_searches(criteria);
        let outcomes = join_all(searches.iter().map(|search| self.run_search(search))).await;

        let mut pool = CandidatePool::default();
        for (search, people) in searches.iter().zip(outcomes) {
            if let Some(people) = people {
                pool.add(search.kind(), people);
            }
        }

        if pool.is_empty() {
            if let Some(token) = Self::broad_token(criteria) {
                if let Some(people) = self.run_search(&PersonSearch::Broad(token)).await {
                    pool.add(SearchKind::Broad, people);
                }
            }
        }
        pool
    }

    /// Every candidate, ranked by descending score
    pub async fn get_all_matches(&self, criteria: &MatchCriteria) -> Result<Vec<MatchCandidate>> {
        let today = self.today();
        let mut candidates: Vec<MatchCandidate> = self
            .gather(criteria)
            .await
            .people
            .into_iter()
            .map(|(person, matched_by)| {
                let breakdown = score(criteria, &person, &matched_by, today);
                MatchCandidate {
                    score: breakdown.total,
                    reason: breakdown.reason(),
                    person,
                    matched_by,
                    breakdown,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.person.id.cmp(&b.person.id))
        });
        debug!(candidates = candidates.len(), "Scored match candidates");
        Ok(candidates)
    }

    /// The best candidate that clears the strategy's cutoff
    pub async fn find_match(&self, criteria: &MatchCriteria) -> Result<Option<MatchCandidate>> {
        let strategy = self.options.strategy;
        let candidates = self.get_all_matches(criteria).await?;
        let considered = candidates.len();
        let best = candidates
            .into_iter()
            .next()
            .filter(|candidate| strategy.accepts(candidate.score));

        match &best {
            Some(candidate) => {
                info!(
                    person_id = %candidate.person.id,
                    score = candidate.score,
                    strategy = strategy.as_str(),
                    "Person match found"
                );
                self.emit(Event::new(EventType::MatchFound).with_payload(json!({
                    "person_id": candidate.person.id,
                    "score": candidate.score,
                    "reason": candidate.reason,
                    "strategy": strategy.as_str(),
                })));
            }
            None => {
                info!(candidates = considered, strategy = strategy.as_str(), "No person match");
                self.emit(Event::new(EventType::MatchNotFound).with_payload(json!({
                    "candidates": considered,
                    "strategy": strategy.as_str(),
                })));
            }
        }
        Ok(best)
    }

    /// The matched person, or a newly created one when creation is enabled
    pub async fn find_or_create(&self, criteria: &MatchCriteria) -> Result<Resource> {
        if let Some(found) = self.find_match(criteria).await? {
            return Ok(found.person);
        }
        if !self.options.create_if_not_found {
            return Err(PcoError::NoMatchCreationDisabled);
        }
        self.create_from(criteria).await
    }

    async fn create_from(&self, criteria: &MatchCriteria) -> Result<Resource> {
        let trimmed = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut attributes = Map::new();
        if let Some(first) = trimmed(&criteria.first_name) {
            attributes.insert("first_name".into(), Value::String(first));
        }
        if let Some(last) = trimmed(&criteria.last_name) {
            attributes.insert("last_name".into(), Value::String(last));
        }
        for (key, value) in &criteria.extra {
            attributes
                .entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }

        let person = self.api.create_person(Value::Object(attributes)).await?;
        if let Some(address) = trimmed(&criteria.email) {
            let email = json!({"address": address, "location": "Home", "primary": true});
            self.api.add_email(&person.id, email).await?;
        }
        if let Some(number) = trimmed(&criteria.phone) {
            let phone = json!({"number": number, "location": "Mobile", "primary": true});
            self.api.add_phone_number(&person.id, phone).await?;
        }

        info!(person_id = %person.id, "Created person after no match");
        Ok(person)
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgePreference;
    use pco_sdk_client::{MockCall, MockPeopleApi};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn matcher(api: &Arc<MockPeopleApi>) -> PersonMatcher {
        PersonMatcher::new(api.clone()).with_today(today())
    }

    fn directory() -> Arc<MockPeopleApi> {
        Arc::new(
            MockPeopleApi::new()
                .with_person(
                    json!({
                        "first_name": "Ada",
                        "last_name": "Lovelace",
                        "birthdate": "1990-12-10"
                    }),
                    &["ada@example.com"],
                    &["555-010-0199"],
                )
                .with_person(
                    json!({"first_name": "Ada", "last_name": "Byron", "birthdate": "2012-01-01"}),
                    &["byron@example.com"],
                    &[],
                )
                .with_person(json!({"first_name": "Grace", "last_name": "Hopper"}), &[], &[]),
        )
    }

    #[tokio::test]
    async fn test_find_match_is_idempotent() {
        let api = directory();
        let criteria = MatchCriteria::new().first_name("Ada").email("ADA@example.com");

        let first = matcher(&api).find_match(&criteria).await.unwrap().unwrap();
        let second = matcher(&api).find_match(&criteria).await.unwrap().unwrap();

        assert_eq!(first.person.id, second.person.id);
        assert_eq!(first.score, second.score);
        assert_eq!(first.person.attribute_str("last_name"), Some("Lovelace"));
    }

    #[tokio::test]
    async fn test_candidates_ranked_and_deduplicated() {
        let api = directory();
        let criteria = MatchCriteria::new()
            .first_name("ada")
            .email("ada@example.com")
            .phone("(555) 010-0199");

        let all = matcher(&api).get_all_matches(&criteria).await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].person.attribute_str("last_name"), Some("Lovelace"));
        assert_eq!(all[0].matched_by, vec![SearchKind::Email, SearchKind::Phone, SearchKind::Name]);
        assert!(all[0].score > all[1].score);
        assert!(all[0].reason.contains("email match"));
    }

    #[tokio::test]
    async fn test_age_constraint_reorders_candidates() {
        let api = directory();
        let criteria = MatchCriteria::new()
            .first_name("Ada")
            .age_preference(AgePreference::Children);

        let all = matcher(&api).get_all_matches(&criteria).await.unwrap();

        assert_eq!(all[0].person.attribute_str("last_name"), Some("Byron"));
        assert_eq!(all[1].breakdown.age, 0.0);
    }

    #[tokio::test]
    async fn test_exact_selects_between_selection_and_advertised_cutoffs() {
        let api = directory();
        // (0.35 * 1 + 0.15 * 0.5) / 0.5 = 0.85
        let criteria = MatchCriteria::new().email("ada@example.com");

        let found = matcher(&api)
            .with_strategy(MatchStrategy::Exact)
            .find_match(&criteria)
            .await
            .unwrap()
            .unwrap();

        assert!((found.score - 0.85).abs() < 1e-9);
        assert!(found.score < MatchStrategy::Exact.advertised_threshold());
    }

    #[tokio::test]
    async fn test_fuzzy_boundary_at_half() {
        let api = Arc::new(MockPeopleApi::new().with_person(
            json!({"first_name": "Ada", "last_name": "Byron"}),
            &[],
            &[],
        ));

        // (0.4 * 0.5 + 0.15 * 0.5) / 0.55 = 0.5
        let at_cutoff = MatchCriteria::new().first_name("Ada");
        let found = matcher(&api).find_match(&at_cutoff).await.unwrap();
        assert!((found.as_ref().unwrap().score - 0.5).abs() < 1e-9);

        let aggressive = matcher(&api).with_strategy(MatchStrategy::Aggressive);
        assert!(aggressive.find_match(&at_cutoff).await.unwrap().is_some());
        let exact = matcher(&api).with_strategy(MatchStrategy::Exact);
        assert!(exact.find_match(&at_cutoff).await.unwrap().is_none());

        // An unmatched extra criterion adds 0.05 to the denominator only
        let below = at_cutoff.clone().extra("gender", "M");
        assert!(matcher(&api).find_match(&below).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_search_strategy_is_swallowed() {
        let api = Arc::new(
            MockPeopleApi::new()
                .with_person(
                    json!({"first_name": "Ada", "last_name": "Lovelace"}),
                    &["ada@example.com"],
                    &[],
                )
                .fail_search(SearchKind::Email),
        );
        let criteria = MatchCriteria::new()
            .first_name("Ada")
            .last_name("Lovelace")
            .email("ada@example.com");

        let all = matcher(&api).get_all_matches(&criteria).await.unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].matched_by, vec![SearchKind::Name]);
        // The email criterion still counts against the candidate
        assert_eq!(all[0].breakdown.email, Some(0.0));
        assert_eq!(api.call_count(MockCall::Search(SearchKind::Email)), 1);
        assert_eq!(api.call_count(MockCall::Search(SearchKind::Broad)), 0);
    }

    #[tokio::test]
    async fn test_broad_search_only_when_targeted_searches_find_nothing() {
        let api = Arc::new(MockPeopleApi::new().with_person(
            json!({"first_name": "Adeline", "last_name": "Lovelace"}),
            &[],
            &[],
        ));
        let criteria = MatchCriteria::new().first_name("Ada").last_name("Lovelace");

        let found = matcher(&api).find_match(&criteria).await.unwrap().unwrap();

        assert_eq!(found.matched_by, vec![SearchKind::Broad]);
        assert_eq!(found.breakdown.name, Some(0.5));
        assert_eq!(api.call_count(MockCall::Search(SearchKind::Broad)), 1);

        let exact_name = MatchCriteria::new().first_name("Adeline").last_name("Lovelace");
        matcher(&api).find_match(&exact_name).await.unwrap();
        assert_eq!(api.call_count(MockCall::Search(SearchKind::Broad)), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_returns_existing() {
        let api = directory();
        let criteria = MatchCriteria::new().email("byron@example.com").first_name("Ada");

        let person = matcher(&api).find_or_create(&criteria).await.unwrap();

        assert_eq!(person.attribute_str("last_name"), Some("Byron"));
        assert_eq!(api.call_count(MockCall::CreatePerson), 0);
    }

    #[tokio::test]
    async fn test_find_or_create_creates_with_contacts() {
        let api = directory();
        let criteria = MatchCriteria::new()
            .first_name(" Katherine ")
            .last_name("Johnson")
            .email("kj@example.com")
            .phone("555-010-0200");

        let person = matcher(&api).find_or_create(&criteria).await.unwrap();

        assert_eq!(person.attribute_str("first_name"), Some("Katherine"));
        assert_eq!(api.emails_of(&person.id).len(), 1);
        assert_eq!(api.phone_numbers_of(&person.id).len(), 1);
        assert_eq!(api.people().len(), 4);
    }

    #[tokio::test]
    async fn test_find_or_create_with_creation_disabled() {
        let api = directory();
        let events = EventEmitter::new();
        let misses = Arc::new(parking_lot::Mutex::new(0));
        let counter = misses.clone();
        events.on(EventType::MatchNotFound, move |_| *counter.lock() += 1);

        let err = matcher(&api)
            .with_events(events)
            .with_options(MatchOptions::new().create_if_not_found(false))
            .find_or_create(&MatchCriteria::new().first_name("Nobody"))
            .await
            .unwrap_err();

        assert!(matches!(err, PcoError::NoMatchCreationDisabled));
        assert_eq!(api.call_count(MockCall::CreatePerson), 0);
        assert_eq!(*misses.lock(), 1);
    }
}
