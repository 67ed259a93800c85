//! In-memory People API for deterministic testing
//!
//! Behaves like a small remote service: ids are assigned sequentially,
//! payloads are validated the way the real API rejects them, and failures
//! can be injected per operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use pco_sdk_client::{MockCall, MockPeopleApi, SearchKind};
//!
//! let api = MockPeopleApi::new()
//!     .with_person(
//!         json!({"first_name": "Ada", "last_name": "Lovelace"}),
//!         &["ada@example.com"],
//!         &[],
//!     )
//!     .fail_on(MockCall::AddPhoneNumber, "number is invalid")
//!     .fail_search(SearchKind::Phone);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use pco_sdk_core::{ApiError, PcoError, Resource, Result, READ_ONLY_ATTRIBUTES};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::people::{PeopleApi, PersonSearch, SearchKind};

/// Operations recorded by [`MockPeopleApi`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    CreatePerson,
    GetPerson,
    UpdatePerson,
    DeletePerson,
    AddEmail,
    UpdateEmail,
    DeleteEmail,
    AddPhoneNumber,
    UpdatePhoneNumber,
    DeletePhoneNumber,
    Search(SearchKind),
}

#[derive(Debug, Clone)]
struct StoredPerson {
    resource: Resource,
    emails: Vec<Resource>,
    phone_numbers: Vec<Resource>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    status: u16,
    message: String,
}

#[derive(Debug, Default)]
struct MockState {
    people: Vec<StoredPerson>,
    next_id: u64,
    calls: Vec<MockCall>,
    failures: HashMap<MockCall, InjectedFailure>,
    in_flight: usize,
    max_in_flight: usize,
}

impl MockState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn person_mut(&mut self, id: &str, endpoint: &str, method: &str) -> Result<&mut StoredPerson> {
        self.people
            .iter_mut()
            .find(|p| p.resource.id == id)
            .ok_or_else(|| not_found(method, endpoint))
    }
}

/// In-memory [`PeopleApi`]
#[derive(Debug, Default)]
pub struct MockPeopleApi {
    state: Mutex<MockState>,
    latency: Duration,
}

struct InFlight<'a>(&'a Mutex<MockState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

fn not_found(method: &str, endpoint: &str) -> PcoError {
    ApiError::new(404, "Not Found")
        .with_request(method, endpoint)
        .into()
}

fn invalid(method: &str, endpoint: &str, detail: impl Into<String>) -> PcoError {
    ApiError::new(422, "Unprocessable Entity")
        .with_request(method, endpoint)
        .with_errors(vec![pco_sdk_core::JsonApiErrorObject {
            status: Some("422".into()),
            title: Some("Validation Error".into()),
            detail: Some(detail.into()),
            ..Default::default()
        }])
        .into()
}

fn writable(attributes: Value) -> Map<String, Value> {
    let mut map = match attributes {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for key in READ_ONLY_ATTRIBUTES {
        map.remove(*key);
    }
    map
}

fn lower(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

impl MockPeopleApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to make concurrency observable
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a person with contact records
    pub fn with_person(self, attributes: Value, emails: &[&str], phone_numbers: &[&str]) -> Self {
        self.insert_person(attributes, emails, phone_numbers);
        self
    }

    /// Make every call of `call` fail with a 422 carrying `message`
    pub fn fail_on(self, call: MockCall, message: impl Into<String>) -> Self {
        self.set_failure(call, 422, message);
        self
    }

    /// Make one search strategy fail with a 500
    pub fn fail_search(self, kind: SearchKind) -> Self {
        self.set_failure(MockCall::Search(kind), 500, "search unavailable");
        self
    }

    pub fn set_failure(&self, call: MockCall, status: u16, message: impl Into<String>) {
        self.state.lock().failures.insert(
            call,
            InjectedFailure {
                status,
                message: message.into(),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Seed a person and return its id (not recorded as a call)
    pub fn insert_person(
        &self,
        attributes: Value,
        emails: &[&str],
        phone_numbers: &[&str],
    ) -> String {
        let mut state = self.state.lock();
        let id = state.next_id();
        let mut person = StoredPerson {
            resource: Resource {
                resource_type: "Person".into(),
                id: id.clone(),
                attributes: writable(attributes),
                ..Default::default()
            },
            emails: Vec::new(),
            phone_numbers: Vec::new(),
        };
        for address in emails {
            let email_id = state.next_id();
            person
                .emails
                .push(Resource::new("Email", email_id).with_attribute("address", *address));
        }
        for number in phone_numbers {
            let phone_id = state.next_id();
            person
                .phone_numbers
                .push(Resource::new("PhoneNumber", phone_id).with_attribute("number", *number));
        }
        state.people.push(person);
        id
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, call: MockCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn people(&self) -> Vec<Resource> {
        self.state
            .lock()
            .people
            .iter()
            .map(|p| p.resource.clone())
            .collect()
    }

    pub fn person(&self, id: &str) -> Option<Resource> {
        self.state
            .lock()
            .people
            .iter()
            .find(|p| p.resource.id == id)
            .map(|p| p.resource.clone())
    }

    pub fn emails_of(&self, person_id: &str) -> Vec<Resource> {
        self.state
            .lock()
            .people
            .iter()
            .find(|p| p.resource.id == person_id)
            .map(|p| p.emails.clone())
            .unwrap_or_default()
    }

    pub fn phone_numbers_of(&self, person_id: &str) -> Vec<Resource> {
        self.state
            .lock()
            .people
            .iter()
            .find(|p| p.resource.id == person_id)
            .map(|p| p.phone_numbers.clone())
            .unwrap_or_default()
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    async fn begin(&self, call: MockCall, method: &str, endpoint: &str) -> Result<InFlight<'_>> {
        let failure = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.failures.get(&call).cloned()
        };
        let guard = InFlight(&self.state);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match failure {
            None => Ok(guard),
            Some(failure) if failure.status == 422 => {
                Err(invalid(method, endpoint, failure.message))
            }
            Some(failure) => Err(ApiError::new(failure.status, failure.message)
                .with_request(method, endpoint)
                .into()),
        }
    }
}

#[async_trait]
impl PeopleApi for MockPeopleApi {
    async fn create_person(&self, attributes: Value) -> Result<Resource> {
        let _call = self.begin(MockCall::CreatePerson, "POST", "/people").await?;
        let attributes = writable(attributes);
        let has_name = ["first_name", "last_name"]
            .iter()
            .any(|key| lower(attributes.get(*key)).is_some());
        if !has_name {
            return Err(invalid("POST", "/people", "first_name can't be blank"));
        }

        let mut state = self.state.lock();
        let resource = Resource {
            resource_type: "Person".into(),
            id: state.next_id(),
            attributes,
            ..Default::default()
        };
        state.people.push(StoredPerson {
            resource: resource.clone(),
            emails: Vec::new(),
            phone_numbers: Vec::new(),
        });
        Ok(resource)
    }

    async fn get_person(&self, id: &str) -> Result<Resource> {
        let endpoint = format!("/people/{id}");
        let _call = self.begin(MockCall::GetPerson, "GET", &endpoint).await?;
        let mut state = self.state.lock();
        Ok(state.person_mut(id, &endpoint, "GET")?.resource.clone())
    }

    async fn update_person(&self, id: &str, attributes: Value) -> Result<Resource> {
        let endpoint = format!("/people/{id}");
        let _call = self.begin(MockCall::UpdatePerson, "PATCH", &endpoint).await?;
        let mut state = self.state.lock();
        let person = state.person_mut(id, &endpoint, "PATCH")?;
        person.resource.attributes.extend(writable(attributes));
        Ok(person.resource.clone())
    }

    async fn delete_person(&self, id: &str) -> Result<()> {
        let endpoint = format!("/people/{id}");
        let _call = self.begin(MockCall::DeletePerson, "DELETE", &endpoint).await?;
        let mut state = self.state.lock();
        let before = state.people.len();
        state.people.retain(|p| p.resource.id != id);
        if state.people.len() == before {
            return Err(not_found("DELETE", &endpoint));
        }
        Ok(())
    }

    async fn add_email(&self, person_id: &str, attributes: Value) -> Result<Resource> {
        let endpoint = format!("/people/{person_id}/emails");
        let _call = self.begin(MockCall::AddEmail, "POST", &endpoint).await?;
        let attributes = writable(attributes);
        let valid = attributes
            .get("address")
            .and_then(Value::as_str)
            .is_some_and(|a| a.contains('@') && !a.contains('$'));
        if !valid {
            return Err(invalid("POST", &endpoint, "address is invalid"));
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        let person = state.person_mut(person_id, &endpoint, "POST")?;
        let email = Resource {
            resource_type: "Email".into(),
            id,
            attributes,
            relationships: json!({"person": {"data": {"type": "Person", "id": person_id}}})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            ..Default::default()
        };
        person.emails.push(email.clone());
        Ok(email)
    }

    async fn update_email(
        &self,
        person_id: &str,
        email_id: &str,
        attributes: Value,
    ) -> Result<Resource> {
        let endpoint = format!("/people/{person_id}/emails/{email_id}");
        let _call = self.begin(MockCall::UpdateEmail, "PATCH", &endpoint).await?;
        let mut state = self.state.lock();
        let person = state.person_mut(person_id, &endpoint, "PATCH")?;
        let email = person
            .emails
            .iter_mut()
            .find(|e| e.id == email_id)
            .ok_or_else(|| not_found("PATCH", &endpoint))?;
        email.attributes.extend(writable(attributes));
        Ok(email.clone())
    }

    async fn delete_email(&self, person_id: &str, email_id: &str) -> Result<()> {
        let endpoint = format!("/people/{person_id}/emails/{email_id}");
        let _call = self.begin(MockCall::DeleteEmail, "DELETE", &endpoint).await?;
        let mut state = self.state.lock();
        let person = state.person_mut(person_id, &endpoint, "DELETE")?;
        let before = person.emails.len();
        person.emails.retain(|e| e.id != email_id);
        if person.emails.len() == before {
            return Err(not_found("DELETE", &endpoint));
        }
        Ok(())
    }

    async fn add_phone_number(&self, person_id: &str, attributes: Value) -> Result<Resource> {
        let endpoint = format!("/people/{person_id}/phone_numbers");
        let _call = self.begin(MockCall::AddPhoneNumber, "POST", &endpoint).await?;
        let attributes = writable(attributes);
        let valid = attributes
            .get("number")
            .and_then(Value::as_str)
            .is_some_and(|n| digits(n).len() >= 7);
        if !valid {
            return Err(invalid("POST", &endpoint, "number is invalid"));
        }

        let mut state = self.state.lock();
        let id = state.next_id();
        let person = state.person_mut(person_id, &endpoint, "POST")?;
        let phone = Resource {
            resource_type: "PhoneNumber".into(),
            id,
            attributes,
            ..Default::default()
        };
        person.phone_numbers.push(phone.clone());
        Ok(phone)
    }

    async fn update_phone_number(
        &self,
        person_id: &str,
        phone_id: &str,
        attributes: Value,
    ) -> Result<Resource> {
        let endpoint = format!("/people/{person_id}/phone_numbers/{phone_id}");
        let _call = self
            .begin(MockCall::UpdatePhoneNumber, "PATCH", &endpoint)
            .await?;
        let mut state = self.state.lock();
        let person = state.person_mut(person_id, &endpoint, "PATCH")?;
        let phone = person
            .phone_numbers
            .iter_mut()
            .find(|p| p.id == phone_id)
            .ok_or_else(|| not_found("PATCH", &endpoint))?;
        phone.attributes.extend(writable(attributes));
        Ok(phone.clone())
    }

    async fn delete_phone_number(&self, person_id: &str, phone_id: &str) -> Result<()> {
        let endpoint = format!("/people/{person_id}/phone_numbers/{phone_id}");
        let _call = self
            .begin(MockCall::DeletePhoneNumber, "DELETE", &endpoint)
            .await?;
        let mut state = self.state.lock();
        let person = state.person_mut(person_id, &endpoint, "DELETE")?;
        let before = person.phone_numbers.len();
        person.phone_numbers.retain(|p| p.id != phone_id);
        if person.phone_numbers.len() == before {
            return Err(not_found("DELETE", &endpoint));
        }
        Ok(())
    }

    async fn search_people(&self, search: &PersonSearch) -> Result<Vec<Resource>> {
        let _call = self
            .begin(MockCall::Search(search.kind()), "GET", "/people")
            .await?;
        let state = self.state.lock();

        let is_match = |person: &StoredPerson| -> bool {
            let attributes = &person.resource.attributes;
            match search {
                PersonSearch::ByEmail(email) => {
                    let wanted = email.trim().to_lowercase();
                    person
                        .emails
                        .iter()
                        .any(|e| lower(e.attribute("address")).as_deref() == Some(wanted.as_str()))
                }
                PersonSearch::ByPhone(phone) => {
                    let wanted = digits(phone);
                    !wanted.is_empty()
                        && person.phone_numbers.iter().any(|p| {
                            let stored = p.attribute_str("number").map(digits).unwrap_or_default();
                            !stored.is_empty()
                                && (stored.ends_with(&wanted) || wanted.ends_with(&stored))
                        })
                }
                PersonSearch::ByName { first, last } => {
                    let field_matches = |key: &str, wanted: &Option<String>| match wanted {
                        Some(wanted) => {
                            lower(attributes.get(key)) == Some(wanted.trim().to_lowercase())
                        }
                        None => true,
                    };
                    (first.is_some() || last.is_some())
                        && field_matches("first_name", first)
                        && field_matches("last_name", last)
                }
                PersonSearch::Broad(token) => {
                    let token = token.trim().to_lowercase();
                    !token.is_empty()
                        && ["first_name", "last_name"].iter().any(|key| {
                            lower(attributes.get(*key)).is_some_and(|name| name.contains(&token))
                        })
                }
            }
        };

        Ok(state
            .people
            .iter()
            .filter(|p| is_match(*p))
            .map(|p| p.resource.clone())
            .collect())
    }
}
