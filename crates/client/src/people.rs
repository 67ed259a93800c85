//! People API: persons, their emails and phone numbers, and search

use async_trait::async_trait;
use pco_sdk_core::{Resource, Result};
use pco_sdk_monitoring::{Event, EventType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::field_cache::FieldDefinitionCache;
use crate::pagination::{paginate, PaginatedResult, PaginationOptions};
use crate::pipeline::RequestPipeline;
use crate::request::RequestOptions;

/// Which remote search filter a [`PersonSearch`] uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Email,
    Phone,
    Name,
    Broad,
}

/// A people search against one filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonSearch {
    ByEmail(String),
    ByPhone(String),
    ByName {
        first: Option<String>,
        last: Option<String>,
    },
    /// Single token matched against any part of the name
    Broad(String),
}

impl PersonSearch {
    pub fn kind(&self) -> SearchKind {
        match self {
            Self::ByEmail(_) => SearchKind::Email,
            Self::ByPhone(_) => SearchKind::Phone,
            Self::ByName { .. } => SearchKind::Name,
            Self::Broad(_) => SearchKind::Broad,
        }
    }

    /// `where[...]` query parameters for this search
    pub fn query(&self) -> Vec<(String, String)> {
        match self {
            Self::ByEmail(email) => vec![("where[search_name_or_email]".into(), email.clone())],
            Self::ByPhone(phone) => vec![("where[search_phone_number]".into(), phone.clone())],
            Self::ByName { first, last } => {
                let mut query = Vec::new();
                if let Some(first) = first {
                    query.push(("where[first_name]".into(), first.clone()));
                }
                if let Some(last) = last {
                    query.push(("where[last_name]".into(), last.clone()));
                }
                query
            }
            Self::Broad(token) => vec![("where[search_name]".into(), token.clone())],
        }
    }
}

/// Typed operations on people and their contact records.
///
/// Implemented over HTTP by [`PeopleModule`] and in memory by
/// [`crate::mock::MockPeopleApi`].
#[async_trait]
pub trait PeopleApi: Send + Sync {
    async fn create_person(&self, attributes: Value) -> Result<Resource>;
    async fn get_person(&self, id: &str) -> Result<Resource>;
    async fn update_person(&self, id: &str, attributes: Value) -> Result<Resource>;
    async fn delete_person(&self, id: &str) -> Result<()>;

    async fn add_email(&self, person_id: &str, attributes: Value) -> Result<Resource>;
    async fn update_email(&self, person_id: &str, email_id: &str, attributes: Value)
        -> Result<Resource>;
    async fn delete_email(&self, person_id: &str, email_id: &str) -> Result<()>;

    async fn add_phone_number(&self, person_id: &str, attributes: Value) -> Result<Resource>;
    async fn update_phone_number(
        &self,
        person_id: &str,
        phone_id: &str,
        attributes: Value,
    ) -> Result<Resource>;
    async fn delete_phone_number(&self, person_id: &str, phone_id: &str) -> Result<()>;

    async fn search_people(&self, search: &PersonSearch) -> Result<Vec<Resource>>;
}

/// People endpoints over the request pipeline
#[derive(Clone)]
pub struct PeopleModule {
    pipeline: Arc<RequestPipeline>,
}

impl PeopleModule {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    async fn write(&self, request: RequestOptions) -> Result<Resource> {
        self.pipeline.execute(request).await?.resource()
    }

    async fn remove(&self, endpoint: String) -> Result<()> {
        self.pipeline.execute(RequestOptions::delete(endpoint)).await?;
        Ok(())
    }

    pub async fn list_people(&self, options: &PaginationOptions) -> Result<PaginatedResult> {
        paginate(&self.pipeline, "/people", Vec::new(), options).await
    }

    /// Field definitions, served from `cache` while it is fresh
    pub async fn field_definitions(&self, cache: &FieldDefinitionCache) -> Result<Vec<Resource>> {
        let now = chrono::Utc::now();
        if let Some(definitions) = cache.get(now) {
            self.pipeline.events().emit(
                Event::new(EventType::CacheHit).with_payload(json!({"cache": "field_definitions"})),
            );
            return Ok(definitions);
        }

        self.pipeline.events().emit(
            Event::new(EventType::CacheMiss).with_payload(json!({"cache": "field_definitions"})),
        );
        let fetched = paginate(
            &self.pipeline,
            "/field_definitions",
            Vec::new(),
            &PaginationOptions::default(),
        )
        .await?;
        cache.refresh(fetched.data.clone(), chrono::Utc::now());
        Ok(fetched.data)
    }

    /// Create a custom field definition and drop the cached list
    pub async fn create_field_definition(
        &self,
        cache: &FieldDefinitionCache,
        attributes: Value,
    ) -> Result<Resource> {
        let created = self
            .write(RequestOptions::post("/field_definitions").body(attributes))
            .await?;
        cache.invalidate();
        self.pipeline.events().emit(
            Event::new(EventType::CacheInvalidate)
                .with_payload(json!({"cache": "field_definitions"})),
        );
        Ok(created)
    }
}

#[async_trait]
impl PeopleApi for PeopleModule {
    async fn create_person(&self, attributes: Value) -> Result<Resource> {
        self.write(RequestOptions::post("/people").body(attributes))
            .await
    }

    async fn get_person(&self, id: &str) -> Result<Resource> {
        self.pipeline
            .execute(RequestOptions::get(format!("/people/{id}")))
            .await?
            .resource()
    }

    async fn update_person(&self, id: &str, attributes: Value) -> Result<Resource> {
        self.write(RequestOptions::patch(format!("/people/{id}")).body(attributes))
            .await
    }

    async fn delete_person(&self, id: &str) -> Result<()> {
        self.remove(format!("/people/{id}")).await
    }

    async fn add_email(&self, person_id: &str, attributes: Value) -> Result<Resource> {
        self.write(RequestOptions::post(format!("/people/{person_id}/emails")).body(attributes))
            .await
    }

    async fn update_email(
        &self,
        person_id: &str,
        email_id: &str,
        attributes: Value,
    ) -> Result<Resource> {
        self.write(
            RequestOptions::patch(format!("/people/{person_id}/emails/{email_id}"))
                .body(attributes),
        )
        .await
    }

    async fn delete_email(&self, person_id: &str, email_id: &str) -> Result<()> {
        self.remove(format!("/people/{person_id}/emails/{email_id}"))
            .await
    }

    async fn add_phone_number(&self, person_id: &str, attributes: Value) -> Result<Resource> {
        self.write(
            RequestOptions::post(format!("/people/{person_id}/phone_numbers")).body(attributes),
        )
        .await
    }

    async fn update_phone_number(
        &self,
        person_id: &str,
        phone_id: &str,
        attributes: Value,
    ) -> Result<Resource> {
        self.write(
            RequestOptions::patch(format!("/people/{person_id}/phone_numbers/{phone_id}"))
                .body(attributes),
        )
        .await
    }

    async fn delete_phone_number(&self, person_id: &str, phone_id: &str) -> Result<()> {
        self.remove(format!("/people/{person_id}/phone_numbers/{phone_id}"))
            .await
    }

    async fn search_people(&self, search: &PersonSearch) -> Result<Vec<Resource>> {
        let mut request = RequestOptions::get("/people");
        for (key, value) in search.query() {
            request = request.query(key, value);
        }
        self.pipeline.execute(request).await?.resources()
    }
}
