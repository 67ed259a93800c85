//! # PCO SDK Client
//!
//! HTTP client for the Planning Center People API:
//! - Request pipeline with shared rate limiting, timeouts, 429 retry and
//!   OAuth token refresh
//! - JSON:API envelope handling and structured errors
//! - Pagination over `links.next`
//! - Typed People operations behind the [`PeopleApi`] trait, with an
//!   in-memory [`MockPeopleApi`] for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use pco_sdk_client::{PcoClient, PeopleApi, PersonSearch};
//!
//! let client = PcoClient::from_env()?;
//! let people = client.people();
//! let found = people.search_people(&PersonSearch::ByEmail("ada@example.com".into())).await?;
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod field_cache;
pub mod mock;
pub mod pagination;
pub mod people;
pub mod pipeline;
pub mod request;

pub use client::PcoClient;
pub use config::{AuthConfig, ClientConfig, OAuthConfig, TokenSet};
pub use field_cache::{CacheSnapshot, FieldDefinitionCache};
pub use mock::{MockCall, MockPeopleApi};
pub use pagination::{PaginatedResult, PaginationOptions};
pub use people::{PeopleApi, PeopleModule, PersonSearch, SearchKind};
pub use request::{ApiResponse, RequestOptions};
