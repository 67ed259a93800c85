//! # PCO SDK Core
//!
//! Shared types for the PCO SDK: the structured error taxonomy every
//! layer returns, and the JSON:API envelope the remote service speaks.

pub mod errors;
pub mod jsonapi;

pub use errors::*;
pub use jsonapi::{
    parse_errors, resource_type_for_endpoint, wrap_body, Document, ErrorDocument,
    JsonApiErrorObject, Links, PrimaryData, Resource, READ_ONLY_ATTRIBUTES,
};
