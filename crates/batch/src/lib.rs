//! Batch execution for the People API
//!
//! Operations may depend on each other explicitly or by embedding
//! `$<index>.<path>` references to earlier results. A batch is validated as a
//! whole before anything runs, then executed with bounded concurrency.
//!
//! ```no_run
//! use pco_sdk_batch::{BatchExecutor, BatchOperation, BatchOptions};
//! use pco_sdk_client::PcoClient;
//! use serde_json::json;
//!
//! # async fn run(client: PcoClient) -> pco_sdk_core::Result<()> {
//! let summary = BatchExecutor::for_client(&client)
//!     .execute(
//!         vec![
//!             BatchOperation::new("person", "create_person")
//!                 .with_data(json!({"first_name": "Ada"})),
//!             BatchOperation::new("email", "people.addEmail")
//!                 .with_data(json!({"person_id": "$0.id", "address": "ada@example.com"})),
//!         ],
//!         BatchOptions::default(),
//!     )
//!     .await?;
//! println!("{}/{} succeeded", summary.successful, summary.total);
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod executor;
pub mod operation;
pub mod plan;
pub mod references;

pub use executor::BatchExecutor;
pub use operation::{
    BatchOperation, BatchOptions, BatchResult, BatchSummary, EndpointTarget, OperationKind,
    ResourceKind, Verb,
};
pub use plan::{BatchPlan, PlannedOperation};
pub use references::{InputValue, Reference};
