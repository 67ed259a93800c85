//! Dependency-aware batch execution
//!
//! Every operation is spawned up front. A task first waits for all of its
//! dependencies to settle (successfully or not), then takes a permit from
//! the shared semaphore, so no waiting task ever holds a permit. Settled
//! results are shared futures that dependents and the collector both await.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use pco_sdk_client::{PcoClient, PeopleApi};
use pco_sdk_core::{PcoError, Resource, Result};
use pco_sdk_monitoring::{Event, EventEmitter, EventType};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::dispatch::{handler_for, inverse_call, Call};
use crate::operation::{
    BatchOperation, BatchOptions, BatchResult, BatchSummary, OperationKind, ResourceKind, Verb,
};
use crate::plan::{BatchPlan, PlannedOperation};
use crate::references::{resolve_in_result, InputValue, Reference, ReferenceSource};

#[derive(Debug)]
struct Settled {
    index: usize,
    kind: OperationKind,
    call: Option<Call>,
    resolved_input: Value,
    result: std::result::Result<Option<Resource>, Arc<PcoError>>,
    data: Option<Value>,
}

impl Settled {
    fn failed(planned: &PlannedOperation, error: PcoError) -> Arc<Self> {
        Arc::new(Self {
            index: planned.index,
            kind: planned.kind,
            call: None,
            resolved_input: Value::Null,
            result: Err(Arc::new(error)),
            data: None,
        })
    }

    fn resource(&self) -> Option<&Resource> {
        self.result.as_ref().ok().and_then(Option::as_ref)
    }
}

type SettledFuture = Shared<BoxFuture<'static, Arc<Settled>>>;

struct SettledResults<'a>(&'a HashMap<usize, Arc<Settled>>);

impl ReferenceSource for SettledResults<'_> {
    fn resolve(&self, reference: &Reference) -> Option<String> {
        let settled = self.0.get(&reference.index)?;
        let resource = settled.resource()?;
        resolve_in_result(reference, Some(&resource.id), settled.data.as_ref())
    }
}

/// Runs batches of People API operations
#[derive(Clone)]
pub struct BatchExecutor {
    api: Arc<dyn PeopleApi>,
    events: Option<EventEmitter>,
}

impl BatchExecutor {
    pub fn new(api: Arc<dyn PeopleApi>) -> Self {
        Self { api, events: None }
    }

    /// Executor over a client's People API, reporting to its event bus
    pub fn for_client(client: &PcoClient) -> Self {
        Self::new(Arc::new(client.people())).with_events(client.events().clone())
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate a batch without running it
    pub fn plan(&self, operations: Vec<BatchOperation>) -> Result<BatchPlan> {
        BatchPlan::new(operations)
    }

    /// Run `operations`, respecting dependencies and the concurrency ceiling.
    ///
    /// Returns a summary with one result per operation. With
    /// `continue_on_error` unset, the first failure is returned instead and
    /// operations that have not started yet are skipped.
    pub async fn execute(
        &self,
        operations: Vec<BatchOperation>,
        options: BatchOptions,
    ) -> Result<BatchSummary> {
        let started = Instant::now();
        let plan = BatchPlan::new(operations)?;
        let max_concurrency = options.max_concurrency.max(1);
        info!(
            operations = plan.len(),
            max_concurrency,
            continue_on_error = options.continue_on_error,
            "Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut handles: Vec<Option<SettledFuture>> = vec![None; plan.len()];

        for &index in plan.order() {
            let planned = plan.operations()[index].clone();
            let dependencies: Vec<SettledFuture> = planned
                .dependencies
                .iter()
                .filter_map(|dependency| handles[*dependency].clone())
                .collect();

            let fallback = planned.clone();
            let task = tokio::spawn(run_operation(
                self.api.clone(),
                planned,
                dependencies,
                semaphore.clone(),
                aborted.clone(),
            ));
            let settled = async move {
                match task.await {
                    Ok(settled) => settled,
                    Err(e) => Settled::failed(
                        &fallback,
                        PcoError::Cancelled(format!("operation task failed: {e}")),
                    ),
                }
            }
            .boxed()
            .shared();
            handles[index] = Some(settled);
        }

        let mut pending: FuturesUnordered<SettledFuture> = handles.into_iter().flatten().collect();
        let mut results = Vec::with_capacity(plan.len());
        let mut completed: Vec<Arc<Settled>> = Vec::new();

        while let Some(settled) = pending.next().await {
            let planned = &plan.operations()[settled.index];
            let result = batch_result(planned, &settled);
            self.emit_operation(&result);
            if let Some(callback) = &options.on_operation_complete {
                callback(&result);
            }

            if let (false, Some(error)) = (options.continue_on_error, result.error.clone()) {
                aborted.store(true, Ordering::SeqCst);
                warn!(
                    operation_id = %planned.operation.id,
                    index = planned.index,
                    error = %error,
                    "Batch aborted on failed operation"
                );
                if options.enable_rollback {
                    self.rollback(&completed).await;
                }
                return Err(PcoError::BatchOperation {
                    operation_id: planned.operation.id.clone(),
                    index: planned.index,
                    source: error,
                });
            }

            completed.push(settled.clone());
            results.push(result);
        }

        let summary = BatchSummary::from_results(results, started.elapsed().as_millis() as u64);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "Batch complete"
        );
        if let Some(events) = &self.events {
            events.emit(Event::new(EventType::BatchComplete).with_payload(json!({
                "total": summary.total,
                "successful": summary.successful,
                "failed": summary.failed,
                "success_rate": summary.success_rate,
                "duration_ms": summary.duration_ms,
            })));
        }
        if let Some(callback) = &options.on_batch_complete {
            callback(&summary);
        }
        Ok(summary)
    }

    /// Delete what completed creates produced, newest first. Best effort:
    /// failures are logged and the remaining steps still run.
    async fn rollback(&self, completed: &[Arc<Settled>]) {
        let steps: Vec<_> = completed
            .iter()
            .rev()
            .filter_map(|settled| {
                let call = settled.call.as_ref()?;
                inverse_call(settled.kind, call, settled.resource()?)
                    .map(|step| (settled.index, step))
            })
            .collect();
        if steps.is_empty() {
            return;
        }

        warn!(steps = steps.len(), "Rolling back completed operations");
        for (index, (kind, call)) in steps {
            let Some(handler) = handler_for(kind) else {
                continue;
            };
            match handler(self.api.as_ref(), call).await {
                Ok(_) => debug!(index, kind = %kind, "Rolled back operation"),
                Err(e) => warn!(index, kind = %kind, error = %e, "Rollback step failed"),
            }
        }
    }

    fn emit_operation(&self, result: &BatchResult) {
        let Some(events) = &self.events else {
            return;
        };
        events.emit(Event::new(EventType::BatchOperationComplete).with_payload(json!({
            "index": result.index,
            "operation_id": result.operation.id,
            "kind": result.kind.to_string(),
            "success": result.success,
            "error": result.error.as_ref().map(|e| e.to_string()),
        })));
    }
}

fn batch_result(planned: &PlannedOperation, settled: &Settled) -> BatchResult {
    BatchResult {
        index: planned.index,
        operation: planned.operation.clone(),
        kind: planned.kind,
        success: settled.result.is_ok(),
        resource: settled.resource().cloned(),
        resolved_input: settled.resolved_input.clone(),
        error: settled.result.as_ref().err().cloned(),
    }
}

fn resolve_id(part: &Option<InputValue>, source: &dyn ReferenceSource) -> Option<String> {
    part.as_ref()
        .map(|value| value.resolve(source))
        .and_then(|value| value.as_str().map(str::to_string))
}

async fn run_operation(
    api: Arc<dyn PeopleApi>,
    planned: PlannedOperation,
    dependencies: Vec<SettledFuture>,
    semaphore: Arc<Semaphore>,
    aborted: Arc<AtomicBool>,
) -> Arc<Settled> {
    let settled: HashMap<usize, Arc<Settled>> = join_all(dependencies)
        .await
        .into_iter()
        .map(|s| (s.index, s))
        .collect();

    let Ok(_permit) = semaphore.acquire_owned().await else {
        return Settled::failed(&planned, PcoError::Cancelled("concurrency limiter closed".into()));
    };
    if aborted.load(Ordering::SeqCst) {
        return Settled::failed(&planned, PcoError::Cancelled("batch aborted".into()));
    }
    let Some(handler) = handler_for(planned.kind) else {
        return Settled::failed(&planned, PcoError::UnsupportedEndpoint(planned.kind.to_string()));
    };

    let source = SettledResults(&settled);
    let resolved_input = planned.operation.data.resolve(&source);
    let (endpoint_person, endpoint_child) = match &planned.target {
        Some(target) => (resolve_id(&target.person, &source), resolve_id(&target.child, &source)),
        None => (None, None),
    };
    let person_create = OperationKind::new(ResourceKind::Person, Verb::Create);
    let inferred_person = settled
        .values()
        .filter(|s| s.kind == person_create)
        .filter_map(|s| s.resource().map(|r| (s.index, r.id.clone())))
        .max_by_key(|(index, _)| *index)
        .map(|(_, id)| id);

    let call = Call::build(
        planned.kind,
        endpoint_person,
        endpoint_child,
        resolved_input.clone(),
        inferred_person,
    );
    debug!(
        operation_id = %planned.operation.id,
        index = planned.index,
        kind = %planned.kind,
        dependencies = ?planned.implicit_labels(),
        "Dispatching batch operation"
    );

    let result = handler(api.as_ref(), call.clone()).await.map_err(Arc::new);
    if let Err(e) = &result {
        debug!(operation_id = %planned.operation.id, error = %e, "Batch operation failed");
    }
    let data = result
        .as_ref()
        .ok()
        .and_then(Option::as_ref)
        .map(Resource::to_flat_json);

    Arc::new(Settled {
        index: planned.index,
        kind: planned.kind,
        call: Some(call),
        resolved_input,
        result,
        data,
    })
}
