//! Batch validation and ordering

use pco_sdk_core::{PcoError, Result};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::dispatch::handler_for;
use crate::operation::{parse_kind, BatchOperation, EndpointTarget, OperationKind};

/// An operation that passed validation
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub index: usize,
    pub operation: BatchOperation,
    pub kind: OperationKind,
    pub target: Option<EndpointTarget>,
    /// Explicit and implicit dependencies, by position
    pub dependencies: BTreeSet<usize>,
    /// Positions referenced by `$<n>.<path>` tokens
    pub implicit_dependencies: BTreeSet<usize>,
}

impl PlannedOperation {
    /// Implicit dependencies labelled `$index_<n>`
    pub fn implicit_labels(&self) -> Vec<String> {
        self.implicit_dependencies
            .iter()
            .map(|n| format!("$index_{n}"))
            .collect()
    }
}

/// A validated batch with a dependency-respecting order
#[derive(Debug, Clone)]
pub struct BatchPlan {
    operations: Vec<PlannedOperation>,
    order: Vec<usize>,
}

fn invalid(message: impl Into<String>) -> PcoError {
    PcoError::InvalidBatch(message.into())
}

/// Position named by `$index_<n>` or a bare number
fn positional(dependency: &str) -> Option<usize> {
    dependency
        .strip_prefix("$index_")
        .unwrap_or(dependency)
        .parse()
        .ok()
}

impl BatchPlan {
    /// Validate `operations` without running anything
    pub fn new(operations: Vec<BatchOperation>) -> Result<Self> {
        if operations.is_empty() {
            return Err(invalid("batch has no operations"));
        }
        let mut ids: HashMap<&str, usize> = HashMap::new();
        for (index, operation) in operations.iter().enumerate() {
            if operation.id.is_empty() {
                return Err(invalid(format!("operation #{index} has an empty id")));
            }
            if ids.insert(operation.id.as_str(), index).is_some() {
                return Err(invalid(format!("duplicate operation id '{}'", operation.id)));
            }
        }

        let mut planned = Vec::with_capacity(operations.len());
        for (index, operation) in operations.iter().enumerate() {
            let (kind, target) =
                parse_kind(&operation.operation_type, operation.endpoint.as_deref())?;
            if handler_for(kind).is_none() {
                return Err(PcoError::UnsupportedEndpoint(kind.to_string()));
            }

            let mut dependencies = BTreeSet::new();
            for dependency in &operation.dependencies {
                let position = ids
                    .get(dependency.as_str())
                    .copied()
                    .or_else(|| positional(dependency).filter(|n| *n < operations.len()))
                    .ok_or_else(|| {
                        invalid(format!(
                            "operation '{}' depends on unknown operation '{dependency}'",
                            operation.id
                        ))
                    })?;
                dependencies.insert(position);
            }

            let mut references = operation.data.references();
            if let Some(target) = &target {
                for part in [&target.person, &target.child].into_iter().flatten() {
                    references.extend(part.references());
                }
            }

            let mut implicit_dependencies = BTreeSet::new();
            for reference in references {
                if reference.index >= index {
                    return Err(invalid(format!(
                        "operation '{}' references {reference}, which is not an earlier operation",
                        operation.id
                    )));
                }
                implicit_dependencies.insert(reference.index);
            }
            dependencies.extend(implicit_dependencies.iter().copied());

            planned.push(PlannedOperation {
                index,
                operation: operation.clone(),
                kind,
                target,
                dependencies,
                implicit_dependencies,
            });
        }

        let order = topological_order(&planned)?;
        Ok(Self {
            operations: planned,
            order,
        })
    }

    pub fn operations(&self) -> &[PlannedOperation] {
        &self.operations
    }

    /// Positions in an order where every dependency comes first
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

fn topological_order(operations: &[PlannedOperation]) -> Result<Vec<usize>> {
    let mut remaining: Vec<usize> = operations.iter().map(|op| op.dependencies.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); operations.len()];
    for op in operations {
        for dependency in &op.dependencies {
            dependents[*dependency].push(op.index);
        }
    }

    let mut ready: VecDeque<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(operations.len());

    while let Some(index) = ready.pop_front() {
        order.push(index);
        for dependent in &dependents[index] {
            remaining[*dependent] -= 1;
            if remaining[*dependent] == 0 {
                ready.push_back(*dependent);
            }
        }
    }

    if order.len() < operations.len() {
        let stuck: Vec<&str> = operations
            .iter()
            .filter(|op| remaining[op.index] > 0)
            .map(|op| op.operation.id.as_str())
            .collect();
        return Err(invalid(format!("dependency cycle among: {}", stuck.join(", "))));
    }
    Ok(order)
}
