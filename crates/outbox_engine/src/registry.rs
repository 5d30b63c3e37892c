//! Handler and resolver registration.

use crate::error::{ApplyError, ResolveError};
use outbox_types::Task;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Applies one task against the remote system.
///
/// Returning `Ok` with the remote's version of the resource marks the task
/// complete. An [`ApplyError::Conflict`] is the sole conflict signal; any
/// other error is treated as uniformly retryable.
pub trait TaskHandler: Send + Sync {
    /// Applies the task remotely and returns the remote version, if any.
    fn apply(&self, task: &Task) -> Result<Option<Vec<u8>>, ApplyError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task) -> Result<Option<Vec<u8>>, ApplyError> + Send + Sync,
{
    fn apply(&self, task: &Task) -> Result<Option<Vec<u8>>, ApplyError> {
        self(task)
    }
}

/// Produces a merged payload from a conflicting local/remote pair.
///
/// Invoked only when a handler reports a conflict and the task's policy
/// permits automatic resolution.
pub trait ConflictResolver: Send + Sync {
    /// Merges the local task payload with the server's version.
    fn resolve(&self, task: &Task, server_version: Option<&[u8]>)
        -> Result<Vec<u8>, ResolveError>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Task, Option<&[u8]>) -> Result<Vec<u8>, ResolveError> + Send + Sync,
{
    fn resolve(
        &self,
        task: &Task,
        server_version: Option<&[u8]>,
    ) -> Result<Vec<u8>, ResolveError> {
        self(task, server_version)
    }
}

/// Maps resource categories to apply handlers and conflict resolvers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    resolvers: RwLock<HashMap<String, Arc<dyn ConflictResolver>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the apply handler for a category, replacing any previous.
    pub fn register_handler(&self, category: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(category.into(), handler);
    }

    /// Registers the conflict resolver for a category, replacing any
    /// previous.
    pub fn register_resolver(
        &self,
        category: impl Into<String>,
        resolver: Arc<dyn ConflictResolver>,
    ) {
        self.resolvers.write().insert(category.into(), resolver);
    }

    /// Looks up the handler for a category.
    pub fn handler(&self, category: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(category).cloned()
    }

    /// Looks up the resolver for a category.
    pub fn resolver(&self, category: &str) -> Option<Arc<dyn ConflictResolver>> {
        self.resolvers.read().get(category).cloned()
    }

    /// Returns true if a handler is registered for the category.
    pub fn has_handler(&self, category: &str) -> bool {
        self.handlers.read().contains_key(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{TaskKind, TaskSpec};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn make_task(category: &str) -> Task {
        let spec = TaskSpec::new(TaskKind::Create, category, vec![1]);
        Task {
            id: Uuid::new_v4(),
            kind: spec.kind,
            category: spec.category,
            payload: spec.payload,
            created_at: 0,
            seq: 0,
            retry_count: 0,
            max_retries: 3,
            priority: spec.priority,
            conflict_policy: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn register_and_dispatch() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has_handler("Patient"));

        registry.register_handler(
            "Patient",
            Arc::new(|task: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
                Ok(Some(task.payload.clone()))
            }),
        );
        assert!(registry.has_handler("Patient"));
        assert!(registry.handler("Observation").is_none());

        let task = make_task("Patient");
        let handler = registry.handler("Patient").unwrap();
        assert_eq!(handler.apply(&task).unwrap(), Some(vec![1]));
    }

    #[test]
    fn replace_handler() {
        let registry = HandlerRegistry::new();
        registry.register_handler(
            "Patient",
            Arc::new(|_: &Task| -> Result<Option<Vec<u8>>, ApplyError> { Ok(None) }),
        );
        registry.register_handler(
            "Patient",
            Arc::new(|_: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
                Err(ApplyError::failed("second"))
            }),
        );

        let task = make_task("Patient");
        let result = registry.handler("Patient").unwrap().apply(&task);
        assert_eq!(result.unwrap_err().to_string(), "second");
    }

    #[test]
    fn resolver_dispatch() {
        let registry = HandlerRegistry::new();
        registry.register_resolver(
            "Patient",
            Arc::new(
                |task: &Task, server: Option<&[u8]>| -> Result<Vec<u8>, ResolveError> {
                    let mut merged = task.payload.clone();
                    merged.extend_from_slice(server.unwrap_or_default());
                    Ok(merged)
                },
            ),
        );

        let task = make_task("Patient");
        let resolver = registry.resolver("Patient").unwrap();
        let merged = resolver.resolve(&task, Some(&[9])).unwrap();
        assert_eq!(merged, vec![1, 9]);
    }
}
