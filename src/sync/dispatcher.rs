//! # Mutation Dispatcher
//!
//! Performs one create/update/delete call and, only once the backend has
//! acknowledged it, announces the affected collections on the bus.
//!
//! - Publish happens after the write resolved and before `mutate` returns.
//! - A failed write publishes nothing.
//! - Internal retries never multiply publishes: one logical mutation, one
//!   publish per affected collection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::backend::{Backend, Method, Mutation};
use super::bus::ChangeBus;
use super::errors::{SyncError, SyncResult};
use super::event::CollectionKey;
use super::routes::ResourceRoutes;
use crate::observability::{log_event, Event, SyncMetrics};

/// Retry policy for idempotent writes that fail transiently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

/// Wraps writes and announces what they changed
pub struct MutationDispatcher {
    backend: Arc<dyn Backend>,
    bus: Arc<dyn ChangeBus>,
    routes: ResourceRoutes,
    retry: RetryPolicy,
}

impl MutationDispatcher {
    pub fn new(backend: Arc<dyn Backend>, bus: Arc<dyn ChangeBus>, routes: ResourceRoutes) -> Self {
        Self {
            backend,
            bus,
            routes,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn routes(&self) -> &ResourceRoutes {
        &self.routes
    }

    /// Perform `mutation`; on success publish once per affected collection
    pub async fn mutate(&self, mutation: &Mutation) -> SyncResult<Value> {
        let method = mutation.method.to_string();
        log_event(
            Event::MutationBegin,
            &[("method", &method), ("path", &mutation.path)],
        );
        SyncMetrics::global().increment_mutations();

        let body = match self.perform(mutation).await {
            Ok(body) => body,
            Err(e) => {
                SyncMetrics::global().increment_mutation_failures();
                log_event(
                    Event::MutationFailed,
                    &[
                        ("code", e.code()),
                        ("error", &e.to_string()),
                        ("method", &method),
                        ("path", &mutation.path),
                    ],
                );
                return Err(e);
            }
        };

        let collections = self.affected(mutation);
        if collections.is_empty() {
            log_event(
                Event::MutationUnrouted,
                &[("method", &method), ("path", &mutation.path)],
            );
        }

        let cause = mutation.method.cause();
        for collection in &collections {
            self.bus.publish(collection, cause);
        }

        let names: Vec<&str> = collections.iter().map(|c| c.as_str()).collect();
        log_event(
            Event::MutationCommitted,
            &[
                ("collections", &names.join(",")),
                ("method", &method),
                ("path", &mutation.path),
            ],
        );

        Ok(body)
    }

    /// Affected collections, de-duplicated, in route order
    fn affected(&self, mutation: &Mutation) -> Vec<CollectionKey> {
        let mut collections: Vec<CollectionKey> = Vec::new();
        for key in self.routes.collections_for(&mutation.path) {
            if !collections.contains(&key) {
                collections.push(key);
            }
        }
        collections
    }

    async fn perform(&self, mutation: &Mutation) -> SyncResult<Value> {
        let mut attempt: u32 = 0;
        loop {
            match self.backend.write(mutation).await {
                Ok(body) => return Ok(body),
                // A delete whose acknowledgement was lost on an earlier attempt
                Err(SyncError::Mutation { status: 404, .. })
                    if attempt > 0 && mutation.method == Method::Delete =>
                {
                    log_event(
                        Event::MutationAckRecovered,
                        &[("attempt", &attempt.to_string()), ("path", &mutation.path)],
                    );
                    return Ok(Value::Null);
                }
                Err(e)
                    if mutation.method.is_idempotent()
                        && e.is_transient()
                        && attempt < self.retry.max_retries =>
                {
                    attempt += 1;
                    log_event(
                        Event::MutationRetry,
                        &[
                            ("attempt", &attempt.to_string()),
                            ("error", &e.to_string()),
                            ("path", &mutation.path),
                        ],
                    );
                    if !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
