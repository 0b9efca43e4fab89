//! # Snapshot Fetcher
//!
//! One view's read path for one endpoint.
//!
//! - Concurrent `fetch()` calls coalesce onto the read already in flight.
//! - A failed read keeps the previous data and only sets `error`.
//! - Every read carries a sequence number; a result older than the last
//!   applied one is discarded.
//! - No sharing across views: each view owns its fetcher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::Backend;
use super::errors::{SyncError, SyncResult};
use crate::observability::{log_event, Event, SyncMetrics};

/// Item type a view can hold
pub trait Record: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: DeserializeOwned + Clone + Send + Sync + 'static {}

/// How the endpoint wraps its items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseShape {
    /// A bare array, or an object holding the array under `field`
    /// (falling back to `"data"`, then to its only array-valued field)
    List {
        #[serde(default)]
        field: Option<String>,
    },

    /// The whole object is one item (aggregate endpoints)
    Single,
}

impl Default for ResponseShape {
    fn default() -> Self {
        ResponseShape::List { field: None }
    }
}

impl ResponseShape {
    pub fn list() -> Self {
        ResponseShape::List { field: None }
    }

    pub fn field(name: impl Into<String>) -> Self {
        ResponseShape::List {
            field: Some(name.into()),
        }
    }
}

/// A view's latest known copy of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Items in backend order
    pub data: Vec<T>,

    /// Time of the last successful fetch; `None` until first populated
    pub fetched_at: Option<DateTime<Utc>>,

    /// A read is in flight
    pub is_loading: bool,

    /// Error of the last read, if it failed
    pub error: Option<SyncError>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            fetched_at: None,
            is_loading: false,
            error: None,
        }
    }
}

impl<T> Snapshot<T> {
    /// Whether any read has ever succeeded
    pub fn is_populated(&self) -> bool {
        self.fetched_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Turn any supported envelope into a flat list of items
pub fn normalize_envelope(body: Value, shape: &ResponseShape) -> SyncResult<Vec<Value>> {
    match (shape, body) {
        (ResponseShape::Single, Value::Object(map)) => Ok(vec![Value::Object(map)]),
        (ResponseShape::List { .. }, Value::Array(items)) => Ok(items),
        (ResponseShape::List { field }, Value::Object(mut map)) => {
            if let Some(name) = field {
                match map.remove(name) {
                    Some(Value::Array(items)) => return Ok(items),
                    Some(other) => {
                        return Err(SyncError::UnexpectedShape(format!(
                            "field '{}' is {}, expected array",
                            name,
                            describe(&other)
                        )))
                    }
                    None => {}
                }
            }

            if let Some(Value::Array(_)) = map.get("data") {
                if let Some(Value::Array(items)) = map.remove("data") {
                    return Ok(items);
                }
            }

            let mut array_fields = map.iter().filter(|(_, v)| v.is_array()).map(|(k, _)| k.clone());
            match (array_fields.next(), array_fields.next()) {
                (Some(only), None) => match map.remove(&only) {
                    Some(Value::Array(items)) => Ok(items),
                    _ => Err(SyncError::Internal("array field vanished".into())),
                },
                (None, _) => Err(SyncError::UnexpectedShape(
                    "object without an array field".into(),
                )),
                (Some(_), Some(_)) => Err(SyncError::UnexpectedShape(
                    "object with several array fields and no field configured".into(),
                )),
            }
        }
        (_, other) => Err(SyncError::UnexpectedShape(describe(&other).to_string())),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_items<T: Record>(items: Vec<Value>) -> SyncResult<Vec<T>> {
    items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| SyncError::Decode(e.to_string()))
}

type SharedRead<T> = Shared<BoxFuture<'static, SyncResult<Vec<T>>>>;

struct FetcherState<T> {
    snapshot: Snapshot<T>,
    in_flight: Option<(u64, SharedRead<T>)>,
    /// Reads started and not yet resolved, coalesced and direct alike
    pending_reads: usize,
    next_sequence: u64,
    applied_sequence: u64,
}

/// Reads one endpoint into a [`Snapshot`]
pub struct SnapshotFetcher<T: Record> {
    backend: Arc<dyn Backend>,
    endpoint: String,
    shape: ResponseShape,
    state: Mutex<FetcherState<T>>,
}

impl<T: Record> std::fmt::Debug for SnapshotFetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFetcher")
            .field("endpoint", &self.endpoint)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl<T: Record> SnapshotFetcher<T> {
    /// Create a fetcher with an empty snapshot
    pub fn new(backend: Arc<dyn Backend>, endpoint: impl Into<String>, shape: ResponseShape) -> Self {
        Self {
            backend,
            endpoint: endpoint.into(),
            shape,
            state: Mutex::new(FetcherState {
                snapshot: Snapshot::default(),
                in_flight: None,
                pending_reads: 0,
                next_sequence: 0,
                applied_sequence: 0,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> Snapshot<T> {
        self.state().snapshot.clone()
    }

    /// Read the endpoint, joining a read already in flight
    pub async fn fetch(&self) -> Snapshot<T> {
        let (sequence, read) = {
            let mut state = self.state();
            let joined = state.in_flight.as_ref().map(|(s, read)| (*s, read.clone()));
            match joined {
                Some((sequence, read)) => {
                    SyncMetrics::global().increment_fetches_coalesced();
                    log_event(
                        Event::FetchCoalesced,
                        &[("endpoint", &self.endpoint), ("sequence", &sequence.to_string())],
                    );
                    (sequence, read)
                }
                None => {
                    let sequence = Self::next_sequence(&mut state);
                    let read = self.start_read(sequence);
                    state.in_flight = Some((sequence, read.clone()));
                    state.pending_reads += 1;
                    state.snapshot.is_loading = true;
                    (sequence, read)
                }
            }
        };

        let result = read.await;

        {
            let mut state = self.state();
            if matches!(&state.in_flight, Some((s, _)) if *s == sequence) {
                state.in_flight = None;
                state.pending_reads = state.pending_reads.saturating_sub(1);
            }
        }

        self.apply(sequence, result)
    }

    /// Read the endpoint with a request of its own, bypassing coalescing
    pub async fn fetch_direct(&self) -> Snapshot<T> {
        let (sequence, read) = {
            let mut state = self.state();
            let sequence = Self::next_sequence(&mut state);
            state.pending_reads += 1;
            state.snapshot.is_loading = true;
            (sequence, self.start_read(sequence))
        };

        let result = read.await;
        {
            let mut state = self.state();
            state.pending_reads = state.pending_reads.saturating_sub(1);
        }
        self.apply(sequence, result)
    }

    fn next_sequence(state: &mut FetcherState<T>) -> u64 {
        state.next_sequence += 1;
        state.next_sequence
    }

    fn start_read(&self, sequence: u64) -> SharedRead<T> {
        SyncMetrics::global().increment_fetches();
        log_event(
            Event::FetchBegin,
            &[("endpoint", &self.endpoint), ("sequence", &sequence.to_string())],
        );

        let backend = Arc::clone(&self.backend);
        let endpoint = self.endpoint.clone();
        let shape = self.shape.clone();

        async move {
            let body = backend.read(&endpoint).await?;
            decode_items(normalize_envelope(body, &shape)?)
        }
        .boxed()
        .shared()
    }

    fn apply(&self, sequence: u64, result: SyncResult<Vec<T>>) -> Snapshot<T> {
        let mut state = self.state();
        let still_loading = state.pending_reads > 0;

        if sequence <= state.applied_sequence {
            state.snapshot.is_loading = still_loading;
            if sequence < state.applied_sequence {
                log_event(
                    Event::FetchDiscarded,
                    &[
                        ("applied", &state.applied_sequence.to_string()),
                        ("endpoint", &self.endpoint),
                        ("sequence", &sequence.to_string()),
                    ],
                );
            }
            return state.snapshot.clone();
        }
        state.applied_sequence = sequence;

        match result {
            Ok(data) => {
                log_event(
                    Event::FetchComplete,
                    &[
                        ("endpoint", &self.endpoint),
                        ("items", &data.len().to_string()),
                        ("sequence", &sequence.to_string()),
                    ],
                );
                state.snapshot = Snapshot {
                    data,
                    fetched_at: Some(Utc::now()),
                    is_loading: still_loading,
                    error: None,
                };
            }
            Err(e) => {
                SyncMetrics::global().increment_fetch_failures();
                log_event(
                    Event::FetchFailed,
                    &[
                        ("code", e.code()),
                        ("endpoint", &self.endpoint),
                        ("error", &e.to_string()),
                        ("sequence", &sequence.to_string()),
                    ],
                );
                state.snapshot.is_loading = still_loading;
                state.snapshot.error = Some(e);
            }
        }

        state.snapshot.clone()
    }

    fn state(&self) -> MutexGuard<'_, FetcherState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
