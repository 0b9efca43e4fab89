//! Shared fixtures for integration tests
//!
//! `MemoryBackend` keeps one table per resource segment and applies
//! mutations to it, so a read after a write sees the write.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use freshsync::sync::{Backend, ChangeEvent, CollectionKey, Handler, InvalidationBus, Method, Mutation};
use freshsync::sync::{SyncError, SyncResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// Row type used by most views in the tests
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Row {
    pub id: u64,
    #[serde(default)]
    pub nome: String,
}

/// Something the backend did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Read(String),
    WriteAck(String),
    WriteFailed(String),
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Value>>,
    next_id: u64,
}

/// In-memory REST backend
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    reads: Mutex<HashMap<String, usize>>,
    trace: Mutex<Vec<Trace>>,
    read_failures: Mutex<VecDeque<SyncError>>,
    write_failures: Mutex<VecDeque<SyncError>>,
    read_delay: Mutex<Duration>,
    scripted: Mutex<HashMap<String, VecDeque<Value>>>,
    lost_acks: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(Tables {
                rows: HashMap::new(),
                next_id: 1000,
            }),
            reads: Mutex::new(HashMap::new()),
            trace: Mutex::new(Vec::new()),
            read_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            read_delay: Mutex::new(Duration::ZERO),
            scripted: Mutex::new(HashMap::new()),
            lost_acks: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// Seed `resource` with rows `1..=n`
    pub fn seed(&self, resource: &str, n: u64) {
        let rows = (1..=n)
            .map(|id| json!({"id": id, "nome": format!("{} {}", resource, id)}))
            .collect();
        self.tables.lock().unwrap().rows.insert(resource.to_string(), rows);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Next reads fail with `error`, once per call
    pub fn fail_next_read(&self, error: SyncError) {
        self.read_failures.lock().unwrap().push_back(error);
    }

    /// Answer the next reads of `endpoint` with `bodies`, in order
    pub fn script_reads(&self, endpoint: &str, bodies: Vec<Value>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .extend(bodies);
    }

    pub fn fail_next_write(&self, error: SyncError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    /// Next write is applied, but the caller sees a transport timeout
    pub fn lose_next_ack(&self) {
        self.lost_acks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reads_of(&self, endpoint: &str) -> usize {
        self.reads.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn trace(&self) -> Vec<Trace> {
        self.trace.lock().unwrap().clone()
    }

    pub fn rows(&self, resource: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .rows
            .get(resource)
            .map_or(0, Vec::len)
    }

    fn segments(path: &str) -> (String, Option<u64>) {
        let mut parts = path
            .split('?')
            .next()
            .unwrap_or("")
            .split('/')
            .filter(|s| !s.is_empty())
            .skip_while(|s| *s == "api");
        let resource = parts.next().unwrap_or("").to_string();
        let id = parts.next().and_then(|s| s.parse().ok());
        (resource, id)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(&self, endpoint: &str) -> SyncResult<Value> {
        *self
            .reads
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
        self.trace.lock().unwrap().push(Trace::Read(endpoint.to_string()));

        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(e) = self.read_failures.lock().unwrap().pop_front() {
            return Err(e);
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front);
        if let Some(body) = scripted {
            return Ok(body);
        }

        let (resource, _) = Self::segments(endpoint);
        let rows = self
            .tables
            .lock()
            .unwrap()
            .rows
            .get(&resource)
            .cloned()
            .unwrap_or_default();
        Ok(json!({ "data": rows }))
    }

    async fn write(&self, mutation: &Mutation) -> SyncResult<Value> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(e) = self.write_failures.lock().unwrap().pop_front() {
            self.trace
                .lock()
                .unwrap()
                .push(Trace::WriteFailed(mutation.path.clone()));
            return Err(e);
        }

        let (resource, id) = Self::segments(&mutation.path);
        let mut tables = self.tables.lock().unwrap();
        tables.next_id += 1;
        let next_id = tables.next_id;
        let rows = tables.rows.entry(resource).or_default();

        let result = match (mutation.method, id) {
            (Method::Post, _) => {
                let mut row = mutation.body.clone().unwrap_or_else(|| json!({}));
                row["id"] = json!(next_id);
                rows.push(row.clone());
                row
            }
            (Method::Put | Method::Patch, Some(id)) => {
                if let Some(row) = rows.iter_mut().find(|r| r["id"] == json!(id)) {
                    if let (Some(target), Some(Value::Object(patch))) =
                        (row.as_object_mut(), mutation.body.as_ref())
                    {
                        for (k, v) in patch {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                }
                json!({"ok": true})
            }
            (Method::Delete, Some(id)) => {
                let before = rows.len();
                rows.retain(|r| r["id"] != json!(id));
                if rows.len() == before {
                    drop(tables);
                    self.trace
                        .lock()
                        .unwrap()
                        .push(Trace::WriteFailed(mutation.path.clone()));
                    return Err(SyncError::Mutation {
                        method: "DELETE".into(),
                        path: mutation.path.clone(),
                        status: 404,
                        message: "not found".into(),
                    });
                }
                json!({"ok": true})
            }
            _ => json!({"ok": false}),
        };
        drop(tables);

        let lost = self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            self.trace
                .lock()
                .unwrap()
                .push(Trace::WriteFailed(mutation.path.clone()));
            return Err(SyncError::Transport("timeout".into()));
        }

        self.trace
            .lock()
            .unwrap()
            .push(Trace::WriteAck(mutation.path.clone()));
        Ok(result)
    }
}

/// Record every event delivered for `key`
pub fn recorder(bus: &InvalidationBus, key: CollectionKey) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: Handler = Arc::new(move |e: &ChangeEvent| sink.lock().unwrap().push(e.clone()));
    freshsync::sync::ChangeBus::subscribe(bus, key, handler);
    seen
}

/// Let spawned view tasks run without advancing time
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn server_error(path: &str) -> SyncError {
    SyncError::Mutation {
        method: "DELETE".into(),
        path: path.into(),
        status: 503,
        message: "unavailable".into(),
    }
}
