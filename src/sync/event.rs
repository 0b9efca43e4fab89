//! # Change Events
//!
//! Collection keys and the events published when a collection changes.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a logical backend collection
///
/// Built-in keys are compile-time constants. Keys declared in the config
/// file are created once at start-up and stay fixed for the process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionKey(Cow<'static, str>);

impl CollectionKey {
    /// Wildcard key; publishing on it reaches every subscriber
    pub const ALL: CollectionKey = CollectionKey::from_static("*");
    pub const SCHOOLS: CollectionKey = CollectionKey::from_static("schools");
    pub const USERS: CollectionKey = CollectionKey::from_static("users");
    pub const CLASSES: CollectionKey = CollectionKey::from_static("classes");
    pub const TEACHERS: CollectionKey = CollectionKey::from_static("teachers");
    pub const STUDENTS: CollectionKey = CollectionKey::from_static("students");

    /// Key backed by a static string
    pub const fn from_static(name: &'static str) -> Self {
        CollectionKey(Cow::Borrowed(name))
    }

    /// Key built at start-up from configuration
    pub fn new(name: impl Into<String>) -> Self {
        CollectionKey(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == Self::ALL.as_str()
    }

    /// The built-in keys, wildcard excluded
    pub fn builtin() -> [CollectionKey; 5] {
        [
            Self::SCHOOLS,
            Self::USERS,
            Self::CLASSES,
            Self::TEACHERS,
            Self::STUDENTS,
        ]
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for CollectionKey {
    fn from(name: &'static str) -> Self {
        CollectionKey::from_static(name)
    }
}

/// Why a collection changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCause {
    /// An entity was created
    Create,
    /// An entity was updated
    Update,
    /// An entity was deleted
    Delete,
    /// Manual announcement with no specific write behind it
    Refresh,
}

impl fmt::Display for ChangeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeCause::Create => write!(f, "create"),
            ChangeCause::Update => write!(f, "update"),
            ChangeCause::Delete => write!(f, "delete"),
            ChangeCause::Refresh => write!(f, "refresh"),
        }
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Announcement that a collection changed
///
/// Never persisted. Subscribers registered after the publish never see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Process-wide monotonically increasing number, for log correlation
    pub sequence: u64,

    /// Collection that changed (or [`CollectionKey::ALL`])
    pub collection: CollectionKey,

    /// When the change was announced
    pub occurred_at: DateTime<Utc>,

    /// What kind of change
    pub cause: ChangeCause,
}

impl ChangeEvent {
    /// Create an event stamped with the next sequence number and the current time
    pub fn new(collection: CollectionKey, cause: ChangeCause) -> Self {
        Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            collection,
            occurred_at: Utc::now(),
            cause,
        }
    }

    /// Whether this event is the global "refresh everything" action
    pub fn is_refresh_all(&self) -> bool {
        self.collection.is_wildcard()
    }
}
