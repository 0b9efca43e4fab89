//! # Invalidation Bus
//!
//! In-process publish/subscribe channel keyed by collection.
//!
//! ## Delivery
//! - Handlers run synchronously inside `publish`, in registration order.
//! - A panicking handler is isolated; the rest still run.
//! - Fire-and-forget: no queue, no replay for late subscribers.
//! - Dispatch works on a copy of the registrations taken at publish time,
//!   so handlers may subscribe or unsubscribe while being invoked.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use super::event::{ChangeCause, ChangeEvent, CollectionKey};
use crate::observability::{log_event, Event, SyncMetrics};

/// Callback invoked with every matching change event
pub type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Ties one handler registration to the bus until it is unsubscribed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    collection: CollectionKey,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn collection(&self) -> &CollectionKey {
        &self.collection
    }
}

/// Outcome of one publish, for diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Registrations that matched the key
    pub matched: usize,
    /// Handlers that returned normally
    pub delivered: usize,
    /// Handlers that panicked
    pub failed: usize,
}

/// Transport seam between publishers/views and the concrete emitter
///
/// [`InvalidationBus`] is the in-process implementation. Another host
/// environment can provide its own without touching the views.
pub trait ChangeBus: Send + Sync {
    /// Announce that `collection` changed
    fn publish(&self, collection: &CollectionKey, cause: ChangeCause) -> PublishReport;

    /// Register `handler` for `collection` (and for the wildcard key)
    fn subscribe(&self, collection: CollectionKey, handler: Handler) -> SubscriptionHandle;

    /// Remove a registration. Idempotent.
    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

struct Registration {
    collection: CollectionKey,
    handler: Handler,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// Process-wide invalidation bus
#[derive(Debug, Default)]
pub struct InvalidationBus {
    /// Registrations keyed by id; ids grow, so iteration is registration order
    registrations: RwLock<BTreeMap<u64, Registration>>,

    next_id: AtomicU64,
}

impl InvalidationBus {
    /// Create a private bus
    pub fn new() -> Self {
        Self::default()
    }

    /// The application-wide bus, constructed on first access
    ///
    /// Lives until the process exits; use [`clear`](Self::clear) for a full
    /// application reload.
    pub fn global() -> Arc<InvalidationBus> {
        static GLOBAL: OnceLock<Arc<InvalidationBus>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(InvalidationBus::new())))
    }

    /// Drop every registration
    pub fn clear(&self) {
        if let Ok(mut registrations) = self.registrations.write() {
            registrations.clear();
        }
        log_event(Event::BusCleared, &[]);
    }

    /// Total number of live registrations
    pub fn len(&self) -> usize {
        self.registrations.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registrations made directly on `collection`
    pub fn subscriber_count(&self, collection: &CollectionKey) -> usize {
        self.registrations
            .read()
            .map(|r| r.values().filter(|reg| &reg.collection == collection).count())
            .unwrap_or(0)
    }

    /// Deliver an already-built event
    pub fn dispatch(&self, event: &ChangeEvent) -> PublishReport {
        let targets: Vec<(u64, Handler)> = match self.registrations.read() {
            Ok(registrations) => registrations
                .iter()
                .filter(|(_, reg)| Self::matches(&reg.collection, &event.collection))
                .map(|(id, reg)| (*id, Arc::clone(&reg.handler)))
                .collect(),
            Err(_) => return PublishReport::default(),
        };

        let mut report = PublishReport {
            matched: targets.len(),
            ..PublishReport::default()
        };

        for (id, handler) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    report.failed += 1;
                    log_event(
                        Event::BusSubscriberFailed,
                        &[
                            ("collection", event.collection.as_str()),
                            ("sequence", &event.sequence.to_string()),
                            ("subscription", &id.to_string()),
                        ],
                    );
                }
            }
        }

        SyncMetrics::global().record_publish(report.delivered, report.failed);
        log_event(
            Event::BusPublish,
            &[
                ("cause", &event.cause.to_string()),
                ("collection", event.collection.as_str()),
                ("delivered", &report.delivered.to_string()),
                ("sequence", &event.sequence.to_string()),
            ],
        );

        report
    }

    fn matches(registered: &CollectionKey, published: &CollectionKey) -> bool {
        registered == published || published.is_wildcard() || registered.is_wildcard()
    }
}

impl ChangeBus for InvalidationBus {
    fn publish(&self, collection: &CollectionKey, cause: ChangeCause) -> PublishReport {
        let event = ChangeEvent::new(collection.clone(), cause);
        self.dispatch(&event)
    }

    fn subscribe(&self, collection: CollectionKey, handler: Handler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut registrations) = self.registrations.write() {
            registrations.insert(
                id,
                Registration {
                    collection: collection.clone(),
                    handler,
                },
            );
        }

        log_event(
            Event::BusSubscribe,
            &[("collection", collection.as_str()), ("subscription", &id.to_string())],
        );

        SubscriptionHandle { id, collection }
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed = self
            .registrations
            .write()
            .map(|mut r| r.remove(&handle.id).is_some())
            .unwrap_or(false);

        if removed {
            log_event(
                Event::BusUnsubscribe,
                &[
                    ("collection", handle.collection.as_str()),
                    ("subscription", &handle.id.to_string()),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_factory = Arc::clone(&log);
        let factory = move |name: &str| -> Handler {
            let log = Arc::clone(&log_for_factory);
            let name = name.to_string();
            Arc::new(move |event: &ChangeEvent| {
                log.lock()
                    .unwrap()
                    .push(format!("{}:{}", name, event.collection));
            })
        };
        (log, factory)
    }

    #[test]
    fn test_publish_reaches_subscriber_once() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::USERS, handler("a"));
        let report = bus.publish(&CollectionKey::USERS, ChangeCause::Delete);

        assert_eq!(report.matched, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["a:users"]);
    }

    #[test]
    fn test_other_keys_not_delivered() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::USERS, handler("a"));
        let report = bus.publish(&CollectionKey::SCHOOLS, ChangeCause::Create);

        assert_eq!(report.matched, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_registration_order() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::CLASSES, handler("first"));
        bus.subscribe(CollectionKey::CLASSES, handler("second"));
        bus.subscribe(CollectionKey::CLASSES, handler("third"));
        bus.publish(&CollectionKey::CLASSES, ChangeCause::Update);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:classes", "second:classes", "third:classes"]
        );
    }

    #[test]
    fn test_wildcard_publish_reaches_every_key() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::USERS, handler("u"));
        bus.subscribe(CollectionKey::SCHOOLS, handler("s"));
        let report = bus.publish(&CollectionKey::ALL, ChangeCause::Refresh);

        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["u:*", "s:*"]);
    }

    #[test]
    fn test_wildcard_subscriber_sees_everything() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::ALL, handler("audit"));
        bus.publish(&CollectionKey::TEACHERS, ChangeCause::Create);

        assert_eq!(*log.lock().unwrap(), vec!["audit:teachers"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        let handle = bus.subscribe(CollectionKey::USERS, handler("a"));
        bus.unsubscribe(&handle);
        bus.unsubscribe(&handle);
        bus.publish(&CollectionKey::USERS, ChangeCause::Delete);

        assert!(bus.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = InvalidationBus::new();
        let (log, handler) = recorder();

        bus.subscribe(CollectionKey::USERS, handler("before"));
        bus.subscribe(
            CollectionKey::USERS,
            Arc::new(|_: &ChangeEvent| panic!("subscriber blew up")),
        );
        bus.subscribe(CollectionKey::USERS, handler("after"));

        let report = bus.publish(&CollectionKey::USERS, ChangeCause::Update);

        assert_eq!(report.matched, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(*log.lock().unwrap(), vec!["before:users", "after:users"]);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself_mid_dispatch() {
        let bus = Arc::new(InvalidationBus::new());
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU64::new(0));

        let handler: Handler = {
            let bus = Arc::clone(&bus);
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            Arc::new(move |_: &ChangeEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot.lock().unwrap().take() {
                    bus.unsubscribe(&handle);
                }
            })
        };
        let handle = bus.subscribe(CollectionKey::SCHOOLS, handler);
        *slot.lock().unwrap() = Some(handle);

        bus.publish(&CollectionKey::SCHOOLS, ChangeCause::Create);
        bus.publish(&CollectionKey::SCHOOLS, ChangeCause::Create);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_subscriber_added_mid_dispatch_waits_for_next_publish() {
        let bus = Arc::new(InvalidationBus::new());
        let (log, handler) = recorder();
        let late = handler("late");

        let adder: Handler = {
            let bus = Arc::clone(&bus);
            let added = Arc::new(Mutex::new(false));
            Arc::new(move |_: &ChangeEvent| {
                let mut added = added.lock().unwrap();
                if !*added {
                    *added = true;
                    bus.subscribe(CollectionKey::USERS, Arc::clone(&late));
                }
            })
        };
        bus.subscribe(CollectionKey::USERS, adder);

        bus.publish(&CollectionKey::USERS, ChangeCause::Create);
        assert!(log.lock().unwrap().is_empty());

        bus.publish(&CollectionKey::USERS, ChangeCause::Create);
        assert_eq!(*log.lock().unwrap(), vec!["late:users"]);
    }

    #[test]
    fn test_clear_and_counts() {
        let bus = InvalidationBus::new();
        let (_log, handler) = recorder();

        bus.subscribe(CollectionKey::USERS, handler("a"));
        bus.subscribe(CollectionKey::USERS, handler("b"));
        bus.subscribe(CollectionKey::CLASSES, handler("c"));
        assert_eq!(bus.subscriber_count(&CollectionKey::USERS), 2);
        assert_eq!(bus.len(), 3);

        bus.clear();
        assert!(bus.is_empty());
    }

    #[test]
    fn test_global_is_a_singleton() {
        let a = InvalidationBus::global();
        let b = InvalidationBus::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
