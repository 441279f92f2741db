//! Application-wide event hub.
//!
//! Components that used to listen for ambient window events register an
//! explicit [`Subscription`] for the topics they care about and drop it (or
//! call [`Subscription::unsubscribe`]) on teardown.

use crate::session::SessionState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Topic a subscriber can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Companies,
    User,
    GoogleAuth,
    InboxBadge,
    Action,
    Navigation,
    Session,
}

/// Icon tag attached to a transient action notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionIcon {
    MapPin,
    Search,
    Activity,
    Wrench,
}

/// Short-lived "the agent is doing X" notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionNotice {
    pub id: u64,
    pub label: String,
    pub icon: ActionIcon,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Company, contact or activity data changed
    CompaniesUpdated,
    /// Published by the host app when the signed-in profile changes
    UserUpdated,
    /// Published by the host app when the Google account link changes
    GoogleAuthChanged,
    /// Published by the host app with the current unread mail count
    InboxBadge { unread: u32 },
    ActionStarted(ActionNotice),
    ActionExpired { id: u64 },
    Navigated { path: String },
    SessionStateChanged(SessionState),
}

impl AppEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::CompaniesUpdated => Topic::Companies,
            Self::UserUpdated => Topic::User,
            Self::GoogleAuthChanged => Topic::GoogleAuth,
            Self::InboxBadge { .. } => Topic::InboxBadge,
            Self::ActionStarted(_) | Self::ActionExpired { .. } => Topic::Action,
            Self::Navigated { .. } => Topic::Navigation,
            Self::SessionStateChanged(_) => Topic::Session,
        }
    }
}

struct Subscriber {
    topics: Vec<Topic>,
    tx: UnboundedSender<AppEvent>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

// A panicking holder cannot leave the subscriber map half-updated
fn lock(inner: &Mutex<HubInner>) -> MutexGuard<'_, HubInner> {
    inner.lock().unwrap_or_else(|poisoned| {
        warn!("Event hub lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Publish/subscribe hub with typed topics
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `topics`; events arrive on the returned subscription.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.insert(
                id,
                Subscriber {
                    topics: topics.to_vec(),
                    tx,
                },
            );
            id
        };
        debug!("Subscriber {} registered for {:?}", id, topics);

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every subscriber of its topic. Returns how many
    /// subscribers received it; subscribers whose receiver is gone are pruned.
    pub fn publish(&self, event: AppEvent) -> usize {
        let topic = event.topic();
        let mut inner = lock(&self.inner);

        let mut delivered = 0;
        inner.subscribers.retain(|_, sub| {
            if !sub.topics.contains(&topic) {
                return true;
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

fn deregister(hub: &Weak<Mutex<HubInner>>, id: u64) {
    if let Some(inner) = hub.upgrade() {
        if lock(&inner).subscribers.remove(&id).is_some() {
            debug!("Subscriber {} deregistered", id);
        }
    }
}

/// Live registration on an [`EventHub`]. Dropping it deregisters.
pub struct Subscription {
    id: u64,
    rx: UnboundedReceiver<AppEvent>,
    hub: Weak<Mutex<HubInner>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AppEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        deregister(&self.hub, self.id);
    }
}
