//! Named-event listener registry.
//!
//! [`EventBus`] keeps an ordered listener list per event name. Dispatch
//! works on a snapshot of that list, so callbacks may freely add or remove
//! listeners (including themselves) while an event is being delivered.
//!
//! # Failure isolation
//!
//! None. A panicking callback unwinds out of [`EventBus::dispatch`] and
//! the remaining callbacks of that dispatch do not run. When the bus is
//! fed by the connection pump, such a panic also ends the pump, so
//! callbacks reacting to network input must not panic.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Shared callback invoked with the event payload.
///
/// Listeners are removed by pointer identity of this `Arc`.
pub type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Wraps a closure into a [`Callback`].
pub fn callback<P, F>(f: F) -> Callback<P>
where
    F: Fn(&P) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Unique identifier of a single listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the listener after its first invocation.
    pub once: bool,
}

impl ListenerOptions {
    /// Options for a listener that fires at most once.
    #[must_use]
    pub const fn once() -> Self {
        Self { once: true }
    }
}

struct Listener<P> {
    id: ListenerId,
    callback: Callback<P>,
    once: bool,
}

impl<P> Clone for Listener<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            once: self.once,
        }
    }
}

/// Registry of named-event listeners with payload type `P`.
///
/// Cloning yields another handle to the same registry.
pub struct EventBus<P> {
    listeners: Arc<Mutex<HashMap<String, Vec<Listener<P>>>>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.lock();
        let mut counts: Vec<(&str, usize)> =
            map.iter().map(|(name, list)| (name.as_str(), list.len())).collect();
        counts.sort_unstable();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl<P> EventBus<P> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus with an empty listener bucket for each name.
    #[must_use]
    pub fn with_events(names: &[&str]) -> Self {
        let bus = Self::new();
        {
            let mut map = bus.lock();
            for name in names {
                map.entry((*name).to_string()).or_default();
            }
        }
        bus
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener<P>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a listener for `event`, creating the bucket if needed.
    pub fn add_listener(&self, event: &str, callback: Callback<P>, options: ListenerOptions) -> ListenerId {
        let id = ListenerId::new();
        self.lock().entry(event.to_string()).or_default().push(Listener {
            id,
            callback,
            once: options.once,
        });
        id
    }

    /// Removes every registration of `callback` for `event`.
    ///
    /// Returns the number of registrations removed. The bucket itself is
    /// kept, so the event stays known.
    pub fn remove_listener(&self, event: &str, callback: &Callback<P>) -> usize {
        let mut map = self.lock();
        let Some(list) = map.get_mut(event) else {
            return 0;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(&l.callback, callback));
        before - list.len()
    }

    /// Removes a single registration by id.
    pub fn remove_by_id(&self, event: &str, id: ListenerId) -> bool {
        let mut map = self.lock();
        let Some(list) = map.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        before != list.len()
    }

    /// Delivers `payload` to every listener of `event`, in registration
    /// order.
    ///
    /// The listener list is snapshotted first; listeners added during
    /// delivery are not called for this event. Once-listeners from the
    /// snapshot are removed after all callbacks ran. Returns the number of
    /// callbacks invoked.
    pub fn dispatch(&self, event: &str, payload: &P) -> usize {
        let snapshot: Vec<Listener<P>> = match self.lock().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        for listener in &snapshot {
            (listener.callback)(payload);
        }

        let spent: Vec<ListenerId> = snapshot.iter().filter(|l| l.once).map(|l| l.id).collect();
        if !spent.is_empty()
            && let Some(list) = self.lock().get_mut(event)
        {
            list.retain(|l| !spent.contains(&l.id));
        }

        snapshot.len()
    }

    /// Returns `true` if a listener bucket exists for `event`.
    #[must_use]
    pub fn has_event(&self, event: &str) -> bool {
        self.lock().contains_key(event)
    }

    /// Returns the number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }
}
