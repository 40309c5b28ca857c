//! Event mediator
//!
//! A typed publish/subscribe bus. Each subject (a client, a request pool)
//! owns one [`EventMediator`] over its own event type; subscribers attach
//! handlers to event names with a priority.
//!
//! Dispatch rules:
//! - handlers run by descending priority, ties in subscription order
//! - dispatch iterates a snapshot taken at publish time, so a handler may
//!   subscribe or unsubscribe (itself included) without disturbing the
//!   running dispatch
//! - the first handler error aborts the dispatch and is returned to the
//!   publisher

pub mod command;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

pub use command::{
    CommandEvent, CommandSubscriber, ErrorResolution, COMMAND_ERROR, COMMAND_PREPARE,
    COMMAND_PROCESS,
};

use crate::errors::EventError;

/// An event that can be published on a mediator
pub trait Event: Send {
    /// Name subscribers attach to
    fn name(&self) -> &'static str;
}

/// Whether a handler considers the event dealt with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Handled,
}

/// Handles events of type `E`
///
/// Implemented for every `Fn(&mut E) -> Result<Propagation, EventError>`.
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, event: &mut E) -> Result<Propagation, EventError>;
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&mut E) -> Result<Propagation, EventError> + Send + Sync,
{
    fn handle(&self, event: &mut E) -> Result<Propagation, EventError> {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to detach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener<E> {
    id: ListenerId,
    priority: i32,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self { id: self.id, priority: self.priority, handler: Arc::clone(&self.handler) }
    }
}

/// Result of a dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that ran
    pub invoked: usize,
    /// Whether any handler returned `Handled`
    pub handled: bool,
}

/// Publish/subscribe bus over events of type `E`
pub struct EventMediator<E> {
    listeners: RwLock<HashMap<&'static str, Vec<Listener<E>>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventMediator<E> {
    pub fn new() -> Self {
        Self { listeners: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Attach a closure to `event`
    pub fn subscribe<F>(&self, event: &'static str, handler: F, priority: i32) -> ListenerId
    where
        F: Fn(&mut E) -> Result<Propagation, EventError> + Send + Sync + 'static,
    {
        self.subscribe_handler(event, Arc::new(handler), priority)
    }

    /// Attach a shared handler to `event`
    pub fn subscribe_handler(
        &self,
        event: &'static str,
        handler: Arc<dyn EventHandler<E>>,
        priority: i32,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.write();
        let list = listeners.entry(event).or_default();
        let position = list.iter().position(|l| l.priority < priority).unwrap_or(list.len());
        list.insert(position, Listener { id, priority, handler });
        id
    }

    /// Detach one listener from `event`
    pub fn unsubscribe(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        before != list.len()
    }

    /// Detach a listener from every event it is attached to
    pub fn unsubscribe_all(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for list in self.listeners.write().values_mut() {
            let before = list.len();
            list.retain(|l| l.id != id);
            removed |= before != list.len();
        }
        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.read().get(event).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    fn snapshot(&self, event: &str) -> Vec<Listener<E>> {
        self.listeners.read().get(event).cloned().unwrap_or_default()
    }

    /// Run every handler attached to the event's name
    ///
    /// # Errors
    /// The first handler error; later handlers do not run.
    pub fn publish(&self, event: &mut E) -> Result<DispatchOutcome, EventError> {
        self.dispatch(event, false)
    }

    /// Run handlers until one returns `Handled`
    ///
    /// # Errors
    /// The first handler error; later handlers do not run.
    pub fn publish_until_handled(&self, event: &mut E) -> Result<DispatchOutcome, EventError> {
        self.dispatch(event, true)
    }

    fn dispatch(&self, event: &mut E, stop_when_handled: bool) -> Result<DispatchOutcome, EventError> {
        let name = event.name();
        let mut outcome = DispatchOutcome::default();
        for listener in self.snapshot(name) {
            outcome.invoked += 1;
            match listener.handler.handle(event) {
                Ok(Propagation::Continue) => {}
                Ok(Propagation::Handled) => {
                    outcome.handled = true;
                    if stop_when_handled {
                        break;
                    }
                }
                Err(error) => return Err(error.in_event(name)),
            }
        }
        Ok(outcome)
    }
}

impl<E: Event> Default for EventMediator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventMediator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> =
            self.listeners.read().iter().map(|(name, list)| (*name, list.len())).collect();
        f.debug_struct("EventMediator").field("listeners", &counts).finish()
    }
}
