//! Canned responses

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use courier_domain::{Request, Response};
use parking_lot::Mutex;
use tracing::debug;

use crate::events::{CommandEvent, CommandSubscriber, EventMediator, ListenerId, Propagation, COMMAND_PREPARE};

/// Serves before any other `command.prepare` subscriber
const PRIORITY: i32 = 255;

/// Answers commands from a FIFO of responses without touching the transport
///
/// Served responses get the same status handling as real ones: a non-2xx
/// response fails the command and reaches `command.error` subscribers. A
/// temporary mock detaches itself once it has served its last response.
#[derive(Debug, Default)]
pub struct MockPlugin {
    queue: Mutex<VecDeque<Response>>,
    received: Mutex<Vec<Request>>,
    temporary: bool,
    attachment: Mutex<Option<(Weak<EventMediator<CommandEvent>>, ListenerId)>>,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_responses(responses: impl IntoIterator<Item = Response>) -> Self {
        Self { queue: Mutex::new(responses.into_iter().collect()), ..Self::default() }
    }

    #[must_use]
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn add_response(&self, response: Response) -> &Self {
        self.queue.lock().push_back(response);
        self
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Requests the mock has answered, in order
    pub fn received_requests(&self) -> Vec<Request> {
        self.received.lock().clone()
    }

    fn serve(&self, event: &mut CommandEvent) -> Propagation {
        let CommandEvent::Prepare { request, response, .. } = event else {
            return Propagation::Continue;
        };
        if response.is_some() {
            return Propagation::Continue;
        }

        let (next, drained) = {
            let mut queue = self.queue.lock();
            let next = queue.pop_front();
            (next, queue.is_empty())
        };
        let Some(next) = next else {
            return Propagation::Continue;
        };

        debug!(request_id = %request.id, status = next.status, "serving mock response");
        self.received.lock().push(request.clone());
        *response = Some(next);

        if drained && self.temporary {
            self.detach();
        }
        Propagation::Handled
    }

    fn detach(&self) {
        if let Some((events, id)) = self.attachment.lock().take() {
            if let Some(events) = events.upgrade() {
                events.unsubscribe(COMMAND_PREPARE, id);
                debug!("temporary mock drained and detached");
            }
        }
    }
}

impl CommandSubscriber for MockPlugin {
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId> {
        let plugin = Arc::clone(&self);
        let id = events.subscribe(
            COMMAND_PREPARE,
            move |event: &mut CommandEvent| Ok(plugin.serve(event)),
            PRIORITY,
        );
        *self.attachment.lock() = Some((Arc::downgrade(events), id));
        vec![id]
    }
}
