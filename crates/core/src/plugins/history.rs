//! Transaction history

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_domain::constants::DEFAULT_HISTORY_LIMIT;
use courier_domain::{Request, Response};
use parking_lot::Mutex;

use crate::events::{
    CommandEvent, CommandSubscriber, EventMediator, ListenerId, Propagation, COMMAND_ERROR, COMMAND_PROCESS,
};

/// One recorded exchange
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub operation: String,
    pub request: Request,
    /// `None` when the exchange failed without a response
    pub response: Option<Response>,
    pub error: Option<String>,
    pub elapsed: Option<Duration>,
    pub recorded_at: DateTime<Utc>,
}

/// Keeps the last `limit` request/response pairs
#[derive(Debug)]
pub struct HistoryPlugin {
    limit: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl HistoryPlugin {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { limit, entries: Mutex::new(VecDeque::with_capacity(limit)) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<HistoryEntry> {
        self.entries.lock().back().cloned()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.entries.lock().back().map(|entry| entry.request.clone())
    }

    pub fn last_response(&self) -> Option<Response> {
        self.entries.lock().back().and_then(|entry| entry.response.clone())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, event: &CommandEvent) {
        let (response, error, elapsed) = match event {
            CommandEvent::Process { response, elapsed, .. } => (Some(response.clone()), None, Some(*elapsed)),
            CommandEvent::Error { error, .. } => (error.response().cloned(), Some(error.to_string()), None),
            CommandEvent::Prepare { .. } => return,
        };
        let entry = HistoryEntry {
            operation: event.operation().name.clone(),
            request: event.request().clone(),
            response,
            error,
            elapsed,
            recorded_at: Utc::now(),
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.limit {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

impl Default for HistoryPlugin {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl CommandSubscriber for HistoryPlugin {
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId> {
        [COMMAND_PROCESS, COMMAND_ERROR]
            .into_iter()
            .map(|name| {
                let plugin = Arc::clone(&self);
                events.subscribe(
                    name,
                    move |event: &mut CommandEvent| {
                        plugin.record(event);
                        Ok(Propagation::Continue)
                    },
                    0,
                )
            })
            .collect()
    }
}
