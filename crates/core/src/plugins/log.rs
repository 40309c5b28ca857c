//! Structured command logging

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::events::{
    CommandEvent, CommandSubscriber, EventMediator, ListenerId, Propagation, COMMAND_ERROR, COMMAND_PREPARE,
    COMMAND_PROCESS,
};

/// Runs after every other `command.prepare` subscriber so the logged
/// request is the one that goes out
const PRIORITY: i32 = -255;

/// Emits one tracing event per command lifecycle event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlugin {
    bodies: bool,
}

impl LogPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log request and response bodies, at trace level
    #[must_use]
    pub fn with_bodies(mut self) -> Self {
        self.bodies = true;
        self
    }

    fn log(&self, event: &CommandEvent) {
        let operation = &event.operation().name;
        let request = event.request();
        match event {
            CommandEvent::Prepare { response, .. } => {
                debug!(
                    %operation,
                    request_id = %request.id,
                    method = %request.method,
                    url = %request.full_url(),
                    short_circuit = response.is_some(),
                    "command prepared"
                );
                if self.bodies {
                    if let Some(body) = &request.body {
                        trace!(request_id = %request.id, body = %body.text(), "request body");
                    }
                }
            }
            CommandEvent::Process { response, elapsed, .. } => {
                info!(
                    %operation,
                    request_id = %request.id,
                    method = %request.method,
                    url = %request.full_url(),
                    status = response.status,
                    elapsed = ?elapsed,
                    "command completed"
                );
                if self.bodies {
                    trace!(request_id = %request.id, body = %response.text(), "response body");
                }
            }
            CommandEvent::Error { error, attempt, .. } => {
                warn!(
                    %operation,
                    request_id = %request.id,
                    method = %request.method,
                    url = %request.full_url(),
                    status = ?error.status,
                    kind = %error.kind,
                    attempt,
                    error = %error.message,
                    "command failed"
                );
            }
        }
    }
}

impl CommandSubscriber for LogPlugin {
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId> {
        [COMMAND_PREPARE, COMMAND_PROCESS, COMMAND_ERROR]
            .into_iter()
            .map(|name| {
                let plugin = Arc::clone(&self);
                events.subscribe(
                    name,
                    move |event: &mut CommandEvent| {
                        plugin.log(event);
                        Ok(Propagation::Continue)
                    },
                    PRIORITY,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_to_every_command_event() {
        let events = Arc::new(EventMediator::new());
        let ids = Arc::new(LogPlugin::new().with_bodies()).attach(&events);

        assert_eq!(ids.len(), 3);
        for name in [COMMAND_PREPARE, COMMAND_PROCESS, COMMAND_ERROR] {
            assert_eq!(events.listener_count(name), 1);
        }
    }
}
