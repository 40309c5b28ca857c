//! Static header authentication

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use courier_domain::Headers;

use crate::events::{CommandEvent, CommandSubscriber, EventMediator, ListenerId, Propagation, COMMAND_PREPARE};

/// Sets fixed headers on every prepared request
#[derive(Debug, Clone, Default)]
pub struct HeaderAuthPlugin {
    headers: Headers,
}

impl HeaderAuthPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::new().with_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// `Authorization: Basic base64(user:password)`
    pub fn basic(username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let credentials = STANDARD.encode(format!("{}:{}", username.as_ref(), password.as_ref()));
        Self::new().with_header("Authorization", format!("Basic {credentials}"))
    }

    /// A key sent in a header of its own, e.g. `X-Api-Key`
    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new().with_header(header, key)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

impl CommandSubscriber for HeaderAuthPlugin {
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId> {
        let id = events.subscribe(
            COMMAND_PREPARE,
            move |event: &mut CommandEvent| {
                let request = event.request_mut();
                for (name, value) in self.headers.iter() {
                    request.headers.set(name, value);
                }
                Ok(Propagation::Continue)
            },
            0,
        );
        vec![id]
    }
}
