//! Command lifecycle events

use std::sync::Arc;
use std::time::Duration;

use courier_domain::{OperationDescription, Request, Response};

use super::{Event, EventMediator, ListenerId};
use crate::errors::TransportError;

pub const COMMAND_PREPARE: &str = "command.prepare";
pub const COMMAND_PROCESS: &str = "command.process";
pub const COMMAND_ERROR: &str = "command.error";

/// How a `command.error` subscriber resolved a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorResolution {
    /// Send the same request again after a delay
    Retry { after: Duration },
    /// Use this response as if the server had sent it
    Respond(Response),
}

/// Events published by a command on its client's mediator
///
/// Events own the request while they are dispatched; the command takes it
/// back afterwards, keeping any changes subscribers made.
#[derive(Debug)]
pub enum CommandEvent {
    /// The request was built. Subscribers may modify it, or set `response`
    /// to answer the command without touching the transport.
    Prepare {
        operation: Arc<OperationDescription>,
        request: Request,
        response: Option<Response>,
    },
    /// A response was received and is about to be mapped
    Process {
        operation: Arc<OperationDescription>,
        request: Request,
        response: Response,
        elapsed: Duration,
    },
    /// Sending failed. `attempt` counts sends so far, starting at 1.
    Error {
        operation: Arc<OperationDescription>,
        request: Request,
        error: TransportError,
        attempt: u32,
        resolution: Option<ErrorResolution>,
    },
}

impl Event for CommandEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Prepare { .. } => COMMAND_PREPARE,
            Self::Process { .. } => COMMAND_PROCESS,
            Self::Error { .. } => COMMAND_ERROR,
        }
    }
}

impl CommandEvent {
    pub fn operation(&self) -> &OperationDescription {
        match self {
            Self::Prepare { operation, .. }
            | Self::Process { operation, .. }
            | Self::Error { operation, .. } => operation,
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            Self::Prepare { request, .. }
            | Self::Process { request, .. }
            | Self::Error { request, .. } => request,
        }
    }

    pub fn request_mut(&mut self) -> &mut Request {
        match self {
            Self::Prepare { request, .. }
            | Self::Process { request, .. }
            | Self::Error { request, .. } => request,
        }
    }

    pub fn into_request(self) -> Request {
        match self {
            Self::Prepare { request, .. }
            | Self::Process { request, .. }
            | Self::Error { request, .. } => request,
        }
    }
}

/// A plugin that attaches handlers to a client's command events
pub trait CommandSubscriber: Send + Sync {
    /// Subscribe to `events`, returning every listener added so the caller
    /// can detach them later
    fn attach(self: Arc<Self>, events: &Arc<EventMediator<CommandEvent>>) -> Vec<ListenerId>;
}
