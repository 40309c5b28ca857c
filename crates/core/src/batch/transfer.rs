//! Transfer strategies

use std::sync::Arc;

use async_trait::async_trait;
use courier_domain::{Request, Response};
use tracing::{debug, warn};

use crate::command::{Command, CommandState};
use crate::errors::{ensure_success, CommandError, TransportError, TransportErrorKind};
use crate::ports::Transport;
use crate::response::CommandResult;

/// Sends one group of items in a single multiplexed operation
#[async_trait]
pub trait BatchTransfer<T: Send>: Send + Sync {
    type Output: Send;
    type Error: Send;

    /// Per-item outcomes in input order
    ///
    /// # Errors
    /// An outer `Err` means the whole group failed and no outcome can be
    /// attributed to a single item.
    async fn transfer(
        &self,
        items: &mut [T],
    ) -> Result<Vec<Result<Self::Output, Self::Error>>, TransportError>;
}

/// Sends raw requests with one `send_batch` call per group
#[derive(Clone)]
pub struct RequestBatchTransfer {
    transport: Arc<dyn Transport>,
}

impl RequestBatchTransfer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for RequestBatchTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBatchTransfer").finish_non_exhaustive()
    }
}

#[async_trait]
impl BatchTransfer<Request> for RequestBatchTransfer {
    type Output = Response;
    type Error = TransportError;

    async fn transfer(
        &self,
        items: &mut [Request],
    ) -> Result<Vec<Result<Response, TransportError>>, TransportError> {
        let outcomes = self.transport.send_batch(items).await?;
        Ok(items
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| {
                outcome
                    .map_err(|error| error.with_request(request.id))
                    .and_then(|response| ensure_success(request, response))
            })
            .collect())
    }
}

/// Prepares and sends commands
///
/// Commands that fail to prepare are per-item failures and are not sent.
/// The rest go out in one `send_batch` call per transport they belong to,
/// then are processed individually, so `command.error` subscribers can
/// still retry them. When a group mixes transports, a failed call only
/// fails the commands that were sent on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBatchTransfer;

#[async_trait]
impl BatchTransfer<Command> for CommandBatchTransfer {
    type Output = CommandResult;
    type Error = CommandError;

    async fn transfer(
        &self,
        commands: &mut [Command],
    ) -> Result<Vec<Result<CommandResult, CommandError>>, TransportError> {
        let mut outcomes: Vec<Option<Result<CommandResult, CommandError>>> =
            commands.iter().map(|_| None).collect();
        let mut pending: Vec<(usize, Request)> = Vec::new();

        for (index, command) in commands.iter_mut().enumerate() {
            if command.state() == CommandState::Processed {
                outcomes[index] = Some(command.result().cloned());
                continue;
            }
            let prepared = command.prepare().cloned();
            match prepared {
                Ok(_) if command.has_short_circuit() => {
                    outcomes[index] = Some(command.execute().await.cloned());
                }
                Ok(request) => pending.push((index, request)),
                Err(error) => outcomes[index] = Some(Err(error)),
            }
        }

        let groups = group_by_transport(commands, pending);
        let single_group = groups.len() == 1;
        for (indices, requests) in groups {
            let transport = Arc::clone(commands[indices[0]].context_transport());
            debug!(commands = requests.len(), "sending command batch");
            let sent = match transport.send_batch(&requests).await {
                Ok(sent) => sent,
                Err(error) if single_group => return Err(error),
                Err(error) => {
                    warn!(commands = requests.len(), error = %error, "command batch failed on one transport");
                    for index in indices {
                        outcomes[index] = Some(commands[index].complete(Err(error.clone())).await.cloned());
                    }
                    continue;
                }
            };
            let mut sent = sent.into_iter();
            for index in indices {
                let outcome = sent.next().unwrap_or_else(|| {
                    Err(TransportError::new(TransportErrorKind::Other, "transport returned too few results"))
                });
                outcomes[index] = Some(commands[index].complete(outcome).await.cloned());
            }
        }

        Ok(outcomes
            .into_iter()
            .zip(commands.iter())
            .map(|(outcome, command)| {
                outcome.unwrap_or_else(|| {
                    Err(CommandError::Transport {
                        operation: command.name().to_string(),
                        source: TransportError::new(TransportErrorKind::Other, "command was not transferred"),
                    })
                })
            })
            .collect())
    }
}

/// Split prepared commands by the transport they go out on, keeping queue
/// order inside each part
fn group_by_transport(commands: &[Command], pending: Vec<(usize, Request)>) -> Vec<(Vec<usize>, Vec<Request>)> {
    let mut groups: Vec<(Vec<usize>, Vec<Request>)> = Vec::new();
    for (index, request) in pending {
        let slot = groups.iter().position(|(indices, _)| commands[indices[0]].shares_transport(&commands[index]));
        match slot {
            Some(slot) => {
                groups[slot].0.push(index);
                groups[slot].1.push(request);
            }
            None => groups.push((vec![index], vec![request])),
        }
    }
    groups
}
