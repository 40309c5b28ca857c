//! Commands
//!
//! A [`Command`] binds one operation to its own arguments and walks a fixed
//! lifecycle:
//!
//! ```text
//! Unprepared --prepare--> Prepared --execute--> Sent --> Processed
//!                                                 \----> Errored
//! ```
//!
//! `prepare` validates and builds the request exactly once; after that the
//! arguments are frozen so retries send the same request. `execute` sends it
//! through the client's transport, lets `command.error` subscribers retry or
//! answer a failure, and maps the response into a [`CommandResult`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_domain::{impl_domain_status_conversions, Headers, OperationDescription, Request, Response};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::description::OperationCatalog;
use crate::errors::{ensure_success, CommandError, EventError, ResponseError, TransportError};
use crate::events::{CommandEvent, ErrorResolution, EventMediator};
use crate::parameters::{FilterRegistry, ParameterBag};
use crate::ports::Transport;
use crate::request::RequestBuilder;
use crate::response::{CommandResult, ResponseParser};

/// Lifecycle state of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandState {
    Unprepared,
    Prepared,
    Sent,
    Processed,
    Errored,
}

impl_domain_status_conversions!(CommandState {
    Unprepared => "unprepared",
    Prepared => "prepared",
    Sent => "sent",
    Processed => "processed",
    Errored => "errored",
});

/// Everything a command needs from the client that created it
pub struct CommandContext {
    pub(crate) catalog: Arc<OperationCatalog>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: Arc<EventMediator<CommandEvent>>,
    pub(crate) filters: FilterRegistry,
    pub(crate) builder: RequestBuilder,
    pub(crate) parser: ResponseParser,
    pub(crate) base_url: Option<Url>,
}

impl CommandContext {
    pub(crate) fn new(
        catalog: Arc<OperationCatalog>,
        transport: Arc<dyn Transport>,
        events: Arc<EventMediator<CommandEvent>>,
        filters: FilterRegistry,
        builder: RequestBuilder,
    ) -> Self {
        // the catalog rejects unparsable base URLs
        let base_url = catalog.base_url().and_then(|url| Url::parse(url).ok());
        let parser = ResponseParser::new(filters.clone());
        Self { catalog, transport, events, filters, builder, parser, base_url }
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn events(&self) -> &Arc<EventMediator<CommandEvent>> {
        &self.events
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("catalog", &self.catalog.name())
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

type CompletionHook = Box<dyn FnOnce(&CommandResult) + Send>;

/// A bound, parameterized operation
pub struct Command {
    operation: Arc<OperationDescription>,
    parameters: ParameterBag,
    context: Arc<CommandContext>,
    state: CommandState,
    headers: Headers,
    request: Option<Request>,
    response: Option<Response>,
    result: Option<CommandResult>,
    /// Response supplied by a `command.prepare` subscriber
    short_circuit: Option<Response>,
    on_complete: Option<CompletionHook>,
    attempts: u32,
}

impl Command {
    /// Bind `operation` to `parameters`, filling declared defaults
    pub fn new(
        operation: Arc<OperationDescription>,
        mut parameters: ParameterBag,
        context: Arc<CommandContext>,
    ) -> Self {
        parameters.apply_defaults(&operation);
        Self {
            operation,
            parameters,
            context,
            state: CommandState::Unprepared,
            headers: Headers::new(),
            request: None,
            response: None,
            result: None,
            short_circuit: None,
            on_complete: None,
            attempts: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.operation.name
    }

    pub fn operation(&self) -> &Arc<OperationDescription> {
        &self.operation
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn parameters(&self) -> &ParameterBag {
        &self.parameters
    }

    /// Arguments, writable until the command is prepared
    pub fn parameters_mut(&mut self) -> &mut ParameterBag {
        &mut self.parameters
    }

    /// Extra header merged over the built request
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Run `hook` once, after the response has been mapped
    #[must_use]
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&CommandResult) + Send + 'static,
    {
        self.on_complete = Some(Box::new(hook));
        self
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Sends made so far, retries included
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_prepared(&self) -> bool {
        self.state != CommandState::Unprepared
    }

    /// Key of the connection the command will use: the transport it goes
    /// out on plus the origin it targets
    pub fn affinity_key(&self) -> String {
        let origin = match &self.request {
            Some(request) => request.origin_key(),
            None => self
                .context
                .base_url
                .as_ref()
                .map_or_else(|| self.operation.uri.clone(), |url| url.origin().ascii_serialization()),
        };
        format!("{:p}|{origin}", Arc::as_ptr(&self.context.transport).cast::<()>())
    }

    /// Whether `other` goes out on the same transport instance
    pub(crate) fn shares_transport(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.context.transport, &other.context.transport)
    }

    /// Validate the arguments and build the request
    ///
    /// Only the first successful call does any work; later calls return the
    /// cached request without re-running filters or re-publishing
    /// `command.prepare`.
    ///
    /// # Errors
    /// - `Validation` with every argument problem found
    /// - `Build` when the request cannot be constructed
    /// - `Event` when a `command.prepare` subscriber fails
    pub fn prepare(&mut self) -> Result<&Request, CommandError> {
        if self.request.is_none() {
            let request = self.build_request()?;
            self.publish_prepare(request)?;
            self.parameters.freeze();
            self.state = CommandState::Prepared;
        }
        self.request.as_ref().ok_or_else(|| self.invalid_state("prepare", CommandState::Prepared))
    }

    fn build_request(&self) -> Result<Request, CommandError> {
        let validated = self.parameters.validate(&self.operation, &self.context.filters).map_err(|errors| {
            CommandError::Validation { operation: self.operation.name.clone(), errors }
        })?;

        let mut request = self.context.builder.build(&self.operation, &validated, self.context.base_url.as_ref())?;
        for (name, value) in self.headers.iter() {
            request.headers.set(name, value);
        }
        Ok(request)
    }

    fn publish_prepare(&mut self, request: Request) -> Result<(), CommandError> {
        let mut event =
            CommandEvent::Prepare { operation: Arc::clone(&self.operation), request, response: None };
        self.context.events.publish(&mut event)?;

        if let CommandEvent::Prepare { response, .. } = &mut event {
            self.short_circuit = response.take();
        }
        self.request = Some(event.into_request());
        Ok(())
    }

    /// Send the request and map the response
    ///
    /// Prepares first when needed. A processed command returns its cached
    /// result without sending again.
    ///
    /// # Errors
    /// - anything `prepare` returns
    /// - `Transport` when sending failed and no subscriber resolved it
    /// - `Response` when the response does not fit the declared model
    /// - `Event` when a subscriber fails
    /// - `InvalidState` for a command that already errored
    #[instrument(skip(self), fields(operation = %self.operation.name))]
    pub async fn execute(&mut self) -> Result<&CommandResult, CommandError> {
        match self.state {
            CommandState::Processed => return self.result(),
            CommandState::Sent | CommandState::Errored => {
                return Err(self.invalid_state("execute", CommandState::Prepared));
            }
            CommandState::Unprepared => {
                self.prepare()?;
            }
            CommandState::Prepared => {}
        }
        self.run(None).await
    }

    /// Finish a prepared command with an outcome obtained elsewhere, such as
    /// a batched send. Failures still go through `command.error`.
    pub(crate) async fn complete(
        &mut self,
        outcome: Result<Response, TransportError>,
    ) -> Result<&CommandResult, CommandError> {
        if self.state != CommandState::Prepared {
            return Err(self.invalid_state("complete", CommandState::Prepared));
        }
        self.run(Some(outcome)).await
    }

    pub(crate) fn context_transport(&self) -> &Arc<dyn Transport> {
        &self.context.transport
    }

    /// Whether a `command.prepare` subscriber already supplied the response
    pub(crate) fn has_short_circuit(&self) -> bool {
        self.short_circuit.is_some()
    }

    async fn run(
        &mut self,
        first: Option<Result<Response, TransportError>>,
    ) -> Result<&CommandResult, CommandError> {
        let (response, elapsed) = match self.send_until_resolved(first).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.state = CommandState::Errored;
                return Err(error);
            }
        };
        self.state = CommandState::Sent;

        if let Err(error) = self.process(response, elapsed) {
            self.state = CommandState::Errored;
            return Err(error);
        }
        self.state = CommandState::Processed;

        if let (Some(hook), Some(result)) = (self.on_complete.take(), self.result.as_ref()) {
            hook(result);
        }
        self.result()
    }

    async fn send_until_resolved(
        &mut self,
        mut first: Option<Result<Response, TransportError>>,
    ) -> Result<(Response, Duration), CommandError> {
        let transport = Arc::clone(&self.context.transport);
        loop {
            let started = Instant::now();
            let outcome = match (self.short_circuit.take(), first.take(), self.request.as_ref()) {
                (Some(response), _, Some(request)) => ensure_success(request, response),
                (None, Some(outcome), Some(request)) => {
                    self.attempts += 1;
                    outcome
                        .map_err(|error| error.with_request(request.id))
                        .and_then(|response| ensure_success(request, response))
                }
                (None, None, Some(request)) => {
                    self.attempts += 1;
                    match transport.send(request).await {
                        Ok(response) => ensure_success(request, response),
                        Err(error) => Err(error.with_request(request.id)),
                    }
                }
                (_, _, None) => return Err(self.invalid_state("execute", CommandState::Prepared)),
            };

            match outcome {
                Ok(response) => return Ok((response, started.elapsed())),
                Err(error) => match self.publish_error(error)? {
                    Ok(ErrorResolution::Retry { after }) => {
                        debug!(attempt = self.attempts, delay = ?after, "retrying command");
                        tokio::time::sleep(after).await;
                    }
                    Ok(ErrorResolution::Respond(response)) => return Ok((response, started.elapsed())),
                    Err(error) => {
                        return Err(CommandError::Transport { operation: self.operation.name.clone(), source: error });
                    }
                },
            }
        }
    }

    /// Publish `command.error`; the inner result is the resolution, or the
    /// original error when nobody resolved it
    fn publish_error(
        &mut self,
        error: TransportError,
    ) -> Result<Result<ErrorResolution, TransportError>, EventError> {
        let Some(request) = self.request.take() else {
            return Ok(Err(error));
        };
        warn!(attempt = self.attempts, error = %error, "command failed");

        let mut event = CommandEvent::Error {
            operation: Arc::clone(&self.operation),
            request,
            error: error.clone(),
            attempt: self.attempts,
            resolution: None,
        };
        let published = self.context.events.publish(&mut event);

        let resolution = match &mut event {
            CommandEvent::Error { resolution, .. } => resolution.take(),
            _ => None,
        };
        self.request = Some(event.into_request());
        published?;

        Ok(resolution.ok_or(error))
    }

    fn process(&mut self, response: Response, elapsed: Duration) -> Result<(), CommandError> {
        let Some(request) = self.request.take() else {
            return Err(self.invalid_state("process", CommandState::Sent));
        };

        let mut event = CommandEvent::Process { operation: Arc::clone(&self.operation), request, response, elapsed };
        let published = self.context.events.publish(&mut event);
        let (request, response) = match event {
            CommandEvent::Process { request, response, .. } => (request, Some(response)),
            other => (other.into_request(), None),
        };
        self.request = Some(request);
        self.response = response;
        published?;

        let model = match &self.operation.response_model {
            Some(name) => Some(
                self.context
                    .catalog
                    .model(name)
                    .ok_or_else(|| ResponseError::UnknownModel(name.clone()))?,
            ),
            None => None,
        };
        let response = self.response.as_ref().ok_or_else(|| self.invalid_state("process", CommandState::Sent))?;
        let result = self.context.parser.parse(&self.operation, model, response)?;
        self.result = Some(result);
        Ok(())
    }

    /// The mapped result
    ///
    /// # Errors
    /// `InvalidState` unless the command has been processed.
    pub fn result(&self) -> Result<&CommandResult, CommandError> {
        match (&self.result, self.state) {
            (Some(result), CommandState::Processed) => Ok(result),
            _ => Err(self.invalid_state("result", CommandState::Processed)),
        }
    }

    /// Move the mapped result out of a processed command
    ///
    /// # Errors
    /// `InvalidState` unless the command has been processed.
    pub fn into_result(self) -> Result<CommandResult, CommandError> {
        if self.state != CommandState::Processed {
            return Err(self.invalid_state("result", CommandState::Processed));
        }
        let invalid = self.invalid_state("result", CommandState::Processed);
        self.result.ok_or(invalid)
    }

    fn invalid_state(&self, action: &'static str, expected: CommandState) -> CommandError {
        CommandError::InvalidState {
            operation: self.operation.name.clone(),
            state: self.state,
            action,
            expected,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("operation", &self.operation.name)
            .field("state", &self.state)
            .field("parameters", &self.parameters)
            .field("attempts", &self.attempts)
            .field("request", &self.request.as_ref().map(|r| r.id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_domain::{HttpMethod, Location, ParamType, ParameterSpec, ServiceDescription};
    use serde_json::json;

    use super::*;
    use crate::events::{Propagation, COMMAND_ERROR, COMMAND_PREPARE};
    use crate::testing::MockTransport;

    fn context(transport: Arc<MockTransport>) -> Arc<CommandContext> {
        let catalog = OperationCatalog::new(ServiceDescription {
            name: "people".into(),
            base_url: Some("https://api.example.com/v1".into()),
            operations: vec![OperationDescription::new("GetPerson", HttpMethod::Get, "people").with_parameter(
                ParameterSpec::new("id")
                    .with_location(Location::Query)
                    .sent_as("people")
                    .with_type(ParamType::Integer)
                    .required(),
            )],
            models: Vec::new(),
        })
        .unwrap();
        Arc::new(CommandContext::new(
            Arc::new(catalog),
            transport,
            Arc::new(EventMediator::new()),
            FilterRegistry::new(),
            RequestBuilder::new(),
        ))
    }

    fn command(context: &Arc<CommandContext>, args: ParameterBag) -> Command {
        let operation = context.catalog.get_operation("GetPerson").unwrap();
        Command::new(operation, args, Arc::clone(context))
    }

    #[test]
    fn state_names_round_trip() {
        assert_eq!(CommandState::Errored.to_string(), "errored");
        assert_eq!("Processed".parse::<CommandState>(), Ok(CommandState::Processed));
    }

    #[test]
    fn result_before_processing_is_a_usage_error() {
        let transport = Arc::new(MockTransport::new());
        let ctx = context(Arc::clone(&transport));
        let cmd = command(&ctx, ParameterBag::new().with("id", 1));

        let err = cmd.result().unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidState { state: CommandState::Unprepared, expected: CommandState::Processed, .. }
        ));
    }

    #[tokio::test]
    async fn execute_maps_response_and_runs_completion_once() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::from_json(200, &json!({"name": "Bob"})));
        let ctx = context(Arc::clone(&transport));

        let completions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completions);
        let mut cmd = command(&ctx, ParameterBag::new().with("id", 42)).on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = cmd.execute().await.unwrap().clone();
        assert_eq!(result.get("name"), Some(&json!("Bob")));
        assert_eq!(cmd.state(), CommandState::Processed);

        // a processed command does not send again
        cmd.execute().await.unwrap();
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(cmd.response().map(|r| r.status), Some(200));
    }

    #[tokio::test]
    async fn prepare_subscribers_can_modify_the_request() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::new(204));
        let ctx = context(Arc::clone(&transport));
        ctx.events.subscribe(
            COMMAND_PREPARE,
            |event: &mut CommandEvent| {
                event.request_mut().headers.set("X-Signed", "yes");
                Ok(Propagation::Continue)
            },
            0,
        );

        let mut cmd = command(&ctx, ParameterBag::new().with("id", 1)).with_header("X-Trace", "t1");
        cmd.execute().await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].headers.get("x-signed"), Some("yes"));
        assert_eq!(sent[0].headers.get("x-trace"), Some("t1"));
    }

    #[tokio::test]
    async fn unresolved_status_error_marks_command_errored() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::new(404).with_reason("Not Found"));
        let ctx = context(Arc::clone(&transport));

        let mut cmd = command(&ctx, ParameterBag::new().with("id", 1));
        let err = cmd.execute().await.unwrap_err();

        let source = err.transport_error().unwrap();
        assert_eq!(source.status, Some(404));
        assert_eq!(cmd.state(), CommandState::Errored);
        assert!(cmd.request().is_some());

        let again = cmd.execute().await.unwrap_err();
        assert!(matches!(again, CommandError::InvalidState { state: CommandState::Errored, .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_subscribers_can_retry_or_respond() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::new(503));
        transport.push_response(Response::new(503));
        let ctx = context(Arc::clone(&transport));
        ctx.events.subscribe(
            COMMAND_ERROR,
            |event: &mut CommandEvent| {
                if let CommandEvent::Error { attempt, resolution, .. } = event {
                    *resolution = Some(if *attempt == 1 {
                        ErrorResolution::Retry { after: Duration::from_secs(2) }
                    } else {
                        ErrorResolution::Respond(Response::from_json(200, &json!({"cached": true})))
                    });
                }
                Ok(Propagation::Handled)
            },
            0,
        );

        let mut cmd = command(&ctx, ParameterBag::new().with("id", 1));
        let result = cmd.execute().await.unwrap();

        assert_eq!(result.get("cached"), Some(&json!(true)));
        assert_eq!(cmd.attempts(), 2);

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].id, sent[1].id);
    }
}
