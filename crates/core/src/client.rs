//! Service client
//!
//! [`ServiceClient`] is the entry point: it owns the operation catalog, the
//! transport and the command mediator, and hands out commands, batches and
//! iterators bound to them. Cloning a client is cheap and clones share
//! everything, subscribers included.

use std::sync::Arc;

use courier_common::error::CommonError;
use courier_domain::{BatchConfig, ClientConfig, ServiceDescription};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::batch::{AffinityDivisor, Batch, CommandBatchTransfer, RequestBatchTransfer};
use crate::command::{Command, CommandContext};
use crate::description::{CommandFactory, OperationCatalog};
use crate::errors::ClientError;
use crate::events::{CommandEvent, CommandSubscriber, EventMediator, ListenerId};
use crate::iterator::{CommandPageFetcher, ResourceIterator};
use crate::parameters::{FilterRegistry, ParameterBag};
use crate::plugins::BackoffPlugin;
use crate::pool::RequestPool;
use crate::ports::Transport;
use crate::request::{LocationRegistry, RequestBuilder};
use crate::response::CommandResult;

/// Commands for a described service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    context: Arc<CommandContext>,
    batch: BatchConfig,
    backoff: Option<Arc<BackoffPlugin>>,
}

impl ServiceClient {
    /// Client with default filters, locations and batching
    pub fn new(catalog: OperationCatalog, transport: Arc<dyn Transport>) -> Self {
        Self::builder(catalog, transport).build()
    }

    pub fn builder(catalog: OperationCatalog, transport: Arc<dyn Transport>) -> ServiceClientBuilder {
        ServiceClientBuilder::new(catalog, transport)
    }

    /// Client configured from `config`
    ///
    /// The configured base URL is used when the description has none. A
    /// `BackoffPlugin` is attached to commands and pools when
    /// `config.backoff.enabled` is set.
    ///
    /// # Errors
    /// `ClientError::Common` for invalid configuration and
    /// `ClientError::Catalog` for an invalid description.
    pub fn from_config(
        config: &ClientConfig,
        mut description: ServiceDescription,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        config.validate().map_err(|e| CommonError::config(e.to_string()))?;
        if description.base_url.is_none() {
            description.base_url = Some(config.base_url.clone());
        }

        let catalog = OperationCatalog::new(description)?;
        let mut builder = Self::builder(catalog, transport).with_batch_config(config.batch);
        if config.backoff.enabled {
            builder = builder.with_backoff(Arc::new(BackoffPlugin::from_config(&config.backoff)));
        }
        let client = builder.build();

        info!(
            service = %client.catalog().name(),
            operations = client.catalog().len(),
            backoff = config.backoff.enabled,
            "service client configured"
        );
        Ok(client)
    }

    pub fn catalog(&self) -> &OperationCatalog {
        self.context.catalog()
    }

    /// Mediator for `command.*` events, shared by every command of this client
    pub fn events(&self) -> &Arc<EventMediator<CommandEvent>> {
        self.context.events()
    }

    pub fn context(&self) -> &Arc<CommandContext> {
        &self.context
    }

    pub fn batch_config(&self) -> BatchConfig {
        self.batch
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn CommandSubscriber>) -> Vec<ListenerId> {
        subscriber.attach(self.events())
    }

    /// Bind `name` to `args` without sending anything
    ///
    /// # Errors
    /// `ClientError::CommandNotFound` when no operation matches `name`.
    pub fn command(&self, name: &str, args: ParameterBag) -> Result<Command, ClientError> {
        self.create(name, args).ok_or_else(|| ClientError::CommandNotFound(name.to_string()))
    }

    /// Build, send and parse `name` in one call
    ///
    /// # Errors
    /// `ClientError::CommandNotFound` or the command's own failure.
    #[instrument(skip(self, args), fields(service = %self.catalog().name()))]
    pub async fn execute(&self, name: &str, args: ParameterBag) -> Result<CommandResult, ClientError> {
        let mut command = self.command(name, args)?;
        command.execute().await?;
        Ok(command.into_result()?)
    }

    /// [`execute`](Self::execute), then decode the result into `T`
    ///
    /// # Errors
    /// As `execute`, plus `ClientError::Common` with a serialization error
    /// when the result does not have the shape of `T`.
    pub async fn execute_as<T: DeserializeOwned>(&self, name: &str, args: ParameterBag) -> Result<T, ClientError> {
        let result = self.execute(name, args).await?;
        Ok(result.deserialize().map_err(CommonError::from)?)
    }

    /// Empty command batch grouped by origin
    pub fn batch(&self) -> Batch<Command, CommandBatchTransfer> {
        Batch::new(Arc::new(AffinityDivisor::new(self.batch.max_batch_size)), Arc::new(CommandBatchTransfer))
            .with_max_parallel(self.batch.max_parallel)
    }

    /// Empty batch of raw requests over this client's transport
    pub fn request_batch(&self) -> Batch<courier_domain::Request, RequestBatchTransfer> {
        let transfer = RequestBatchTransfer::new(Arc::clone(self.context.transport()));
        Batch::new(Arc::new(AffinityDivisor::new(self.batch.max_batch_size)), Arc::new(transfer))
            .with_max_parallel(self.batch.max_parallel)
    }

    /// Empty request pool over this client's transport
    ///
    /// The client's backoff plugin, if any, also schedules the pool's retries.
    pub fn pool(&self) -> RequestPool {
        let pool = RequestPool::new(Arc::clone(self.context.transport()));
        if let Some(backoff) = &self.backoff {
            Arc::clone(backoff).attach_to_pool(pool.events());
        }
        pool
    }

    /// Walk every item of a paginated operation
    ///
    /// # Errors
    /// `ClientError::CommandNotFound`, or `ClientError::NotPaginated` when the
    /// operation declares no pagination.
    pub fn iterator(
        &self,
        name: &str,
        args: ParameterBag,
    ) -> Result<ResourceIterator<CommandPageFetcher>, ClientError> {
        let operation = self
            .catalog()
            .get_operation(name)
            .ok_or_else(|| ClientError::CommandNotFound(name.to_string()))?;
        let pagination = operation
            .paginated
            .clone()
            .ok_or_else(|| ClientError::NotPaginated(operation.name.clone()))?;

        let fetcher = CommandPageFetcher::new(operation, pagination, args, Arc::clone(&self.context));
        Ok(ResourceIterator::new(fetcher))
    }
}

impl CommandFactory for ServiceClient {
    fn create(&self, name: &str, args: ParameterBag) -> Option<Command> {
        let operation = self.catalog().get_operation(name)?;
        debug!(requested = name, operation = %operation.name, "command created");
        Some(Command::new(operation, args, Arc::clone(&self.context)))
    }
}

/// Builder for [`ServiceClient`]
pub struct ServiceClientBuilder {
    catalog: OperationCatalog,
    transport: Arc<dyn Transport>,
    filters: FilterRegistry,
    locations: LocationRegistry,
    events: Arc<EventMediator<CommandEvent>>,
    batch: BatchConfig,
    subscribers: Vec<Arc<dyn CommandSubscriber>>,
    backoff: Option<Arc<BackoffPlugin>>,
}

impl ServiceClientBuilder {
    pub fn new(catalog: OperationCatalog, transport: Arc<dyn Transport>) -> Self {
        Self {
            catalog,
            transport,
            filters: FilterRegistry::default(),
            locations: LocationRegistry::default(),
            events: Arc::new(EventMediator::new()),
            batch: BatchConfig::default(),
            subscribers: Vec::new(),
            backoff: None,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_locations(mut self, locations: LocationRegistry) -> Self {
        self.locations = locations;
        self
    }

    /// Share an existing mediator instead of creating one
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventMediator<CommandEvent>>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn CommandSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Retry failed commands with `backoff`, and the requests of every pool
    /// the client creates
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<BackoffPlugin>) -> Self {
        self.subscribers.push(Arc::clone(&backoff) as Arc<dyn CommandSubscriber>);
        self.backoff = Some(backoff);
        self
    }

    pub fn build(self) -> ServiceClient {
        for subscriber in self.subscribers {
            subscriber.attach(&self.events);
        }
        let context = CommandContext::new(
            Arc::new(self.catalog),
            self.transport,
            self.events,
            self.filters,
            RequestBuilder::with_locations(self.locations),
        );
        ServiceClient { context: Arc::new(context), batch: self.batch, backoff: self.backoff }
    }
}

impl std::fmt::Debug for ServiceClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClientBuilder")
            .field("catalog", &self.catalog.name())
            .field("batch", &self.batch)
            .field("subscribers", &self.subscribers.len())
            .field("backoff", &self.backoff.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use courier_domain::{HttpMethod, OperationDescription, PaginationSpec, ParamType, ParameterSpec, Response};
    use serde_json::json;

    use super::*;
    use crate::testing::MockTransport;

    fn description() -> ServiceDescription {
        ServiceDescription {
            name: "people".into(),
            base_url: None,
            operations: vec![
                OperationDescription::new("GetPerson", HttpMethod::Get, "people/{id}")
                    .with_parameter(ParameterSpec::new("id").with_type(ParamType::Integer).required()),
                OperationDescription::new("ListPeople", HttpMethod::Get, "people").paginated(PaginationSpec::new(
                    "next",
                    "next_token",
                    "people",
                )),
            ],
            models: Vec::new(),
        }
    }

    #[test]
    fn from_config_fills_missing_base_url() {
        let config = ClientConfig::new("https://api.example.com/v1/");
        let client =
            ServiceClient::from_config(&config, description(), Arc::new(MockTransport::new())).unwrap();
        assert_eq!(client.catalog().base_url(), Some("https://api.example.com/v1/"));
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let err = ServiceClient::from_config(&ClientConfig::default(), description(), Arc::new(MockTransport::new()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Common(CommonError::Config { .. })));
    }

    #[test]
    fn from_config_attaches_backoff_when_enabled() {
        let mut config = ClientConfig::new("https://api.example.com/");
        config.backoff.enabled = true;
        let client =
            ServiceClient::from_config(&config, description(), Arc::new(MockTransport::new())).unwrap();
        assert_eq!(client.events().listener_count(crate::events::COMMAND_ERROR), 1);
    }

    #[test]
    fn pools_share_the_configured_backoff() {
        let mut config = ClientConfig::new("https://api.example.com/");
        let transport = Arc::new(MockTransport::new());
        let plain = ServiceClient::from_config(&config, description(), transport.clone()).unwrap();
        assert_eq!(plain.pool().events().listener_count(crate::pool::POOL_REQUEST_ERROR), 0);

        config.backoff.enabled = true;
        let client = ServiceClient::from_config(&config, description(), transport).unwrap();
        let pool = client.pool();
        assert_eq!(pool.events().listener_count(crate::pool::POOL_REQUEST_ERROR), 1);
        assert_eq!(pool.events().listener_count(crate::pool::POOL_COMPLETE), 1);
    }

    #[test]
    fn unknown_command_and_unpaginated_iterator_are_rejected() {
        let mut description = description();
        description.base_url = Some("https://api.example.com/".into());
        let client = ServiceClient::new(OperationCatalog::new(description).unwrap(), Arc::new(MockTransport::new()));

        assert!(matches!(client.command("Nope", ParameterBag::new()), Err(ClientError::CommandNotFound(_))));
        assert!(matches!(client.iterator("GetPerson", ParameterBag::new()), Err(ClientError::NotPaginated(_))));
        assert!(client.command("get_person", ParameterBag::new()).is_ok());
        assert!(client.iterator("ListPeople", ParameterBag::new()).is_ok());
    }

    #[tokio::test]
    async fn execute_returns_the_parsed_result() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::from_json(200, &json!({"name": "Ada"})));
        let mut description = description();
        description.base_url = Some("https://api.example.com/".into());
        let client = ServiceClient::new(OperationCatalog::new(description).unwrap(), transport.clone());

        let result = client.execute("GetPerson", ParameterBag::new().with("id", 42)).await.unwrap();
        assert_eq!(result.get("name"), Some(&json!("Ada")));
        assert_eq!(transport.requests()[0].full_url().as_str(), "https://api.example.com/people/42");
    }

    #[derive(Debug, serde::Deserialize)]
    struct Person {
        name: String,
    }

    #[tokio::test]
    async fn execute_as_decodes_or_reports_the_shape_mismatch() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(Response::from_json(200, &json!({"name": "Ada"})));
        transport.push_response(Response::from_json(200, &json!({"id": 7})));
        let mut description = description();
        description.base_url = Some("https://api.example.com/".into());
        let client = ServiceClient::new(OperationCatalog::new(description).unwrap(), transport);

        let person: Person = client.execute_as("GetPerson", ParameterBag::new().with("id", 1)).await.unwrap();
        assert_eq!(person.name, "Ada");

        let err = client.execute_as::<Person>("GetPerson", ParameterBag::new().with("id", 7)).await.unwrap_err();
        assert!(matches!(err, ClientError::Common(CommonError::Serialization { .. })));
    }
}
