//! # Service Runtime
//!
//! The per-process object that owns the registries, the service manager and
//! the router client. It is built explicitly and torn down with `shutdown`;
//! there is no global state.
//!
//! ## Usage
//!
//! ```ignore
//! let runtime = ServiceRuntime::builder().config(router_config).build();
//! runtime.spawn_thread("worker").await?;
//! let stub = runtime.register_stub("worker", shape, ServiceType::Public, "MainCalc", calc)?;
//! runtime.start_router()?;
//! ```

use std::sync::Arc;

use svcrpc::Channel;
use svcrpc::CustomEvent;
use svcrpc::DisconnectReason;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::EventData;
use svcrpc::InterfaceShape;
use svcrpc::ProxyAddress;
use svcrpc::ServiceType;
use svcrpc::StubAddress;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::RouterConfig;
use crate::consumer::CustomEventConsumer;
use crate::consumer::ProxyEventConsumer;
use crate::consumer::StubEventConsumer;
use crate::dispatcher;
use crate::dispatcher::DispatcherHandle;
use crate::endpoints::EndpointRegistry;
use crate::error::Error;
use crate::error::Result;
use crate::manager::ManagerCommand;
use crate::manager::ManagerHandle;
use crate::manager::ServiceManager;
use crate::proxy::Proxy;
use crate::router_client::ConnectionState;
use crate::router_client::RouterClient;
use crate::server_list::ServerInfo;
use crate::stub::Stub;
use crate::threads::Poster;
use crate::threads::ThreadRegistry;
use crate::transport::Connector;

/// Shared by the runtime and every proxy handle.
pub(crate) struct Core {
    pub(crate) threads: Arc<ThreadRegistry>,
    pub(crate) endpoints: Arc<EndpointRegistry>,
    pub(crate) manager: ManagerHandle,
    pub(crate) router: RouterClient,
    pub(crate) poster: Poster,
}

#[derive(Default)]
pub struct ServiceRuntimeBuilder {
    config: RouterConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl ServiceRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the TCP connector built from the config.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Builds the runtime and starts its service manager. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> ServiceRuntime {
        let threads = Arc::new(ThreadRegistry::new());
        let endpoints = Arc::new(EndpointRegistry::new());
        let (manager, commands) = ManagerHandle::channel();

        let consumer = Arc::new(manager.clone());
        let router = RouterClient::new(threads.clone(), endpoints.clone(), consumer.clone(), consumer);
        if let Some(connector) = self.connector {
            router.set_connector(connector);
        }
        let poster = Poster::new(threads.clone(), router.clone());

        let service_manager =
            ServiceManager::new(threads.clone(), endpoints.clone(), router.clone(), poster.clone(), self.config);
        let task = tokio::spawn(service_manager.run(commands));

        ServiceRuntime {
            core: Arc::new(Core { threads, endpoints, manager, router, poster }),
            manager_task: Mutex::new(Some(task)),
        }
    }
}

pub struct ServiceRuntime {
    core: Arc<Core>,
    manager_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRuntime {
    pub fn builder() -> ServiceRuntimeBuilder {
        ServiceRuntimeBuilder::new()
    }

    fn dispatcher(&self, thread: &str) -> Result<DispatcherHandle> {
        self.core.threads.find_by_name(thread).ok_or_else(|| Error::ThreadNotFound(thread.to_string()))
    }

    /// Starts a dispatcher thread. Returns once it is ready for events.
    pub async fn spawn_thread(&self, name: &str) -> Result<()> {
        dispatcher::spawn(name, &self.core.threads, self.core.poster.clone()).await?;
        Ok(())
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.core.threads.names()
    }

    /// Registers a stub on `thread` and announces it to the service manager.
    pub fn register_stub(
        &self,
        thread: &str,
        shape: Arc<InterfaceShape>,
        service_type: ServiceType,
        role: &str,
        consumer: impl StubEventConsumer + 'static,
    ) -> Result<StubAddress> {
        let dispatcher = self.dispatcher(thread)?;
        let address = StubAddress::new(shape.item(service_type), role, thread)
            .with_channel(Channel::local(dispatcher.id().0));
        self.core.endpoints.add_stub(address.clone())?;

        let stub = Stub::new(address.clone(), shape, self.core.poster.clone());
        if !dispatcher.attach_stub(stub, Box::new(consumer)) {
            self.core.endpoints.remove_stub(&address);
            return Err(Error::ThreadNotFound(thread.to_string()));
        }
        self.core.manager.register_stub(address.clone());
        Ok(address)
    }

    /// Unregisters a stub. Its connected proxies see the provider go away.
    pub fn unregister_stub(&self, address: &StubAddress) {
        let Some(registered) = self.core.endpoints.remove_stub(address) else {
            debug!(stub = %address, "Stub not registered");
            return;
        };
        self.core.manager.unregister_stub(registered.clone(), DisconnectReason::ProviderDisconnected);
        if let Some(dispatcher) = self.core.threads.find_by_name(registered.thread()) {
            dispatcher.detach_stub(registered);
        }
    }

    /// Creates a proxy owned by `thread`. Proxies with the same address share
    /// one connection; each call returns a new owner handle.
    pub fn create_proxy(
        &self,
        thread: &str,
        shape: Arc<InterfaceShape>,
        service_type: ServiceType,
        role: &str,
        consumer: impl ProxyEventConsumer + 'static,
    ) -> Result<Proxy> {
        let dispatcher = self.dispatcher(thread)?;
        let address = ProxyAddress::new(shape.item(service_type), role, thread)
            .with_channel(Channel::local(dispatcher.id().0));

        let (shared, owner, created) = self.core.endpoints.acquire_proxy(address.clone(), shape);
        if !dispatcher.attach_proxy(shared.clone(), owner, Box::new(consumer)) {
            self.core.endpoints.release_proxy(&address);
            return Err(Error::ThreadNotFound(thread.to_string()));
        }
        if created {
            self.core.manager.register_proxy(address);
        }
        Ok(Proxy::new(shared, owner, self.core.clone()))
    }

    pub fn attach_custom(&self, thread: &str, id: u32, consumer: impl CustomEventConsumer + 'static) -> Result<()> {
        self.dispatcher(thread)?.attach_custom(id, Box::new(consumer));
        Ok(())
    }

    pub fn detach_custom(&self, thread: &str, id: u32) -> Result<()> {
        self.dispatcher(thread)?.detach_custom(id);
        Ok(())
    }

    /// Posts a custom event to a thread. `false` if the thread is gone.
    pub fn send_custom_event(&self, thread: &str, id: u32, data: impl Into<Vec<u8>>) -> bool {
        let event = CustomEvent { target_thread: thread.to_string(), id, data: EventData::internal(data.into()) };
        self.core.poster.post(Event::local(EventBody::Custom(event)))
    }

    pub fn configure_router(&self, config: RouterConfig) -> Result<()> {
        self.core.manager.send(ManagerCommand::ConfigureConnection(config))
    }

    /// Connects to the configured router, or through the builder's connector.
    pub fn start_router(&self) -> Result<()> {
        self.core.manager.send(ManagerCommand::StartConnection)
    }

    pub fn start_router_at(&self, host: impl Into<String>, port: u16) -> Result<()> {
        self.core.manager.send(ManagerCommand::StartNetConnection { host: host.into(), port })
    }

    pub fn stop_router(&self) -> Result<()> {
        self.core.manager.send(ManagerCommand::StopConnection)
    }

    pub fn set_remote_enabled(&self, enabled: bool) -> Result<()> {
        self.core.manager.send(ManagerCommand::SetEnableService(enabled))
    }

    pub fn router_state(&self) -> ConnectionState {
        self.core.router.state()
    }

    /// Link to the router; valid while connected.
    pub fn router_link(&self) -> Channel {
        self.core.router.link()
    }

    /// Tears down a thread with all of its stubs and proxies.
    pub async fn terminate_thread(&self, name: &str) -> Result<()> {
        self.core.manager.send(ManagerCommand::TerminateComponentThread(name.to_string()))?;
        self.servers().await.map(|_| ())
    }

    /// Starts a fresh dispatcher under `name`, e.g. after `terminate_thread`.
    pub async fn restart_thread(&self, name: &str) -> Result<()> {
        self.core.manager.send(ManagerCommand::StartComponentThread(name.to_string()))?;
        self.servers().await?;
        self.dispatcher(name).map(|_| ())
    }

    /// The manager's current view of providers and their consumers.
    pub async fn servers(&self) -> Result<Vec<ServerInfo>> {
        self.core.manager.request(ManagerCommand::Snapshot).await
    }

    /// Disconnects from the router, stops every thread and the manager.
    pub async fn shutdown(&self) -> Result<()> {
        self.core.manager.request(ManagerCommand::ShutdownService).await?;
        let task = self.manager_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }
}
