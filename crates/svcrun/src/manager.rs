//! # Service Manager
//!
//! Matches stubs with proxies. Every registration change of the process runs
//! through one command queue and one task, so all of them are totally ordered.
//!
//! ## Philosophy
//!
//! - **One Book**: the `ServerList` is the only place that knows who is
//!   connected to whom. Stubs and proxies learn it from connect events.
//! - **Local Notices Only**: the manager notifies endpoints of this process.
//!   Endpoints behind the router hear about changes from their own manager.
//! - **Router Mirror**: public local endpoints are mirrored to the router
//!   while the link is up, and re-announced after every reconnect. Remote
//!   endpoints are torn down when the link goes away.

use std::sync::Arc;

use svcrpc::Channel;
use svcrpc::DisconnectReason;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::ProxyAddress;
use svcrpc::ProxyConnectEvent;
use svcrpc::RequestType;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;
use svcrpc::StubConnectEvent;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::RouterConfig;
use crate::consumer::ServiceConnectionConsumer;
use crate::consumer::ServiceRegisterConsumer;
use crate::dispatcher;
use crate::endpoints::EndpointRegistry;
use crate::error::Error;
use crate::error::Result;
use crate::router_client::RouterClient;
use crate::server_list::ServerInfo;
use crate::server_list::ServerList;
use crate::threads::Poster;
use crate::threads::ThreadRegistry;
use crate::transport::TcpConnector;

pub(crate) enum ManagerCommand {
    RegisterStub(StubAddress),
    UnregisterStub(StubAddress, DisconnectReason),
    RegisterProxy(ProxyAddress),
    UnregisterProxy(ProxyAddress, DisconnectReason),
    ConfigureConnection(RouterConfig),
    StartConnection,
    StartNetConnection { host: String, port: u16 },
    StopConnection,
    SetEnableService(bool),
    RegisterConnection(Channel),
    UnregisterConnection(Channel),
    LostConnection(Channel),
    TerminateComponentThread(String),
    StartComponentThread(String),
    StopRoutingClient,
    Snapshot(oneshot::Sender<Vec<ServerInfo>>),
    ShutdownService(oneshot::Sender<()>),
}

/// Sending side of the manager's command queue.
#[derive(Clone)]
pub(crate) struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ManagerHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ManagerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn send(&self, command: ManagerCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ManagerStopped)
    }

    fn send_or_log(&self, command: ManagerCommand) {
        if self.send(command).is_err() {
            debug!("Service manager stopped, command dropped");
        }
    }

    pub(crate) fn register_stub(&self, stub: StubAddress) {
        self.send_or_log(ManagerCommand::RegisterStub(stub));
    }

    pub(crate) fn unregister_stub(&self, stub: StubAddress, reason: DisconnectReason) {
        self.send_or_log(ManagerCommand::UnregisterStub(stub, reason));
    }

    pub(crate) fn register_proxy(&self, proxy: ProxyAddress) {
        self.send_or_log(ManagerCommand::RegisterProxy(proxy));
    }

    pub(crate) fn unregister_proxy(&self, proxy: ProxyAddress, reason: DisconnectReason) {
        self.send_or_log(ManagerCommand::UnregisterProxy(proxy, reason));
    }

    /// Sends a command carrying a reply channel and waits for the answer.
    pub(crate) async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| Error::ManagerStopped)
    }
}

impl ServiceConnectionConsumer for ManagerHandle {
    fn connected_remote_service_channel(&self, channel: &Channel) {
        self.send_or_log(ManagerCommand::RegisterConnection(*channel));
    }

    fn disconnected_remote_service_channel(&self, channel: &Channel) {
        self.send_or_log(ManagerCommand::UnregisterConnection(*channel));
    }

    fn lost_remote_service_channel(&self, channel: &Channel) {
        self.send_or_log(ManagerCommand::LostConnection(*channel));
    }
}

impl ServiceRegisterConsumer for ManagerHandle {
    fn registered_remote_service_provider(&self, stub: &StubAddress) {
        self.register_stub(stub.clone());
    }

    fn unregistered_remote_service_provider(&self, stub: &StubAddress, reason: DisconnectReason) {
        self.unregister_stub(stub.clone(), reason);
    }

    fn registered_remote_service_consumer(&self, proxy: &ProxyAddress) {
        self.register_proxy(proxy.clone());
    }

    fn unregistered_remote_service_consumer(&self, proxy: &ProxyAddress, reason: DisconnectReason) {
        self.unregister_proxy(proxy.clone(), reason);
    }
}

pub(crate) struct ServiceManager {
    servers: ServerList,
    threads: Arc<ThreadRegistry>,
    endpoints: Arc<EndpointRegistry>,
    router: RouterClient,
    poster: Poster,
    config: RouterConfig,
    custom_connector: bool,
}

impl ServiceManager {
    pub(crate) fn new(
        threads: Arc<ThreadRegistry>,
        endpoints: Arc<EndpointRegistry>,
        router: RouterClient,
        poster: Poster,
        config: RouterConfig,
    ) -> Self {
        let custom_connector = router.has_connector();
        Self { servers: ServerList::new(), threads, endpoints, router, poster, config, custom_connector }
    }

    /// Runs commands until the queue closes or a shutdown is requested.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ManagerCommand>) {
        while let Some(command) = commands.recv().await {
            if !self.handle(command).await {
                return;
            }
        }
        debug!("Service manager queue closed");
    }

    /// Runs one command. `false` once the manager shut down.
    async fn handle(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::RegisterStub(stub) => self.register_server(stub),
            ManagerCommand::UnregisterStub(stub, reason) => self.unregister_server(&stub, reason),
            ManagerCommand::RegisterProxy(proxy) => self.register_client(proxy),
            ManagerCommand::UnregisterProxy(proxy, reason) => self.unregister_client(&proxy, reason),
            ManagerCommand::ConfigureConnection(config) => {
                debug!(host = %config.host, port = config.port, enabled = config.enabled, "Router configured");
                self.config = config;
            }
            ManagerCommand::StartConnection => self.start_connection(),
            ManagerCommand::StartNetConnection { host, port } => {
                self.config.host = host;
                self.config.port = port;
                self.custom_connector = false;
                self.start_connection();
            }
            ManagerCommand::StopConnection | ManagerCommand::StopRoutingClient => self.router.stop().await,
            ManagerCommand::SetEnableService(enabled) => {
                self.config.enabled = enabled;
                if !enabled {
                    self.router.stop().await;
                }
            }
            ManagerCommand::RegisterConnection(channel) => self.register_connection(&channel),
            ManagerCommand::UnregisterConnection(channel) => {
                self.drop_remote(&channel, DisconnectReason::ServiceDisconnected);
            }
            ManagerCommand::LostConnection(channel) => self.drop_remote(&channel, DisconnectReason::ServiceLost),
            ManagerCommand::TerminateComponentThread(name) => self.terminate_thread(&name).await,
            ManagerCommand::StartComponentThread(name) => {
                if let Err(e) = dispatcher::spawn(&name, &self.threads, self.poster.clone()).await {
                    warn!(thread = %name, error = %e, "Failed to start component thread");
                }
            }
            ManagerCommand::Snapshot(reply) => {
                let _ = reply.send(self.servers.snapshot());
            }
            ManagerCommand::ShutdownService(done) => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn post(&self, body: EventBody) {
        let event = Event::local(body);
        if !self.poster.post(event) {
            debug!("Connect notice dropped, target thread gone");
        }
    }

    /// Tells the local ends of a stub/proxy pair about their connection.
    fn notify_pair(&self, stub: &StubAddress, proxy: &ProxyAddress, status: ServiceConnection) {
        if stub.is_local() {
            self.post(EventBody::StubConnect(StubConnectEvent {
                target: stub.clone(),
                client: proxy.clone(),
                request_type: RequestType::ClientConnection,
                status,
            }));
        }
        if proxy.is_local() {
            self.post(EventBody::ProxyConnect(ProxyConnectEvent {
                target: proxy.clone(),
                server: stub.clone(),
                status,
            }));
        }
    }

    fn register_server(&mut self, stub: StubAddress) {
        if let Some(info) = self.servers.find(stub.service()) {
            if info.is_registered() && info.stub == stub {
                debug!(stub = %stub, "Stub already registered");
                return;
            }
        }
        if stub.is_local() && stub.is_public() {
            self.router.register_stub(&stub);
        }

        let Some(connected) = self.servers.register_server(stub.clone()) else {
            warn!(stub = %stub, "Service already provided by another stub");
            return;
        };
        info!(stub = %stub, clients = connected.len(), "Stub registered");

        if stub.is_local() {
            self.post(EventBody::StubConnect(StubConnectEvent {
                target: stub.clone(),
                client: ProxyAddress::default(),
                request_type: RequestType::ServiceConnection,
                status: ServiceConnection::Connected,
            }));
        }
        for proxy in &connected {
            self.notify_pair(&stub, proxy, ServiceConnection::Connected);
        }
    }

    fn unregister_server(&mut self, stub: &StubAddress, reason: DisconnectReason) {
        if stub.is_local() && stub.is_public() {
            self.router.unregister_stub(stub, reason);
        }
        let Some((registered, connected)) = self.servers.unregister_server(stub) else {
            debug!(stub = %stub, "Unregistering unknown stub");
            return;
        };
        info!(stub = %registered, clients = connected.len(), ?reason, "Stub unregistered");

        let status = reason.to_status();
        for proxy in connected.iter().filter(|p| p.is_local()) {
            self.post(EventBody::ProxyConnect(ProxyConnectEvent {
                target: proxy.clone(),
                server: registered.clone(),
                status,
            }));
        }
    }

    fn register_client(&mut self, proxy: ProxyAddress) {
        if proxy.is_local() && proxy.is_public() {
            self.router.register_proxy(&proxy);
        }
        match self.servers.register_client(proxy.clone()) {
            Some(stub) => {
                debug!(proxy = %proxy, stub = %stub, "Proxy connected");
                self.notify_pair(&stub, &proxy, ServiceConnection::Connected);
            }
            None => debug!(proxy = %proxy, "Proxy waiting for its stub"),
        }
    }

    fn unregister_client(&mut self, proxy: &ProxyAddress, reason: DisconnectReason) {
        if proxy.is_local() && proxy.is_public() {
            self.router.unregister_proxy(proxy, reason);
        }
        let Some((client, server)) = self.servers.unregister_client(proxy) else {
            debug!(proxy = %proxy, "Unregistering unknown proxy");
            return;
        };
        debug!(proxy = %client.proxy, ?reason, "Proxy unregistered");

        if let Some(stub) = server.filter(StubAddress::is_local) {
            self.post(EventBody::StubConnect(StubConnectEvent {
                target: stub,
                client: client.proxy,
                request_type: RequestType::ClientConnection,
                status: reason.to_status(),
            }));
        }
    }

    fn start_connection(&mut self) {
        if !self.config.enabled {
            info!("Remote service disabled, not connecting");
            return;
        }
        if !self.custom_connector {
            self.router.set_connector(Arc::new(TcpConnector::new(self.config.host.clone(), self.config.port)));
        }
        if self.router.start(self.config.reconnect_interval()) {
            info!(host = %self.config.host, port = self.config.port, "Connecting to router");
        }
    }

    /// Announces every public local endpoint on a fresh link.
    fn register_connection(&mut self, channel: &Channel) {
        let (stubs, proxies) = self.servers.local_public_endpoints();
        info!(cookie = channel.cookie, stubs = stubs.len(), proxies = proxies.len(), "Announcing public endpoints");
        for stub in &stubs {
            self.router.register_stub(stub);
        }
        for proxy in &proxies {
            self.router.register_proxy(proxy);
        }
    }

    /// Tears down every endpoint that lived behind the router.
    fn drop_remote(&mut self, channel: &Channel, reason: DisconnectReason) {
        let (stubs, proxies) = self.servers.remote_endpoints();
        info!(cookie = channel.cookie, stubs = stubs.len(), proxies = proxies.len(), ?reason, "Dropping remote endpoints");
        for stub in &stubs {
            self.unregister_server(stub, reason);
        }
        for proxy in &proxies {
            self.unregister_client(proxy, reason);
        }
    }

    async fn terminate_thread(&mut self, name: &str) {
        let (stubs, _) = self.servers.local_endpoints_on(name);
        for stub in &stubs {
            self.unregister_server(stub, DisconnectReason::ProviderDisconnected);
        }
        for stub in self.endpoints.stubs_on_thread(name) {
            self.endpoints.remove_stub(&stub);
        }
        for proxy in self.endpoints.purge_proxies_on_thread(name) {
            self.unregister_client(&proxy, DisconnectReason::ConsumerDisconnected);
        }

        match self.threads.remove(name) {
            Some(handle) => {
                handle.stop().await;
                info!(thread = name, "Component thread terminated");
            }
            None => debug!(thread = name, "Terminating unknown thread"),
        }
    }

    async fn shutdown(&mut self) {
        info!("Service manager shutting down");
        self.router.stop().await;
        for name in self.threads.names() {
            self.terminate_thread(&name).await;
        }
    }
}
