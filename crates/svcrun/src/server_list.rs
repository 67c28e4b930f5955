//! # Server List
//!
//! The service manager's book of providers and their consumers, keyed by
//! service address (interface plus role). A proxy may register before its
//! stub exists: it then waits under a placeholder entry until the stub
//! arrives.
//!
//! ## Invariants
//! - One entry per service address; at most one registered stub per entry.
//! - Every client appears under exactly one entry and was registered and not
//!   yet unregistered.
//! - A client is `Connected` iff its entry's stub is registered; otherwise it
//!   is `Pending`.
//! - An entry without a stub and without clients does not exist.

use std::collections::HashMap;

use svcrpc::ProxyAddress;
use svcrpc::ServiceAddress;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub proxy: ProxyAddress,
    pub status: ServiceConnection,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub stub: StubAddress,
    pub status: ServiceConnection,
    pub clients: Vec<ClientInfo>,
}

impl ServerInfo {
    fn placeholder(service: &ServiceAddress) -> Self {
        Self {
            stub: StubAddress::with_service(service.clone(), String::new()),
            status: ServiceConnection::Unknown,
            clients: Vec::new(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.status.is_connected()
    }

    pub fn connected_clients(&self) -> impl Iterator<Item = &ProxyAddress> {
        self.clients.iter().filter(|c| c.status.is_connected()).map(|c| &c.proxy)
    }
}

#[derive(Debug, Default)]
pub struct ServerList {
    servers: HashMap<ServiceAddress, ServerInfo>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, service: &ServiceAddress) -> Option<&ServerInfo> {
        self.servers.get(service)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ServerInfo> {
        self.servers.values().cloned().collect()
    }

    /// Registers a stub and connects every waiting client.
    ///
    /// Returns the clients connected by this call, or `None` if another stub
    /// already provides the service.
    pub fn register_server(&mut self, stub: StubAddress) -> Option<Vec<ProxyAddress>> {
        let entry = self.servers.entry(stub.service().clone()).or_insert_with(|| ServerInfo::placeholder(stub.service()));
        if entry.is_registered() {
            return (entry.stub == stub).then(Vec::new);
        }

        entry.stub = stub;
        entry.status = ServiceConnection::Connected;
        let mut connected = Vec::new();
        for client in entry.clients.iter_mut() {
            if !client.status.is_connected() {
                client.status = ServiceConnection::Connected;
                connected.push(client.proxy.clone());
            }
        }
        Some(connected)
    }

    /// Unregisters a stub. Returns the stub as it was registered and the
    /// clients that were connected to it.
    ///
    /// Local clients keep waiting for a new stub. Remote clients are dropped;
    /// the router announces them again if the service comes back.
    pub fn unregister_server(&mut self, stub: &StubAddress) -> Option<(StubAddress, Vec<ProxyAddress>)> {
        let service = stub.service().clone();
        let entry = self.servers.get_mut(&service)?;
        if !entry.is_registered() || entry.stub != *stub {
            return None;
        }

        let connected: Vec<ProxyAddress> = entry.connected_clients().cloned().collect();
        let registered = std::mem::replace(&mut entry.stub, StubAddress::with_service(service.clone(), String::new()));
        entry.status = ServiceConnection::Unknown;
        entry.clients.retain(|c| !c.proxy.is_remote());
        for client in entry.clients.iter_mut() {
            client.status = ServiceConnection::Pending;
        }
        if entry.clients.is_empty() {
            self.servers.remove(&service);
        }
        Some((registered, connected))
    }

    /// Registers a client. Returns the stub if the client just got connected.
    ///
    /// Registering the same client twice is a no-op.
    pub fn register_client(&mut self, proxy: ProxyAddress) -> Option<StubAddress> {
        let entry =
            self.servers.entry(proxy.service().clone()).or_insert_with(|| ServerInfo::placeholder(proxy.service()));
        if let Some(existing) = entry.clients.iter_mut().find(|c| c.proxy == proxy) {
            existing.proxy = proxy;
            return None;
        }

        let status = if entry.is_registered() { ServiceConnection::Connected } else { ServiceConnection::Pending };
        entry.clients.push(ClientInfo { proxy, status });
        entry.is_registered().then(|| entry.stub.clone())
    }

    /// Unregisters a client. Returns the removed client and the stub it was
    /// connected to, if any.
    pub fn unregister_client(&mut self, proxy: &ProxyAddress) -> Option<(ClientInfo, Option<StubAddress>)> {
        let service = proxy.service().clone();
        let entry = self.servers.get_mut(&service)?;
        let index = entry.clients.iter().position(|c| c.proxy == *proxy)?;
        let client = entry.clients.remove(index);
        let server = client.status.is_connected().then(|| entry.stub.clone());
        if !entry.is_registered() && entry.clients.is_empty() {
            self.servers.remove(&service);
        }
        Some((client, server))
    }

    /// Stubs and clients that live behind the router.
    pub fn remote_endpoints(&self) -> (Vec<StubAddress>, Vec<ProxyAddress>) {
        let stubs = self.servers.values().filter(|s| s.is_registered() && s.stub.is_remote()).map(|s| s.stub.clone());
        let proxies = self.servers.values().flat_map(|s| s.clients.iter()).filter(|c| c.proxy.is_remote());
        (stubs.collect(), proxies.map(|c| c.proxy.clone()).collect())
    }

    /// Public stubs and clients of this process, to announce to the router.
    pub fn local_public_endpoints(&self) -> (Vec<StubAddress>, Vec<ProxyAddress>) {
        let stubs = self
            .servers
            .values()
            .filter(|s| s.is_registered() && s.stub.is_local() && s.stub.is_public())
            .map(|s| s.stub.clone());
        let proxies = self
            .servers
            .values()
            .flat_map(|s| s.clients.iter())
            .filter(|c| c.proxy.is_local() && c.proxy.is_public());
        (stubs.collect(), proxies.map(|c| c.proxy.clone()).collect())
    }

    /// Stubs and clients owned by a dispatcher thread of this process.
    pub fn local_endpoints_on(&self, thread: &str) -> (Vec<StubAddress>, Vec<ProxyAddress>) {
        let stubs = self
            .servers
            .values()
            .filter(|s| s.is_registered() && s.stub.is_local() && s.stub.thread() == thread)
            .map(|s| s.stub.clone());
        let proxies = self
            .servers
            .values()
            .flat_map(|s| s.clients.iter())
            .filter(|c| c.proxy.is_local() && c.proxy.thread() == thread);
        (stubs.collect(), proxies.map(|c| c.proxy.clone()).collect())
    }
}
