//! # Router Server
//!
//! Accepts connections from svcrun processes, hands each one a cookie and
//! relays frames between them by target cookie.
//!
//! ## Philosophy
//!
//! - **Opaque Forwarding**: Service frames are never re-encoded. Only the
//!   header is read to find the target.
//! - **One Lock**: Registry changes and the notices they produce happen under
//!   a single lock, so a process never hears about an endpoint that was
//!   already purged.
//! - **Failures Are Replies**: A request whose target cookie is gone goes back
//!   to its sender marked `MessageUndelivered`.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use svcrpc::Cookie;
use svcrpc::DisconnectReason;
use svcrpc::Endpoint;
use svcrpc::RemoteMessage;
use svcrpc::ResultType;
use svcrpc::ServiceConnection;
use svcrpc::ServiceRequestType;
use svcrpc::SystemMessage;
use svcrpc::ids::COOKIE_FIRST_REMOTE;
use svcrpc::ids::COOKIE_ROUTER;
use svcrpc::ids::is_request_id;
use svcrpc::ids::is_system_id;
use svcrun::TcpTransport;
use svcrun::Transport;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::registry::Notice;
use crate::registry::ServiceRegistry;

struct Connection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<AbortHandle>,
}

struct ServerInner {
    connections: DashMap<Cookie, Connection>,
    registry: Mutex<ServiceRegistry>,
    next_cookie: AtomicU64,
}

/// Cheap to clone; all clones serve the same set of connections.
#[derive(Clone)]
pub struct RouterServer(Arc<ServerInner>);

impl Default for RouterServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterServer {
    pub fn new() -> Self {
        Self(Arc::new(ServerInner {
            connections: DashMap::new(),
            registry: Mutex::new(ServiceRegistry::new()),
            next_cookie: AtomicU64::new(COOKIE_FIRST_REMOTE),
        }))
    }

    pub fn connection_count(&self) -> usize {
        self.0.connections.len()
    }

    /// Number of services known across all connections.
    pub fn service_count(&self) -> usize {
        self.0.registry().len()
    }

    /// Takes over a connected transport. The peer is told its cookie first;
    /// frames are then pumped until either side closes.
    pub fn attach(&self, transport: Box<dyn Transport>) -> Cookie {
        let cookie = self.0.next_cookie.fetch_add(1, Ordering::Relaxed);
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let (outbound, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let notice = SystemMessage::NotifyConnection { cookie, status: ServiceConnection::Connected };
        match notice.encode(COOKIE_ROUTER, cookie) {
            Ok(frame) => {
                let _ = outbound.send(frame);
            }
            Err(e) => warn!(cookie, error = %e, "Failed to encode connection notice"),
        }
        self.0.connections.insert(cookie, Connection { outbound, reader: None });

        let writer = transport.clone();
        let inner = self.0.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.send(&frame).await {
                    warn!(cookie, error = %e, "Send failed, connection dropped");
                    inner.bounce(&frame);
                    inner.cut(cookie);
                    break;
                }
            }
        });

        let inner = self.0.clone();
        let reader = tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Some(frame)) => inner.handle(cookie, &frame),
                    Ok(None) => {
                        debug!(cookie, "Peer closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(cookie, error = %e, "Receive failed");
                        break;
                    }
                }
            }
            inner.drop_connection(cookie, DisconnectReason::ServiceLost);
        });
        if let Some(mut connection) = self.0.connections.get_mut(&cookie) {
            connection.reader = Some(reader.abort_handle());
        }

        info!(cookie, "Connection accepted");
        cookie
    }

    /// Cuts a connection as if its socket failed.
    pub fn disconnect(&self, cookie: Cookie) -> bool {
        self.0.cut(cookie)
    }

    /// Accepts TCP connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let cookie = self.attach(Box::new(TcpTransport::new(stream)));
            debug!(cookie, %peer, "TCP peer attached");
        }
    }
}

impl ServerInner {
    fn registry(&self) -> MutexGuard<'_, ServiceRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, cookie: Cookie, frame: &[u8]) {
        let msg = match RemoteMessage::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(cookie, error = %e, "Dropping malformed frame");
                return;
            }
        };
        if is_system_id(msg.message_id) {
            self.handle_system(cookie, &msg);
        } else {
            self.forward(cookie, frame, &msg);
        }
    }

    /// Returns a request that could not be written to its sender.
    fn bounce(&self, frame: &[u8]) {
        let Ok(msg) = RemoteMessage::decode(frame) else {
            return;
        };
        if !is_request_id(msg.message_id) || msg.result == ResultType::MessageUndelivered {
            return;
        }
        debug!(to = msg.source, message_id = msg.message_id, "Unwritten request undelivered");
        self.send_to(msg.source, msg.failed_response().encode());
    }

    fn forward(&self, cookie: Cookie, frame: &[u8], msg: &RemoteMessage) {
        if self.send_to(msg.target, frame.to_vec()) {
            return;
        }
        if is_request_id(msg.message_id) && msg.result != ResultType::MessageUndelivered {
            debug!(from = cookie, to = msg.target, message_id = msg.message_id, "Target gone, request undelivered");
            self.send_to(cookie, msg.failed_response().encode());
        } else {
            debug!(from = cookie, to = msg.target, message_id = msg.message_id, "Target gone, frame dropped");
        }
    }

    fn handle_system(&self, cookie: Cookie, msg: &RemoteMessage) {
        let system = match SystemMessage::decode(msg) {
            Ok(system) => system,
            Err(e) => {
                warn!(cookie, error = %e, "Malformed system message");
                return;
            }
        };
        match system {
            SystemMessage::RequestRegister(mut registration) => {
                registration.endpoint.set_cookie(cookie);
                let mut registry = self.registry();
                let notices = match (registration.endpoint, registration.request) {
                    (Endpoint::Stub(stub), ServiceRequestType::RegisterStub) => registry.register_stub(stub),
                    (Endpoint::Stub(stub), ServiceRequestType::UnregisterStub) => {
                        registry.unregister_stub(&stub, registration.reason)
                    }
                    (Endpoint::Proxy(proxy), ServiceRequestType::RegisterClient) => registry.register_proxy(proxy),
                    (Endpoint::Proxy(proxy), ServiceRequestType::UnregisterClient) => {
                        registry.unregister_proxy(&proxy, registration.reason)
                    }
                    (endpoint, request) => {
                        warn!(cookie, ?endpoint, ?request, "Registration does not match its endpoint");
                        Vec::new()
                    }
                };
                self.send_notices(notices);
            }
            SystemMessage::Disconnect { cookie: purged } => {
                if purged != cookie {
                    warn!(cookie, purged, "Peer asked to purge another cookie");
                }
                self.drop_connection(cookie, DisconnectReason::ServiceDisconnected);
            }
            other => debug!(cookie, system = ?other, "Ignoring system message"),
        }
    }

    fn send_to(&self, cookie: Cookie, frame: Vec<u8>) -> bool {
        match self.connections.get(&cookie) {
            Some(connection) => connection.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    fn send_notices(&self, notices: Vec<Notice>) {
        for notice in notices {
            let to = notice.to;
            match SystemMessage::NotifyRegister(notice.registration).encode(COOKIE_ROUTER, to) {
                Ok(frame) => {
                    if !self.send_to(to, frame) {
                        debug!(cookie = to, "Notice for closed connection dropped");
                    }
                }
                Err(e) => warn!(cookie = to, error = %e, "Failed to encode notice"),
            }
        }
    }

    /// Stops reading from a connection and drops it as lost.
    fn cut(&self, cookie: Cookie) -> bool {
        let reader = self.connections.get_mut(&cookie).and_then(|mut c| c.reader.take());
        let dropped = self.drop_connection(cookie, DisconnectReason::ServiceLost);
        if let Some(reader) = reader {
            reader.abort();
        }
        dropped
    }

    /// Forgets a connection and purges its endpoints. `false` if it was
    /// already gone.
    fn drop_connection(&self, cookie: Cookie, reason: DisconnectReason) -> bool {
        let mut registry = self.registry();
        if self.connections.remove(&cookie).is_none() {
            return false;
        }
        let notices = registry.remove_cookie(cookie, reason);
        self.send_notices(notices);
        info!(cookie, ?reason, "Connection closed");
        true
    }
}
