//! # Router Client
//!
//! The process side of the link to the message router.
//!
//! ## States
//!
//! ```text
//! Stopped -> Starting -> Started -> Stopping -> Stopped
//!               ^           |
//!               +-- lost ---+   (while not shutting down)
//! ```
//!
//! The router assigns this process a cookie with its first message; only then
//! is the link `Started` and the service manager told to announce the public
//! endpoints.
//!
//! ## Failures
//!
//! Nothing here returns an error to the sender of an event. A request that
//! cannot be written, or that the router or peer cannot deliver, comes back
//! to its proxy as a response with `MessageUndelivered`. This holds for every
//! frame still queued or being written when the link drops, whichever side
//! noticed first. Delivery is at most once: requests already handed to the
//! peer when the link drops are not tracked and get no answer.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use svcrpc::Channel;
use svcrpc::DisconnectReason;
use svcrpc::Endpoint;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::ProxyAddress;
use svcrpc::Registration;
use svcrpc::RemoteEventFactory;
use svcrpc::RemoteMessage;
use svcrpc::ResultType;
use svcrpc::ServiceRequestType;
use svcrpc::StubAddress;
use svcrpc::SystemMessage;
use svcrpc::TargetLookup;
use svcrpc::factory::undelivered_response;
use svcrpc::ids::COOKIE_ROUTER;
use svcrpc::ids::SEQUENCE_NUMBER_NOTIFY;
use svcrpc::ids::SOURCE_UNKNOWN;
use svcrpc::ids::is_system_id;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::consumer::ServiceConnectionConsumer;
use crate::consumer::ServiceRegisterConsumer;
use crate::endpoints::EndpointRegistry;
use crate::threads::ThreadRegistry;
use crate::threads::deliver_event;
use crate::transport::Connector;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    Lost,
}

struct ClientInner {
    state: Mutex<ConnectionState>,
    link: Mutex<Channel>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    connector: Mutex<Option<Arc<dyn Connector>>>,
    threads: Arc<ThreadRegistry>,
    endpoints: Arc<EndpointRegistry>,
    connection_consumer: Arc<dyn ServiceConnectionConsumer>,
    register_consumer: Arc<dyn ServiceRegisterConsumer>,
    shutting_down: AtomicBool,
    stop: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub(crate) struct RouterClient(Arc<ClientInner>);

impl RouterClient {
    pub(crate) fn new(
        threads: Arc<ThreadRegistry>,
        endpoints: Arc<EndpointRegistry>,
        connection_consumer: Arc<dyn ServiceConnectionConsumer>,
        register_consumer: Arc<dyn ServiceRegisterConsumer>,
    ) -> Self {
        Self(Arc::new(ClientInner {
            state: Mutex::new(ConnectionState::Stopped),
            link: Mutex::new(Channel::invalid()),
            outbound: Mutex::new(None),
            connector: Mutex::new(None),
            threads,
            endpoints,
            connection_consumer,
            register_consumer,
            shutting_down: AtomicBool::new(false),
            stop: Mutex::new(None),
            task: Mutex::new(None),
        }))
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.0.state)
    }

    /// The link to the router. Invalid unless `Started`.
    pub(crate) fn link(&self) -> Channel {
        *lock(&self.0.link)
    }

    pub(crate) fn set_connector(&self, connector: Arc<dyn Connector>) {
        *lock(&self.0.connector) = Some(connector);
    }

    pub(crate) fn has_connector(&self) -> bool {
        lock(&self.0.connector).is_some()
    }

    /// Starts connecting in the background. `false` if already running or no
    /// connector is set.
    pub(crate) fn start(&self, reconnect: Duration) -> bool {
        let Some(connector) = lock(&self.0.connector).clone() else {
            warn!("Router client has no connector");
            return false;
        };
        {
            let mut state = lock(&self.0.state);
            if *state != ConnectionState::Stopped {
                debug!(state = ?*state, "Router client already running");
                return false;
            }
            *state = ConnectionState::Starting;
        }
        self.0.shutting_down.store(false, Ordering::SeqCst);

        let (stop_tx, stop_rx) = watch::channel(false);
        *lock(&self.0.stop) = Some(stop_tx);
        let inner = self.0.clone();
        let task = tokio::spawn(run(inner, connector, reconnect, stop_rx));
        *lock(&self.0.task) = Some(task);
        true
    }

    /// Says goodbye to the router and stops reconnecting.
    pub(crate) async fn stop(&self) {
        let inner = &self.0;
        inner.shutting_down.store(true, Ordering::SeqCst);
        let was_started = self.state() == ConnectionState::Started;
        if was_started {
            let link = self.link();
            match (SystemMessage::Disconnect { cookie: link.cookie }).encode(link.cookie, COOKIE_ROUTER) {
                Ok(frame) => {
                    let _ = inner.push_frame(frame);
                }
                Err(e) => warn!(error = %e, "Failed to encode disconnect"),
            }
        }
        {
            let mut state = lock(&inner.state);
            if *state != ConnectionState::Stopped {
                *state = ConnectionState::Stopping;
            }
        }

        let stop = lock(&inner.stop).take();
        if let Some(stop) = stop {
            let _ = stop.send(true);
        }
        let task = lock(&inner.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let link = std::mem::replace(&mut *lock(&inner.link), Channel::invalid());
        *lock(&inner.state) = ConnectionState::Stopped;
        if was_started {
            info!(cookie = link.cookie, "Router connection stopped");
            inner.connection_consumer.disconnected_remote_service_channel(&link);
        }
    }

    /// Sends an event to a remote endpoint.
    pub(crate) fn send_event(&self, event: Event) {
        let inner = &self.0;
        if self.state() != ConnectionState::Started {
            debug!(message_id = event.message_id(), "Router not connected, event undelivered");
            inner.fail_event(&event);
            return;
        }
        let link = self.link();
        match RemoteEventFactory::create_stream_from_event(&event, &link) {
            Ok(msg) => {
                if inner.push_frame(msg.encode()).is_err() {
                    inner.fail_event(&event);
                }
            }
            Err(e) => warn!(error = %e, message_id = event.message_id(), "Event not streamable"),
        }
    }

    pub(crate) fn register_stub(&self, stub: &StubAddress) {
        self.0.send_registration(Registration::register_stub(stub.clone()));
    }

    pub(crate) fn unregister_stub(&self, stub: &StubAddress, reason: DisconnectReason) {
        self.0.send_registration(Registration::unregister_stub(stub.clone(), reason));
    }

    pub(crate) fn register_proxy(&self, proxy: &ProxyAddress) {
        self.0.send_registration(Registration::register_proxy(proxy.clone()));
    }

    pub(crate) fn unregister_proxy(&self, proxy: &ProxyAddress, reason: DisconnectReason) {
        self.0.send_registration(Registration::unregister_proxy(proxy.clone(), reason));
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn link(&self) -> Channel {
        *lock(&self.link)
    }

    fn push_frame(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(frame).map_err(|e| e.0),
            None => Err(frame),
        }
    }

    fn send_registration(&self, registration: Registration) {
        if self.state() != ConnectionState::Started {
            return;
        }
        let link = self.link();
        match SystemMessage::RequestRegister(registration).encode(link.cookie, COOKIE_ROUTER) {
            Ok(frame) => {
                if self.push_frame(frame).is_err() {
                    debug!("Registration dropped, link closing");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode registration"),
        }
    }

    /// Answers a request that never left this process.
    fn fail_event(&self, event: &Event) {
        let (source, message_id, sequence) = match &event.body {
            EventBody::Request(r) => (&r.source, r.message_id, r.sequence),
            EventBody::NotifyRequest(r) => (&r.source, r.message_id, SEQUENCE_NUMBER_NOTIFY),
            _ => return,
        };
        let Some((channel, shape)) = self.endpoints.find_proxy(source) else {
            debug!(proxy = %source, "Source proxy of failed request is gone");
            return;
        };
        let response = undelivered_response(source.clone().with_channel(channel), &shape, message_id, sequence);
        deliver_event(&self.threads, Event::local(EventBody::Response(response)));
    }

    /// Answers a request whose frame could not be written.
    fn fail_frame(&self, frame: &[u8]) {
        let Ok(msg) = RemoteMessage::decode(frame) else {
            return;
        };
        if is_system_id(msg.message_id) {
            return;
        }
        match RemoteEventFactory::create_request_failed_event(&msg, &self.link(), self.endpoints.as_ref()) {
            Ok(Some(event)) => {
                deliver_event(&self.threads, event);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to rebuild unsent request"),
        }
    }

    /// Handles one frame from the router. `false` means the router has
    /// declared this link gone.
    fn handle_frame(&self, bytes: &[u8]) -> bool {
        let msg = match RemoteMessage::decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return true;
            }
        };
        if is_system_id(msg.message_id) {
            return self.handle_system(&msg);
        }

        let link = self.link();
        if msg.result == ResultType::MessageUndelivered {
            match RemoteEventFactory::create_request_failed_event(&msg, &link, self.endpoints.as_ref()) {
                Ok(Some(event)) => {
                    deliver_event(&self.threads, event);
                }
                Ok(None) => debug!(message_id = msg.message_id, "Undelivered reply for unknown proxy"),
                Err(e) => warn!(error = %e, "Malformed undelivered reply"),
            }
            return true;
        }

        match RemoteEventFactory::create_event_from_stream(&msg, &link, self.endpoints.as_ref()) {
            Ok(Some(event)) => {
                if !deliver_event(&self.threads, event) {
                    self.reply_undelivered(&msg);
                }
            }
            Ok(None) => self.reply_undelivered(&msg),
            Err(e) => warn!(error = %e, message_id = msg.message_id, "Malformed service message"),
        }
        true
    }

    fn reply_undelivered(&self, msg: &RemoteMessage) {
        let reply = msg.failed_response();
        if self.push_frame(reply.encode()).is_err() {
            debug!(message_id = msg.message_id, "Undelivered reply dropped, link closing");
        }
    }

    fn handle_system(&self, msg: &RemoteMessage) -> bool {
        let system = match SystemMessage::decode(msg) {
            Ok(system) => system,
            Err(e) => {
                warn!(error = %e, message_id = msg.message_id, "Malformed system message");
                return true;
            }
        };
        match system {
            SystemMessage::NotifyConnection { cookie, status } if status.is_connected() => {
                let link = Channel::new(cookie, cookie, COOKIE_ROUTER);
                *lock(&self.link) = link;
                self.set_state(ConnectionState::Started);
                info!(cookie, "Connected to router");
                self.connection_consumer.connected_remote_service_channel(&link);
            }
            SystemMessage::NotifyConnection { cookie, status } => {
                info!(cookie, ?status, "Router dropped the link");
                return false;
            }
            SystemMessage::NotifyRegister(registration) => self.handle_registration(registration),
            other => debug!(system = ?other, "Ignoring system message"),
        }
        true
    }

    fn handle_registration(&self, registration: Registration) {
        let link = self.link();
        let remote_cookie = registration.endpoint.cookie();
        if remote_cookie == link.cookie {
            debug!(cookie = remote_cookie, "Ignoring registration of own endpoint");
            return;
        }
        let channel = Channel::new(remote_cookie, link.source, SOURCE_UNKNOWN);
        let consumer = &self.register_consumer;
        match (registration.endpoint, registration.request) {
            (Endpoint::Stub(stub), ServiceRequestType::RegisterStub) => {
                consumer.registered_remote_service_provider(&stub.with_channel(channel));
            }
            (Endpoint::Stub(stub), ServiceRequestType::UnregisterStub) => {
                consumer.unregistered_remote_service_provider(&stub.with_channel(channel), registration.reason);
            }
            (Endpoint::Proxy(proxy), ServiceRequestType::RegisterClient) => {
                consumer.registered_remote_service_consumer(&proxy.with_channel(channel));
            }
            (Endpoint::Proxy(proxy), ServiceRequestType::UnregisterClient) => {
                consumer.unregistered_remote_service_consumer(&proxy.with_channel(channel), registration.reason);
            }
            (endpoint, request) => warn!(?endpoint, ?request, "Registration does not match its endpoint"),
        }
    }
}

async fn run(
    inner: Arc<ClientInner>,
    connector: Arc<dyn Connector>,
    reconnect: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        inner.set_state(ConnectionState::Starting);

        match connector.connect().await {
            Ok(transport) => {
                if session(&inner, transport, &mut stop).await == SessionEnd::Stopped {
                    break;
                }
                let link = std::mem::replace(&mut *lock(&inner.link), Channel::invalid());
                inner.set_state(ConnectionState::Starting);
                if link.is_valid() {
                    warn!(cookie = link.cookie, "Router connection lost");
                    inner.connection_consumer.lost_remote_service_channel(&link);
                }
            }
            Err(e) => debug!(error = %e, "Router connect failed"),
        }

        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            _ = stop.changed() => break,
        }
    }
}

async fn session(
    inner: &Arc<ClientInner>,
    transport: Box<dyn Transport>,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let transport: Arc<dyn Transport> = Arc::from(transport);
    let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (lost_tx, mut lost_rx) = oneshot::channel::<()>();
    let (halt_tx, halt_rx) = watch::channel(false);
    *lock(&inner.outbound) = Some(tx);

    let writer = tokio::spawn(write_frames(inner.clone(), transport.clone(), rx, halt_rx, lost_tx));

    let end = loop {
        tokio::select! {
            frame = transport.recv() => match frame {
                Ok(Some(bytes)) => {
                    if !inner.handle_frame(&bytes) {
                        break SessionEnd::Lost;
                    }
                }
                Ok(None) => break SessionEnd::Lost,
                Err(e) => {
                    warn!(error = %e, "Router receive failed");
                    break SessionEnd::Lost;
                }
            },
            _ = &mut lost_rx => break SessionEnd::Lost,
            _ = stop.changed() => break SessionEnd::Stopped,
        }
    };

    // A stopping writer flushes what is queued; a lost one fails it. The link
    // is still set, so failures are addressed as on the live connection.
    let outbound = lock(&inner.outbound).take();
    drop(outbound);
    if end == SessionEnd::Lost {
        let _ = halt_tx.send(true);
    }
    if let Err(e) = writer.await {
        warn!(error = %e, "Router writer task failed");
    }
    end
}

async fn write_frames(
    inner: Arc<ClientInner>,
    transport: Arc<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut halt: watch::Receiver<bool>,
    lost: oneshot::Sender<()>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = halt.changed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };
        let sent = tokio::select! {
            sent = transport.send(&frame) => sent,
            _ = halt.changed() => {
                inner.fail_frame(&frame);
                break;
            }
        };
        if let Err(e) = sent {
            warn!(error = %e, "Router send failed");
            inner.fail_frame(&frame);
            let _ = lost.send(());
            break;
        }
    }
    rx.close();
    while let Ok(frame) = rx.try_recv() {
        inner.fail_frame(&frame);
    }
}
