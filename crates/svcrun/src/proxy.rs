//! # Proxy
//!
//! Consumer-side handle of a service. One physical proxy per address is shared
//! by all of its owners; each owner holds its own `Proxy` handle and releases
//! it when done. The last release unregisters the proxy.
//!
//! ## Invariants
//! - Sequence numbers start at 1 and are unique per proxy.
//! - Every call ends in exactly one response to the consumer of the owner
//!   that made it. If it cannot be delivered, that response carries
//!   `MessageUndelivered`.
//! - Subscriptions are counted per owner. The stub hears `StartNotify` for
//!   the first listener of an id and `StopNotify` when the last one leaves.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use svcrpc::DisconnectReason;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::EventData;
use svcrpc::InterfaceShape;
use svcrpc::MessageId;
use svcrpc::NotifyRequestEvent;
use svcrpc::ProxyAddress;
use svcrpc::RequestEvent;
use svcrpc::RequestType;
use svcrpc::ResponseEvent;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;
use svcrpc::factory::undelivered_response;
use svcrpc::ids::is_attribute_id;
use svcrpc::ids::is_request_id;
use svcrpc::ids::is_response_id;
use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::runtime::Core;
use crate::threads::Poster;

#[derive(Debug, Default)]
struct ProxyState {
    status: ServiceConnection,
    server: Option<StubAddress>,
    listeners: HashMap<MessageId, HashSet<u64>>,
    /// Calling owner by sequence number, until the response arrives.
    calls: HashMap<u64, u64>,
    attributes: HashMap<MessageId, Vec<u8>>,
}

/// State shared by every owner of one proxy and its dispatcher.
pub struct ProxyShared {
    pub(crate) address: ProxyAddress,
    pub(crate) shape: Arc<InterfaceShape>,
    state: Mutex<ProxyState>,
    seq_gen: AtomicU64,
}

impl ProxyShared {
    pub(crate) fn new(address: ProxyAddress, shape: Arc<InterfaceShape>) -> Self {
        Self { address, shape, state: Mutex::new(ProxyState::default()), seq_gen: AtomicU64::new(1) }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_connection(&self, server: &StubAddress, status: ServiceConnection) {
        let mut state = self.state();
        state.status = status;
        if status.is_connected() {
            state.server = Some(server.clone());
        } else {
            state.server = None;
            state.attributes.clear();
        }
    }

    pub(crate) fn cache_attribute(&self, update: &ResponseEvent) {
        if update.result.is_ok() {
            self.state().attributes.insert(update.message_id, update.data.as_bytes().to_vec());
        }
    }

    /// Subscriptions to restore after a (re)connect.
    pub(crate) fn notifications(&self) -> Vec<MessageId> {
        self.state().listeners.keys().copied().collect()
    }

    /// Owners listening to `message_id`.
    pub(crate) fn listeners(&self, message_id: MessageId) -> Vec<u64> {
        self.state().listeners.get(&message_id).map(|owners| owners.iter().copied().collect()).unwrap_or_default()
    }

    /// Adds a listener. `true` if it is the first one for this id.
    fn subscribe(&self, owner: u64, message_id: MessageId) -> bool {
        let mut state = self.state();
        let owners = state.listeners.entry(message_id).or_default();
        owners.insert(owner) && owners.len() == 1
    }

    /// Removes a listener. `true` if nobody listens to this id anymore.
    fn unsubscribe(&self, owner: u64, message_id: MessageId) -> bool {
        let mut state = self.state();
        let Some(owners) = state.listeners.get_mut(&message_id) else {
            return false;
        };
        if !owners.remove(&owner) || !owners.is_empty() {
            return false;
        }
        state.listeners.remove(&message_id);
        true
    }

    /// Forgets an owner's calls and subscriptions. Returns the ids it was the
    /// last listener of.
    pub(crate) fn drop_owner(&self, owner: u64) -> Vec<MessageId> {
        let mut state = self.state();
        state.calls.retain(|_, o| *o != owner);
        let mut orphaned = Vec::new();
        state.listeners.retain(|message_id, owners| {
            if owners.remove(&owner) && owners.is_empty() {
                orphaned.push(*message_id);
                return false;
            }
            true
        });
        orphaned
    }

    fn track_call(&self, sequence: u64, owner: u64) {
        self.state().calls.insert(sequence, owner);
    }

    /// The owner that made the call answered by `sequence`, once.
    pub(crate) fn take_call(&self, sequence: u64) -> Option<u64> {
        self.state().calls.remove(&sequence)
    }

    fn next_sequence(&self) -> u64 {
        self.seq_gen.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn server(&self) -> Option<StubAddress> {
        let state = self.state();
        if state.status.is_connected() { state.server.clone() } else { None }
    }
}

/// Builds the start-notify request a connected proxy sends for `message_id`.
pub(crate) fn notify_request(
    source: &ProxyAddress,
    server: &StubAddress,
    message_id: MessageId,
    request_type: RequestType,
) -> Event {
    Event::local(EventBody::NotifyRequest(NotifyRequestEvent {
        source: source.clone(),
        target: server.clone(),
        message_id,
        request_type,
    }))
}

/// One owner's handle on a shared proxy.
pub struct Proxy {
    shared: Arc<ProxyShared>,
    owner: u64,
    core: Arc<Core>,
}

impl Proxy {
    pub(crate) fn new(shared: Arc<ProxyShared>, owner: u64, core: Arc<Core>) -> Self {
        Self { shared, owner, core }
    }

    pub fn address(&self) -> &ProxyAddress {
        &self.shared.address
    }

    pub fn shape(&self) -> &InterfaceShape {
        &self.shared.shape
    }

    pub fn status(&self) -> ServiceConnection {
        self.shared.state().status
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// The stub this proxy is connected to.
    pub fn server(&self) -> Option<StubAddress> {
        self.shared.server()
    }

    /// Last value received for a subscribed attribute.
    pub fn attribute(&self, message_id: MessageId) -> Option<Vec<u8>> {
        self.shared.state().attributes.get(&message_id).cloned()
    }

    fn poster(&self) -> &Poster {
        &self.core.poster
    }

    /// Sends a call and returns its sequence number.
    ///
    /// The answer, or an undelivered failure, arrives as a response on the
    /// proxy's dispatcher.
    pub fn send_request(&self, message_id: MessageId, data: impl Into<Vec<u8>>) -> Result<u64> {
        if !is_request_id(message_id) || !self.shared.shape.contains(message_id) {
            return Err(Error::UnknownMessage(message_id));
        }
        let sequence = self.shared.next_sequence();
        self.shared.track_call(sequence, self.owner);

        let Some(server) = self.shared.server() else {
            debug!(proxy = %self.address(), message_id, sequence, "Not connected, request undelivered");
            self.fail(message_id, sequence);
            return Ok(sequence);
        };

        let request = RequestEvent {
            source: self.shared.address.clone(),
            target: server,
            message_id,
            request_type: RequestType::Call,
            sequence,
            data: EventData::internal(data.into()),
        };
        if !self.poster().post(Event::local(EventBody::Request(request))) {
            self.fail(message_id, sequence);
        }
        Ok(sequence)
    }

    /// Subscribes this owner to an attribute or response. Kept across
    /// reconnects.
    pub fn start_notify(&self, message_id: MessageId) -> Result<()> {
        self.check_notify_id(message_id)?;
        let first = self.shared.subscribe(self.owner, message_id);
        if let (true, Some(server)) = (first, self.shared.server()) {
            let event = notify_request(&self.shared.address, &server, message_id, RequestType::StartNotify);
            self.poster().post(event);
        }
        Ok(())
    }

    pub fn stop_notify(&self, message_id: MessageId) -> Result<()> {
        self.check_notify_id(message_id)?;
        let last = self.shared.unsubscribe(self.owner, message_id);
        if let (true, Some(server)) = (last, self.shared.server()) {
            let event = notify_request(&self.shared.address, &server, message_id, RequestType::StopNotify);
            self.poster().post(event);
        }
        Ok(())
    }

    fn check_notify_id(&self, message_id: MessageId) -> Result<()> {
        let kind_ok = is_attribute_id(message_id) || is_response_id(message_id);
        if kind_ok && self.shared.shape.contains(message_id) {
            Ok(())
        } else {
            Err(Error::UnknownMessage(message_id))
        }
    }

    fn fail(&self, message_id: MessageId, sequence: u64) {
        let response = undelivered_response(self.shared.address.clone(), &self.shared.shape, message_id, sequence);
        if !self.poster().post(Event::local(EventBody::Response(response))) {
            debug!(proxy = %self.address(), "Proxy thread gone, failure dropped");
        }
    }

    /// Drops this owner. Subscriptions only it held are stopped; the last
    /// owner unregisters the proxy.
    pub fn release(self) {
        let address = self.shared.address.clone();
        if let Some(dispatcher) = self.core.threads.find_by_name(address.thread()) {
            dispatcher.detach_proxy(address.clone(), self.owner);
        }
        let orphaned = self.shared.drop_owner(self.owner);
        let server = self.shared.server();
        if self.core.endpoints.release_proxy(&address) == 0 {
            if let Some(server) = server {
                let event = notify_request(&address, &server, 0, RequestType::RemoveAllNotify);
                self.core.poster.post(event);
            }
            self.core.manager.unregister_proxy(address, DisconnectReason::ConsumerDisconnected);
        } else if let Some(server) = server {
            for message_id in orphaned {
                self.core.poster.post(notify_request(&address, &server, message_id, RequestType::StopNotify));
            }
        }
    }
}
