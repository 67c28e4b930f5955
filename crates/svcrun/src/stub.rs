//! # Stub
//!
//! Provider-side state of one service instance: its address, the proxies
//! connected to it and who listens to which attribute or response. A `Stub`
//! lives on its dispatcher and is handed to the consumer hooks.

use std::collections::HashMap;
use std::sync::Arc;

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
use svcrpc::ResultType;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;
use svcrpc::ids::SEQUENCE_NUMBER_NOTIFY;
use tracing::debug;
use tracing::warn;

use crate::threads::Poster;

pub struct Stub {
    address: StubAddress,
    shape: Arc<InterfaceShape>,
    registered: ServiceConnection,
    clients: Vec<ProxyAddress>,
    subscribers: HashMap<MessageId, Vec<ProxyAddress>>,
    poster: Poster,
}

impl Stub {
    pub(crate) fn new(address: StubAddress, shape: Arc<InterfaceShape>, poster: Poster) -> Self {
        Self {
            address,
            shape,
            registered: ServiceConnection::Unknown,
            clients: Vec::new(),
            subscribers: HashMap::new(),
            poster,
        }
    }

    pub fn address(&self) -> &StubAddress {
        &self.address
    }

    pub fn shape(&self) -> &InterfaceShape {
        &self.shape
    }

    pub fn is_registered(&self) -> bool {
        self.registered.is_connected()
    }

    pub fn clients(&self) -> &[ProxyAddress] {
        &self.clients
    }

    pub fn subscribers(&self, message_id: MessageId) -> &[ProxyAddress] {
        self.subscribers.get(&message_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn set_registered(&mut self, status: ServiceConnection) {
        self.registered = status;
        if !status.is_connected() {
            self.clients.clear();
            self.subscribers.clear();
        }
    }

    pub(crate) fn update_client(&mut self, client: &ProxyAddress, status: ServiceConnection) {
        if status.is_connected() {
            if !self.clients.contains(client) {
                self.clients.push(client.clone());
            }
        } else {
            self.clients.retain(|c| c != client);
            self.drop_subscriber(client);
        }
    }

    fn drop_subscriber(&mut self, client: &ProxyAddress) {
        self.subscribers.retain(|_, listeners| {
            listeners.retain(|l| l != client);
            !listeners.is_empty()
        });
    }

    pub(crate) fn update_subscription(&mut self, request: &NotifyRequestEvent) {
        match request.request_type {
            RequestType::StartNotify => {
                let listeners = self.subscribers.entry(request.message_id).or_default();
                if !listeners.contains(&request.source) {
                    listeners.push(request.source.clone());
                }
            }
            RequestType::StopNotify => {
                if let Some(listeners) = self.subscribers.get_mut(&request.message_id) {
                    listeners.retain(|l| l != &request.source);
                    if listeners.is_empty() {
                        self.subscribers.remove(&request.message_id);
                    }
                }
            }
            RequestType::RemoveAllNotify => self.drop_subscriber(&request.source),
            other => debug!(stub = %self.address, request_type = ?other, "Ignoring notify request"),
        }
    }

    /// Answers a request with its paired response.
    ///
    /// Returns `false` if the request has no response in this interface.
    pub fn respond(&self, request: &RequestEvent, result: ResultType, data: impl Into<Vec<u8>>) -> bool {
        let Some(message_id) = self.shape.response_for_request(request.message_id) else {
            warn!(stub = %self.address, message_id = request.message_id, "Request has no response");
            return false;
        };
        self.send_response(&request.source, message_id, result, request.sequence, data);
        true
    }

    /// Sends a response to one proxy. Undeliverable responses are dropped.
    pub fn send_response(
        &self,
        target: &ProxyAddress,
        message_id: MessageId,
        result: ResultType,
        sequence: u64,
        data: impl Into<Vec<u8>>,
    ) {
        let response = ResponseEvent {
            target: target.clone(),
            message_id,
            result,
            sequence,
            data: EventData::internal(data.into()),
        };
        if !self.poster.post(Event::local(EventBody::Response(response))) {
            debug!(stub = %self.address, proxy = %target, message_id, "Response dropped, proxy gone");
        }
    }

    /// Broadcasts an attribute update or response to every subscriber.
    ///
    /// Returns how many proxies it was sent to.
    pub fn send_notification(&self, message_id: MessageId, data: impl Into<Vec<u8>>) -> usize {
        let listeners = self.subscribers(message_id);
        if listeners.is_empty() {
            return 0;
        }
        let data: Arc<[u8]> = data.into().into();
        for listener in listeners {
            let update = ResponseEvent {
                target: listener.clone(),
                message_id,
                result: ResultType::DataOk,
                sequence: SEQUENCE_NUMBER_NOTIFY,
                data: EventData::Internal(data.clone()),
            };
            self.poster.post(Event::local(EventBody::Response(update)));
        }
        listeners.len()
    }
}
