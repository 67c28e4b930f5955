//! # Event Consumers
//!
//! The hooks application code implements to react to events, plus the
//! dispatch ladder that picks the hook for each event.
//!
//! ## Ladder
//!
//! 1. A request whose id is in the request range goes to the request hook.
//! 2. A notify request on an attribute or response id updates the stub's
//!    subscriptions, then goes to the notify hook.
//! 3. A connection event (`SERVICE_NOTIFY_CONNECTION`) is either a provider
//!    registration notice or a client connection notice.
//! 4. Everything else falls through to the generic hook.
//!
//! The id sub-ranges are disjoint, so at most one rung matches.

use svcrpc::Channel;
use svcrpc::CustomEvent;
use svcrpc::DisconnectReason;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::NotifyRequestEvent;
use svcrpc::ProxyAddress;
use svcrpc::RequestEvent;
use svcrpc::RequestType;
use svcrpc::ResponseEvent;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;
use svcrpc::ids::is_attribute_id;
use svcrpc::ids::is_request_id;
use svcrpc::ids::is_response_id;
use tracing::trace;

use crate::proxy::ProxyShared;
use crate::stub::Stub;

/// Provider side hooks. Runs on the stub's dispatcher.
pub trait StubEventConsumer: Send {
    /// A call from a connected proxy. Answer with `Stub::respond`.
    fn process_request(&mut self, stub: &mut Stub, request: RequestEvent);

    /// A proxy started or stopped listening. Subscriptions are already updated.
    fn process_notify_request(&mut self, _stub: &mut Stub, _request: &NotifyRequestEvent) {}

    /// The stub itself was registered with (or dropped by) the service manager.
    fn service_registered(&mut self, _stub: &mut Stub, _status: ServiceConnection) {}

    /// A proxy connected or went away.
    fn client_connected(&mut self, _stub: &mut Stub, _client: &ProxyAddress, _status: ServiceConnection) {}

    fn process_generic(&mut self, _stub: &mut Stub, _event: Event) {}
}

/// Consumer side hooks. Runs on the proxy's dispatcher.
pub trait ProxyEventConsumer: Send {
    /// A reply to one of this proxy's calls, including undelivered replies.
    fn process_response(&mut self, response: &ResponseEvent);

    /// An attribute update the proxy subscribed to.
    fn process_attribute(&mut self, _update: &ResponseEvent) {}

    fn service_connected(&mut self, _server: &StubAddress, _status: ServiceConnection) {}

    fn process_generic(&mut self, _event: &Event) {}
}

/// Receiver for custom events addressed to a thread.
pub trait CustomEventConsumer: Send {
    fn process_event(&mut self, event: CustomEvent);
}

/// Router link state changes, reported by the router client.
pub trait ServiceConnectionConsumer: Send + Sync {
    fn connected_remote_service_channel(&self, channel: &Channel);
    fn disconnected_remote_service_channel(&self, channel: &Channel);
    fn lost_remote_service_channel(&self, channel: &Channel);
}

/// Remote endpoints appearing or leaving, reported by the router client.
pub trait ServiceRegisterConsumer: Send + Sync {
    fn registered_remote_service_provider(&self, stub: &StubAddress);
    fn unregistered_remote_service_provider(&self, stub: &StubAddress, reason: DisconnectReason);
    fn registered_remote_service_consumer(&self, proxy: &ProxyAddress);
    fn unregistered_remote_service_consumer(&self, proxy: &ProxyAddress, reason: DisconnectReason);
}

pub(crate) fn dispatch_stub_event(stub: &mut Stub, consumer: &mut dyn StubEventConsumer, event: Event) {
    let Event { header, body } = event;
    match body {
        EventBody::Request(request) if is_request_id(request.message_id) => {
            consumer.process_request(stub, request);
        }
        EventBody::NotifyRequest(request)
            if is_attribute_id(request.message_id)
                || is_response_id(request.message_id)
                || request.request_type == RequestType::RemoveAllNotify =>
        {
            stub.update_subscription(&request);
            consumer.process_notify_request(stub, &request);
        }
        EventBody::StubConnect(notice) => match notice.request_type {
            RequestType::ServiceConnection => {
                stub.set_registered(notice.status);
                consumer.service_registered(stub, notice.status);
            }
            _ => {
                stub.update_client(&notice.client, notice.status);
                consumer.client_connected(stub, &notice.client, notice.status);
            }
        },
        body => {
            trace!(stub = %stub.address(), "Generic stub event");
            consumer.process_generic(stub, Event { header, body });
        }
    }
}

pub(crate) fn dispatch_proxy_event(
    shared: &ProxyShared,
    consumers: &mut [(u64, Box<dyn ProxyEventConsumer>)],
    event: Event,
) {
    match &event.body {
        EventBody::Response(response) if is_response_id(response.message_id) || is_request_id(response.message_id) => {
            // A call's answer goes to its caller; a broadcast to the listeners.
            let owners = match shared.take_call(response.sequence) {
                Some(owner) => vec![owner],
                None => shared.listeners(response.message_id),
            };
            if owners.is_empty() {
                trace!(proxy = %shared.address, id = response.message_id, "Response nobody waits for");
            }
            for (_, consumer) in consumers.iter_mut().filter(|(owner, _)| owners.contains(owner)) {
                consumer.process_response(response);
            }
        }
        EventBody::Response(update) if is_attribute_id(update.message_id) => {
            shared.cache_attribute(update);
            let owners = shared.listeners(update.message_id);
            for (_, consumer) in consumers.iter_mut().filter(|(owner, _)| owners.contains(owner)) {
                consumer.process_attribute(update);
            }
        }
        EventBody::ProxyConnect(notice) => {
            shared.set_connection(&notice.server, notice.status);
            for (_, consumer) in consumers.iter_mut() {
                consumer.service_connected(&notice.server, notice.status);
            }
        }
        _ => {
            trace!(proxy = %shared.address, "Generic proxy event");
            for (_, consumer) in consumers.iter_mut() {
                consumer.process_generic(&event);
            }
        }
    }
}
