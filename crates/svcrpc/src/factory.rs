//! # Remote Event Factory
//!
//! Maps remote messages to events and back.
//!
//! ## Invariants
//! - Inbound, an embedded cookie equal to the receiving link's own cookie is
//!   rewritten to `COOKIE_LOCAL`. Outbound, `COOKIE_LOCAL` becomes the link
//!   cookie. The two rewrites are inverses for a fixed link.
//! - A message whose target is not registered here yields `None`, never an
//!   error: the caller decides whether to answer with an undelivered reply.
//! - Failures always surface as a `Response` with `MessageUndelivered`,
//!   addressed to the proxy that sent the original request.

use std::sync::Arc;

use svcpack::Writer;
use tracing::debug;

use crate::address::Channel;
use crate::address::ProxyAddress;
use crate::address::StubAddress;
use crate::connection::ResultType;
use crate::error::Result;
use crate::error::RpcError;
use crate::event::Event;
use crate::event::EventBody;
use crate::event::EventData;
use crate::event::ResponseEvent;
use crate::ids::Cookie;
use crate::ids::MessageId;
use crate::ids::COOKIE_LOCAL;
use crate::ids::SEQUENCE_NUMBER_NOTIFY;
use crate::interface::InterfaceShape;
use crate::message::RemoteMessage;

/// Registry lookups the factory needs to resolve message targets.
pub trait TargetLookup {
    /// Channel of a registered local stub.
    fn find_stub(&self, stub: &StubAddress) -> Option<Channel>;
    /// Channel and interface of a registered local proxy.
    fn find_proxy(&self, proxy: &ProxyAddress) -> Option<(Channel, Arc<InterfaceShape>)>;
}

/// Builds the undelivered reply to a request sent by `source`.
pub fn undelivered_response(
    source: ProxyAddress,
    shape: &InterfaceShape,
    message_id: MessageId,
    sequence: u64,
) -> ResponseEvent {
    ResponseEvent {
        target: source,
        message_id: shape.failure_response_id(message_id),
        result: ResultType::MessageUndelivered,
        sequence,
        data: EventData::default(),
    }
}

fn swap_cookie(channel: &Channel, from: Cookie, to: Cookie) -> Option<Cookie> {
    (channel.cookie == from).then_some(to)
}

/// Rewrites every embedded address cookie equal to `from` into `to`.
fn rewrite_cookies(body: &mut EventBody, from: Cookie, to: Cookie) {
    fn stub(a: &mut StubAddress, from: Cookie, to: Cookie) {
        if let Some(c) = swap_cookie(a.channel(), from, to) {
            a.set_cookie(c);
        }
    }
    fn proxy(a: &mut ProxyAddress, from: Cookie, to: Cookie) {
        if let Some(c) = swap_cookie(a.channel(), from, to) {
            a.set_cookie(c);
        }
    }
    match body {
        EventBody::Request(r) => {
            stub(&mut r.target, from, to);
            proxy(&mut r.source, from, to);
        }
        EventBody::NotifyRequest(r) => {
            stub(&mut r.target, from, to);
            proxy(&mut r.source, from, to);
        }
        EventBody::Response(r) => proxy(&mut r.target, from, to),
        EventBody::StubConnect(c) => {
            stub(&mut c.target, from, to);
            proxy(&mut c.client, from, to);
        }
        EventBody::ProxyConnect(c) => {
            proxy(&mut c.target, from, to);
            stub(&mut c.server, from, to);
        }
        EventBody::Custom(_) => {}
    }
}

/// Cookie of the process an event must travel to.
fn target_cookie(body: &EventBody) -> Cookie {
    match body {
        EventBody::Request(r) => r.target.channel().cookie,
        EventBody::NotifyRequest(r) => r.target.channel().cookie,
        EventBody::Response(r) => r.target.channel().cookie,
        EventBody::StubConnect(c) => c.target.channel().cookie,
        EventBody::ProxyConnect(c) => c.target.channel().cookie,
        EventBody::Custom(_) => COOKIE_LOCAL,
    }
}

/// Channel of the remote peer endpoint, as seen from this process.
fn peer_channel(peer_cookie: Cookie, link: &Channel, local: &Channel) -> Channel {
    Channel::new(peer_cookie, link.source, local.source)
}

pub struct RemoteEventFactory;

impl RemoteEventFactory {
    /// Rebuilds the event carried by `msg`, received on `channel`.
    ///
    /// Returns `Ok(None)` when the addressed stub or proxy is not registered.
    pub fn create_event_from_stream(
        msg: &RemoteMessage,
        channel: &Channel,
        lookup: &dyn TargetLookup,
    ) -> Result<Option<Event>> {
        let mut body = EventBody::read_wire(&mut msg.body_reader())?;
        rewrite_cookies(&mut body, channel.cookie, COOKIE_LOCAL);

        let resolved = match &mut body {
            EventBody::Request(r) => lookup.find_stub(&r.target).map(|local| {
                let peer = peer_channel(r.source.channel().cookie, channel, &local);
                r.target.set_channel(local);
                r.source.set_channel(peer);
            }),
            EventBody::NotifyRequest(r) => lookup.find_stub(&r.target).map(|local| {
                let peer = peer_channel(r.source.channel().cookie, channel, &local);
                r.target.set_channel(local);
                r.source.set_channel(peer);
            }),
            EventBody::Response(r) => lookup.find_proxy(&r.target).map(|(local, _)| {
                r.target.set_channel(local);
            }),
            EventBody::StubConnect(c) => lookup.find_stub(&c.target).map(|local| {
                let peer = peer_channel(c.client.channel().cookie, channel, &local);
                c.target.set_channel(local);
                c.client.set_channel(peer);
            }),
            EventBody::ProxyConnect(c) => lookup.find_proxy(&c.target).map(|(local, _)| {
                let peer = peer_channel(c.server.channel().cookie, channel, &local);
                c.target.set_channel(local);
                c.server.set_channel(peer);
            }),
            EventBody::Custom(_) => return Err(RpcError::NotRemote),
        };

        if resolved.is_none() {
            debug!(message_id = msg.message_id, sequence = msg.sequence, "Remote message target not registered");
            return Ok(None);
        }
        Ok(Some(Event::remote(body)))
    }

    /// Serializes a remote event for sending on `channel`.
    pub fn create_stream_from_event(event: &Event, channel: &Channel) -> Result<RemoteMessage> {
        if !event.is_remote() {
            return Err(RpcError::NotRemote);
        }
        let mut body = event.body.clone();
        rewrite_cookies(&mut body, COOKIE_LOCAL, channel.cookie);

        let mut w = Writer::new();
        body.write_wire(&mut w)?;

        Ok(RemoteMessage::new(
            channel.cookie,
            target_cookie(&body),
            event.message_id(),
            event.result(),
            event.sequence(),
            w.into_bytes(),
        ))
    }

    /// Turns an undeliverable request back into an undelivered response for
    /// its source proxy.
    ///
    /// Returns `Ok(None)` if the message is not a request or the source proxy
    /// is not registered here.
    pub fn create_request_failed_event(
        msg: &RemoteMessage,
        channel: &Channel,
        lookup: &dyn TargetLookup,
    ) -> Result<Option<Event>> {
        let mut body = EventBody::read_wire(&mut msg.body_reader())?;
        rewrite_cookies(&mut body, channel.cookie, COOKIE_LOCAL);

        let (source, message_id, sequence) = match body {
            EventBody::Request(r) => (r.source, r.message_id, r.sequence),
            EventBody::NotifyRequest(r) => (r.source, r.message_id, SEQUENCE_NUMBER_NOTIFY),
            _ => return Ok(None),
        };

        let Some((local, shape)) = lookup.find_proxy(&source) else {
            debug!(proxy = %source, "Source proxy of failed request is gone");
            return Ok(None);
        };
        let source = source.with_channel(local);
        let response = undelivered_response(source, &shape, message_id, sequence);
        Ok(Some(Event::remote(EventBody::Response(response))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ServiceItem;
    use crate::address::ServiceType;
    use crate::address::Version;
    use crate::connection::RequestType;
    use crate::event::NotifyRequestEvent;
    use crate::event::RequestEvent;
    use crate::ids::attribute_id;
    use crate::ids::request_id;
    use crate::ids::response_id;

    const LINK_COOKIE: Cookie = 300;
    const PEER_COOKIE: Cookie = 301;

    fn shape() -> Arc<InterfaceShape> {
        let mut shape = InterfaceShape::new("Calc", Version::new(1, 0, 0)).attribute("total");
        for i in 0..11 {
            shape = shape.request(format!("req{i}"), Some(format!("rsp{i}").as_str()));
        }
        Arc::new(shape)
    }

    fn item() -> ServiceItem {
        ServiceItem::new("Calc", Version::new(1, 0, 0), ServiceType::Public)
    }

    fn stub() -> StubAddress {
        StubAddress::new(item(), "MainCalc", "WorkerThread")
    }

    fn proxy() -> ProxyAddress {
        ProxyAddress::new(item(), "MainCalc", "ClientThread")
    }

    /// Both endpoints registered in this process.
    struct Everything;

    impl TargetLookup for Everything {
        fn find_stub(&self, _stub: &StubAddress) -> Option<Channel> {
            Some(Channel::local(11))
        }

        fn find_proxy(&self, _proxy: &ProxyAddress) -> Option<(Channel, Arc<InterfaceShape>)> {
            Some((Channel::local(12), shape()))
        }
    }

    struct Nothing;

    impl TargetLookup for Nothing {
        fn find_stub(&self, _stub: &StubAddress) -> Option<Channel> {
            None
        }

        fn find_proxy(&self, _proxy: &ProxyAddress) -> Option<(Channel, Arc<InterfaceShape>)> {
            None
        }
    }

    fn link() -> Channel {
        Channel::new(LINK_COOKIE, 5, 0)
    }

    fn request() -> RequestEvent {
        RequestEvent {
            source: proxy().with_channel(Channel::new(PEER_COOKIE, 0, 0)),
            target: stub().with_channel(Channel::local(11)),
            message_id: request_id(10),
            request_type: RequestType::Call,
            sequence: 1,
            data: EventData::external(vec![4u8, 2]),
        }
    }

    #[test]
    fn test_request_roundtrip_is_idempotent() {
        let event = Event::remote(EventBody::Request(request()));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        assert_eq!(msg.source, LINK_COOKIE);
        assert_eq!(msg.target, LINK_COOKIE);
        assert_eq!(msg.sequence, 1);

        let back = RemoteEventFactory::create_event_from_stream(&msg, &link(), &Everything).unwrap().unwrap();
        assert_eq!(back.message_id(), event.message_id());
        assert_eq!(back.sequence(), event.sequence());
        let (EventBody::Request(a), EventBody::Request(b)) = (&event.body, &back.body) else {
            panic!("not requests")
        };
        assert_eq!(a.source, b.source);
        assert_eq!(a.target, b.target);
        assert_eq!(b.target.channel().cookie, COOKIE_LOCAL);
        assert_eq!(b.source.channel().cookie, PEER_COOKIE);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_notify_request_roundtrip_is_idempotent() {
        let r = request();
        let event = Event::remote(EventBody::NotifyRequest(NotifyRequestEvent {
            source: r.source,
            target: r.target,
            message_id: attribute_id(0),
            request_type: RequestType::StartNotify,
        }));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        let back = RemoteEventFactory::create_event_from_stream(&msg, &link(), &Everything).unwrap().unwrap();
        assert_eq!(back.body, event.body);
        assert_eq!(back.message_id(), attribute_id(0));
    }

    #[test]
    fn test_response_roundtrip_is_idempotent() {
        let event = Event::remote(EventBody::Response(ResponseEvent {
            target: proxy().with_channel(Channel::local(12)),
            message_id: response_id(10),
            result: ResultType::RequestOk,
            sequence: 77,
            data: EventData::external(vec![1u8]),
        }));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        assert_eq!(msg.result, ResultType::RequestOk);

        let back = RemoteEventFactory::create_event_from_stream(&msg, &link(), &Everything).unwrap().unwrap();
        assert_eq!(back.body, event.body);
        assert_eq!(back.sequence(), 77);
    }

    #[test]
    fn test_local_event_is_not_streamed() {
        let event = Event::local(EventBody::Request(request()));
        assert_eq!(
            RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap_err(),
            RpcError::NotRemote
        );
    }

    #[test]
    fn test_unregistered_target_yields_none() {
        let event = Event::remote(EventBody::Request(request()));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        assert!(RemoteEventFactory::create_event_from_stream(&msg, &link(), &Nothing).unwrap().is_none());
    }

    #[test]
    fn test_request_failed_event_targets_source_proxy() {
        // The request as sent by the proxy's process.
        let mut r = request();
        r.source.set_cookie(COOKIE_LOCAL);
        r.target.set_cookie(PEER_COOKIE);
        let event = Event::remote(EventBody::Request(r));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        let returned = msg.failed_response();

        let failed = RemoteEventFactory::create_request_failed_event(&returned, &link(), &Everything)
            .unwrap()
            .unwrap();
        let EventBody::Response(resp) = &failed.body else { panic!("not a response") };
        assert_eq!(resp.target, proxy());
        assert_eq!(*resp.target.channel(), Channel::local(12));
        assert_eq!(resp.result, ResultType::MessageUndelivered);
        assert_eq!(resp.sequence, 1);
        assert_eq!(resp.message_id, response_id(10));
    }

    #[test]
    fn test_request_failed_event_without_proxy() {
        let event = Event::remote(EventBody::Request(request()));
        let msg = RemoteEventFactory::create_stream_from_event(&event, &link()).unwrap();
        assert!(RemoteEventFactory::create_request_failed_event(&msg, &link(), &Nothing).unwrap().is_none());
    }
}
