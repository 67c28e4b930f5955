//! # Event Model
//!
//! Every unit of work moved between dispatcher threads is an `Event`: a small
//! routing header plus a closed body enum. Dispatch points match on the body
//! instead of probing for concrete types.
//!
//! ## Philosophy
//!
//! - **Closed set**: Requests, notify requests, responses, the two connect
//!   notifications and custom events. Nothing else travels.
//! - **Locality is data**: A local and a remote request share one body type;
//!   the header says which one it is. Remote events always own their payload.
//!
//! ## Wire body
//!
//! ```text
//! Request        [tag][target stub][source proxy][request type][msg id][seq][data]
//! NotifyRequest  [tag][target stub][source proxy][request type][msg id]
//! Response       [tag][target proxy][msg id][result][seq][data]
//! StubConnect    [tag][target stub][client proxy][request type][status]
//! ProxyConnect   [tag][target proxy][server stub][status]
//! ```

use std::sync::Arc;

use svcpack::Reader;
use svcpack::Writer;

use crate::address::ProxyAddress;
use crate::address::StubAddress;
use crate::connection::RequestType;
use crate::connection::ResultType;
use crate::connection::ServiceConnection;
use crate::error::Result;
use crate::error::RpcError;
use crate::ids::DispatcherId;
use crate::ids::MessageId;
use crate::ids::SEQUENCE_NUMBER_NOTIFY;
use crate::ids::SERVICE_NOTIFY_CONNECTION;

/// Where an event originates relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    Local,
    Remote,
}

/// Queue band. Higher priorities are processed first; FIFO inside a band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Bitmask classification of an event along its locality and kind axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(pub u32);

impl EventType {
    pub const LOCAL: u32 = 0x0001;
    pub const REMOTE: u32 = 0x0002;
    pub const REQUEST: u32 = 0x0010;
    pub const NOTIFY_REQUEST: u32 = 0x0020;
    pub const RESPONSE: u32 = 0x0040;
    pub const STUB_CONNECT: u32 = 0x0100;
    pub const PROXY_CONNECT: u32 = 0x0200;
    pub const CUSTOM: u32 = 0x1000;

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn is_remote(self) -> bool {
        self.contains(Self::REMOTE)
    }
}

/// Leading tag of a remote event body on the wire.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireTag {
    ServiceRequest = 0x0012,
    NotifyRequest = 0x0022,
    ServiceResponse = 0x0042,
    StubConnect = 0x0102,
    ProxyConnect = 0x0202,
}

impl WireTag {
    pub fn from_u32(tag: u32) -> Result<Self> {
        match tag {
            0x0012 => Ok(Self::ServiceRequest),
            0x0022 => Ok(Self::NotifyRequest),
            0x0042 => Ok(Self::ServiceResponse),
            0x0102 => Ok(Self::StubConnect),
            0x0202 => Ok(Self::ProxyConnect),
            other => Err(RpcError::UnknownEventType(other)),
        }
    }
}

/// Argument payload of an event.
///
/// `Internal` shares the bytes between in-process events without copying;
/// `External` owns a private copy and is the only form a remote event holds.
#[derive(Debug, Clone)]
pub enum EventData {
    Internal(Arc<[u8]>),
    External(Vec<u8>),
}

impl Default for EventData {
    fn default() -> Self {
        Self::External(Vec::new())
    }
}

impl EventData {
    pub fn internal(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Internal(bytes.into())
    }

    pub fn external(bytes: impl Into<Vec<u8>>) -> Self {
        Self::External(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Internal(b) => b,
            Self::External(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    /// Detaches the payload from any shared storage.
    pub fn into_external(self) -> Self {
        match self {
            Self::Internal(b) => Self::External(b.to_vec()),
            external => external,
        }
    }
}

impl PartialEq for EventData {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for EventData {}

/// A call or subscription-with-payload from a proxy to a stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEvent {
    pub source: ProxyAddress,
    pub target: StubAddress,
    pub message_id: MessageId,
    pub request_type: RequestType,
    pub sequence: u64,
    pub data: EventData,
}

/// Start/stop of an attribute or response subscription. No payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequestEvent {
    pub source: ProxyAddress,
    pub target: StubAddress,
    pub message_id: MessageId,
    pub request_type: RequestType,
}

/// A response, broadcast or attribute update for one proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    pub target: ProxyAddress,
    pub message_id: MessageId,
    pub result: ResultType,
    pub sequence: u64,
    pub data: EventData,
}

/// Tells a stub about itself (`RequestType::ServiceConnection`) or about a
/// client (`RequestType::ClientConnection`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubConnectEvent {
    pub target: StubAddress,
    pub client: ProxyAddress,
    pub request_type: RequestType,
    pub status: ServiceConnection,
}

/// Tells a proxy whether its server is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConnectEvent {
    pub target: ProxyAddress,
    pub server: StubAddress,
    pub status: ServiceConnection,
}

/// Application-defined event addressed to a thread by name. Never remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomEvent {
    pub target_thread: String,
    pub id: u32,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    Request(RequestEvent),
    NotifyRequest(NotifyRequestEvent),
    Response(ResponseEvent),
    StubConnect(StubConnectEvent),
    ProxyConnect(ProxyConnectEvent),
    Custom(CustomEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub locality: Locality,
    pub priority: Priority,
    /// Bound lazily by name lookup, then cached.
    pub target_thread: Option<DispatcherId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub header: EventHeader,
    pub body: EventBody,
}

impl Event {
    pub fn local(body: EventBody) -> Self {
        Self {
            header: EventHeader { locality: Locality::Local, priority: Priority::Normal, target_thread: None },
            body,
        }
    }

    /// A remote event. Payloads are detached into owned copies.
    pub fn remote(body: EventBody) -> Self {
        let body = match body {
            EventBody::Request(mut r) => {
                r.data = r.data.into_external();
                EventBody::Request(r)
            }
            EventBody::Response(mut r) => {
                r.data = r.data.into_external();
                EventBody::Response(r)
            }
            other => other,
        };
        Self {
            header: EventHeader { locality: Locality::Remote, priority: Priority::Normal, target_thread: None },
            body,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.header.priority = priority;
        self
    }

    pub fn priority(&self) -> Priority {
        self.header.priority
    }

    pub fn is_remote(&self) -> bool {
        self.header.locality == Locality::Remote
    }

    pub fn event_type(&self) -> EventType {
        let locality = match self.header.locality {
            Locality::Local => EventType::LOCAL,
            Locality::Remote => EventType::REMOTE,
        };
        let kind = match &self.body {
            EventBody::Request(_) => EventType::REQUEST,
            EventBody::NotifyRequest(_) => EventType::NOTIFY_REQUEST,
            EventBody::Response(_) => EventType::RESPONSE,
            EventBody::StubConnect(_) => EventType::STUB_CONNECT,
            EventBody::ProxyConnect(_) => EventType::PROXY_CONNECT,
            EventBody::Custom(_) => EventType::CUSTOM,
        };
        EventType(locality | kind)
    }

    /// Name of the dispatcher thread the event must run on.
    pub fn target_thread_name(&self) -> &str {
        match &self.body {
            EventBody::Request(r) => r.target.thread(),
            EventBody::NotifyRequest(r) => r.target.thread(),
            EventBody::Response(r) => r.target.thread(),
            EventBody::StubConnect(c) => c.target.thread(),
            EventBody::ProxyConnect(c) => c.target.thread(),
            EventBody::Custom(c) => &c.target_thread,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match &self.body {
            EventBody::Request(r) => r.message_id,
            EventBody::NotifyRequest(r) => r.message_id,
            EventBody::Response(r) => r.message_id,
            EventBody::StubConnect(_) | EventBody::ProxyConnect(_) => SERVICE_NOTIFY_CONNECTION,
            EventBody::Custom(c) => c.id,
        }
    }

    pub fn sequence(&self) -> u64 {
        match &self.body {
            EventBody::Request(r) => r.sequence,
            EventBody::Response(r) => r.sequence,
            _ => SEQUENCE_NUMBER_NOTIFY,
        }
    }

    pub fn result(&self) -> ResultType {
        match &self.body {
            EventBody::Response(r) => r.result,
            _ => ResultType::Undefined,
        }
    }
}

impl EventBody {
    pub fn tag(&self) -> Option<WireTag> {
        match self {
            Self::Request(_) => Some(WireTag::ServiceRequest),
            Self::NotifyRequest(_) => Some(WireTag::NotifyRequest),
            Self::Response(_) => Some(WireTag::ServiceResponse),
            Self::StubConnect(_) => Some(WireTag::StubConnect),
            Self::ProxyConnect(_) => Some(WireTag::ProxyConnect),
            Self::Custom(_) => None,
        }
    }

    /// Writes the tagged wire body. Custom events have no wire form.
    pub fn write_wire(&self, w: &mut Writer) -> Result<()> {
        let tag = self.tag().ok_or(RpcError::NotRemote)?;
        w.u32(tag as u32);
        match self {
            Self::Request(r) => {
                w.put(&r.target)?;
                w.put(&r.source)?;
                w.u8(r.request_type.as_u8());
                w.u32(r.message_id);
                w.u64(r.sequence);
                w.bytes(r.data.as_bytes())?;
            }
            Self::NotifyRequest(r) => {
                w.put(&r.target)?;
                w.put(&r.source)?;
                w.u8(r.request_type.as_u8());
                w.u32(r.message_id);
            }
            Self::Response(r) => {
                w.put(&r.target)?;
                w.u32(r.message_id);
                w.u8(r.result.as_u8());
                w.u64(r.sequence);
                w.bytes(r.data.as_bytes())?;
            }
            Self::StubConnect(c) => {
                w.put(&c.target)?;
                w.put(&c.client)?;
                w.u8(c.request_type.as_u8());
                w.u8(c.status.as_u8());
            }
            Self::ProxyConnect(c) => {
                w.put(&c.target)?;
                w.put(&c.server)?;
                w.u8(c.status.as_u8());
            }
            Self::Custom(_) => return Err(RpcError::NotRemote),
        }
        Ok(())
    }

    /// Reads a tagged wire body. Payloads come back as owned copies.
    pub fn read_wire(r: &mut Reader<'_>) -> Result<Self> {
        let tag = WireTag::from_u32(r.u32()?)?;
        let body = match tag {
            WireTag::ServiceRequest => Self::Request(RequestEvent {
                target: r.get()?,
                source: r.get()?,
                request_type: RequestType::decode(r.u8()?)?,
                message_id: r.u32()?,
                sequence: r.u64()?,
                data: EventData::external(r.bytes()?),
            }),
            WireTag::NotifyRequest => Self::NotifyRequest(NotifyRequestEvent {
                target: r.get()?,
                source: r.get()?,
                request_type: RequestType::decode(r.u8()?)?,
                message_id: r.u32()?,
            }),
            WireTag::ServiceResponse => Self::Response(ResponseEvent {
                target: r.get()?,
                message_id: r.u32()?,
                result: ResultType::decode(r.u8()?)?,
                sequence: r.u64()?,
                data: EventData::external(r.bytes()?),
            }),
            WireTag::StubConnect => Self::StubConnect(StubConnectEvent {
                target: r.get()?,
                client: r.get()?,
                request_type: RequestType::decode(r.u8()?)?,
                status: ServiceConnection::decode(r.u8()?)?,
            }),
            WireTag::ProxyConnect => Self::ProxyConnect(ProxyConnectEvent {
                target: r.get()?,
                server: r.get()?,
                status: ServiceConnection::decode(r.u8()?)?,
            }),
        };
        Ok(body)
    }
}
