//! # Identifier Space
//!
//! Cookies, dispatcher ids, sequence numbers and the flat message-id space.
//!
//! The message-id space is split into disjoint sub-ranges. Interface-local
//! ids are offsets into the attribute, response and request ranges; the
//! service-internal range holds the reserved system ids.

/// Identifies a process link (local, router, or a router-assigned peer id).
pub type Cookie = u64;

/// Cookie not assigned yet.
pub const COOKIE_UNKNOWN: Cookie = 0;
/// Cookie of anything living in this process.
pub const COOKIE_LOCAL: Cookie = 1;
/// Cookie of the router itself.
pub const COOKIE_ROUTER: Cookie = 2;
/// First cookie the router hands out to connecting processes.
pub const COOKIE_FIRST_REMOTE: Cookie = 256;

/// Channel source/target id that has not been resolved.
pub const SOURCE_UNKNOWN: u64 = 0;

/// Sequence number of pure notifications, never correlated with a call.
pub const SEQUENCE_NUMBER_NOTIFY: u64 = 0;
/// Wildcard sequence number.
pub const SEQUENCE_NUMBER_ANY: u64 = u64::MAX;

/// Strong type for dispatcher identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DispatcherId(pub u64);

impl std::fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispatcher-{}", self.0)
    }
}

pub type MessageId = u32;

pub const EMPTY_MESSAGE_ID: MessageId = 0;

pub const SERVICE_ID_FIRST: MessageId = 0x0000_0001;
pub const SERVICE_NOTIFY_CONNECTION: MessageId = 0x0000_0010;
pub const SYSTEM_SERVICE_REQUEST_REGISTER: MessageId = 0x0000_0020;
pub const SYSTEM_SERVICE_NOTIFY_REGISTER: MessageId = 0x0000_0021;
pub const SYSTEM_SERVICE_NOTIFY_CONNECTION: MessageId = 0x0000_0022;
pub const SYSTEM_SERVICE_DISCONNECT: MessageId = 0x0000_0023;
pub const SERVICE_ID_LAST: MessageId = 0x0000_0FFF;

pub const ATTRIBUTE_ID_FIRST: MessageId = 0x0000_1000;
pub const ATTRIBUTE_ID_LAST: MessageId = 0x0000_1FFF;

pub const RESPONSE_ID_FIRST: MessageId = 0x0000_2000;
pub const RESPONSE_ID_LAST: MessageId = 0x0000_2FFF;

pub const REQUEST_ID_FIRST: MessageId = 0x0000_3000;
pub const REQUEST_ID_LAST: MessageId = 0x0000_3FFF;

/// The sub-range a message id falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Empty,
    ServiceInternal,
    Attribute,
    Response,
    Request,
    Invalid,
}

impl MessageClass {
    pub fn of(id: MessageId) -> Self {
        match id {
            EMPTY_MESSAGE_ID => Self::Empty,
            SERVICE_ID_FIRST..=SERVICE_ID_LAST => Self::ServiceInternal,
            ATTRIBUTE_ID_FIRST..=ATTRIBUTE_ID_LAST => Self::Attribute,
            RESPONSE_ID_FIRST..=RESPONSE_ID_LAST => Self::Response,
            REQUEST_ID_FIRST..=REQUEST_ID_LAST => Self::Request,
            _ => Self::Invalid,
        }
    }
}

pub fn is_request_id(id: MessageId) -> bool {
    MessageClass::of(id) == MessageClass::Request
}

pub fn is_response_id(id: MessageId) -> bool {
    MessageClass::of(id) == MessageClass::Response
}

pub fn is_attribute_id(id: MessageId) -> bool {
    MessageClass::of(id) == MessageClass::Attribute
}

/// True for the ids reserved for router/system traffic.
pub fn is_system_id(id: MessageId) -> bool {
    matches!(
        id,
        SYSTEM_SERVICE_REQUEST_REGISTER
            | SYSTEM_SERVICE_NOTIFY_REGISTER
            | SYSTEM_SERVICE_NOTIFY_CONNECTION
            | SYSTEM_SERVICE_DISCONNECT
    )
}

pub fn request_id(index: u32) -> MessageId {
    REQUEST_ID_FIRST + index
}

pub fn response_id(index: u32) -> MessageId {
    RESPONSE_ID_FIRST + index
}

pub fn attribute_id(index: u32) -> MessageId {
    ATTRIBUTE_ID_FIRST + index
}
