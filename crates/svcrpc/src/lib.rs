//! # Svcrpc
//!
//! The protocol half of the service framework: who a service is, what travels
//! between stubs and proxies, and how it looks on the wire.
//!
//! ## Architecture
//!
//! - `address` names services and their endpoints, with path strings and
//!   stream encoding.
//! - `ids` splits the flat message-id space into disjoint sub-ranges.
//! - `interface` replaces per-interface generated types with a name/id table.
//! - `event` is the closed event model every dispatcher consumes.
//! - `message`, `system` and `factory` map events to router frames and back.
//!
//! Nothing here spawns tasks or holds locks; the runtime lives in `svcrun`.

pub mod address;
pub mod connection;
pub mod error;
pub mod event;
pub mod factory;
pub mod ids;
pub mod interface;
pub mod message;
pub mod system;

pub use address::Channel;
pub use address::ProxyAddress;
pub use address::ServiceAddress;
pub use address::ServiceItem;
pub use address::ServiceType;
pub use address::StubAddress;
pub use address::Version;
pub use connection::DisconnectReason;
pub use connection::RequestType;
pub use connection::ResultType;
pub use connection::ServiceConnection;
pub use connection::ServiceRequestType;
pub use error::Result;
pub use error::RpcError;
pub use event::CustomEvent;
pub use event::Event;
pub use event::EventBody;
pub use event::EventData;
pub use event::NotifyRequestEvent;
pub use event::Priority;
pub use event::ProxyConnectEvent;
pub use event::RequestEvent;
pub use event::ResponseEvent;
pub use event::StubConnectEvent;
pub use factory::RemoteEventFactory;
pub use factory::TargetLookup;
pub use ids::Cookie;
pub use ids::DispatcherId;
pub use ids::MessageId;
pub use interface::InterfaceShape;
pub use message::RemoteMessage;
pub use system::Endpoint;
pub use system::Registration;
pub use system::SystemMessage;
