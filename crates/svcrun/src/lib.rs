//! # Svcrun
//!
//! The runtime half of the service framework: dispatcher threads, the service
//! manager that pairs stubs with proxies, and the client link to the message
//! router.
//!
//! ## Architecture
//!
//! - `runtime::ServiceRuntime` owns everything below and is the entry point.
//! - `dispatcher` runs one event loop per named thread; stubs, proxies and
//!   custom consumers live on exactly one of them.
//! - `manager` serializes every registration change through one command
//!   queue and keeps the `server_list`.
//! - `router_client` mirrors public endpoints to the router and turns remote
//!   frames into local events and back.
//!
//! Failures to deliver never raise errors at the sender. A call that cannot
//! reach its stub returns to the proxy as a response with
//! `ResultType::MessageUndelivered`.

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod manager;
pub mod mock_transport;
pub mod proxy;
pub mod queue;
pub mod router_client;
pub mod runtime;
pub mod server_list;
pub mod stub;
pub mod threads;
pub mod transport;

pub use config::Config;
pub use config::ConfigError;
pub use config::RouterConfig;
pub use consumer::CustomEventConsumer;
pub use consumer::ProxyEventConsumer;
pub use consumer::ServiceConnectionConsumer;
pub use consumer::ServiceRegisterConsumer;
pub use consumer::StubEventConsumer;
pub use error::Error;
pub use error::Result;
pub use proxy::Proxy;
pub use router_client::ConnectionState;
pub use runtime::ServiceRuntime;
pub use runtime::ServiceRuntimeBuilder;
pub use server_list::ClientInfo;
pub use server_list::ServerInfo;
pub use stub::Stub;
pub use transport::Connector;
pub use transport::TcpConnector;
pub use transport::TcpTransport;
pub use transport::Transport;
