//! # Svcroute
//!
//! The message router that lets svcrun processes reach each other's public
//! services. Every process keeps one connection to the router; the router
//! assigns it a cookie, brokers stub and proxy registrations between
//! cookies, and forwards service frames by their target cookie.
//!
//! ## Architecture
//!
//! - `registry::ServiceRegistry` pairs stubs with proxies across cookies and
//!   says who must be told.
//! - `server::RouterServer` owns the connections and the registry, and turns
//!   socket loss into unregister notices for the other side.

pub mod registry;
pub mod server;

pub use registry::Notice;
pub use registry::ServiceRegistry;
pub use server::RouterServer;
