//! # Service Addressing
//!
//! Value types naming *what* a service is (`ServiceItem`), *which instance*
//! (`ServiceAddress`), and *where* a provider or consumer lives
//! (`StubAddress`/`ProxyAddress` with their owning thread and `Channel`).
//!
//! ## Path strings
//!
//! ```text
//! stub::<service>::<version>::<type>::<role>::<thread>::<cookie>.<source>.<target>
//! proxy::<service>::<version>::<type>::<role>::<thread>::<cookie>.<source>.<target>
//! ```
//!
//! Parsing keeps the cookie and resets source/target: those are assigned
//! locally on receipt and are never wire fields.
//!
//! ## Invariants
//! - Equality and hashing use the service fields, role and thread, never the
//!   channel. The magic number is derived from the same fields.
//! - An address is valid only while its channel is valid.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use svcpack::Pack;
use svcpack::Reader;
use svcpack::Unpack;
use svcpack::Writer;

use crate::ids::Cookie;
use crate::ids::COOKIE_LOCAL;
use crate::ids::COOKIE_UNKNOWN;
use crate::ids::SOURCE_UNKNOWN;

const PATH_SEPARATOR: &str = "::";
const STUB_TAG: &str = "stub";
const PROXY_TAG: &str = "proxy";

/// Interface version, `major.minor.patch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Accepts `"1"`, `"1.2"` and `"1.2.3"`; missing parts are zero.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::default()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Pack for Version {
    fn pack(&self, w: &mut Writer) -> svcpack::Result<()> {
        w.u32(self.major);
        w.u32(self.minor);
        w.u32(self.patch);
        Ok(())
    }
}

impl Unpack for Version {
    fn unpack(r: &mut Reader<'_>) -> svcpack::Result<Self> {
        Ok(Self { major: r.u32()?, minor: r.u32()?, patch: r.u32()? })
    }
}

/// Whether a service may be reached from other processes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServiceType {
    #[default]
    Unknown = 0x00,
    /// Reachable inside this process only.
    Local = 0x40,
    /// Routable to remote peers through the router.
    Public = 0x80,
}

impl ServiceType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Unknown),
            0x40 => Some(Self::Local),
            0x80 => Some(Self::Public),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Local => "local",
            Self::Public => "public",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "unknown" => Some(Self::Unknown),
            "local" => Some(Self::Local),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

/// Names an interface: what is offered, not who offers it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceItem {
    pub name: String,
    pub version: Version,
    pub service_type: ServiceType,
}

impl ServiceItem {
    pub fn new(name: impl Into<String>, version: Version, service_type: ServiceType) -> Self {
        Self { name: name.into(), version, service_type }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.version.is_valid() && self.service_type != ServiceType::Unknown
    }

    pub fn is_public(&self) -> bool {
        self.service_type == ServiceType::Public
    }

    /// Same interface name, version and type.
    pub fn is_service_compatible(&self, other: &ServiceItem) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.service_type == other.service_type
    }
}

impl Pack for ServiceItem {
    fn pack(&self, w: &mut Writer) -> svcpack::Result<()> {
        w.str(&self.name)?;
        w.put(&self.version)?;
        w.u8(self.service_type as u8);
        Ok(())
    }
}

impl Unpack for ServiceItem {
    fn unpack(r: &mut Reader<'_>) -> svcpack::Result<Self> {
        let name = r.get::<String>()?;
        let version = r.get::<Version>()?;
        // An unknown type byte degrades to an invalid item rather than a stream error.
        let service_type = ServiceType::from_u8(r.u8()?).unwrap_or_default();
        Ok(Self { name, version, service_type })
    }
}

/// A service item bound to a role, i.e. a concrete service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    pub item: ServiceItem,
    pub role: String,
}

impl ServiceAddress {
    pub fn new(item: ServiceItem, role: impl Into<String>) -> Self {
        Self { item, role: role.into() }
    }

    pub fn is_valid(&self) -> bool {
        self.item.is_valid() && !self.role.is_empty()
    }

    pub fn is_service_compatible(&self, item: &ServiceItem) -> bool {
        self.item.is_service_compatible(item)
    }

    /// Compatible interface and the same role.
    pub fn is_proxy_compatible(&self, other: &ServiceAddress) -> bool {
        self.role == other.role && self.item.is_service_compatible(&other.item)
    }
}

impl Pack for ServiceAddress {
    fn pack(&self, w: &mut Writer) -> svcpack::Result<()> {
        w.put(&self.item)?;
        w.str(&self.role)
    }
}

impl Unpack for ServiceAddress {
    fn unpack(r: &mut Reader<'_>) -> svcpack::Result<Self> {
        Ok(Self { item: r.get()?, role: r.get()? })
    }
}

/// `(cookie, source, target)` communication path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub cookie: Cookie,
    pub source: u64,
    pub target: u64,
}

impl Default for Channel {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Channel {
    pub fn new(cookie: Cookie, source: u64, target: u64) -> Self {
        Self { cookie, source, target }
    }

    pub fn invalid() -> Self {
        Self { cookie: COOKIE_UNKNOWN, source: SOURCE_UNKNOWN, target: SOURCE_UNKNOWN }
    }

    /// A channel on this process owned by the given dispatcher.
    pub fn local(source: u64) -> Self {
        Self { cookie: COOKIE_LOCAL, source, target: SOURCE_UNKNOWN }
    }

    pub fn is_valid(&self) -> bool {
        self.cookie != COOKIE_UNKNOWN && self.source != SOURCE_UNKNOWN
    }

    pub fn invalidate(&mut self) {
        *self = Self::invalid();
    }

    /// Parses `cookie.source.target`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let cookie = parts.next()?.parse().ok()?;
        let source = parts.next()?.parse().ok()?;
        let target = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { cookie, source, target })
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.cookie, self.source, self.target)
    }
}

fn compute_magic(tag: &str, service: &ServiceAddress, thread: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    service.item.name.hash(&mut hasher);
    (service.item.service_type as u8).hash(&mut hasher);
    service.role.hash(&mut hasher);
    thread.hash(&mut hasher);
    hasher.finish()
}

fn format_path(tag: &str, service: &ServiceAddress, thread: &str, channel: &Channel) -> String {
    let sep = PATH_SEPARATOR;
    format!(
        "{tag}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{thread}{sep}{channel}",
        service.item.name,
        service.item.version,
        service.item.service_type.as_str(),
        service.role,
    )
}

/// Splits a path into `(service, thread, cookie)` if its leading tag matches.
///
/// Paths are always written with the owning thread, since two threads may
/// hold endpoints of the same service. Paths without it are still read and
/// leave the thread empty.
fn parse_path(tag: &str, path: &str) -> Option<(ServiceAddress, String, Cookie)> {
    let parts: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    let (head, name, version, service_type, role, thread, channel) = match parts.as_slice() {
        [head, name, version, service_type, role, thread, channel] => {
            (head, name, version, service_type, role, *thread, channel)
        }
        [head, name, version, service_type, role, channel] => (head, name, version, service_type, role, "", channel),
        _ => return None,
    };
    if *head != tag {
        return None;
    }
    let item = ServiceItem::new(*name, Version::parse(version)?, ServiceType::parse(service_type)?);
    let channel = Channel::parse(channel)?;
    Some((ServiceAddress::new(item, *role), thread.to_string(), channel.cookie))
}

macro_rules! endpoint_address {
    ($name:ident, $tag:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone)]
        pub struct $name {
            service: ServiceAddress,
            thread: String,
            channel: Channel,
            magic: u64,
        }

        impl Default for $name {
            fn default() -> Self {
                Self::with_service(ServiceAddress::default(), String::new())
            }
        }

        impl $name {
            pub fn new(item: ServiceItem, role: impl Into<String>, thread: impl Into<String>) -> Self {
                Self::with_service(ServiceAddress::new(item, role), thread.into())
            }

            pub fn with_service(service: ServiceAddress, thread: String) -> Self {
                let magic = compute_magic($tag, &service, &thread);
                Self { service, thread, channel: Channel::invalid(), magic }
            }

            pub fn service(&self) -> &ServiceAddress {
                &self.service
            }

            pub fn item(&self) -> &ServiceItem {
                &self.service.item
            }

            pub fn role(&self) -> &str {
                &self.service.role
            }

            pub fn thread(&self) -> &str {
                &self.thread
            }

            pub fn channel(&self) -> &Channel {
                &self.channel
            }

            pub fn magic(&self) -> u64 {
                self.magic
            }

            pub fn set_channel(&mut self, channel: Channel) {
                self.channel = channel;
            }

            pub fn set_cookie(&mut self, cookie: Cookie) {
                self.channel.cookie = cookie;
            }

            pub fn with_channel(mut self, channel: Channel) -> Self {
                self.channel = channel;
                self
            }

            pub fn invalidate(&mut self) {
                self.channel.invalidate();
            }

            /// Valid only after the owning thread resolved a channel.
            pub fn is_valid(&self) -> bool {
                self.channel.is_valid()
            }

            pub fn is_public(&self) -> bool {
                self.service.item.is_public()
            }

            /// Lives in this process.
            pub fn is_local(&self) -> bool {
                self.channel.cookie == COOKIE_LOCAL
            }

            /// Lives in another process reached through the router.
            pub fn is_remote(&self) -> bool {
                self.channel.cookie != COOKIE_LOCAL && self.channel.cookie != COOKIE_UNKNOWN
            }

            pub fn is_service_compatible(&self, item: &ServiceItem) -> bool {
                self.service.is_service_compatible(item)
            }

            pub fn to_path(&self) -> String {
                format_path($tag, &self.service, &self.thread, &self.channel)
            }

            /// Parses a path; a mismatching tag or malformed path yields the
            /// default (invalid) address.
            pub fn from_path(path: &str) -> Self {
                match parse_path($tag, path) {
                    Some((service, thread, cookie)) => {
                        let mut address = Self::with_service(service, thread);
                        address.channel.cookie = cookie;
                        address
                    }
                    None => Self::default(),
                }
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.magic == other.magic && self.service == other.service && self.thread == other.thread
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.magic.hash(state);
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_path())
            }
        }

        impl Pack for $name {
            fn pack(&self, w: &mut Writer) -> svcpack::Result<()> {
                w.put(&self.service)?;
                w.str(&self.thread)?;
                w.u64(self.channel.cookie);
                Ok(())
            }
        }

        impl Unpack for $name {
            fn unpack(r: &mut Reader<'_>) -> svcpack::Result<Self> {
                let service = r.get::<ServiceAddress>()?;
                let thread = r.get::<String>()?;
                let cookie = r.u64()?;
                let mut address = Self::with_service(service, thread);
                address.channel.cookie = cookie;
                Ok(address)
            }
        }
    };
}

endpoint_address!(StubAddress, STUB_TAG, "Address of a service provider owned by a dispatcher thread.");
endpoint_address!(ProxyAddress, PROXY_TAG, "Address of a service consumer owned by a dispatcher thread.");

impl StubAddress {
    /// The proxy belongs to this stub: same interface and the same role.
    pub fn is_proxy_compatible(&self, proxy: &ProxyAddress) -> bool {
        self.service.is_proxy_compatible(&proxy.service)
    }
}

impl ProxyAddress {
    pub fn is_stub_compatible(&self, stub: &StubAddress) -> bool {
        stub.is_proxy_compatible(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> ServiceItem {
        ServiceItem::new("Calc", Version::new(1, 0, 0), ServiceType::Public)
    }

    #[test]
    fn test_version_parse_forms() {
        assert_eq!(Version::parse("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(Version::parse("1.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(Version::parse("2.3.4"), Some(Version::new(2, 3, 4)));
        assert_eq!(Version::parse("1.x"), None);
        assert_eq!(Version::parse("1.2.3.4"), None);
    }

    #[test]
    fn test_stub_path_roundtrip_keeps_cookie_resets_source() {
        let stub = StubAddress::new(calc(), "MainCalc", "WorkerThread").with_channel(Channel::new(300, 7, 9));
        let path = stub.to_path();
        assert_eq!(path, "stub::Calc::1.0.0::public::MainCalc::WorkerThread::300.7.9");

        let back = StubAddress::from_path(&path);
        assert_eq!(back, stub);
        assert_eq!(back.magic(), stub.magic());
        assert_eq!(back.channel().cookie, 300);
        assert_eq!(back.channel().source, SOURCE_UNKNOWN);
        assert_eq!(back.channel().target, SOURCE_UNKNOWN);
    }

    #[test]
    fn test_proxy_path_roundtrip() {
        let proxy = ProxyAddress::new(calc(), "MainCalc", "ClientThread").with_channel(Channel::local(4));
        let back = ProxyAddress::from_path(&proxy.to_path());
        assert_eq!(back, proxy);
        assert_eq!(back.thread(), "ClientThread");
        assert!(back.is_local());
    }

    #[test]
    fn test_path_without_thread_is_accepted() {
        let proxy = ProxyAddress::from_path("proxy::Calc::1.0.0::public::MainCalc::300.0.0");
        assert_eq!(proxy.thread(), "");
        assert_eq!(proxy.role(), "MainCalc");
        assert_eq!(proxy.channel().cookie, 300);
        assert!(proxy.is_service_compatible(&calc()));
    }

    #[test]
    fn test_wrong_tag_yields_invalid_address() {
        let proxy = ProxyAddress::new(calc(), "MainCalc", "ClientThread").with_channel(Channel::local(4));
        let parsed = StubAddress::from_path(&proxy.to_path());
        assert_eq!(parsed, StubAddress::default());
        assert!(!parsed.is_valid());
        assert!(parsed.item().name.is_empty());
    }

    #[test]
    fn test_malformed_path_yields_invalid_address() {
        assert_eq!(StubAddress::from_path("stub::Calc"), StubAddress::default());
        assert_eq!(StubAddress::from_path("stub::Calc::x::public::r::t::1.2.3"), StubAddress::default());
    }

    #[test]
    fn test_validity_follows_channel() {
        let mut stub = StubAddress::new(calc(), "MainCalc", "WorkerThread");
        assert!(!stub.is_valid());
        stub.set_channel(Channel::local(3));
        assert!(stub.is_valid());
        stub.invalidate();
        assert!(!stub.is_valid());
    }

    #[test]
    fn test_proxy_compatibility_requires_role() {
        let stub = StubAddress::new(calc(), "MainCalc", "WorkerThread");
        let same_role = ProxyAddress::new(calc(), "MainCalc", "AnyThread");
        let other_role = ProxyAddress::new(calc(), "OtherCalc", "AnyThread");
        let other_version = ProxyAddress::new(
            ServiceItem::new("Calc", Version::new(2, 0, 0), ServiceType::Public),
            "MainCalc",
            "AnyThread",
        );

        assert!(stub.is_proxy_compatible(&same_role));
        assert!(same_role.is_stub_compatible(&stub));
        assert!(!stub.is_proxy_compatible(&other_role));
        assert!(!stub.is_proxy_compatible(&other_version));
        assert!(stub.is_service_compatible(other_role.item()));
    }

    #[test]
    fn test_equality_ignores_channel() {
        let a = StubAddress::new(calc(), "MainCalc", "WorkerThread").with_channel(Channel::local(1));
        let b = StubAddress::new(calc(), "MainCalc", "WorkerThread").with_channel(Channel::new(400, 2, 3));
        assert_eq!(a, b);
        let c = StubAddress::new(calc(), "MainCalc", "OtherThread");
        assert_ne!(a, c);
    }

    #[test]
    fn test_stream_writes_cookie_only() {
        let stub = StubAddress::new(calc(), "MainCalc", "WorkerThread").with_channel(Channel::new(300, 7, 9));
        let mut w = Writer::new();
        w.put(&stub).unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let back: StubAddress = r.get().unwrap();
        assert!(r.is_empty());
        assert_eq!(back, stub);
        assert_eq!(*back.channel(), Channel::new(300, SOURCE_UNKNOWN, SOURCE_UNKNOWN));
    }
}
