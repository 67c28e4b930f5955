//! # Service Registry
//!
//! The router's view of every public stub and proxy across all connected
//! processes. Each service address pairs at most one stub with the proxies
//! waiting for it.
//!
//! ## Invariants
//!
//! - Every endpoint carries the cookie of the connection it arrived on.
//! - Two endpoints of the same cookie are never paired by a notice; their
//!   process already pairs them locally.
//! - `remove_cookie` leaves nothing behind that belongs to that cookie.

use std::collections::HashMap;

use svcrpc::Cookie;
use svcrpc::DisconnectReason;
use svcrpc::ProxyAddress;
use svcrpc::Registration;
use svcrpc::ServiceAddress;
use svcrpc::StubAddress;
use tracing::debug;
use tracing::warn;

/// A registration the router must push to the process owning `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub to: Cookie,
    pub registration: Registration,
}

#[derive(Debug, Default)]
struct Entry {
    stub: Option<StubAddress>,
    proxies: Vec<ProxyAddress>,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.stub.is_none() && self.proxies.is_empty()
    }
}

fn cookie_of_stub(stub: &StubAddress) -> Cookie {
    stub.channel().cookie
}

fn cookie_of_proxy(proxy: &ProxyAddress) -> Cookie {
    proxy.channel().cookie
}

fn same_stub(a: &StubAddress, b: &StubAddress) -> bool {
    a == b && cookie_of_stub(a) == cookie_of_stub(b)
}

fn same_proxy(a: &ProxyAddress, b: &ProxyAddress) -> bool {
    a == b && cookie_of_proxy(a) == cookie_of_proxy(b)
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<ServiceAddress, Entry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of services with a stub or at least one proxy.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn find_stub(&self, service: &ServiceAddress) -> Option<&StubAddress> {
        self.services.get(service).and_then(|e| e.stub.as_ref())
    }

    pub fn proxies(&self, service: &ServiceAddress) -> &[ProxyAddress] {
        self.services.get(service).map(|e| e.proxies.as_slice()).unwrap_or(&[])
    }

    /// Adds a provider and pairs it with the proxies of other processes.
    /// A second provider for the same service is refused.
    pub fn register_stub(&mut self, stub: StubAddress) -> Vec<Notice> {
        let entry = self.services.entry(stub.service().clone()).or_default();
        if let Some(existing) = &entry.stub {
            if !same_stub(existing, &stub) {
                warn!(stub = %stub, existing = %existing, "Service already has a provider");
            }
            return Vec::new();
        }

        let cookie = cookie_of_stub(&stub);
        let mut notices = Vec::new();
        for proxy in entry.proxies.iter().filter(|p| cookie_of_proxy(p) != cookie) {
            notices.push(Notice { to: cookie_of_proxy(proxy), registration: Registration::register_stub(stub.clone()) });
            notices.push(Notice { to: cookie, registration: Registration::register_proxy(proxy.clone()) });
        }
        debug!(stub = %stub, paired = notices.len() / 2, "Stub registered");
        entry.stub = Some(stub);
        notices
    }

    pub fn register_proxy(&mut self, proxy: ProxyAddress) -> Vec<Notice> {
        let entry = self.services.entry(proxy.service().clone()).or_default();
        if entry.proxies.iter().any(|p| same_proxy(p, &proxy)) {
            return Vec::new();
        }

        let cookie = cookie_of_proxy(&proxy);
        let mut notices = Vec::new();
        if let Some(stub) = entry.stub.as_ref().filter(|s| cookie_of_stub(s) != cookie) {
            notices.push(Notice { to: cookie_of_stub(stub), registration: Registration::register_proxy(proxy.clone()) });
            notices.push(Notice { to: cookie, registration: Registration::register_stub(stub.clone()) });
        }
        debug!(proxy = %proxy, "Proxy registered");
        entry.proxies.push(proxy);
        notices
    }

    pub fn unregister_stub(&mut self, stub: &StubAddress, reason: DisconnectReason) -> Vec<Notice> {
        let Some(entry) = self.services.get_mut(stub.service()) else {
            return Vec::new();
        };
        let Some(registered) = entry.stub.take_if(|s| same_stub(s, stub)) else {
            debug!(stub = %stub, "Unregistering unknown stub");
            return Vec::new();
        };

        let cookie = cookie_of_stub(&registered);
        let notices = entry
            .proxies
            .iter()
            .filter(|p| cookie_of_proxy(p) != cookie)
            .map(|p| Notice {
                to: cookie_of_proxy(p),
                registration: Registration::unregister_stub(registered.clone(), reason),
            })
            .collect();
        self.prune(stub.service());
        notices
    }

    pub fn unregister_proxy(&mut self, proxy: &ProxyAddress, reason: DisconnectReason) -> Vec<Notice> {
        let Some(entry) = self.services.get_mut(proxy.service()) else {
            return Vec::new();
        };
        let Some(pos) = entry.proxies.iter().position(|p| same_proxy(p, proxy)) else {
            debug!(proxy = %proxy, "Unregistering unknown proxy");
            return Vec::new();
        };
        let registered = entry.proxies.remove(pos);

        let cookie = cookie_of_proxy(&registered);
        let notices = entry
            .stub
            .iter()
            .filter(|s| cookie_of_stub(s) != cookie)
            .map(|s| Notice {
                to: cookie_of_stub(s),
                registration: Registration::unregister_proxy(registered.clone(), reason),
            })
            .collect();
        self.prune(proxy.service());
        notices
    }

    /// Drops every endpoint owned by `cookie` and tells their counterparts.
    pub fn remove_cookie(&mut self, cookie: Cookie, reason: DisconnectReason) -> Vec<Notice> {
        let stubs: Vec<StubAddress> =
            self.services.values().filter_map(|e| e.stub.clone()).filter(|s| cookie_of_stub(s) == cookie).collect();
        let proxies: Vec<ProxyAddress> = self
            .services
            .values()
            .flat_map(|e| e.proxies.iter().cloned())
            .filter(|p| cookie_of_proxy(p) == cookie)
            .collect();

        let mut notices = Vec::new();
        for proxy in &proxies {
            notices.extend(self.unregister_proxy(proxy, reason));
        }
        for stub in &stubs {
            notices.extend(self.unregister_stub(stub, reason));
        }
        debug!(cookie, stubs = stubs.len(), proxies = proxies.len(), "Cookie purged");
        notices
    }

    fn prune(&mut self, service: &ServiceAddress) {
        if self.services.get(service).is_some_and(Entry::is_empty) {
            self.services.remove(service);
        }
    }
}
