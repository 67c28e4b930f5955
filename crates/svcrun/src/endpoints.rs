//! Registry of the stubs and proxies living in this process.
//!
//! The dispatchers own the endpoint state; this registry only knows which
//! endpoints exist, so that inbound router traffic can be resolved and a
//! proxy can be shared by several owners.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use svcrpc::Channel;
use svcrpc::InterfaceShape;
use svcrpc::ProxyAddress;
use svcrpc::StubAddress;
use svcrpc::TargetLookup;

use crate::error::Error;
use crate::error::Result;
use crate::proxy::ProxyShared;

struct ProxyRecord {
    shared: Arc<ProxyShared>,
    refs: usize,
    next_owner: u64,
}

#[derive(Default)]
struct Endpoints {
    stubs: HashMap<StubAddress, StubAddress>,
    proxies: HashMap<ProxyAddress, ProxyRecord>,
}

#[derive(Default)]
pub(crate) struct EndpointRegistry {
    inner: Mutex<Endpoints>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Endpoints> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a stub. One service and role may be provided once per process.
    pub(crate) fn add_stub(&self, address: StubAddress) -> Result<()> {
        let mut inner = self.lock();
        if inner.stubs.keys().any(|s| s.service() == address.service()) {
            return Err(Error::DuplicateStub(address.to_path()));
        }
        inner.stubs.insert(address.clone(), address);
        Ok(())
    }

    pub(crate) fn remove_stub(&self, address: &StubAddress) -> Option<StubAddress> {
        self.lock().stubs.remove(address)
    }

    /// Returns the shared proxy state, a fresh owner id, and whether the proxy
    /// was just created.
    pub(crate) fn acquire_proxy(
        &self,
        address: ProxyAddress,
        shape: Arc<InterfaceShape>,
    ) -> (Arc<ProxyShared>, u64, bool) {
        let mut inner = self.lock();
        let mut created = false;
        let record = inner.proxies.entry(address.clone()).or_insert_with(|| {
            created = true;
            ProxyRecord { shared: Arc::new(ProxyShared::new(address, shape)), refs: 0, next_owner: 1 }
        });
        record.refs += 1;
        let owner = record.next_owner;
        record.next_owner += 1;
        (record.shared.clone(), owner, created)
    }

    /// Drops one owner and returns how many are left. The record goes away
    /// with the last owner.
    pub(crate) fn release_proxy(&self, address: &ProxyAddress) -> usize {
        let mut inner = self.lock();
        let Some(record) = inner.proxies.get_mut(address) else {
            return 0;
        };
        record.refs = record.refs.saturating_sub(1);
        let left = record.refs;
        if left == 0 {
            inner.proxies.remove(address);
        }
        left
    }

    pub(crate) fn stubs_on_thread(&self, thread: &str) -> Vec<StubAddress> {
        self.lock().stubs.values().filter(|s| s.thread() == thread).cloned().collect()
    }

    /// Drops every proxy record on a thread regardless of owners.
    pub(crate) fn purge_proxies_on_thread(&self, thread: &str) -> Vec<ProxyAddress> {
        let mut inner = self.lock();
        let gone = inner.proxies.keys().filter(|p| p.thread() == thread).cloned().collect::<Vec<_>>();
        for proxy in &gone {
            inner.proxies.remove(proxy);
        }
        gone
    }
}

impl TargetLookup for EndpointRegistry {
    fn find_stub(&self, stub: &StubAddress) -> Option<Channel> {
        self.lock().stubs.get(stub).map(|s| *s.channel())
    }

    fn find_proxy(&self, proxy: &ProxyAddress) -> Option<(Channel, Arc<InterfaceShape>)> {
        self.lock().proxies.get(proxy).map(|r| (*r.shared.address.channel(), r.shared.shape.clone()))
    }
}
