//! # Thread Registry
//!
//! Maps dispatcher names and ids to their handles, and posts events to the
//! dispatcher (or the router) an event is addressed to.
//!
//! ## Invariants
//! - Names and ids are unique among running dispatchers.
//! - Ids are never reused within one runtime.
//! - A post to a missing dispatcher is dropped and reported as `false`; it
//!   never errors.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use svcrpc::DispatcherId;
use svcrpc::Event;
use svcrpc::EventBody;
use tracing::debug;

use crate::dispatcher::DispatcherHandle;
use crate::error::Error;
use crate::error::Result;
use crate::router_client::RouterClient;

pub(crate) struct ThreadRegistry {
    by_name: DashMap<String, DispatcherHandle>,
    by_id: DashMap<DispatcherId, String>,
    next_id: AtomicU64,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self { by_name: DashMap::new(), by_id: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    pub(crate) fn next_id(&self) -> DispatcherId {
        DispatcherId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(&self, handle: DispatcherHandle) -> Result<()> {
        match self.by_name.entry(handle.name().to_string()) {
            Entry::Occupied(_) => Err(Error::ThreadExists(handle.name().to_string())),
            Entry::Vacant(slot) => {
                self.by_id.insert(handle.id(), handle.name().to_string());
                slot.insert(handle);
                Ok(())
            }
        }
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<DispatcherHandle> {
        self.by_name.get(name).map(|h| h.clone())
    }

    pub(crate) fn find_by_id(&self, id: DispatcherId) -> Option<DispatcherHandle> {
        let name = self.by_id.get(&id)?.clone();
        self.find_by_name(&name)
    }

    pub(crate) fn remove(&self, name: &str) -> Option<DispatcherHandle> {
        let (_, handle) = self.by_name.remove(name)?;
        self.by_id.remove(&handle.id());
        Some(handle)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.by_name.iter().map(|e| e.key().clone()).collect()
    }
}

/// Queues an event on the dispatcher it targets, binding the dispatcher id
/// into the header on first use.
pub(crate) fn deliver_event(threads: &ThreadRegistry, mut event: Event) -> bool {
    let handle = match event.header.target_thread {
        Some(id) => threads.find_by_id(id),
        None => threads.find_by_name(event.target_thread_name()),
    };
    let Some(handle) = handle else {
        debug!(thread = event.target_thread_name(), message_id = event.message_id(), "No dispatcher for event");
        return false;
    };
    event.header.target_thread = Some(handle.id());
    handle.post(event)
}

/// Whether the event is addressed to an endpoint in another process.
fn targets_remote(body: &EventBody) -> bool {
    match body {
        EventBody::Request(r) => r.target.is_remote(),
        EventBody::NotifyRequest(r) => r.target.is_remote(),
        EventBody::Response(r) => r.target.is_remote(),
        EventBody::StubConnect(c) => c.target.is_remote(),
        EventBody::ProxyConnect(c) => c.target.is_remote(),
        EventBody::Custom(_) => false,
    }
}

/// Routes events from stubs and proxies to their destination.
#[derive(Clone)]
pub(crate) struct Poster {
    threads: Arc<ThreadRegistry>,
    router: RouterClient,
}

impl Poster {
    pub(crate) fn new(threads: Arc<ThreadRegistry>, router: RouterClient) -> Self {
        Self { threads, router }
    }

    /// Posts an event. Remote targets go through the router client, which
    /// answers failed requests with an undelivered response itself.
    pub(crate) fn post(&self, event: Event) -> bool {
        if targets_remote(&event.body) {
            let priority = event.priority();
            self.router.send_event(Event::remote(event.body).with_priority(priority));
            return true;
        }
        deliver_event(&self.threads, event)
    }
}
