//! # Dispatcher
//!
//! A named event loop. Every stub, proxy and custom consumer is owned by
//! exactly one dispatcher and only ever runs on it, so consumer hooks never
//! need locks.
//!
//! ## Lifecycle
//!
//! `spawn` registers the handle, starts the task and waits until the loop is
//! running. `stop` closes the queue; the loop drains what is already queued
//! and then signals its exit.
//!
//! Attach and detach jobs travel through the same queue at `Critical`
//! priority, so they are ordered against each other and served before
//! ordinary events.

use std::collections::HashMap;
use std::sync::Arc;

use svcrpc::CustomEvent;
use svcrpc::DispatcherId;
use svcrpc::Event;
use svcrpc::EventBody;
use svcrpc::Priority;
use svcrpc::ProxyAddress;
use svcrpc::RequestType;
use svcrpc::ServiceConnection;
use svcrpc::StubAddress;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use crate::consumer::CustomEventConsumer;
use crate::consumer::ProxyEventConsumer;
use crate::consumer::StubEventConsumer;
use crate::consumer::dispatch_proxy_event;
use crate::consumer::dispatch_stub_event;
use crate::error::Error;
use crate::error::Result;
use crate::proxy::ProxyShared;
use crate::proxy::notify_request;
use crate::queue::PriorityQueue;
use crate::stub::Stub;
use crate::threads::Poster;
use crate::threads::ThreadRegistry;

pub(crate) enum Job {
    Event(Event),
    AttachStub { stub: Stub, consumer: Box<dyn StubEventConsumer> },
    DetachStub(StubAddress),
    AttachProxy { shared: Arc<ProxyShared>, owner: u64, consumer: Box<dyn ProxyEventConsumer> },
    DetachProxy { address: ProxyAddress, owner: u64 },
    AttachCustom { id: u32, consumer: Box<dyn CustomEventConsumer> },
    DetachCustom(u32),
}

#[derive(Clone)]
pub(crate) struct DispatcherHandle {
    id: DispatcherId,
    name: Arc<str>,
    queue: Arc<PriorityQueue<Job>>,
    exit: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl DispatcherHandle {
    pub(crate) fn id(&self) -> DispatcherId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Queues an event at its own priority. `false` once the dispatcher stopped.
    pub(crate) fn post(&self, event: Event) -> bool {
        let priority = event.priority();
        self.queue.push(Job::Event(event), priority).is_ok()
    }

    fn send_job(&self, job: Job) -> bool {
        let ok = self.queue.push(job, Priority::Critical).is_ok();
        if !ok {
            debug!(thread = %self.name, "Dispatcher stopped, job dropped");
        }
        ok
    }

    pub(crate) fn attach_stub(&self, stub: Stub, consumer: Box<dyn StubEventConsumer>) -> bool {
        self.send_job(Job::AttachStub { stub, consumer })
    }

    pub(crate) fn detach_stub(&self, address: StubAddress) -> bool {
        self.send_job(Job::DetachStub(address))
    }

    pub(crate) fn attach_proxy(
        &self,
        shared: Arc<ProxyShared>,
        owner: u64,
        consumer: Box<dyn ProxyEventConsumer>,
    ) -> bool {
        self.send_job(Job::AttachProxy { shared, owner, consumer })
    }

    pub(crate) fn detach_proxy(&self, address: ProxyAddress, owner: u64) -> bool {
        self.send_job(Job::DetachProxy { address, owner })
    }

    pub(crate) fn attach_custom(&self, id: u32, consumer: Box<dyn CustomEventConsumer>) -> bool {
        self.send_job(Job::AttachCustom { id, consumer })
    }

    pub(crate) fn detach_custom(&self, id: u32) -> bool {
        self.send_job(Job::DetachCustom(id))
    }

    /// Closes the queue and waits until the loop drained it.
    pub(crate) async fn stop(&self) {
        self.queue.close();
        let exit = self.exit.lock().await.take();
        if let Some(exit) = exit {
            let _ = exit.await;
        }
    }
}

/// Starts a dispatcher named `name` and registers it.
pub(crate) async fn spawn(name: &str, threads: &ThreadRegistry, poster: Poster) -> Result<DispatcherHandle> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let handle = DispatcherHandle {
        id: threads.next_id(),
        name: Arc::from(name),
        queue: Arc::new(PriorityQueue::new()),
        exit: Arc::new(Mutex::new(Some(exit_rx))),
    };
    threads.insert(handle.clone())?;

    let queue = handle.queue.clone();
    let mut state = DispatcherState::new(handle.name.clone(), poster);
    tokio::spawn(async move {
        let _ = ready_tx.send(());
        while let Some(job) = queue.pop().await {
            state.handle_job(job);
        }
        trace!(thread = %state.name, "Dispatcher loop finished");
        let _ = exit_tx.send(());
    });

    ready_rx.await.map_err(|_| Error::Handshake(name.to_string()))?;
    debug!(thread = name, id = %handle.id, "Dispatcher started");
    Ok(handle)
}

struct ProxySlot {
    shared: Arc<ProxyShared>,
    consumers: Vec<(u64, Box<dyn ProxyEventConsumer>)>,
}

struct DispatcherState {
    name: Arc<str>,
    poster: Poster,
    stubs: HashMap<StubAddress, (Stub, Box<dyn StubEventConsumer>)>,
    proxies: HashMap<ProxyAddress, ProxySlot>,
    custom: HashMap<u32, Box<dyn CustomEventConsumer>>,
}

impl DispatcherState {
    fn new(name: Arc<str>, poster: Poster) -> Self {
        Self { name, poster, stubs: HashMap::new(), proxies: HashMap::new(), custom: HashMap::new() }
    }

    fn handle_job(&mut self, job: Job) {
        match job {
            Job::Event(event) => self.handle_event(event),
            Job::AttachStub { stub, consumer } => {
                self.stubs.insert(stub.address().clone(), (stub, consumer));
            }
            Job::DetachStub(address) => {
                self.stubs.remove(&address);
            }
            Job::AttachProxy { shared, owner, mut consumer } => {
                if let Some(server) = shared.server() {
                    consumer.service_connected(&server, ServiceConnection::Connected);
                }
                let slot = self
                    .proxies
                    .entry(shared.address.clone())
                    .or_insert_with(|| ProxySlot { shared: shared.clone(), consumers: Vec::new() });
                slot.consumers.push((owner, consumer));
            }
            Job::DetachProxy { address, owner } => {
                if let Some(slot) = self.proxies.get_mut(&address) {
                    slot.consumers.retain(|(o, _)| *o != owner);
                    if slot.consumers.is_empty() {
                        self.proxies.remove(&address);
                    }
                }
            }
            Job::AttachCustom { id, consumer } => {
                self.custom.insert(id, consumer);
            }
            Job::DetachCustom(id) => {
                self.custom.remove(&id);
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match &event.body {
            EventBody::Request(r) => self.to_stub(&r.target.clone(), event),
            EventBody::NotifyRequest(r) => self.to_stub(&r.target.clone(), event),
            EventBody::StubConnect(c) => self.to_stub(&c.target.clone(), event),
            EventBody::Response(r) => self.to_proxy(&r.target.clone(), event),
            EventBody::ProxyConnect(c) => self.to_proxy(&c.target.clone(), event),
            EventBody::Custom(_) => {
                if let EventBody::Custom(custom) = event.body {
                    self.to_custom(custom);
                }
            }
        }
    }

    fn to_stub(&mut self, target: &StubAddress, event: Event) {
        let Some((stub, consumer)) = self.stubs.get_mut(target) else {
            trace!(thread = %self.name, stub = %target, "No stub for event");
            return;
        };
        dispatch_stub_event(stub, consumer.as_mut(), event);
    }

    fn to_proxy(&mut self, target: &ProxyAddress, event: Event) {
        let Some(slot) = self.proxies.get_mut(target) else {
            trace!(thread = %self.name, proxy = %target, "No proxy for event");
            return;
        };

        let reconnected = match &event.body {
            EventBody::ProxyConnect(c) if c.status.is_connected() => Some(c.server.clone()),
            _ => None,
        };
        dispatch_proxy_event(&slot.shared, &mut slot.consumers, event);

        if let Some(server) = reconnected {
            for message_id in slot.shared.notifications() {
                let request = notify_request(&slot.shared.address, &server, message_id, RequestType::StartNotify);
                self.poster.post(request);
            }
        }
    }

    fn to_custom(&mut self, event: CustomEvent) {
        match self.custom.get_mut(&event.id) {
            Some(consumer) => consumer.process_event(event),
            None => trace!(thread = %self.name, id = event.id, "No consumer for custom event"),
        }
    }
}
