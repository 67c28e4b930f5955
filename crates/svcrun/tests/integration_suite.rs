//! Integration tests for the svcrun runtime inside one process.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use svcrpc::CustomEvent;
use svcrpc::InterfaceShape;
use svcrpc::MessageId;
use svcrpc::NotifyRequestEvent;
use svcrpc::ProxyAddress;
use svcrpc::Registration;
use svcrpc::RequestEvent;
use svcrpc::RequestType;
use svcrpc::ResponseEvent;
use svcrpc::ResultType;
use svcrpc::ServiceConnection;
use svcrpc::ServiceType;
use svcrpc::StubAddress;
use svcrpc::SystemMessage;
use svcrpc::Version;
use svcrpc::ids::COOKIE_ROUTER;
use svcrun::ConnectionState;
use svcrun::Connector;
use svcrun::CustomEventConsumer;
use svcrun::Error;
use svcrun::ProxyEventConsumer;
use svcrun::RouterConfig;
use svcrun::ServiceRuntime;
use svcrun::Stub;
use svcrun::StubEventConsumer;
use svcrun::Transport;
use svcrun::mock_transport::DuplexChannelTransport;
use svcrun::mock_transport::Faults;
use svcrun::transport;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Registered(ServiceConnection),
    Client(String, ServiceConnection),
    Request(MessageId, u64, Vec<u8>),
    Notify(MessageId, RequestType),
    Connected(ServiceConnection),
    Response(MessageId, ResultType, u64, Vec<u8>),
    Attribute(MessageId, Vec<u8>),
    Custom(u32, Vec<u8>),
}

fn calc_shape() -> Arc<InterfaceShape> {
    Arc::new(
        InterfaceShape::new("Calc", Version::new(1, 0, 0))
            .request("add", Some("add_result"))
            .request("set", None)
            .attribute("total"),
    )
}

fn add() -> MessageId {
    calc_shape().request_id("add").unwrap()
}

fn add_result() -> MessageId {
    calc_shape().response_id("add_result").unwrap()
}

fn set() -> MessageId {
    calc_shape().request_id("set").unwrap()
}

fn total() -> MessageId {
    calc_shape().attribute_id("total").unwrap()
}

/// Echoes `add`, broadcasts `set` as the `total` attribute.
struct Calc {
    tx: mpsc::UnboundedSender<Seen>,
}

impl StubEventConsumer for Calc {
    fn process_request(&mut self, stub: &mut Stub, request: RequestEvent) {
        let data = request.data.as_bytes().to_vec();
        let _ = self.tx.send(Seen::Request(request.message_id, request.sequence, data.clone()));
        if request.message_id == set() {
            stub.send_notification(total(), data);
        } else {
            stub.respond(&request, ResultType::RequestOk, data);
        }
    }

    fn process_notify_request(&mut self, _stub: &mut Stub, request: &NotifyRequestEvent) {
        let _ = self.tx.send(Seen::Notify(request.message_id, request.request_type));
    }

    fn service_registered(&mut self, _stub: &mut Stub, status: ServiceConnection) {
        let _ = self.tx.send(Seen::Registered(status));
    }

    fn client_connected(&mut self, _stub: &mut Stub, client: &ProxyAddress, status: ServiceConnection) {
        let _ = self.tx.send(Seen::Client(client.thread().to_string(), status));
    }
}

struct Watcher {
    tx: mpsc::UnboundedSender<Seen>,
}

impl ProxyEventConsumer for Watcher {
    fn process_response(&mut self, response: &ResponseEvent) {
        let data = response.data.as_bytes().to_vec();
        let _ = self.tx.send(Seen::Response(response.message_id, response.result, response.sequence, data));
    }

    fn process_attribute(&mut self, update: &ResponseEvent) {
        let _ = self.tx.send(Seen::Attribute(update.message_id, update.data.as_bytes().to_vec()));
    }

    fn service_connected(&mut self, _server: &StubAddress, status: ServiceConnection) {
        let _ = self.tx.send(Seen::Connected(status));
    }
}

struct Collector {
    tx: mpsc::UnboundedSender<Seen>,
}

impl CustomEventConsumer for Collector {
    fn process_event(&mut self, event: CustomEvent) {
        let _ = self.tx.send(Seen::Custom(event.id, event.data.as_bytes().to_vec()));
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Seen>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected event: {:?}", extra);
}

async fn runtime_with(threads: &[&str]) -> ServiceRuntime {
    let runtime = ServiceRuntime::builder().build();
    for name in threads {
        runtime.spawn_thread(name).await.unwrap();
    }
    runtime
}

// --- Test 1: Proxy Before Stub Connects Exactly Once ---

#[tokio::test]
async fn test_early_proxy_connects_once() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, mut stub_rx) = mpsc::unbounded_channel();
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();

    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();
    assert_quiet(&mut proxy_rx).await;
    assert!(!proxy.is_connected());

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();

    assert_eq!(next(&mut stub_rx).await, Seen::Registered(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Client("ui".into(), ServiceConnection::Connected));
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert_quiet(&mut stub_rx).await;
    assert_quiet(&mut proxy_rx).await;

    assert!(proxy.is_connected());
    assert_eq!(proxy.server().map(|s| s.thread().to_string()), Some("worker".to_string()));
    runtime.shutdown().await.unwrap();
}

// --- Test 2: Request / Response Round Trip ---

#[tokio::test]
async fn test_request_response_roundtrip() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, mut stub_rx) = mpsc::unbounded_channel();
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));

    assert_eq!(proxy.send_request(add(), b"2+2".to_vec()).unwrap(), 1);
    assert_eq!(proxy.send_request(add(), b"3+3".to_vec()).unwrap(), 2);

    assert_eq!(next(&mut stub_rx).await, Seen::Registered(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Client("ui".into(), ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Request(add(), 1, b"2+2".to_vec()));
    assert_eq!(next(&mut stub_rx).await, Seen::Request(add(), 2, b"3+3".to_vec()));

    assert_eq!(next(&mut proxy_rx).await, Seen::Response(add_result(), ResultType::RequestOk, 1, b"2+2".to_vec()));
    assert_eq!(next(&mut proxy_rx).await, Seen::Response(add_result(), ResultType::RequestOk, 2, b"3+3".to_vec()));
    runtime.shutdown().await.unwrap();
}

// --- Test 3: Disconnect Fan-Out ---

#[tokio::test]
async fn test_unregister_stub_notifies_every_client_once() {
    let runtime = runtime_with(&["worker", "ui1", "ui2", "ui3"]).await;
    let (stub_tx, _stub_rx) = mpsc::unbounded_channel();
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();

    let stub = runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let mut proxies = Vec::new();
    for thread in ["ui1", "ui2", "ui3"] {
        let watcher = Watcher { tx: proxy_tx.clone() };
        proxies.push(runtime.create_proxy(thread, calc_shape(), ServiceType::Local, "MainCalc", watcher).unwrap());
    }
    for _ in 0..3 {
        assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));
    }

    runtime.unregister_stub(&stub);
    for _ in 0..3 {
        assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Disconnected));
    }
    assert_quiet(&mut proxy_rx).await;
    assert!(proxies.iter().all(|p| !p.is_connected()));

    let servers = runtime.servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert!(!servers[0].is_registered());
    assert!(servers[0].clients.iter().all(|c| c.status == ServiceConnection::Pending));
    runtime.shutdown().await.unwrap();
}

// --- Test 4: Undelivered Requests ---

#[tokio::test]
async fn test_request_without_stub_comes_back_undelivered() {
    let runtime = runtime_with(&["ui"]).await;
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();
    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();

    assert_eq!(proxy.send_request(add(), b"1+1".to_vec()).unwrap(), 1);
    assert_eq!(
        next(&mut proxy_rx).await,
        Seen::Response(add_result(), ResultType::MessageUndelivered, 1, Vec::new())
    );

    // A request without a paired response fails under its own id.
    assert_eq!(proxy.send_request(set(), Vec::new()).unwrap(), 2);
    assert_eq!(next(&mut proxy_rx).await, Seen::Response(set(), ResultType::MessageUndelivered, 2, Vec::new()));

    assert!(matches!(proxy.send_request(add_result(), Vec::new()), Err(Error::UnknownMessage(_))));
    runtime.shutdown().await.unwrap();
}

// --- Test 5: Attribute Subscriptions ---

#[tokio::test]
async fn test_subscription_survives_until_connect_and_broadcasts() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, mut stub_rx) = mpsc::unbounded_channel();
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();

    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();
    proxy.start_notify(total()).unwrap();
    assert!(matches!(proxy.start_notify(add()), Err(Error::UnknownMessage(_))));

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Registered(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Client("ui".into(), ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Notify(total(), RequestType::StartNotify));

    proxy.send_request(set(), b"42".to_vec()).unwrap();
    assert_eq!(next(&mut stub_rx).await, Seen::Request(set(), 1, b"42".to_vec()));
    assert_eq!(next(&mut proxy_rx).await, Seen::Attribute(total(), b"42".to_vec()));
    assert_eq!(proxy.attribute(total()), Some(b"42".to_vec()));

    proxy.stop_notify(total()).unwrap();
    assert_eq!(next(&mut stub_rx).await, Seen::Notify(total(), RequestType::StopNotify));
    runtime.shutdown().await.unwrap();
}

// --- Test 6: Custom Events ---

#[tokio::test]
async fn test_custom_events_reach_their_consumer() {
    let runtime = runtime_with(&["worker"]).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    runtime.attach_custom("worker", 7, Collector { tx }).unwrap();

    assert!(runtime.send_custom_event("worker", 7, b"hi".to_vec()));
    assert_eq!(next(&mut rx).await, Seen::Custom(7, b"hi".to_vec()));

    // Unknown ids are dropped on the thread, unknown threads at the sender.
    assert!(runtime.send_custom_event("worker", 8, b"lost".to_vec()));
    assert!(!runtime.send_custom_event("nowhere", 7, b"lost".to_vec()));
    assert_quiet(&mut rx).await;
    runtime.shutdown().await.unwrap();
}

// --- Test 7: Registration Errors ---

#[tokio::test]
async fn test_registration_errors() {
    let runtime = runtime_with(&["worker"]).await;
    let (tx, _rx) = mpsc::unbounded_channel();

    assert!(matches!(runtime.spawn_thread("worker").await, Err(Error::ThreadExists(_))));
    assert!(matches!(
        runtime.register_stub("nowhere", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: tx.clone() }),
        Err(Error::ThreadNotFound(_))
    ));

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: tx.clone() })
        .unwrap();
    assert!(matches!(
        runtime.register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx }),
        Err(Error::DuplicateStub(_))
    ));
    runtime.shutdown().await.unwrap();
}

// --- Test 8: Terminating A Component Thread ---

#[tokio::test]
async fn test_terminate_thread_disconnects_its_clients() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, _stub_rx) = mpsc::unbounded_channel();
    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));

    runtime.terminate_thread("worker").await.unwrap();
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Disconnected));
    assert!(!runtime.thread_names().contains(&"worker".to_string()));

    // The proxy keeps waiting; calls fail until a new stub shows up.
    proxy.send_request(add(), Vec::new()).unwrap();
    assert_eq!(
        next(&mut proxy_rx).await,
        Seen::Response(add_result(), ResultType::MessageUndelivered, 1, Vec::new())
    );

    runtime.restart_thread("worker").await.unwrap();
    assert!(runtime.thread_names().contains(&"worker".to_string()));
    runtime.shutdown().await.unwrap();
}

// --- Test 9: Shared Proxy Owners ---

#[tokio::test]
async fn test_second_owner_joins_connected_proxy() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, _stub_rx) = mpsc::unbounded_channel();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let first = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: first_tx })
        .unwrap();
    assert_eq!(next(&mut first_rx).await, Seen::Connected(ServiceConnection::Connected));

    let second = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: second_tx })
        .unwrap();
    assert_eq!(second.address(), first.address());
    assert_eq!(next(&mut second_rx).await, Seen::Connected(ServiceConnection::Connected));

    first.release();
    assert_eq!(second.send_request(add(), b"x".to_vec()).unwrap(), 1);
    assert_eq!(next(&mut second_rx).await, Seen::Response(add_result(), ResultType::RequestOk, 1, b"x".to_vec()));
    assert_quiet(&mut first_rx).await;
    runtime.shutdown().await.unwrap();
}

// --- Test 10: Router Disabled By Config ---

#[tokio::test]
async fn test_disabled_router_never_starts() {
    let config = RouterConfig { enabled: false, ..RouterConfig::default() };
    let runtime = ServiceRuntime::builder().config(config).build();
    runtime.start_router().unwrap();
    runtime.servers().await.unwrap();
    assert_eq!(runtime.router_state(), ConnectionState::Stopped);
    assert!(!runtime.router_link().is_valid());
    runtime.shutdown().await.unwrap();
}

// --- Test 11: Shared Proxy Subscriptions ---

#[tokio::test]
async fn test_shared_proxy_counts_subscribers() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, mut stub_rx) = mpsc::unbounded_channel();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let first = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: first_tx })
        .unwrap();
    let second = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: second_tx })
        .unwrap();
    assert_eq!(next(&mut first_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert_eq!(next(&mut second_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Registered(ServiceConnection::Connected));
    assert_eq!(next(&mut stub_rx).await, Seen::Client("ui".into(), ServiceConnection::Connected));

    // One StartNotify for both owners; the second leaving keeps it alive.
    first.start_notify(total()).unwrap();
    second.start_notify(total()).unwrap();
    second.stop_notify(total()).unwrap();
    first.send_request(set(), b"7".to_vec()).unwrap();
    assert_eq!(next(&mut stub_rx).await, Seen::Notify(total(), RequestType::StartNotify));
    assert_eq!(next(&mut stub_rx).await, Seen::Request(set(), 1, b"7".to_vec()));

    assert_eq!(next(&mut first_rx).await, Seen::Attribute(total(), b"7".to_vec()));
    assert_quiet(&mut second_rx).await;

    second.release();
    assert_quiet(&mut stub_rx).await;
    first.stop_notify(total()).unwrap();
    assert_eq!(next(&mut stub_rx).await, Seen::Notify(total(), RequestType::StopNotify));
    runtime.shutdown().await.unwrap();
}

// --- Test 12: Responses Go To The Caller ---

#[tokio::test]
async fn test_shared_proxy_answers_only_the_caller() {
    let runtime = runtime_with(&["worker", "ui"]).await;
    let (stub_tx, _stub_rx) = mpsc::unbounded_channel();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();

    runtime
        .register_stub("worker", calc_shape(), ServiceType::Local, "MainCalc", Calc { tx: stub_tx })
        .unwrap();
    let first = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: first_tx })
        .unwrap();
    let second = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Local, "MainCalc", Watcher { tx: second_tx })
        .unwrap();
    assert_eq!(next(&mut first_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert_eq!(next(&mut second_rx).await, Seen::Connected(ServiceConnection::Connected));

    assert_eq!(first.send_request(add(), b"a".to_vec()).unwrap(), 1);
    assert_eq!(second.send_request(add(), b"b".to_vec()).unwrap(), 2);
    assert_eq!(next(&mut first_rx).await, Seen::Response(add_result(), ResultType::RequestOk, 1, b"a".to_vec()));
    assert_eq!(next(&mut second_rx).await, Seen::Response(add_result(), ResultType::RequestOk, 2, b"b".to_vec()));
    assert_quiet(&mut first_rx).await;
    assert_quiet(&mut second_rx).await;
    runtime.shutdown().await.unwrap();
}

/// Hands out one end of a pipe whose other end the test drives as the router.
struct TestLink(Mutex<Option<DuplexChannelTransport>>);

#[async_trait::async_trait]
impl Connector for TestLink {
    async fn connect(&self) -> transport::Result<Box<dyn Transport>> {
        match self.0.lock().unwrap().take() {
            Some(near) => Ok(Box::new(near)),
            None => Err(transport::Error::ConnectionLost("link used up".into())),
        }
    }
}

/// A runtime linked to a fake router, with a proxy on "ui" connected to a
/// stub the router claims lives in process 301.
async fn remote_proxy() -> (ServiceRuntime, svcrun::Proxy, mpsc::UnboundedReceiver<Seen>, DuplexChannelTransport, Arc<Faults>)
{
    let (near, router) = DuplexChannelTransport::pair();
    let faults = near.faults();
    let config = RouterConfig { reconnect_ms: 60_000, ..RouterConfig::default() };
    let runtime = ServiceRuntime::builder().config(config).connector(TestLink(Mutex::new(Some(near)))).build();
    runtime.spawn_thread("ui").await.unwrap();
    runtime.start_router().unwrap();

    let hello = SystemMessage::NotifyConnection { cookie: 300, status: ServiceConnection::Connected };
    router.send(&hello.encode(COOKIE_ROUTER, 300).unwrap()).await.unwrap();
    for _ in 0..200 {
        if runtime.router_state() == ConnectionState::Started {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(runtime.router_state(), ConnectionState::Started);

    let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();
    let proxy = runtime
        .create_proxy("ui", calc_shape(), ServiceType::Public, "MainCalc", Watcher { tx: proxy_tx })
        .unwrap();
    let mut stub = StubAddress::new(calc_shape().item(ServiceType::Public), "MainCalc", "WorkerThread");
    stub.set_cookie(301);
    let notice = SystemMessage::NotifyRegister(Registration::register_stub(stub));
    router.send(&notice.encode(COOKIE_ROUTER, 300).unwrap()).await.unwrap();
    assert_eq!(next(&mut proxy_rx).await, Seen::Connected(ServiceConnection::Connected));
    assert!(proxy.server().is_some_and(|s| s.is_remote()));

    (runtime, proxy, proxy_rx, router, faults)
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Seen>, count: usize) -> Vec<Seen> {
    let mut seen = Vec::new();
    for _ in 0..count {
        seen.push(next(rx).await);
    }
    seen.sort_by_key(|s| match s {
        Seen::Response(_, _, sequence, _) => *sequence,
        _ => 0,
    });
    seen
}

// --- Test 13: Receive Failure With A Send In Flight ---

#[tokio::test]
async fn test_receive_failure_fails_request_being_written() {
    let (runtime, proxy, mut proxy_rx, _router, faults) = remote_proxy().await;

    faults.stall_sends();
    assert_eq!(proxy.send_request(add(), b"1+1".to_vec()).unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    faults.break_receive();

    let seen = collect(&mut proxy_rx, 2).await;
    assert_eq!(seen[0], Seen::Connected(ServiceConnection::Lost));
    assert_eq!(seen[1], Seen::Response(add_result(), ResultType::MessageUndelivered, 1, Vec::new()));
    assert_quiet(&mut proxy_rx).await;
    assert_eq!(runtime.router_state(), ConnectionState::Starting);
    runtime.shutdown().await.unwrap();
}

// --- Test 14: Send Failure Fails Everything Queued ---

#[tokio::test]
async fn test_send_failure_fails_queued_requests() {
    let (runtime, proxy, mut proxy_rx, _router, faults) = remote_proxy().await;

    faults.fail_sends();
    assert_eq!(proxy.send_request(add(), b"1".to_vec()).unwrap(), 1);
    assert_eq!(proxy.send_request(set(), b"2".to_vec()).unwrap(), 2);

    let seen = collect(&mut proxy_rx, 3).await;
    assert_eq!(seen[0], Seen::Connected(ServiceConnection::Lost));
    assert_eq!(seen[1], Seen::Response(add_result(), ResultType::MessageUndelivered, 1, Vec::new()));
    assert_eq!(seen[2], Seen::Response(set(), ResultType::MessageUndelivered, 2, Vec::new()));
    assert_quiet(&mut proxy_rx).await;
    runtime.shutdown().await.unwrap();
}
