//! In-memory transports for tests and single-binary setups.
//!
//! Each end carries a [`Faults`] handle so a test can make the link misbehave
//! after it has been handed to a runtime or a router.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::transport;
use crate::transport::Transport;

/// Failures that can be switched on for one end of a pair. They stay on.
#[derive(Debug)]
pub struct Faults {
    stall_sends: AtomicBool,
    fail_sends: AtomicBool,
    broken: watch::Sender<bool>,
}

impl Faults {
    fn new() -> Self {
        Self { stall_sends: AtomicBool::new(false), fail_sends: AtomicBool::new(false), broken: watch::channel(false).0 }
    }

    /// Sends never complete; the frame stays with the writer.
    pub fn stall_sends(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    /// Sends return `ConnectionLost` without reaching the other end.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Pending and future receives return `ConnectionLost`.
    pub fn break_receive(&self) {
        self.broken.send_replace(true);
    }
}

/// A duplex channel transport using tokio mpsc channels.
///
/// Messages sent on one end appear on the other end's `recv()`. Dropping one
/// end makes the other end read `None`.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    faults: Arc<Faults>,
}

impl DuplexChannelTransport {
    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self { tx: tx_a, rx: Arc::new(Mutex::new(rx_b)), faults: Arc::new(Faults::new()) };
        let b = Self { tx: tx_b, rx: Arc::new(Mutex::new(rx_a)), faults: Arc::new(Faults::new()) };

        (a, b)
    }

    /// Fault switches for this end. Keep the handle to trip them later.
    pub fn faults(&self) -> Arc<Faults> {
        self.faults.clone()
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if self.faults.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail_sends.load(Ordering::SeqCst) {
            return Err(transport::Error::ConnectionLost("Send failed".into()));
        }
        self.tx
            .send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut broken = self.faults.broken.subscribe();
        if *broken.borrow_and_update() {
            return Err(transport::Error::ConnectionLost("Receive failed".into()));
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            frame = rx.recv() => Ok(frame),
            _ = broken.changed() => Err(transport::Error::ConnectionLost("Receive failed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (a, b) = DuplexChannelTransport::pair();
        a.send(b"ping").await.unwrap();
        b.send(b"pong").await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), b"ping");
        assert_eq!(a.recv().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_dropped_end_reads_none() {
        let (a, b) = DuplexChannelTransport::pair();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
        assert!(b.send(b"lost").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_send_never_arrives() {
        let (a, b) = DuplexChannelTransport::pair();
        a.faults().fail_sends();
        assert!(matches!(a.send(b"gone").await, Err(transport::Error::ConnectionLost(_))));
        b.send(b"still up").await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap(), b"still up");
        assert!(tokio::time::timeout(Duration::from_millis(50), b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_send_blocks() {
        let (a, _b) = DuplexChannelTransport::pair();
        a.faults().stall_sends();
        assert!(tokio::time::timeout(Duration::from_millis(50), a.send(b"stuck")).await.is_err());
    }

    #[tokio::test]
    async fn test_break_receive_wakes_pending_reader() {
        let (a, _b) = DuplexChannelTransport::pair();
        let faults = a.faults();
        let reader = tokio::spawn(async move { a.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        faults.break_receive();
        let result = reader.await.unwrap();
        assert!(matches!(result, Err(transport::Error::ConnectionLost(_))));
    }
}
