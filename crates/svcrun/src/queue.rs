//! # Dispatcher Queue
//!
//! One queue per dispatcher. Items are kept in four priority bands; `pop`
//! always serves the highest non-empty band and is FIFO inside a band.
//!
//! A closed queue rejects new items but still drains what it holds.

use std::collections::VecDeque;
use std::sync::Mutex;

use svcrpc::Priority;
use tokio::sync::Notify;

const BANDS: usize = 4;

fn band(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

struct Bands<T> {
    queues: [VecDeque<T>; BANDS],
    closed: bool,
}

pub struct PriorityQueue<T> {
    bands: Mutex<Bands<T>>,
    notify: Notify,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(Bands {
                queues: std::array::from_fn(|_| VecDeque::new()),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues an item. Returns it back if the queue is closed.
    pub fn push(&self, item: T, priority: Priority) -> Result<(), T> {
        {
            let mut bands = self.bands.lock().unwrap_or_else(|e| e.into_inner());
            if bands.closed {
                return Err(item);
            }
            bands.queues[band(priority)].push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<Option<T>> {
        let mut bands = self.bands.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = bands.queues.iter_mut().find_map(|q| q.pop_front()) {
            return Some(Some(item));
        }
        if bands.closed {
            return Some(None);
        }
        None
    }

    /// Waits for the next item. `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if let Some(next) = self.try_pop() {
                return next;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.bands.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        let bands = self.bands.lock().unwrap_or_else(|e| e.into_inner());
        bands.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_within_band() {
        let q = PriorityQueue::new();
        for i in 0..5 {
            q.push(i, Priority::Normal).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.pop().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_higher_band_first() {
        let q = PriorityQueue::new();
        q.push("low", Priority::Low).unwrap();
        q.push("normal", Priority::Normal).unwrap();
        q.push("critical", Priority::Critical).unwrap();
        q.push("high", Priority::High).unwrap();
        assert_eq!(q.pop().await, Some("critical"));
        assert_eq!(q.pop().await, Some("high"));
        assert_eq!(q.pop().await, Some("normal"));
        assert_eq!(q.pop().await, Some("low"));
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let q = PriorityQueue::new();
        q.push(1, Priority::Normal).unwrap();
        q.close();
        assert_eq!(q.push(2, Priority::Normal), Err(2));
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let q = std::sync::Arc::new(PriorityQueue::new());
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::task::yield_now().await;
        q.push(42, Priority::High).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(42));
    }
}
