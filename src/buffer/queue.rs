//! Unbounded handoff queue between two pipeline stages
//!
//! Carries compressed packets from the demuxer to a decoder, or decoded frames
//! from a decoder to the renderer. Push never blocks; pop blocks until an item
//! arrives or the producer has finished.
//!
//! The `finished` flag lives under the same mutex as the items, so checking it
//! and going to sleep happen atomically and a `set_finished` broadcast can never
//! be missed by a consumer about to wait.
//!
//! Dropping the consumer endpoint abandons the queue: whatever is still queued
//! is released and later pushes discard their item instead of storing it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::flag::RoleClaims;
use super::{Inlet, Outlet};
use crate::{Error, Result};

struct QueueState<T> {
    items: VecDeque<T>,
    finished: bool,
    abandoned: bool,
}

/// Unbounded FIFO handoff queue with a monotonic `finished` flag.
///
/// Items are moved in by `push` and moved out by `pop`; the queue owns them in
/// between. Once finished and drained every `pop` returns `None` immediately.
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    roles: RoleClaims,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
                abandoned: false,
            }),
            available: Condvar::new(),
            roles: RoleClaims::new(),
        }
    }

    /// Append an item at the tail and wake one waiting consumer.
    ///
    /// Returns false, dropping `item`, once the consumer has abandoned the queue.
    pub fn push(&self, item: T) -> bool {
        self.offer(item).is_ok()
    }

    /// Like [`push`](Self::push) but hands the item back when nobody will read it.
    pub fn offer(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        if state.abandoned {
            trace!("HandoffQueue: abandoned, item discarded");
            return Err(item);
        }
        state.items.push_back(item);
        trace!("HandoffQueue: size increased to {}", state.items.len());
        self.available.notify_one();
        Ok(())
    }

    /// Take the head item, blocking while the queue is empty and not finished.
    ///
    /// Returns `None` only once the queue is finished and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.available
            .wait_while(&mut state, |s| s.items.is_empty() && !s.finished);
        Self::take_head(&mut state)
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// Returns `Err(Error::Timeout)` if nothing arrived and the queue is still open.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let mut state = self.state.lock();
        self.available.wait_while_for(
            &mut state,
            |s| s.items.is_empty() && !s.finished,
            timeout,
        );
        if state.items.is_empty() && !state.finished {
            return Err(Error::Timeout);
        }
        Ok(Self::take_head(&mut state))
    }

    /// Non-blocking pop. `None` means "nothing right now", not end-of-stream.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.items.pop_front()
    }

    fn take_head(state: &mut QueueState<T>) -> Option<T> {
        let item = state.items.pop_front();
        match item {
            Some(_) => trace!("HandoffQueue: size decreased to {}", state.items.len()),
            None => trace!("HandoffQueue: empty and finished"),
        }
        item
    }

    /// Mark the queue as finished and wake every blocked consumer.
    ///
    /// Idempotent; the flag never resets.
    pub fn set_finished(&self) {
        let mut state = self.state.lock();
        if !state.finished {
            state.finished = true;
            trace!("HandoffQueue: marked finished with {} items left", state.items.len());
        }
        self.available.notify_all();
    }

    /// Release every queued item and refuse new ones.
    ///
    /// Idempotent; the flag never resets.
    pub fn abandon(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.abandoned = true;
            std::mem::take(&mut state.items)
        };
        if !discarded.is_empty() {
            trace!("HandoffQueue: abandoned with {} items left", discarded.len());
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.state.lock().abandoned
    }

    /// True only when the queue is finished AND drained.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.items.is_empty()
    }

    /// Current item count. Advisory only under concurrent access.
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> HandoffQueue<T> {
    /// Claim the single producer endpoint of this queue.
    ///
    /// Dropping the returned handle finishes the queue, whatever path the
    /// producing thread leaves by.
    pub fn producer(self: &Arc<Self>) -> Result<QueueProducer<T>> {
        self.roles.claim_producer()?;
        Ok(QueueProducer {
            queue: Arc::clone(self),
        })
    }

    /// Claim the single consumer endpoint of this queue.
    pub fn consumer(self: &Arc<Self>) -> Result<QueueConsumer<T>> {
        self.roles.claim_consumer()?;
        Ok(QueueConsumer {
            queue: Arc::clone(self),
        })
    }
}

/// Producing side of a [`HandoffQueue`]. Finishes the queue on drop.
pub struct QueueProducer<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> QueueProducer<T> {
    /// Returns false when the consumer is gone and `item` was dropped.
    pub fn push(&self, item: T) -> bool {
        self.queue.push(item)
    }

    /// Finish the queue now instead of waiting for the drop.
    pub fn finish(&self) {
        self.queue.set_finished();
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }
}

impl<T> Drop for QueueProducer<T> {
    fn drop(&mut self) {
        self.queue.set_finished();
    }
}

/// Consuming side of a [`HandoffQueue`]. Abandons the queue on drop.
pub struct QueueConsumer<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> QueueConsumer<T> {
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        self.queue.pop_timeout(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }
}

impl<T> Drop for QueueConsumer<T> {
    fn drop(&mut self) {
        self.queue.abandon();
    }
}

impl<T: Send> Outlet<T> for QueueProducer<T> {
    fn send(&mut self, item: T) -> std::result::Result<(), T> {
        self.queue.offer(item)
    }
}

impl<T: Send> Inlet<T> for QueueConsumer<T> {
    fn recv(&mut self) -> Option<T> {
        self.queue.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let queue = HandoffQueue::new();
        for i in 0..100 {
            queue.push(i);
        }
        for i in 0..100 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_abc_then_finish() {
        let queue = HandoffQueue::new();
        queue.push("A");
        queue.push("B");
        queue.push("C");

        assert_eq!(queue.pop(), Some("A"));
        assert_eq!(queue.pop(), Some("B"));
        assert_eq!(queue.pop(), Some("C"));

        queue.set_finished();
        let start = Instant::now();
        assert_eq!(queue.pop(), None);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_drain_then_terminate() {
        let queue = HandoffQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        queue.set_finished();

        // Finished but not drained yet
        assert!(!queue.is_finished());

        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_finished());
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(HandoffQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());

        queue.push(42);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_set_finished_wakes_all_waiters() {
        let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.set_finished();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
    }

    #[test]
    fn test_pop_timeout() {
        let queue: HandoffQueue<u8> = HandoffQueue::new();
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(20)),
            Err(Error::Timeout)
        ));

        queue.push(7);
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)).unwrap(), Some(7));

        queue.set_finished();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)).unwrap(), None);
    }

    #[test]
    fn test_try_pop_does_not_block() {
        let queue: HandoffQueue<u8> = HandoffQueue::new();
        assert_eq!(queue.try_pop(), None);
        queue.push(1);
        assert_eq!(queue.try_pop(), Some(1));
    }

    #[test]
    fn test_single_producer_and_consumer() {
        let queue: Arc<HandoffQueue<u8>> = Arc::new(HandoffQueue::new());
        let _producer = queue.producer().unwrap();
        let _consumer = queue.consumer().unwrap();

        assert!(matches!(queue.producer(), Err(Error::RoleClaimed("producer"))));
        assert!(matches!(queue.consumer(), Err(Error::RoleClaimed("consumer"))));
    }

    #[test]
    fn test_producer_drop_finishes_queue() {
        let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::new());
        let consumer = queue.consumer().unwrap();
        let producer = queue.producer().unwrap();

        let worker = thread::spawn(move || {
            producer.push(1);
            producer.push(2);
            // Leaves without an explicit finish
        });

        let mut received = Vec::new();
        while let Some(item) = consumer.pop() {
            received.push(item);
        }
        worker.join().unwrap();

        assert_eq!(received, vec![1, 2]);
        assert!(consumer.is_finished());
    }

    #[test]
    fn test_producer_panic_still_finishes_queue() {
        let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::new());
        let consumer = queue.consumer().unwrap();
        let producer = queue.producer().unwrap();

        let worker = thread::spawn(move || {
            producer.push(1);
            panic!("producer crashed");
        });

        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), None);
        assert!(worker.join().is_err());
    }

    #[test]
    fn test_consumer_drop_abandons_queue() {
        let queue: Arc<HandoffQueue<u32>> = Arc::new(HandoffQueue::new());
        let mut producer = queue.producer().unwrap();
        let consumer = queue.consumer().unwrap();

        assert!(producer.push(1));
        assert!(producer.push(2));
        assert_eq!(consumer.pop(), Some(1));
        drop(consumer);

        // The leftover item is released and new ones are refused
        assert!(queue.is_abandoned());
        assert_eq!(queue.size(), 0);
        assert!(!producer.push(3));
        assert_eq!(producer.send(4), Err(4));
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_concurrent_fifo() {
        let queue = Arc::new(HandoffQueue::new());
        let producer = queue.producer().unwrap();
        let consumer = queue.consumer().unwrap();

        let writer = thread::spawn(move || {
            for i in 0..10_000u32 {
                producer.push(i);
            }
        });

        let reader = thread::spawn(move || {
            let mut expected = 0u32;
            while let Some(item) = consumer.pop() {
                assert_eq!(item, expected);
                expected += 1;
            }
            expected
        });

        writer.join().unwrap();
        assert_eq!(reader.join().unwrap(), 10_000);
    }
}
