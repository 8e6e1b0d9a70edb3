//! Bounded ring of whole items for backpressured frame buffering
//!
//! Uses an explicit `count` rather than a reserved empty slot, so a ring built
//! with capacity `N` really holds `N` items before a writer blocks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::flag::RoleClaims;
use super::{Inlet, Outlet};
use crate::{Error, Result};

struct SlotState<T> {
    slots: Box<[Option<T>]>,
    read_index: usize,
    write_index: usize,
    count: usize,
    finished: bool,
    abandoned: bool,
}

impl<T> SlotState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.count == self.capacity()
    }
}

/// Fixed-capacity circular buffer of items with blocking write/read.
pub struct BoundedItemRing<T> {
    state: Mutex<SlotState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    roles: RoleClaims,
}

impl<T> BoundedItemRing<T> {
    /// Create a ring holding up to `capacity` items. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| None).collect();
        Self {
            state: Mutex::new(SlotState {
                slots,
                read_index: 0,
                write_index: 0,
                count: 0,
                finished: false,
                abandoned: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            roles: RoleClaims::new(),
        }
    }

    /// Store `item`, blocking while the ring is full.
    ///
    /// Hands the item back if the reader abandoned the ring.
    pub fn write(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        self.not_full
            .wait_while(&mut state, |s| !s.abandoned && s.is_full());
        self.store(&mut state, item)
    }

    fn store(&self, state: &mut MutexGuard<'_, SlotState<T>>, item: T) -> std::result::Result<(), T> {
        if state.abandoned {
            return Err(item);
        }
        let index = state.write_index;
        state.slots[index] = Some(item);
        state.write_index = (index + 1) % state.capacity();
        state.count += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest item, blocking while the ring is empty and not finished.
    ///
    /// Returns `None` once the ring is finished and drained.
    pub fn read(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.not_empty
            .wait_while(&mut state, |s| s.count == 0 && !s.finished);
        self.take(&mut state)
    }

    /// Like [`read`](Self::read) but gives up after `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let mut state = self.state.lock();
        self.not_empty
            .wait_while_for(&mut state, |s| s.count == 0 && !s.finished, timeout);
        if state.count == 0 && !state.finished {
            return Err(Error::Timeout);
        }
        Ok(self.take(&mut state))
    }

    fn take(&self, state: &mut MutexGuard<'_, SlotState<T>>) -> Option<T> {
        if state.count == 0 {
            return None;
        }
        let index = state.read_index;
        let item = state.slots[index].take();
        state.read_index = (index + 1) % state.capacity();
        state.count -= 1;
        self.not_full.notify_one();
        item
    }

    /// No more items will be written. Readers drain what is left, then get `None`.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.not_empty.notify_all();
    }

    /// The reader is gone. Blocked and future writes hand their item back.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        state.abandoned = true;
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    /// Finished and drained.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.count == 0
    }
}

impl<T: Send> BoundedItemRing<T> {
    /// Claim the single sender endpoint. Dropping it finishes the ring.
    pub fn sender(self: &Arc<Self>) -> Result<RingSender<T>> {
        self.roles.claim_producer()?;
        Ok(RingSender {
            ring: Arc::clone(self),
        })
    }

    /// Claim the single receiver endpoint. Dropping it abandons the ring.
    pub fn receiver(self: &Arc<Self>) -> Result<RingReceiver<T>> {
        self.roles.claim_consumer()?;
        Ok(RingReceiver {
            ring: Arc::clone(self),
        })
    }
}

pub struct RingSender<T> {
    ring: Arc<BoundedItemRing<T>>,
}

impl<T> Drop for RingSender<T> {
    fn drop(&mut self) {
        self.ring.finish();
    }
}

pub struct RingReceiver<T> {
    ring: Arc<BoundedItemRing<T>>,
}

impl<T> RingReceiver<T> {
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        self.ring.read_timeout(timeout)
    }
}

impl<T> Drop for RingReceiver<T> {
    fn drop(&mut self) {
        self.ring.abandon();
    }
}

impl<T: Send> Outlet<T> for RingSender<T> {
    fn send(&mut self, item: T) -> std::result::Result<(), T> {
        self.ring.write(item)
    }
}

impl<T: Send> Inlet<T> for RingReceiver<T> {
    fn recv(&mut self) -> Option<T> {
        self.ring.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_full_capacity_is_usable() {
        let ring = BoundedItemRing::new(3);
        assert!(ring.write(1).is_ok());
        assert!(ring.write(2).is_ok());
        assert!(ring.write(3).is_ok());
        assert!(ring.is_full());
        assert_eq!(ring.len(), 3);

        assert_eq!(ring.read(), Some(1));
        assert_eq!(ring.read(), Some(2));
        assert_eq!(ring.read(), Some(3));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_writer_blocks_when_full() {
        let ring = Arc::new(BoundedItemRing::new(2));
        ring.write("a").unwrap();
        ring.write("b").unwrap();

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.write("c"))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());

        assert_eq!(ring.read(), Some("a"));
        assert!(writer.join().unwrap().is_ok());
        assert_eq!(ring.read(), Some("b"));
        assert_eq!(ring.read(), Some("c"));
    }

    #[test]
    fn test_reader_blocks_until_write() {
        let ring = Arc::new(BoundedItemRing::new(4));
        let reader = {
            let ring = ring.clone();
            thread::spawn(move || ring.read())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        ring.write(5u32).unwrap();
        assert_eq!(reader.join().unwrap(), Some(5));
    }

    #[test]
    fn test_finish_drains_then_ends() {
        let ring = BoundedItemRing::new(4);
        ring.write(1).unwrap();
        ring.write(2).unwrap();
        ring.finish();

        assert!(!ring.is_finished());
        assert_eq!(ring.read(), Some(1));
        assert_eq!(ring.read(), Some(2));
        assert_eq!(ring.read(), None);
        assert!(ring.is_finished());
    }

    #[test]
    fn test_wraps_many_times() {
        let ring = BoundedItemRing::new(3);
        for i in 0..20 {
            ring.write(i).unwrap();
            assert_eq!(ring.read(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_abandon_returns_item_to_writer() {
        let ring = Arc::new(BoundedItemRing::new(1));
        let mut sender = ring.sender().unwrap();
        let receiver = ring.receiver().unwrap();
        sender.send(10).unwrap();

        let handle = thread::spawn(move || sender.send(11));
        thread::sleep(Duration::from_millis(30));
        drop(receiver);

        assert_eq!(handle.join().unwrap(), Err(11));
    }

    #[test]
    fn test_sender_drop_finishes() {
        let ring = Arc::new(BoundedItemRing::new(4));
        let mut sender = ring.sender().unwrap();
        let mut receiver = ring.receiver().unwrap();
        assert!(ring.sender().is_err());

        let producer = thread::spawn(move || {
            for i in 0..10 {
                sender.send(i).unwrap();
            }
        });

        let mut received = Vec::new();
        while let Some(item) = receiver.recv() {
            received.push(item);
        }
        producer.join().unwrap();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_read_timeout() {
        let ring: BoundedItemRing<u8> = BoundedItemRing::new(2);
        assert!(matches!(
            ring.read_timeout(Duration::from_millis(10)),
            Err(Error::Timeout)
        ));
        ring.finish();
        assert_eq!(ring.read_timeout(Duration::from_millis(10)).unwrap(), None);
    }
}
