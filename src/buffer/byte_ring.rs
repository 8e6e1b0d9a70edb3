//! Bounded byte ring between the audio decoder and the audio output callback
//!
//! Every write and read is all-or-nothing: a call waits until the whole request
//! fits (or is available) and then copies it in one go, wrapping around the end
//! of the backing storage. A writer never partially satisfies a request.
//!
//! Designed for exactly one writer and one reader. Two flags end the waiting:
//! - `closed`: the writer is done; reads return whatever is left instead of
//!   waiting for bytes that will never come
//! - `abandoned`: the reader is gone; writes fail with `Disconnected`
//!
//! The ring never fills a short read with silence. That is the job of the
//! pull-side adapter (see [`crate::media::AudioPull`]).

use std::sync::Arc;
use std::time::Duration;

use log::trace;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::flag::RoleClaims;
use crate::{Error, Result};

struct RingState {
    buffer: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    count: usize,
    closed: bool,
    abandoned: bool,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.count
    }

    fn copy_in(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let first = (capacity - self.write_pos).min(data.len());
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        self.buffer[..data.len() - first].copy_from_slice(&data[first..]);
        self.write_pos = (self.write_pos + data.len()) % capacity;
        self.count += data.len();
    }

    fn copy_out(&mut self, out: &mut [u8]) {
        let capacity = self.capacity();
        let first = (capacity - self.read_pos).min(out.len());
        let rest = out.len() - first;
        out[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        out[first..].copy_from_slice(&self.buffer[..rest]);
        self.read_pos = (self.read_pos + out.len()) % capacity;
        self.count -= out.len();
    }
}

/// Fixed-capacity byte ring with blocking, all-or-nothing write/read.
pub struct BoundedByteRing {
    state: Mutex<RingState>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    roles: RoleClaims,
}

impl BoundedByteRing {
    /// Create a ring holding at most `capacity` bytes.
    ///
    /// `capacity` must exceed the largest single read or write the pipeline
    /// issues; larger requests are rejected with `RequestExceedsCapacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buffer: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                count: 0,
                closed: false,
                abandoned: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
            roles: RoleClaims::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    fn check_request(&self, requested: usize, capacity: usize) -> Result<()> {
        if requested > capacity {
            return Err(Error::RequestExceedsCapacity {
                requested,
                capacity,
            });
        }
        Ok(())
    }

    /// Write all of `data`, blocking until that much space is free.
    ///
    /// Returns `data.len()`. Fails with `Disconnected` if the reader abandoned
    /// the ring before the space appeared.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        self.check_request(data.len(), state.capacity())?;
        self.not_full
            .wait_while(&mut state, |s| !s.abandoned && s.free() < data.len());
        self.finish_write(&mut state, data)
    }

    /// Like [`write`](Self::write) but gives up after `timeout` without writing anything.
    pub fn write_timeout(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        self.check_request(data.len(), state.capacity())?;
        self.not_full.wait_while_for(
            &mut state,
            |s| !s.abandoned && s.free() < data.len(),
            timeout,
        );
        if !state.abandoned && state.free() < data.len() {
            return Err(Error::Timeout);
        }
        self.finish_write(&mut state, data)
    }

    fn finish_write(&self, state: &mut MutexGuard<'_, RingState>, data: &[u8]) -> Result<usize> {
        if state.abandoned {
            return Err(Error::Disconnected);
        }
        state.copy_in(data);
        trace!("BoundedByteRing: wrote {} bytes, {} buffered", data.len(), state.count);
        self.not_empty.notify_one();
        Ok(data.len())
    }

    /// Fill all of `out`, blocking until that many bytes are buffered.
    ///
    /// Returns `out.len()`. Once the writer has closed the ring a read returns
    /// what is left without waiting, which may be fewer bytes (0 when drained).
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        self.check_request(out.len(), state.capacity())?;
        self.not_empty
            .wait_while(&mut state, |s| !s.closed && s.count < out.len());
        Ok(self.finish_read(&mut state, out))
    }

    /// Like [`read`](Self::read) but gives up after `timeout` without consuming anything.
    pub fn read_timeout(&self, out: &mut [u8], timeout: Duration) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        self.check_request(out.len(), state.capacity())?;
        self.not_empty.wait_while_for(
            &mut state,
            |s| !s.closed && s.count < out.len(),
            timeout,
        );
        if !state.closed && state.count < out.len() {
            return Err(Error::Timeout);
        }
        Ok(self.finish_read(&mut state, out))
    }

    fn finish_read(&self, state: &mut MutexGuard<'_, RingState>, out: &mut [u8]) -> usize {
        let take = out.len().min(state.count);
        state.copy_out(&mut out[..take]);
        trace!("BoundedByteRing: read {} bytes, {} buffered", take, state.count);
        self.not_full.notify_one();
        if state.count == 0 {
            self.drained.notify_all();
        }
        take
    }

    /// Bytes currently buffered. Advisory snapshot.
    pub fn available_read(&self) -> usize {
        self.state.lock().count
    }

    /// Free space. Advisory snapshot.
    pub fn available_write(&self) -> usize {
        self.state.lock().free()
    }

    /// Writer side is done. Pending and future reads stop waiting for more.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        if state.count == 0 {
            self.drained.notify_all();
        }
    }

    /// Reader side is gone. Pending and future writes fail.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        state.abandoned = true;
        self.not_full.notify_all();
        self.drained.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closed by the writer and fully consumed.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.closed && state.count == 0
    }

    /// Wait until every buffered byte has been read or the reader is gone.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.drained
            .wait_while_for(&mut state, |s| s.count > 0 && !s.abandoned, timeout);
        state.count == 0 || state.abandoned
    }

    /// Claim the single writer endpoint. Dropping it closes the ring.
    pub fn writer(self: &Arc<Self>) -> Result<RingWriter> {
        self.roles.claim_producer()?;
        Ok(RingWriter {
            ring: Arc::clone(self),
        })
    }

    /// Claim the single reader endpoint. Dropping it abandons the ring.
    pub fn reader(self: &Arc<Self>) -> Result<RingReader> {
        self.roles.claim_consumer()?;
        Ok(RingReader {
            ring: Arc::clone(self),
        })
    }
}

/// Writing side of a [`BoundedByteRing`].
pub struct RingWriter {
    ring: Arc<BoundedByteRing>,
}

impl RingWriter {
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.ring.write(data)
    }

    pub fn write_timeout(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        self.ring.write_timeout(data, timeout)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }
}

impl Drop for RingWriter {
    fn drop(&mut self) {
        self.ring.close();
    }
}

/// Reading side of a [`BoundedByteRing`].
pub struct RingReader {
    ring: Arc<BoundedByteRing>,
}

impl RingReader {
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        self.ring.read(out)
    }

    pub fn read_timeout(&self, out: &mut [u8], timeout: Duration) -> Result<usize> {
        self.ring.read_timeout(out, timeout)
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn is_drained(&self) -> bool {
        self.ring.is_drained()
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        self.ring.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_write_read() {
        let ring = BoundedByteRing::new(16);
        assert_eq!(ring.write(&[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(ring.available_read(), 4);
        assert_eq!(ring.available_write(), 12);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.available_read(), 0);
    }

    #[test]
    fn test_wrap_around_keeps_byte_order() {
        let ring = BoundedByteRing::new(8);
        ring.write(&[1, 2, 3, 4, 5]).unwrap();

        let mut out = [0u8; 3];
        ring.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);

        // Crosses the end of the backing storage
        ring.write(&[6, 7, 8, 9, 10]).unwrap();
        assert_eq!(ring.available_read(), 7);

        let mut out = [0u8; 7];
        ring.read(&mut out).unwrap();
        assert_eq!(out, [4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_conservation() {
        let ring = BoundedByteRing::new(13);
        let mut written = 0usize;
        let mut read = 0usize;
        let mut out = [0u8; 5];

        for round in 0..50usize {
            let chunk = vec![round as u8; (round % 7) + 1];
            if ring.available_write() >= chunk.len() {
                written += ring.write(&chunk).unwrap();
            }
            let want = (round % 5) + 1;
            if ring.available_read() >= want {
                read += ring.read(&mut out[..want]).unwrap();
            }
            assert_eq!(ring.available_read(), written - read);
        }
    }

    #[test]
    fn test_capacity_boundary() {
        let ring = Arc::new(BoundedByteRing::new(8));
        assert_eq!(ring.write(&[0xAA; 8]).unwrap(), 8);
        assert_eq!(ring.available_write(), 0);

        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.write(&[0xBB]))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());

        let mut out = [0u8; 1];
        ring.read(&mut out).unwrap();
        assert_eq!(writer.join().unwrap().unwrap(), 1);
        assert_eq!(ring.available_read(), 8);
    }

    #[test]
    fn test_blocked_read_needs_the_full_request() {
        let ring = Arc::new(BoundedByteRing::new(8));
        ring.write(&[1, 2, 3, 4, 5]).unwrap();

        let reader = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut out = [0u8; 6];
                let n = ring.read(&mut out).unwrap();
                (n, out)
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        ring.write(&[6, 7, 8]).unwrap();
        let (n, out) = reader.join().unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.available_read(), 2);
    }

    #[test]
    fn test_short_write_does_not_wake_reader() {
        let ring = Arc::new(BoundedByteRing::new(16));
        let reader = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut out = [0u8; 4];
                ring.read(&mut out).unwrap()
            })
        };

        ring.write(&[1]).unwrap();
        ring.write(&[2, 3]).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        ring.write(&[4]).unwrap();
        assert_eq!(reader.join().unwrap(), 4);
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let ring = BoundedByteRing::new(4);
        assert!(matches!(
            ring.write(&[0u8; 5]),
            Err(Error::RequestExceedsCapacity {
                requested: 5,
                capacity: 4
            })
        ));
        let mut out = [0u8; 5];
        assert!(ring.read(&mut out).is_err());
    }

    #[test]
    fn test_close_releases_partial_read() {
        let ring = Arc::new(BoundedByteRing::new(8));
        let writer = ring.writer().unwrap();
        let reader = ring.reader().unwrap();

        writer.write(&[9, 9, 9]).unwrap();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 6];
            let n = reader.read(&mut out).unwrap();
            (n, out)
        });

        thread::sleep(Duration::from_millis(30));
        drop(writer);

        let (n, out) = handle.join().unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[9, 9, 9]);
        assert!(ring.is_drained());
    }

    #[test]
    fn test_abandon_unblocks_writer() {
        let ring = Arc::new(BoundedByteRing::new(4));
        let writer = ring.writer().unwrap();
        let reader = ring.reader().unwrap();
        writer.write(&[1, 2, 3, 4]).unwrap();

        let handle = thread::spawn(move || writer.write(&[5, 6]));
        thread::sleep(Duration::from_millis(30));
        drop(reader);

        assert!(matches!(handle.join().unwrap(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_timeouts_transfer_nothing() {
        let ring = BoundedByteRing::new(4);
        let mut out = [0u8; 2];
        assert!(matches!(
            ring.read_timeout(&mut out, Duration::from_millis(10)),
            Err(Error::Timeout)
        ));

        ring.write(&[1, 2, 3]).unwrap();
        assert!(matches!(
            ring.write_timeout(&[4, 5], Duration::from_millis(10)),
            Err(Error::Timeout)
        ));
        assert_eq!(ring.available_read(), 3);
        assert_eq!(ring.read_timeout(&mut out, Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_wait_drained() {
        let ring = Arc::new(BoundedByteRing::new(8));
        ring.write(&[1, 2, 3, 4]).unwrap();
        assert!(!ring.wait_drained(Duration::from_millis(10)));

        let drainer = {
            let ring = ring.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut out = [0u8; 4];
                ring.read(&mut out).unwrap()
            })
        };

        assert!(ring.wait_drained(Duration::from_secs(2)));
        assert_eq!(drainer.join().unwrap(), 4);
    }

    #[test]
    fn test_concurrent_stream() {
        let ring = Arc::new(BoundedByteRing::new(64));
        let writer = ring.writer().unwrap();
        let reader = ring.reader().unwrap();

        let producer = thread::spawn(move || {
            let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
            for chunk in data.chunks(37) {
                writer.write(chunk).unwrap();
            }
        });

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            let mut out = [0u8; 16];
            loop {
                let n = reader.read(&mut out).unwrap();
                received.extend_from_slice(&out[..n]);
                if n < out.len() {
                    break;
                }
            }
            received
        });

        producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert_eq!(received.len(), 10_000);
        assert!(received
            .iter()
            .enumerate()
            .all(|(i, &b)| b == (i as u32 % 251) as u8));
    }
}
