//! Thread-safe handoff buffers connecting pipeline stages
//!
//! - [`HandoffQueue`]: unbounded FIFO for packets and frames
//! - [`BoundedByteRing`]: byte ring feeding the audio output
//! - [`BoundedItemRing`]: bounded frame buffer when backpressure is wanted
//!
//! Each buffer serves exactly one producer and one consumer. The endpoint
//! handles enforce that: each role can be claimed once, and dropping a
//! producer endpoint marks the buffer finished so the consumer never waits on
//! a stage that has already left.

pub mod byte_ring;
pub mod flag;
pub mod item_ring;
pub mod queue;

pub use byte_ring::{BoundedByteRing, RingReader, RingWriter};
pub use flag::CompletionFlag;
pub use item_ring::{BoundedItemRing, RingReceiver, RingSender};
pub use queue::{HandoffQueue, QueueConsumer, QueueProducer};

/// Producing end of an item transport, whichever buffer backs it.
pub trait Outlet<T>: Send {
    /// Hand `item` downstream. Returns the item if the consumer is gone.
    fn send(&mut self, item: T) -> Result<(), T>;
}

/// Consuming end of an item transport.
pub trait Inlet<T>: Send {
    /// Next item, blocking as needed. `None` means end-of-stream.
    fn recv(&mut self) -> Option<T>;
}
