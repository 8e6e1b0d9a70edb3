//! One-shot completion flags shared between stage threads

use std::sync::atomic::{AtomicBool, Ordering};

/// Monotonic false → true flag.
///
/// Once set it never resets. `set` reports whether this call performed the
/// transition, so exactly one caller observes `true`.
#[derive(Debug, Default)]
pub struct CompletionFlag {
    set: AtomicBool,
}

impl CompletionFlag {
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn set(&self) -> bool {
        !self.set.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

/// Claims for the single producer and single consumer of a buffer.
#[derive(Debug, Default)]
pub(crate) struct RoleClaims {
    producer: CompletionFlag,
    consumer: CompletionFlag,
}

impl RoleClaims {
    pub(crate) const fn new() -> Self {
        Self {
            producer: CompletionFlag::new(),
            consumer: CompletionFlag::new(),
        }
    }

    pub(crate) fn claim_producer(&self) -> crate::Result<()> {
        if self.producer.set() {
            Ok(())
        } else {
            Err(crate::Error::RoleClaimed("producer"))
        }
    }

    pub(crate) fn claim_consumer(&self) -> crate::Result<()> {
        if self.consumer.set() {
            Ok(())
        } else {
            Err(crate::Error::RoleClaimed("consumer"))
        }
    }
}
