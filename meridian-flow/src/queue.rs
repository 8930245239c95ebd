//! Sub-queue contracts and the bounded FIFO.
//!
//! A [`FairQueue`](crate::FairQueue) does not store items itself; it
//! schedules between sub-queues that implement [`ServiceQueue`]. Sub-queues
//! may refuse to expose a front item even while holding data (a nested
//! fair queue whose keys are all disabled, for example), which is why
//! `front` is allowed to return `None` while `is_empty` is false.

use std::collections::VecDeque;

use meridian_core::Transmittable;

use crate::error::{FlowError, FlowResult};

/// A queue the fair queue can pull from.
pub trait ServiceQueue {
    /// Items handed out by this queue.
    type Item: Transmittable;

    /// The next item to send, if one may be sent now.
    fn front(&mut self) -> Option<&Self::Item>;

    /// Removes and returns the next item. Ownership moves to the caller.
    fn pop(&mut self) -> Option<Self::Item>;

    /// True if the queue holds nothing at all.
    fn is_empty(&self) -> bool;

    /// Bytes currently held.
    fn size(&self) -> u32;

    /// Bytes this queue may hold.
    fn max_size(&self) -> u32;
}

/// A sub-queue that accepts items directly.
pub trait PushQueue: ServiceQueue {
    /// Appends an item.
    ///
    /// # Errors
    /// Returns `FlowError::QueueFull` if the item does not fit. The item is
    /// dropped.
    fn push(&mut self, item: Self::Item) -> FlowResult<()>;
}

/// A FIFO bounded by the total byte size of its items.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    size: u32,
    max_size: u32,
}

impl<T: Transmittable> BoundedQueue<T> {
    /// Creates an empty queue holding at most `max_size` bytes.
    #[must_use]
    pub const fn new(max_size: u32) -> Self {
        Self {
            items: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Number of items queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if an item of `bytes` would be accepted.
    #[must_use]
    pub const fn has_room(&self, bytes: u32) -> bool {
        self.size.saturating_add(bytes) <= self.max_size
    }

    /// Appends an item, handing it back if it does not fit.
    ///
    /// # Errors
    /// Returns the item if the queue lacks room for it.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        let bytes = item.size_bytes();
        if !self.has_room(bytes) {
            return Err(item);
        }
        self.size += bytes;
        self.items.push_back(item);
        Ok(())
    }

    /// Puts an item back at the head, ahead of everything queued.
    ///
    /// Meant for an item just popped, so it skips the size check.
    pub fn push_front(&mut self, item: T) {
        self.size = self.size.saturating_add(item.size_bytes());
        self.items.push_front(item);
    }

    /// Drains every queued item.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.size = 0;
        self.items.drain(..)
    }
}

impl<T: Transmittable> ServiceQueue for BoundedQueue<T> {
    type Item = T;

    fn front(&mut self) -> Option<&T> {
        self.items.front()
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.size -= item.size_bytes();
        Some(item)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn max_size(&self) -> u32 {
        self.max_size
    }
}

impl<T: Transmittable> PushQueue for BoundedQueue<T> {
    fn push(&mut self, item: T) -> FlowResult<()> {
        let requested = item.size_bytes();
        let size = self.size;
        self.try_push(item).map_err(|_| FlowError::QueueFull {
            size,
            requested,
            max_size: self.max_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Packet(u32);

    impl Transmittable for Packet {
        fn size_bytes(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = BoundedQueue::new(1000);
        queue.push(Packet(10)).unwrap();
        queue.push(Packet(20)).unwrap();
        assert_eq!(queue.size(), 30);
        assert_eq!(queue.pop(), Some(Packet(10)));
        assert_eq!(queue.pop(), Some(Packet(20)));
        assert!(queue.is_empty());
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_byte_bound() {
        let mut queue = BoundedQueue::new(100);
        queue.push(Packet(60)).unwrap();
        let result = queue.push(Packet(60));
        assert!(matches!(
            result,
            Err(FlowError::QueueFull {
                size: 60,
                requested: 60,
                max_size: 100
            })
        ));
        assert_eq!(queue.len(), 1);
        queue.push(Packet(40)).unwrap();
        assert_eq!(queue.size(), 100);
    }

    #[test]
    fn test_try_push_returns_item() {
        let mut queue = BoundedQueue::new(10);
        let rejected = queue.try_push(Packet(11));
        assert_eq!(rejected, Err(Packet(11)));
    }

    #[test]
    fn test_drain_resets_size() {
        let mut queue = BoundedQueue::new(100);
        queue.push(Packet(10)).unwrap();
        queue.push(Packet(10)).unwrap();
        assert_eq!(queue.drain().count(), 2);
        assert_eq!(queue.size(), 0);
        assert!(queue.is_empty());
    }
}
