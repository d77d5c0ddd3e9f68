//! Bounded FIFO part buffer between stations.
//!
//! Buffers are the only ownership hand-off point between stations. They are
//! not internally synchronized; only the simulation thread touches them,
//! tick-scoped through the coordinator.

use shopfloor_common::types::Part;
use std::collections::VecDeque;

/// Bounded FIFO of in-flight parts.
#[derive(Debug)]
pub struct PartBuffer {
    capacity: usize,
    queue: VecDeque<Part>,
}

impl PartBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Add a part. Fails exactly when the buffer is at capacity.
    pub fn push(&mut self, part: Part) -> Result<(), Part> {
        if self.queue.len() >= self.capacity {
            return Err(part);
        }
        self.queue.push_back(part);
        Ok(())
    }

    /// Remove and return the oldest part.
    pub fn pop(&mut self) -> Option<Part> {
        self.queue.pop_front()
    }

    /// The oldest part without removing it.
    pub fn peek(&self) -> Option<&Part> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_part(n: u32) -> Part {
        Part::new(
            format!("PART-2026-08-02-{n:04}"),
            "LN-2026-01001".into(),
            "FormingMachine",
            Utc::now(),
        )
    }

    #[test]
    fn test_fifo_order() {
        let mut buf = PartBuffer::new(3);
        buf.push(make_part(1)).unwrap();
        buf.push(make_part(2)).unwrap();
        assert_eq!(buf.pop().unwrap().id, "PART-2026-08-02-0001");
        assert_eq!(buf.pop().unwrap().id, "PART-2026-08-02-0002");
        assert!(buf.pop().is_none());
    }

    #[test]
    fn test_push_fails_only_when_full() {
        let mut buf = PartBuffer::new(2);
        assert!(buf.push(make_part(1)).is_ok());
        assert!(buf.push(make_part(2)).is_ok());
        assert!(buf.is_full());

        // The rejected part comes back to the caller.
        let rejected = buf.push(make_part(3)).unwrap_err();
        assert_eq!(rejected.id, "PART-2026-08-02-0003");
        assert_eq!(buf.len(), 2);

        buf.pop();
        assert!(buf.push(make_part(3)).is_ok());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut buf = PartBuffer::new(2);
        buf.push(make_part(7)).unwrap();
        assert_eq!(buf.peek().unwrap().id, "PART-2026-08-02-0007");
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_count_stays_within_bounds() {
        let mut buf = PartBuffer::new(5);
        for i in 0..20 {
            let _ = buf.push(make_part(i));
            assert!(buf.len() <= buf.capacity());
        }
        for _ in 0..20 {
            buf.pop();
        }
        assert!(buf.is_empty());
    }
}
