use crate::ndn::name::Name;
use std::collections::VecDeque;

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Catalog requests drain before data requests when the window opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Catalog,
    Data,
}

/// One outbound request descriptor. The hint, when set, overrides the
/// prefix-rotation strategy's forwarding hint and is passed opaquely to the
/// face.
#[derive(Debug, Clone)]
pub struct QueuedInterest {
    pub name: Name,
    pub priority: Priority,
    pub hint: Option<Vec<Name>>,
}

/// Bounded FIFO of pending outbound requests with two priority classes.
/// No deduplication happens here; the manager guarantees uniqueness against
/// its pending set before enqueueing.
#[derive(Debug)]
pub struct InterestQueue {
    catalog: VecDeque<QueuedInterest>,
    data: VecDeque<QueuedInterest>,
    capacity: usize,
}

impl InterestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            catalog: VecDeque::new(),
            data: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.catalog.len() + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty() && self.data.is_empty()
    }

    /// Returns false when the queue is full and the request was dropped.
    #[must_use]
    pub fn enqueue(&mut self, request: QueuedInterest) -> bool {
        if self.len() >= self.capacity {
            return false;
        }
        match request.priority {
            Priority::Catalog => self.catalog.push_back(request),
            Priority::Data => self.data.push_back(request),
        }
        true
    }

    /// Up to `n` requests, catalog class first, FIFO within each class.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<QueuedInterest> {
        let mut out = Vec::with_capacity(n.min(self.len()));
        while out.len() < n {
            if let Some(req) = self.catalog.pop_front() {
                out.push(req);
            } else if let Some(req) = self.data.pop_front() {
                out.push(req);
            } else {
                break;
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.catalog.clear();
        self.data.clear();
    }
}

impl Default for InterestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, priority: Priority) -> QueuedInterest {
        QueuedInterest {
            name: Name::from_uri(uri).unwrap(),
            priority,
            hint: None,
        }
    }

    #[test]
    fn catalog_drains_before_data() {
        let mut q = InterestQueue::default();
        assert!(q.enqueue(request("/d/0", Priority::Data)));
        assert!(q.enqueue(request("/c/0", Priority::Catalog)));
        assert!(q.enqueue(request("/d/1", Priority::Data)));
        assert!(q.enqueue(request("/c/1", Priority::Catalog)));

        let batch = q.dequeue_batch(3);
        let names: Vec<String> = batch.iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["/c/0", "/c/1", "/d/0"]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn batch_respects_requested_size() {
        let mut q = InterestQueue::default();
        for i in 0..5 {
            assert!(q.enqueue(request(&format!("/d/{i}"), Priority::Data)));
        }
        assert_eq!(q.dequeue_batch(2).len(), 2);
        assert_eq!(q.dequeue_batch(10).len(), 3);
        assert!(q.is_empty());
    }

    #[test]
    fn capacity_bounds_the_queue() {
        let mut q = InterestQueue::new(2);
        assert!(q.enqueue(request("/a", Priority::Data)));
        assert!(q.enqueue(request("/b", Priority::Catalog)));
        assert!(!q.enqueue(request("/c", Priority::Data)));
        assert_eq!(q.len(), 2);
    }
}
