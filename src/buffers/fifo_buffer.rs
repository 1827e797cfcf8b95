use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::trace;

/// A FIFO queue that is safe for concurrent producers and consumers. Every operation is atomic
///  on its own, but there is no atomicity across operations.
///
/// The queue can optionally be bounded: adding to a full queue is rejected, and it is up to the
///  caller to decide what that means (typically dropping the element).
pub struct FifoBuffer<T> {
    capacity: Option<usize>,
    elements: Mutex<VecDeque<T>>,
}

impl<T> Default for FifoBuffer<T> {
    fn default() -> Self {
        FifoBuffer::new()
    }
}

impl<T> FifoBuffer<T> {
    pub fn new() -> FifoBuffer<T> {
        FifoBuffer {
            capacity: None,
            elements: Default::default(),
        }
    }

    pub fn bounded(capacity: usize) -> FifoBuffer<T> {
        FifoBuffer {
            capacity: Some(capacity),
            elements: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// returns false iff the buffer is bounded and full, in which case the element is dropped
    pub fn add(&self, element: T) -> bool {
        let mut elements = self.elements.lock().unwrap();
        if let Some(capacity) = self.capacity {
            if elements.len() >= capacity {
                trace!("FIFO buffer is full ({} elements) - rejecting", capacity);
                return false;
            }
        }
        elements.push_back(element);
        true
    }

    pub fn dequeue(&self) -> Option<T> {
        self.elements.lock().unwrap()
            .pop_front()
    }

    pub fn clear(&self) {
        self.elements.lock().unwrap()
            .clear();
    }

    pub fn len(&self) -> usize {
        self.elements.lock().unwrap()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: PartialEq> FifoBuffer<T> {
    /// Adds the element unless an equal element is already queued. Returns true iff the element
    ///  was added.
    pub fn add_unique(&self, element: T) -> bool {
        let mut elements = self.elements.lock().unwrap();
        if elements.contains(&element) {
            return false;
        }
        if let Some(capacity) = self.capacity {
            if elements.len() >= capacity {
                return false;
            }
        }
        elements.push_back(element);
        true
    }
}

impl<T: Clone> FifoBuffer<T> {
    pub fn first(&self) -> Option<T> {
        self.elements.lock().unwrap()
            .front()
            .cloned()
    }
}
