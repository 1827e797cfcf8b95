use crate::message::Message;
use crate::sequence::WindowOrder;
use std::sync::Mutex;

/// Elements that are identified and ordered by a sequence number
pub trait Sequenced {
    fn sequence(&self) -> u32;
}

impl Sequenced for Message {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Sequenced for u32 {
    fn sequence(&self) -> u32 {
        *self
    }
}

/// An ordered set of elements, keyed by their sequence number and sorted by the wrap-around
///  aware [WindowOrder]. There is at most one element per sequence number.
///
/// Every operation is atomic on its own, there is no atomicity across operations.
///
/// NB: The order is only consistent as long as all contained sequence numbers lie inside a
///      single window. Callers are responsible for never adding elements from outside the window.
pub struct SequenceBuffer<T> {
    order: WindowOrder,
    elements: Mutex<Vec<T>>,
}

impl<T: Sequenced> SequenceBuffer<T> {
    pub fn new(window_size: u32) -> SequenceBuffer<T> {
        SequenceBuffer {
            order: WindowOrder::new(window_size),
            elements: Default::default(),
        }
    }

    fn search(&self, elements: &[T], sequence: u32) -> Result<usize, usize> {
        elements.binary_search_by(|e| self.order.compare(e.sequence(), sequence))
    }

    /// Adds an element, replacing an element with the same sequence number if one exists.
    pub fn add(&self, element: T) {
        let mut elements = self.elements.lock().unwrap();
        match self.search(&elements, element.sequence()) {
            Ok(idx) => elements[idx] = element,
            Err(idx) => elements.insert(idx, element),
        }
    }

    /// Adds an element unless an element with the same sequence number is already present.
    ///  Returns true iff the element was added.
    pub fn add_unique(&self, element: T) -> bool {
        let mut elements = self.elements.lock().unwrap();
        match self.search(&elements, element.sequence()) {
            Ok(_) => false,
            Err(idx) => {
                elements.insert(idx, element);
                true
            }
        }
    }

    /// removes and returns the oldest element
    pub fn dequeue(&self) -> Option<T> {
        let mut elements = self.elements.lock().unwrap();
        if elements.is_empty() {
            None
        }
        else {
            Some(elements.remove(0))
        }
    }

    /// removes the `n` oldest elements, or all elements if there are fewer than `n`
    pub fn remove(&self, n: usize) {
        let mut elements = self.elements.lock().unwrap();
        let n = n.min(elements.len());
        elements.drain(..n);
    }

    pub fn contains(&self, sequence: u32) -> bool {
        let elements = self.elements.lock().unwrap();
        self.search(&elements, sequence).is_ok()
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

    pub fn sequences(&self) -> Vec<u32> {
        self.elements.lock().unwrap()
            .iter()
            .map(|e| e.sequence())
            .collect()
    }
}

impl<T: Sequenced + Clone> SequenceBuffer<T> {
    /// the oldest element, without removing it
    pub fn first(&self) -> Option<T> {
        self.elements.lock().unwrap()
            .first()
            .cloned()
    }
}
