//! A two-array FIFO with amortized O(1) push and shift.
//!
//! Items are pushed onto `tail` and shifted off `head` from a moving
//! `offset`. Once `head` is fully drained the two arrays swap roles, so
//! shifting never has to compact or move the remaining items.

/// FIFO queue used for a path's pending operations.
#[derive(Debug)]
pub struct Queue<T> {
    head: Vec<Option<T>>,
    tail: Vec<Option<T>>,
    offset: usize,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            head: Vec::new(),
            tail: Vec::new(),
            offset: 0,
        }
    }

    /// Append an item at the back.
    pub fn push(&mut self, item: T) {
        self.tail.push(Some(item));
    }

    /// The front item, without removing it.
    pub fn first(&mut self) -> Option<&T> {
        self.normalize();
        self.head.get(self.offset).and_then(Option::as_ref)
    }

    /// Remove and return the front item.
    pub fn shift(&mut self) -> Option<T> {
        self.normalize();
        let item = self.head.get_mut(self.offset)?.take();
        self.offset += 1;
        item
    }

    /// The most recently pushed item that is still queued.
    pub fn last(&self) -> Option<&T> {
        match self.tail.last() {
            Some(item) => item.as_ref(),
            None => self.head.last().and_then(Option::as_ref),
        }
    }

    /// Mutable access to the most recently pushed item that is still queued.
    pub fn last_mut(&mut self) -> Option<&mut T> {
        match self.tail.last_mut() {
            Some(item) => item.as_mut(),
            None => self.head.last_mut().and_then(Option::as_mut),
        }
    }

    pub fn len(&self) -> usize {
        self.head.len() - self.offset + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn normalize(&mut self) {
        if self.offset == self.head.len() {
            // The drained head becomes the next tail, keeping its allocation.
            self.head.clear();
            std::mem::swap(&mut self.head, &mut self.tail);
            self.offset = 0;
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
