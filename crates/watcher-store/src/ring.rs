use std::collections::VecDeque;

/// Fixed-capacity FIFO. Pushing into a full buffer evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.push(item);
        }
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut ring = RingBuffer::new(256);
        ring.extend(0..300);

        assert_eq!(ring.len(), 256);
        let kept: Vec<i32> = ring.iter().copied().collect();
        assert_eq!(kept.first(), Some(&44));
        assert_eq!(kept.last(), Some(&299));
        assert!(kept.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut ring = RingBuffer::new(2);
        ring.extend(["a", "b", "c"]);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec!["b", "c"]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 2);
    }
}
