//! Fixed-capacity FIFO with explicit index arithmetic.
//!
//! Backs both the rolling amplitude history and the pre-roll window. When the
//! ring is full, [`push`](FixedRing::push) evicts and returns the oldest
//! entry. The backing storage is allocated once; changing the capacity means
//! building a new ring.

/// A fixed-capacity circular FIFO.
#[derive(Debug, Clone)]
pub struct FixedRing<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest entry.
    head: usize,
    /// Number of live entries (≤ capacity).
    len: usize,
}

impl<T> FixedRing<T> {
    /// Create an empty ring holding at most `capacity` entries.
    ///
    /// A capacity of 0 is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Append `item`, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Entry at logical position `i` (0 = oldest).
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        self.slots[(self.head + i) % self.capacity()].as_ref()
    }

    /// Iterate oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T: Clone> FixedRing<T> {
    /// Clone the contents oldest → newest without disturbing the ring.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_within_capacity_keeps_order() {
        let mut ring = FixedRing::new(4);
        for v in 1..=3 {
            assert_eq!(ring.push(v), None);
        }
        assert_eq!(ring.snapshot(), vec![1, 2, 3]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut ring = FixedRing::new(3);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.snapshot(), vec![3, 4, 5]);
        assert_eq!(ring.get(2), Some(&5));
    }

    #[test]
    fn head_wraps_across_many_evictions() {
        let mut ring = FixedRing::new(2);
        assert!(ring.is_empty());
        for v in ["a", "b", "c", "d", "e"] {
            ring.push(v);
        }
        assert_eq!(ring.snapshot(), vec!["d", "e"]);
        assert_eq!(ring.get(0), Some(&"d"));
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let mut ring = FixedRing::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.push(7);
        assert_eq!(ring.push(8), Some(7));
    }

    #[test]
    fn get_out_of_range_is_none() {
        let mut ring = FixedRing::new(2);
        ring.push(1);
        assert_eq!(ring.get(0), Some(&1));
        assert_eq!(ring.get(1), None);
    }
}
