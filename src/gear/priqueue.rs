//! Binary min-heap with an injectable comparator and resize policy.
//!
//! Elements live contiguously and are moved around on every insert, remove and resize, so
//! nothing may hold a reference into the queue across operations (the borrow checker enforces
//! this for [`PriorityQueue::peek`]).

use crate::foundation::error::{GearError, GearResult};
use std::cmp::Ordering;
use std::fmt;

/// Capacity never shrinks below this and growth starts here.
pub const MIN_CAPACITY: usize = 64;

/// Total order over queue elements; the minimal element is served first.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Capacity policy: given the current `capacity` and `used` element count, return the new
/// capacity, or `None` to refuse the resize.
///
/// Called when an insert finds the queue full (`used == capacity`) and when a remove finds
/// usage below the low-water mark.
pub type ResizePolicy = fn(capacity: usize, used: usize) -> Option<usize>;

/// Default policy: double when full (starting at [`MIN_CAPACITY`]), halve when sparse, never
/// below [`MIN_CAPACITY`].
pub fn geometric_resize(capacity: usize, used: usize) -> Option<usize> {
    if used >= capacity {
        capacity.max(MIN_CAPACITY / 2).checked_mul(2)
    } else {
        Some((capacity / 2).max(MIN_CAPACITY))
    }
}

fn low_water_for(capacity: usize) -> usize {
    (capacity / 8).saturating_sub(8)
}

/// Priority queue ordered by a user-supplied comparator.
pub struct PriorityQueue<T> {
    heap: Vec<T>,
    capacity: usize,
    low_water: usize,
    cmp: Comparator<T>,
    resize: ResizePolicy,
}

impl<T> PriorityQueue<T> {
    /// Empty queue using [`geometric_resize`].
    pub fn new(cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        Self::with_policy(cmp, geometric_resize)
    }

    /// Empty queue with a custom resize policy. Nothing is allocated until the first insert.
    pub fn with_policy(
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        resize: ResizePolicy,
    ) -> Self {
        Self {
            heap: Vec::new(),
            capacity: 0,
            low_water: 0,
            cmp: Box::new(cmp),
            resize,
        }
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Current capacity as granted by the resize policy.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usage below which a remove asks the policy to shrink.
    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Override the shrink threshold.
    pub fn set_low_water(&mut self, low_water: usize) {
        self.low_water = low_water;
    }

    /// Minimal element, if any.
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Queue `element`.
    ///
    /// Fails with a resource error, leaving the queue unchanged, when the queue is full and the
    /// resize policy refuses to grow it.
    pub fn insert(&mut self, element: T) -> GearResult<()> {
        let used = self.heap.len();
        if used >= self.capacity {
            let grown = (self.resize)(self.capacity, used)
                .filter(|&c| c > used)
                .ok_or_else(|| {
                    GearError::resource(format!(
                        "priority queue refused to grow beyond {} elements",
                        self.capacity
                    ))
                })?;
            self.apply_capacity(grown);
        }
        self.heap.push(element);
        self.sift_up(used);
        Ok(())
    }

    /// Take the minimal element.
    ///
    /// Returns `None` on an empty queue, and also when usage dropped below the low-water mark
    /// and the policy refused to shrink; the element then stays queued.
    pub fn remove(&mut self) -> Option<T> {
        let used = self.heap.len();
        if used == 0 {
            return None;
        }
        if used < self.low_water {
            match (self.resize)(self.capacity, used).filter(|&c| c >= used) {
                Some(shrunk) => self.apply_capacity(shrunk),
                None => return None,
            }
        }
        let last = used - 1;
        self.heap.swap(0, last);
        let min = self.heap.pop();
        self.sift_down(0);
        min
    }

    /// Grow to hold at least `n` elements and disable shrinking until the next policy resize.
    pub fn reserve(&mut self, n: usize) {
        if n > self.capacity {
            self.heap.reserve_exact(n - self.heap.len());
            self.capacity = n;
        }
        self.low_water = 0;
    }

    /// Drop all elements, keeping the capacity.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Remove every element for which `keep` returns `false`, restoring heap order afterwards.
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.heap.retain(keep);
        for i in (0..self.heap.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn apply_capacity(&mut self, capacity: usize) {
        if capacity > self.heap.capacity() {
            self.heap.reserve_exact(capacity - self.heap.len());
        } else {
            self.heap.shrink_to(capacity);
        }
        tracing::trace!(from = self.capacity, to = capacity, "priority queue resized");
        self.capacity = capacity;
        self.low_water = low_water_for(capacity);
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.cmp)(&self.heap[a], &self.heap[b]) == Ordering::Less
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, i) {
                break;
            }
            self.heap.swap(i, child);
            i = child;
        }
    }
}

impl<T: Ord + 'static> PriorityQueue<T> {
    /// Queue ordered by `T`'s natural order.
    pub fn natural() -> Self {
        Self::new(T::cmp)
    }
}

impl<T: fmt::Debug> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("capacity", &self.capacity)
            .field("low_water", &self.low_water)
            .field("min", &self.heap.first())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/gear/priqueue.rs"]
mod tests;
