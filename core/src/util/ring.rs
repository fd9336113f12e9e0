use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bounded history that keeps the most recent `cap` items, evicting the
/// oldest on overflow.
#[derive(Clone)]
pub struct Ring<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
    cap: usize,
}

impl<T: Clone> Ring<T> {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap,
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, item: T) {
        let mut g = self.guard();
        while g.len() >= self.cap {
            g.pop_front();
        }
        g.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<T> {
        let g = self.guard();
        let mut vec = Vec::with_capacity(g.len());
        vec.extend(g.iter().rev().cloned());
        vec
    }

    pub fn find<P>(&self, pred: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.guard().iter().rev().find(|item| pred(item)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let ring = Ring::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.snapshot(), vec![4, 3, 2]);
    }

    #[test]
    fn test_find_prefers_newest() {
        let ring = Ring::new(4);
        ring.push(("a", 1));
        ring.push(("a", 2));
        assert_eq!(ring.find(|(k, _)| *k == "a"), Some(("a", 2)));
        assert_eq!(ring.find(|(k, _)| *k == "b"), None);
    }
}
