use std::collections::VecDeque;

/// A first in, first out queue with an optional capacity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fifo<T> {
    inner: VecDeque<T>,
    max_size: Option<usize>,
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> std::iter::IntoIterator for Fifo<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T> std::fmt::Display for Fifo<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fifo({:>2}/{:<2}){:#?}",
            self.inner.len(),
            self.max_size
                .map(|max| max.to_string())
                .as_deref()
                .unwrap_or(""),
            self.inner
                .iter()
                .map(std::string::ToString::to_string)
                .collect::<Vec<_>>()
        )
    }
}

impl<T> Fifo<T> {
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            inner: VecDeque::new(),
            max_size,
        }
    }

    #[must_use]
    pub fn iter(&self) -> std::collections::vec_deque::Iter<T> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> std::collections::vec_deque::IterMut<T> {
        self.inner.iter_mut()
    }

    /// Appends at the back.
    ///
    /// Capacity is checked by the caller using [`Fifo::can_fit`].
    pub fn enqueue(&mut self, value: T) {
        debug_assert!(self.can_fit(1));
        self.inner.push_back(value);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    /// Puts a value that was just dequeued back at the head.
    pub fn requeue(&mut self, value: T) {
        self.inner.push_front(value);
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.inner.front()
    }

    /// Removes the first value matching `predicate`, keeping the order of the rest.
    pub fn remove_first(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let idx = self.inner.iter().position(predicate)?;
        self.inner.remove(idx)
    }

    #[must_use]
    pub fn full(&self) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() >= max,
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn can_fit(&self, n: usize) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() + n <= max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Fifo;

    #[test]
    fn test_bounded_fifo() {
        let mut fifo = Fifo::new(Some(2));
        assert!(fifo.can_fit(2));
        assert!(!fifo.can_fit(3));
        fifo.enqueue(1);
        fifo.enqueue(2);
        assert!(fifo.full());
        assert!(!fifo.can_fit(1));
        assert_eq!(fifo.dequeue(), Some(1));
        fifo.requeue(1);
        assert_eq!(fifo.first(), Some(&1));
        assert_eq!(fifo.remove_first(|v| *v == 2), Some(2));
        assert_eq!(fifo.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_unbounded_fifo() {
        let mut fifo = Fifo::default();
        for i in 0..100 {
            fifo.enqueue(i);
        }
        assert!(!fifo.full());
        assert!(fifo.can_fit(1000));
        assert_eq!(fifo.to_string().lines().next(), Some("Fifo(100/  )["));
    }
}
