use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

#[derive(Debug)]
struct Scheduled<E> {
    time: u64,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Discrete event queue.
///
/// Events due at the same time are processed in the order they were scheduled.
/// An event that is already scheduled is not scheduled a second time.
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<Reverse<Scheduled<E>>>,
    scheduled: HashSet<E>,
    seq: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            scheduled: HashSet::new(),
            seq: 0,
        }
    }
}

impl<E> EventQueue<E>
where
    E: std::hash::Hash + Eq + Clone + std::fmt::Debug,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` at `time`.
    ///
    /// # Returns
    /// `false` if the event was already scheduled.
    pub fn schedule(&mut self, event: E, time: u64) -> bool {
        if !self.scheduled.insert(event.clone()) {
            log::trace!("event {:?} already scheduled", event);
            return false;
        }
        log::trace!("schedule {:?} at {}", event, time);
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            time,
            seq: self.seq,
            event,
        }));
        true
    }

    /// Time of the next scheduled event.
    #[must_use]
    pub fn next_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(next)| next.time)
    }

    /// Removes the next event that is due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<(u64, E)> {
        if self.next_time()? > now {
            return None;
        }
        let Reverse(Scheduled { time, event, .. }) = self.heap.pop()?;
        self.scheduled.remove(&event);
        Some((time, event))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
