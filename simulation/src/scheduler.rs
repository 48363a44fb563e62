//! Discrete-event scheduler
//!
//! Events are ordered by virtual time; events scheduled for the same instant
//! run in the order they were scheduled. Nothing is ever cancelled, and
//! virtual time never moves backwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// An event waiting in the queue
#[derive(Debug)]
struct Scheduled<E> {
    at: Duration,
    /// Insertion order, for FIFO ties
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        match other.at.cmp(&self.at) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Min-heap of timed events with a virtual clock
#[derive(Debug)]
pub struct Scheduler<E> {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<Scheduled<E>>,
    processed: u64,
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            processed: 0,
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `event` at absolute time `at`
    ///
    /// Times in the past are clamped to now.
    pub fn schedule_at(&mut self, at: Duration, event: E) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            at: at.max(self.now),
            seq,
            event,
        });
    }

    /// Schedule `event` after `delay`
    pub fn schedule_in(&mut self, delay: Duration, event: E) {
        self.schedule_at(self.now + delay, event);
    }

    /// Time of the next pending event
    pub fn peek_time(&self) -> Option<Duration> {
        self.queue.peek().map(|scheduled| scheduled.at)
    }

    /// Remove the next event and advance the clock to its time
    pub fn pop(&mut self) -> Option<(Duration, E)> {
        let scheduled = self.queue.pop()?;
        self.now = scheduled.at;
        self.processed += 1;
        Some((scheduled.at, scheduled.event))
    }

    /// Advance the clock without running anything
    ///
    /// Used when a run stops at a fixed time; never moves backwards.
    pub fn advance_to(&mut self, at: Duration) {
        self.now = self.now.max(at);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events popped so far
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_pop_in_time_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(Duration::from_secs(10), "late");
        scheduler.schedule_at(Duration::from_secs(5), "early");
        scheduler.schedule_at(Duration::from_secs(7), "middle");

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop().map(|(_, e)| e)).collect();
        assert_eq!(order, vec!["early", "middle", "late"]);
        assert_eq!(scheduler.now(), Duration::from_secs(10));
        assert_eq!(scheduler.processed(), 3);
    }

    #[test]
    fn test_same_time_is_fifo() {
        let mut scheduler = Scheduler::new();
        for i in 0..100 {
            scheduler.schedule_at(Duration::from_secs(1), i);
        }

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop().map(|(_, e)| e)).collect();
        assert_eq!(order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_past_events_are_clamped_to_now() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(Duration::from_secs(5), 'a');
        scheduler.pop();

        scheduler.schedule_at(Duration::from_secs(1), 'b');
        assert_eq!(scheduler.peek_time(), Some(Duration::from_secs(5)));

        scheduler.schedule_in(Duration::ZERO, 'c');
        assert_eq!(scheduler.pop(), Some((Duration::from_secs(5), 'b')));
        assert_eq!(scheduler.pop(), Some((Duration::from_secs(5), 'c')));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_advance_never_goes_backwards() {
        let mut scheduler: Scheduler<()> = Scheduler::new();
        scheduler.advance_to(Duration::from_secs(3));
        scheduler.advance_to(Duration::from_secs(1));
        assert_eq!(scheduler.now(), Duration::from_secs(3));
    }
}
