//! Per-node delay buffer (spec §4.2): a min-heap of
//! `(deadline_ms, insertion_seq, envelope)` releasing envelopes at or after
//! their scheduled deadline, FIFO among envelopes sharing a deadline.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::message::Envelope;
use crate::time::SimTime;

struct Entry<R, P> {
    deadline: SimTime,
    insertion_seq: u64,
    envelope: Envelope<R, P>,
}

impl<R, P> PartialEq for Entry<R, P> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.insertion_seq == other.insertion_seq
    }
}
impl<R, P> Eq for Entry<R, P> {}

impl<R, P> PartialOrd for Entry<R, P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R, P> Ord for Entry<R, P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse deadline/insertion_seq ordering
        // so `pop()` returns the earliest deadline, FIFO among ties.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.insertion_seq.cmp(&self.insertion_seq))
    }
}

/// Only `Wrapped`/`MultiWrapped` envelopes are ever inserted; plain or
/// application envelopes should never reach a delay buffer (spec §4.2).
pub struct DelayBuffer<R, P> {
    heap: BinaryHeap<Entry<R, P>>,
    next_insertion_seq: u64,
}

impl<R, P> Default for DelayBuffer<R, P> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_insertion_seq: 0,
        }
    }
}

impl<R, P> DelayBuffer<R, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Inserts `envelope` with a deadline of `now + envelope's delay`.
    pub fn add(&mut self, now: SimTime, envelope: Envelope<R, P>) {
        let delay_ms = match &envelope {
            Envelope::Wrapped { delay_ms, .. } | Envelope::MultiWrapped { delay_ms, .. } => {
                *delay_ms
            }
            Envelope::Plain { .. } => {
                debug_assert!(false, "plain envelopes must not enter a delay buffer");
                0
            }
        };
        let deadline = now + delay_ms;
        let seq = self.next_insertion_seq;
        self.next_insertion_seq += 1;
        self.heap.push(Entry {
            deadline,
            insertion_seq: seq,
            envelope,
        });
    }

    /// Returns, in deadline order (FIFO among ties), every envelope whose
    /// deadline is `<= now`, removing them from the buffer.
    pub fn pop_current_round(&mut self, now: SimTime) -> Vec<Envelope<R, P>> {
        let mut released = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            released.push(self.heap.pop().unwrap().envelope);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryOnlineState, PlainBody, Tag};

    fn wrapped(recipient: u32, delay_ms: u64) -> Envelope<u32, ()> {
        Envelope::Wrapped {
            recipient,
            tag: Tag::Payload,
            body: Box::new(Envelope::Plain {
                recipient,
                tag: Tag::Payload,
                body: PlainBody::Empty,
                delivery_online_state: DeliveryOnlineState::Unset,
            }),
            delay_ms,
            delivery_online_state: DeliveryOnlineState::Unset,
        }
    }

    #[test]
    fn releases_only_at_or_after_deadline() {
        let mut buf: DelayBuffer<u32, ()> = DelayBuffer::new();
        buf.add(SimTime(0), wrapped(1, 100));

        assert!(buf.pop_current_round(SimTime(99)).is_empty());
        let released = buf.pop_current_round(SimTime(100));
        assert_eq!(released.len(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn fifo_among_equal_deadlines() {
        let mut buf: DelayBuffer<u32, ()> = DelayBuffer::new();
        buf.add(SimTime(0), wrapped(1, 50));
        buf.add(SimTime(0), wrapped(2, 50));
        buf.add(SimTime(0), wrapped(3, 50));

        let released = buf.pop_current_round(SimTime(50));
        let recipients: Vec<u32> = released.iter().map(|e| *e.recipient()).collect();
        assert_eq!(recipients, vec![1, 2, 3]);
    }

    #[test]
    fn orders_across_distinct_deadlines() {
        let mut buf: DelayBuffer<u32, ()> = DelayBuffer::new();
        buf.add(SimTime(0), wrapped(3, 30));
        buf.add(SimTime(0), wrapped(1, 10));
        buf.add(SimTime(0), wrapped(2, 20));

        let released = buf.pop_current_round(SimTime(30));
        let recipients: Vec<u32> = released.iter().map(|e| *e.recipient()).collect();
        assert_eq!(recipients, vec![1, 2, 3]);
    }
}
