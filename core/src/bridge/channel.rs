use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{PresetError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub seq: u64,
    #[serde(flatten)]
    pub message: T,
}

/// Bounded FIFO with delivery tracking.
///
/// `drain` hands out everything pending and keeps it in flight until it is
/// acknowledged. Unacknowledged messages can be put back at the head of the
/// queue, in their original order.
#[derive(Debug)]
pub struct MessageChannel<T> {
    capacity: usize,
    next_seq: u64,
    pending: VecDeque<Envelope<T>>,
    in_flight: Vec<Envelope<T>>,
}

impl<T: Clone> MessageChannel<T> {
    pub fn new(capacity: usize) -> Self {
        MessageChannel {
            capacity,
            next_seq: 1,
            pending: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// Queue a message, failing when `capacity` messages are already held.
    pub fn push(&mut self, message: T) -> Result<u64> {
        let held = self.pending.len() + self.in_flight.len();
        if held >= self.capacity {
            return Err(PresetError::ChannelFull(held));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push_back(Envelope { seq, message });
        Ok(seq)
    }

    pub fn drain(&mut self) -> Vec<Envelope<T>> {
        let drained: Vec<Envelope<T>> = self.pending.drain(..).collect();
        self.in_flight.extend(drained.iter().cloned());
        drained
    }

    /// Forget delivered messages. Unknown sequence numbers are ignored.
    pub fn ack(&mut self, seqs: &[u64]) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|e| !seqs.contains(&e.seq));
        before - self.in_flight.len()
    }

    /// Drop held messages matching `stale`, pending or in flight.
    pub fn discard_where<F: Fn(&T) -> bool>(&mut self, stale: F) -> usize {
        let before = self.pending.len() + self.in_flight.len();
        self.pending.retain(|e| !stale(&e.message));
        self.in_flight.retain(|e| !stale(&e.message));
        before - self.pending.len() - self.in_flight.len()
    }

    pub fn requeue_unacked(&mut self) -> usize {
        let count = self.in_flight.len();
        for envelope in self.in_flight.drain(..).rev() {
            self.pending.push_front(envelope);
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs<T>(envelopes: &[Envelope<T>]) -> Vec<u64> {
        envelopes.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn test_drain_in_order() {
        let mut channel = MessageChannel::new(8);
        channel.push("a").unwrap();
        channel.push("b").unwrap();
        let drained = channel.drain();
        let messages: Vec<&str> = drained.iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["a", "b"]);
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.in_flight_len(), 2);
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn test_bounded() {
        let mut channel = MessageChannel::new(2);
        channel.push(1).unwrap();
        channel.push(2).unwrap();
        assert!(matches!(channel.push(3), Err(PresetError::ChannelFull(2))));

        // In-flight messages still count until acknowledged.
        let drained = channel.drain();
        assert!(channel.push(3).is_err());
        assert_eq!(channel.ack(&seqs(&drained)), 2);
        channel.push(3).unwrap();
    }

    #[test]
    fn test_requeue_keeps_order_ahead_of_new() {
        let mut channel = MessageChannel::new(8);
        channel.push("a").unwrap();
        channel.push("b").unwrap();
        channel.push("c").unwrap();
        let first = channel.drain();
        channel.ack(&[first[1].seq]);
        channel.push("d").unwrap();

        assert_eq!(channel.requeue_unacked(), 2);
        let again: Vec<&str> = channel.drain().iter().map(|e| e.message).collect();
        assert_eq!(again, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_discard_frees_room() {
        let mut channel = MessageChannel::new(2);
        channel.push("old list").unwrap();
        channel.push("units").unwrap();
        channel.drain();

        assert_eq!(channel.discard_where(|m| *m == "old list"), 1);
        channel.push("new list").unwrap();
        channel.requeue_unacked();
        let order: Vec<&str> = channel.drain().iter().map(|e| e.message).collect();
        assert_eq!(order, vec!["units", "new list"]);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut channel = MessageChannel::new(8);
        let a = channel.push(()).unwrap();
        let b = channel.push(()).unwrap();
        assert!(b > a);
        assert_eq!(channel.ack(&[99]), 0);
        assert!(!channel.is_empty());
    }
}
