use super::{address, fifo::Fifo, transaction};
use console::style;
use std::collections::HashMap;

/// Result of offering a packet to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub enum Status {
    Accepted,
    /// The backend is busy, a retry signal follows once it can accept again.
    Retry,
}

/// Memory backend behind the load/store queue.
pub trait Backend {
    fn send(&mut self, packet: transaction::Packet, now: u64) -> Status;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: transaction::Id,
    /// Returned bytes of the requested span, empty for stores.
    pub data: Vec<u8>,
}

/// Toy memory backend.
///
/// Holds a bounded number of packets in flight and answers each after a fixed
/// latency. Backed by a sparse byte addressable memory.
#[derive(Debug)]
pub struct ToyBackend {
    pub capacity: Option<usize>,
    pub latency: u64,
    in_flight: Fifo<(u64, Response)>,
    memory: HashMap<address, u8>,
    /// Set when a packet was refused, cleared once the retry signal is raised.
    refused: bool,
    retry: bool,
    pub num_accepted: u64,
    pub num_refused: u64,
}

impl ToyBackend {
    #[must_use]
    pub fn new(capacity: Option<usize>, latency: u64) -> Self {
        Self {
            capacity,
            latency,
            in_flight: Fifo::new(capacity),
            memory: HashMap::new(),
            refused: false,
            retry: false,
            num_accepted: 0,
            num_refused: 0,
        }
    }

    #[must_use]
    pub fn read(&self, addr: address) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    pub fn write(&mut self, addr: address, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(addr.wrapping_add(i as u64), *byte);
        }
    }

    /// Next response due at or before `now`.
    pub fn pop_response(&mut self, now: u64) -> Option<Response> {
        match self.in_flight.first() {
            Some((ready, _)) if *ready <= now => {}
            _ => return None,
        }
        let (_, response) = self.in_flight.dequeue()?;
        log::debug!(
            "{}: id={} ({} bytes)",
            style("BACKEND RESPONSE").bold(),
            response.id,
            response.data.len()
        );
        if std::mem::take(&mut self.refused) {
            self.retry = true;
        }
        Some(response)
    }

    /// Returns `true` once if a refused sender may retry.
    pub fn take_retry(&mut self) -> bool {
        std::mem::take(&mut self.retry)
    }

    /// Cycle at which the next response is due.
    #[must_use]
    pub fn next_ready(&self) -> Option<u64> {
        self.in_flight.first().map(|(ready, _)| *ready)
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

impl Backend for ToyBackend {
    fn send(&mut self, packet: transaction::Packet, now: u64) -> Status {
        if self.in_flight.full() {
            log::debug!(
                "{}: id={} (capacity={:?})",
                style("BACKEND RETRY").red(),
                packet.id,
                self.capacity
            );
            self.refused = true;
            self.num_refused += 1;
            return Status::Retry;
        }
        log::debug!(
            "{}: id={} {:?} {} bytes at {:#x}",
            style("BACKEND ACCEPT").bold(),
            packet.id,
            packet.kind,
            packet.size,
            packet.addr
        );

        let data = match (packet.byte_mask, packet.data) {
            (Some(byte_mask), Some(data)) => {
                for (i, (write, byte)) in byte_mask.into_iter().zip(data).enumerate() {
                    if write {
                        self.memory.insert(packet.addr.wrapping_add(i as u64), byte);
                    }
                }
                Vec::new()
            }
            _ => (0..u64::from(packet.size))
                .map(|i| self.read(packet.addr.wrapping_add(i)))
                .collect(),
        };

        self.num_accepted += 1;
        self.in_flight.enqueue((
            now + self.latency,
            Response {
                id: packet.id,
                data,
            },
        ));
        Status::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::{Backend, Status, ToyBackend};
    use crate::{request, transaction::Packet};
    use pretty_assertions_sorted::assert_eq;

    fn load(id: u64, addr: u64, size: u32) -> Packet {
        Packet {
            id,
            kind: request::Kind::Load,
            addr,
            size,
            byte_mask: None,
            data: None,
        }
    }

    #[test]
    fn test_functional_memory() {
        let mut backend = ToyBackend::new(None, 2);
        backend.write(0x100, &[1, 2, 3, 4]);
        let store = Packet {
            id: 0,
            kind: request::Kind::Store,
            addr: 0x100,
            size: 4,
            byte_mask: Some(vec![false, true, false, true]),
            data: Some(vec![9, 9, 9, 9]),
        };
        assert_eq!(backend.send(store, 0), Status::Accepted);
        assert_eq!(backend.send(load(1, 0x100, 4), 0), Status::Accepted);

        assert!(backend.pop_response(1).is_none());
        let response = backend.pop_response(2).unwrap();
        assert_eq!(response.id, 0);
        assert!(response.data.is_empty());
        let response = backend.pop_response(2).unwrap();
        assert_eq!(response.data, vec![1, 9, 3, 9]);
        assert!(!backend.busy());
    }

    #[test]
    fn test_memory_wraps_at_end_of_address_space() {
        let mut backend = ToyBackend::new(None, 1);
        backend.write(u64::MAX - 1, &[1, 2, 3]);
        assert_eq!(backend.read(u64::MAX), 2);
        assert_eq!(backend.read(0), 3);

        assert_eq!(backend.send(load(0, u64::MAX, 2), 0), Status::Accepted);
        let response = backend.pop_response(1).unwrap();
        assert_eq!(response.data, vec![2, 3]);
    }

    #[test]
    fn test_retry_signal() {
        let mut backend = ToyBackend::new(Some(1), 5);
        assert_eq!(backend.send(load(0, 0, 32), 0), Status::Accepted);
        assert_eq!(backend.send(load(1, 32, 32), 1), Status::Retry);
        assert!(!backend.take_retry());

        assert_eq!(backend.next_ready(), Some(5));
        assert!(backend.pop_response(5).is_some());
        assert!(backend.take_retry());
        assert!(!backend.take_retry());
        assert_eq!(backend.num_refused, 1);
    }
}
