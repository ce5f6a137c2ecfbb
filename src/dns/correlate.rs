//! transaction ids for matching UDP responses to their requests

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::Display;
use rand::random;

use crate::dns::protocol::DnsPacket;

/// Random draws attempted before scanning for a free id.
const RANDOM_ATTEMPTS: usize = 32;

#[derive(Debug, Display)]
pub enum CorrelateError {
    #[display(fmt = "all 65536 transaction ids are in flight")]
    Exhausted,
}

impl std::error::Error for CorrelateError {}

/// Hands out transaction ids that are unique among the requests currently in
/// flight through the same correlator.
#[derive(Clone, Default)]
pub struct Correlator {
    in_flight: Arc<Mutex<HashSet<u16>>>,
}

impl Correlator {
    pub fn new() -> Correlator {
        Correlator::default()
    }

    /// Reserves a fresh id. The id stays reserved until the returned
    /// `PendingId` is dropped. Fails only when every id is in flight.
    pub fn next_id(&self) -> Result<PendingId, CorrelateError> {
        let mut in_flight = self.lock();

        let drawn = (0..RANDOM_ATTEMPTS)
            .map(|_| random::<u16>())
            .find(|candidate| !in_flight.contains(candidate));

        // Mostly full, walk from a random starting point instead
        let id = match drawn {
            Some(id) => id,
            None => {
                let start = random::<u16>();
                (0..=u16::MAX)
                    .map(|offset| start.wrapping_add(offset))
                    .find(|candidate| !in_flight.contains(candidate))
                    .ok_or(CorrelateError::Exhausted)?
            }
        };
        in_flight.insert(id);

        Ok(PendingId {
            id,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Whether `response` answers the request sent with `request_id`.
    pub fn matches(request_id: u16, response: &DnsPacket) -> bool {
        response.header.id == request_id
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An id reserved for one outstanding request.
pub struct PendingId {
    id: u16,
    in_flight: Arc<Mutex<HashSet<u16>>>,
}

impl PendingId {
    pub fn id(&self) -> u16 {
        self.id
    }
}

impl Drop for PendingId {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_ids_are_unique_while_pending() {
        let correlator = Correlator::new();

        let pending = (0..1000)
            .map(|_| correlator.next_id().unwrap())
            .collect::<Vec<_>>();
        let ids = pending.iter().map(PendingId::id).collect::<HashSet<_>>();

        assert_eq!(1000, ids.len());
        assert_eq!(1000, correlator.in_flight());

        drop(pending);
        assert_eq!(0, correlator.in_flight());
    }

    #[test]
    fn test_matches() {
        let correlator = Correlator::new();
        let pending = correlator.next_id().unwrap();

        let mut response = DnsPacket::new();
        response.header.id = pending.id();
        assert!(Correlator::matches(pending.id(), &response));

        for offset in 1..=u16::MAX {
            response.header.id = pending.id().wrapping_add(offset);
            assert!(!Correlator::matches(pending.id(), &response));
        }
    }

    #[test]
    fn test_exhausted_ids() {
        let correlator = Correlator::new();
        correlator.lock().extend(0..=u16::MAX);

        match correlator.next_id() {
            Err(CorrelateError::Exhausted) => {}
            Ok(pending) => panic!("unexpected id {}", pending.id()),
        }

        // A single free id is still found
        correlator.lock().remove(&4711);
        let pending = correlator.next_id().unwrap();
        assert_eq!(4711, pending.id());
        assert_eq!(65536, correlator.in_flight());
    }
}
