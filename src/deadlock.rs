use crate::{address, request, transaction, translation};
use serde::Serialize;
use strum::{EnumCount, IntoEnumIterator};

/// Snapshot of everything the load/store queue is holding on to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct State {
    pub coalescing_register: Option<request::Id>,
    /// Banks the stalled coalescing register waits on.
    pub waiting_on_banks: Vec<usize>,
    pub banks: Vec<Vec<(transaction::Id, transaction::Status)>>,
    pub blocked_banks: Vec<usize>,
    pub pending_translations: Vec<(address, translation::Mode, usize)>,
    pub in_flight: Vec<transaction::Id>,
    /// Outstanding transactions of each admitted warp request.
    pub outstanding: Vec<(request::Id, usize)>,
    pub delivery_queue: Vec<request::Id>,
    pub core_port_blocked: bool,
}

impl State {
    #[must_use]
    pub fn new(num_banks: usize) -> Self {
        Self {
            banks: vec![vec![]; num_banks],
            ..Self::default()
        }
    }

    /// Nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coalescing_register.is_none()
            && self.banks.iter().all(Vec::is_empty)
            && self.pending_translations.is_empty()
            && self.in_flight.is_empty()
            && self.outstanding.is_empty()
            && self.delivery_queue.is_empty()
    }

    /// Number of buffered transactions per status, skipping empty ones.
    #[must_use]
    pub fn status_counts(&self) -> Vec<(transaction::Status, usize)> {
        let mut counts = [0; transaction::Status::COUNT];
        for (_, status) in self.banks.iter().flatten() {
            counts[*status as usize] += 1;
        }
        transaction::Status::iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::State;
    use crate::transaction::Status;
    use pretty_assertions_sorted::assert_eq;

    #[test]
    fn test_status_counts() {
        let mut state = State::new(2);
        assert!(state.is_empty());
        assert!(state.status_counts().is_empty());

        state.banks[0] = vec![(0, Status::Translating), (2, Status::Buffered)];
        state.banks[1] = vec![(1, Status::Translating)];
        assert!(!state.is_empty());
        assert_eq!(
            state.status_counts(),
            vec![(Status::Buffered, 1), (Status::Translating, 2)]
        );
    }
}
