use super::{address, fifo::Fifo, request, request::WarpRequest, translation::Fault};
use console::style;

/// Access violation escalated to the core when a translation faults.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("access violation of warp {warp_id} on core {core_id} (pc={pc}) at {vaddr:#x}: {fault}")]
pub struct AccessViolation {
    pub request: request::Id,
    pub warp_id: usize,
    pub core_id: usize,
    pub pc: usize,
    /// Lowest faulting virtual lane address.
    pub vaddr: address,
    #[source]
    pub fault: Fault,
}

/// Port through which completed requests and faults reach the core.
pub trait CorePort {
    /// Hands a completed request back to the core.
    ///
    /// A refused request is returned, a retry signal follows once the core can
    /// accept again.
    fn deliver(&mut self, request: WarpRequest, now: u64) -> Result<(), WarpRequest>;

    fn access_violation(&mut self, violation: AccessViolation, now: u64);

    /// The load/store queue can accept a new request after refusing one.
    fn retry_issue(&mut self, _now: u64) {}
}

/// Core writeback stage model.
///
/// Accepts delivered requests into a bounded writeback buffer that retires one
/// request per cycle.
#[derive(Debug)]
pub struct CoreModel {
    writeback: Fifo<WarpRequest>,
    refused: bool,
    /// Retired requests in delivery order.
    pub retired: Vec<WarpRequest>,
    pub violations: Vec<AccessViolation>,
    pub num_issue_retries: u64,
}

impl CoreModel {
    #[must_use]
    pub fn new(writeback_capacity: Option<usize>) -> Self {
        Self {
            writeback: Fifo::new(writeback_capacity),
            refused: false,
            retired: Vec::new(),
            violations: Vec::new(),
            num_issue_retries: 0,
        }
    }

    /// Retires the oldest request in the writeback buffer.
    ///
    /// # Returns
    /// `true` if a previously refused delivery may be retried.
    pub fn cycle(&mut self, now: u64) -> bool {
        let Some(request) = self.writeback.dequeue() else {
            return false;
        };
        log::debug!("{}: {} at {}", style("WRITEBACK").green(), request, now);
        self.retired.push(request);
        std::mem::take(&mut self.refused)
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        !self.writeback.is_empty()
    }
}

impl CorePort for CoreModel {
    fn deliver(&mut self, request: WarpRequest, _now: u64) -> Result<(), WarpRequest> {
        if self.writeback.full() {
            self.refused = true;
            return Err(request);
        }
        self.writeback.enqueue(request);
        Ok(())
    }

    fn access_violation(&mut self, violation: AccessViolation, now: u64) {
        log::warn!("{} at {}", violation, now);
        self.violations.push(violation);
    }

    fn retry_issue(&mut self, _now: u64) {
        self.num_issue_retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreModel, CorePort};
    use crate::{request, warp};
    use color_eyre::eyre;

    #[test]
    fn test_bounded_writeback() -> eyre::Result<()> {
        let req = request::Builder {
            warp_size: 1,
            active_mask: warp::full_mask(1),
            addrs: vec![0],
            data: None,
            size: 4,
            kind: request::Kind::Load,
            pc: 0,
            core_id: 0,
            warp_id: 0,
        }
        .build()?;

        let mut core = CoreModel::new(Some(1));
        assert!(core.deliver(req.clone(), 0).is_ok());
        let refused = core.deliver(req.clone(), 0).unwrap_err();
        assert_eq!(refused, req);

        assert!(core.cycle(1));
        assert!(!core.cycle(2));
        assert_eq!(core.retired.len(), 1);
        assert!(core.deliver(req, 2).is_ok());
        assert!(core.busy());
        Ok(())
    }
}
