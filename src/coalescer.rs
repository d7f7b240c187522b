//! Warp to cache line coalescing.
//!
//! Partitions the active lanes of a warp request into the minimal set of
//! line aligned transactions.
use super::{
    address, config,
    request::{RequestError, WarpRequest},
    transaction::{ByteMask, ChunkMask},
    warp,
};
use bitvec::array::BitArray;
use smallvec::SmallVec;

/// A line access and the lanes it serves, before it becomes a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionInfo {
    /// Aligned (virtual) line address.
    pub line_addr: address,
    /// Served lanes in increasing lane order.
    pub lanes: SmallVec<[usize; 8]>,
    /// Chunks of the line touched by at least one served lane.
    pub chunk_mask: ChunkMask,
    /// Bytes of the line touched by at least one served lane.
    pub byte_mask: ByteMask,
}

impl TransactionInfo {
    fn new(line_addr: address) -> Self {
        Self {
            line_addr,
            lanes: SmallVec::new(),
            chunk_mask: BitArray::ZERO,
            byte_mask: BitArray::ZERO,
        }
    }

    fn add_lane(&mut self, lane: usize, addr: address, size: u32, config: &config::LSQ) {
        debug_assert_eq!(config.line_addr(addr), self.line_addr);
        let start = config.line_offset(addr);
        let end = start + size as usize;
        let last = addr + u64::from(size).saturating_sub(1);
        for chunk in config.chunk(addr)..=config.chunk(last) {
            self.chunk_mask.set(chunk, true);
        }
        self.byte_mask[start..end].fill(true);
        self.lanes.push(lane);
    }

    /// Served lanes as an active mask.
    #[must_use]
    pub fn active_mask(&self) -> warp::ActiveMask {
        warp::active_mask(self.lanes.iter().copied())
    }
}

/// Checks that no active lane access crosses a line boundary.
pub fn check_line_locality(request: &WarpRequest, config: &config::LSQ) -> Result<(), RequestError> {
    for (lane, addr) in request.active_addrs() {
        let last = addr.checked_add(u64::from(request.size).saturating_sub(1));
        if last.map(|last| config.line_addr(last)) != Some(config.line_addr(addr)) {
            return Err(RequestError::CrossesLine {
                lane,
                addr,
                size: request.size,
                line_size: config.line_size,
            });
        }
    }
    Ok(())
}

/// Partitions the active lanes of `request` into line transactions.
///
/// Lanes are scanned in increasing lane order. The first unassigned lane opens a
/// new transaction for its line and every later unassigned lane in the same line
/// joins it. The output order is therefore deterministic: transactions are ordered
/// by their lowest served lane.
///
/// Overlapping store bytes within one line are passed through as-is.
pub fn partition(
    request: &WarpRequest,
    config: &config::LSQ,
) -> Result<Vec<TransactionInfo>, RequestError> {
    check_line_locality(request, config)?;

    let mut assigned: warp::ActiveMask = BitArray::ZERO;
    let mut transactions: Vec<TransactionInfo> = Vec::new();

    for (lane, addr) in request.active_addrs() {
        if assigned[lane] {
            continue;
        }
        let line_addr = config.line_addr(addr);
        let mut tx = TransactionInfo::new(line_addr);
        tx.add_lane(lane, addr, request.size, config);
        assigned.set(lane, true);

        for (other, other_addr) in request.active_addrs().filter(|(other, _)| *other > lane) {
            if assigned[other] || config.line_addr(other_addr) != line_addr {
                continue;
            }
            tx.add_lane(other, other_addr, request.size, config);
            assigned.set(other, true);
        }

        log::trace!(
            "coalesce {}: line {:#x} serves lanes {:?} (chunks={})",
            request,
            line_addr,
            tx.lanes,
            tx.chunk_mask[..config.num_chunks()]
                .iter()
                .map(|bit| if *bit { '1' } else { '0' })
                .collect::<String>(),
        );
        transactions.push(tx);
    }

    debug_assert!(!transactions.is_empty());
    debug_assert!(transactions.len() <= request.warp_size);
    debug_assert_eq!(
        transactions.iter().map(|tx| tx.lanes.len()).sum::<usize>(),
        request.active_lane_count()
    );
    Ok(transactions)
}
