use super::{address, warp};
use serde::{Deserialize, Serialize};

/// Unique id of a warp request for the lifetime of a load/store queue.
pub type Id = u64;

/// Memory operation of a warp request.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Load,
    Store,
}

impl Kind {
    #[must_use]
    pub fn is_write(self) -> bool {
        self == Kind::Store
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("warp request has no active lanes")]
    EmptyActiveMask,

    #[error("warp request has zero access width")]
    ZeroWidth,

    #[error("warp size {warp_size} does not match configured warp size {configured}")]
    WarpSize { warp_size: usize, configured: usize },

    #[error("expected {expected} lane addresses (got {got})")]
    LaneCount { expected: usize, got: usize },

    #[error("lane {lane} is active but outside of the warp size {warp_size}")]
    LaneOutOfRange { lane: usize, warp_size: usize },

    #[error("store lane {lane} has {got} data bytes, expected {expected}")]
    StoreData {
        lane: usize,
        expected: usize,
        got: usize,
    },

    #[error("lane {lane} holds {got} data bytes, expected {expected}")]
    LaneData {
        lane: usize,
        expected: usize,
        got: usize,
    },

    #[error("lane {lane} access of {size} bytes at {addr:#x} crosses a {line_size} byte line")]
    CrossesLine {
        lane: usize,
        addr: address,
        size: u32,
        line_size: u32,
    },

    #[error("{demand} transactions map to bank {bank} which only holds {depth}")]
    ExceedsBankCapacity {
        bank: usize,
        demand: usize,
        depth: usize,
    },
}

/// A single lane of a warp request.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Lane {
    /// Effective (virtual) address
    pub addr: address,
    /// Load destination or store source.
    ///
    /// Sized to the access width for active lanes.
    pub data: Vec<u8>,
}

/// Occupancy timestamps of a warp request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamps {
    pub issued: Option<u64>,
    pub coalesced: Option<u64>,
    pub completed: Option<u64>,
    pub delivered: Option<u64>,
}

/// One memory instruction issued by a warp.
///
/// Owns the per-lane data buffers until it is delivered back to the core.
#[derive(Clone, PartialEq, Eq)]
pub struct WarpRequest {
    pub uid: Id,
    pub warp_size: usize,
    pub active_mask: warp::ActiveMask,
    pub lanes: Vec<Lane>,
    /// Access width in bytes of each lane
    pub size: u32,
    pub kind: Kind,
    pub pc: usize,
    pub core_id: usize,
    pub warp_id: usize,
    /// Number of child transactions that have not completed yet.
    pub outstanding: usize,
    /// Set when one of the child transactions faulted during translation.
    pub faulted: bool,
    pub timestamps: Timestamps,
}

impl std::fmt::Debug for WarpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WarpRequest")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("warp_id", &self.warp_id)
            .field("pc", &self.pc)
            .field("size", &self.size)
            .field(
                "active_mask",
                &warp::to_bit_string(&self.active_mask, self.warp_size),
            )
            .field("addrs", &self.active_addrs().collect::<Vec<_>>())
            .field("outstanding", &self.outstanding)
            .field("faulted", &self.faulted)
            .finish()
    }
}

impl std::fmt::Display for WarpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?}[uid={}, warp={}, pc={}, lanes={}]",
            self.kind,
            self.uid,
            self.warp_id,
            self.pc,
            self.active_lane_count()
        )
    }
}

impl WarpRequest {
    #[must_use]
    #[inline]
    pub fn is_active(&self, lane: usize) -> bool {
        lane < self.warp_size && self.active_mask[lane]
    }

    /// Active lane ids in increasing order.
    pub fn active_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.active_mask
            .iter_ones()
            .take_while(|lane| *lane < self.warp_size)
    }

    /// Active lane ids and their addresses in increasing lane order.
    pub fn active_addrs(&self) -> impl Iterator<Item = (usize, address)> + '_ {
        self.active_lanes().map(|lane| (lane, self.lanes[lane].addr))
    }

    #[must_use]
    #[inline]
    pub fn active_lane_count(&self) -> usize {
        self.active_lanes().count()
    }

    #[must_use]
    #[inline]
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    #[must_use]
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    #[must_use]
    pub fn addr(&self, lane: usize) -> Option<address> {
        self.is_active(lane).then(|| self.lanes[lane].addr)
    }

    #[must_use]
    pub fn data(&self, lane: usize) -> Option<&[u8]> {
        self.is_active(lane).then(|| self.lanes[lane].data.as_slice())
    }

    /// Cycles from issue to delivery, if delivered.
    #[must_use]
    pub fn latency(&self) -> Option<u64> {
        let Timestamps {
            issued, delivered, ..
        } = self.timestamps;
        Some(delivered?.saturating_sub(issued?))
    }
}

/// Builds a [`WarpRequest`] from per-lane addresses.
#[derive(Debug, Clone)]
pub struct Builder {
    pub warp_size: usize,
    pub active_mask: warp::ActiveMask,
    pub addrs: Vec<address>,
    /// Store data per lane, required for stores.
    pub data: Option<Vec<Vec<u8>>>,
    pub size: u32,
    pub kind: Kind,
    pub pc: usize,
    pub core_id: usize,
    pub warp_id: usize,
}

impl Builder {
    /// Validate the upstream preconditions and build the request.
    ///
    /// The uid is assigned by the load/store queue when the request is issued.
    pub fn build(self) -> Result<WarpRequest, RequestError> {
        if self.size == 0 {
            return Err(RequestError::ZeroWidth);
        }
        if self.addrs.len() != self.warp_size {
            return Err(RequestError::LaneCount {
                expected: self.warp_size,
                got: self.addrs.len(),
            });
        }
        if let Some(lane) = self
            .active_mask
            .iter_ones()
            .find(|lane| *lane >= self.warp_size)
        {
            return Err(RequestError::LaneOutOfRange {
                lane,
                warp_size: self.warp_size,
            });
        }
        if self.active_mask.not_any() {
            return Err(RequestError::EmptyActiveMask);
        }

        let size = self.size as usize;
        let mut store_data = self.data.map(Vec::into_iter);
        let mut lanes = Vec::with_capacity(self.warp_size);
        for (lane, addr) in self.addrs.into_iter().enumerate() {
            let active = self.active_mask[lane];
            let data = match (self.kind, store_data.as_mut().and_then(Iterator::next)) {
                (Kind::Store, Some(data)) if active => {
                    if data.len() != size {
                        return Err(RequestError::StoreData {
                            lane,
                            expected: size,
                            got: data.len(),
                        });
                    }
                    data
                }
                (Kind::Store, None) if active => {
                    return Err(RequestError::StoreData {
                        lane,
                        expected: size,
                        got: 0,
                    });
                }
                (Kind::Load, _) if active => vec![0; size],
                _ => Vec::new(),
            };
            lanes.push(Lane { addr, data });
        }

        Ok(WarpRequest {
            uid: 0,
            warp_size: self.warp_size,
            active_mask: self.active_mask,
            lanes,
            size: self.size,
            kind: self.kind,
            pc: self.pc,
            core_id: self.core_id,
            warp_id: self.warp_id,
            outstanding: 0,
            faulted: false,
            timestamps: Timestamps::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Builder, Kind, RequestError};
    use crate::warp;
    use color_eyre::eyre;

    fn load(addrs: Vec<u64>, mask: warp::ActiveMask) -> Builder {
        Builder {
            warp_size: addrs.len(),
            active_mask: mask,
            addrs,
            data: None,
            size: 4,
            kind: Kind::Load,
            pc: 0,
            core_id: 0,
            warp_id: 0,
        }
    }

    #[test]
    fn test_build_load() -> eyre::Result<()> {
        let req = load(vec![0x100, 0x104, 0x200, 0x204], warp::active_mask([0, 2])).build()?;
        assert_eq!(req.active_lanes().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(req.addr(1), None);
        assert_eq!(req.addr(2), Some(0x200));
        assert_eq!(req.data(0), Some([0u8; 4].as_slice()));
        assert!(req.data(1).is_none());
        assert!(!req.is_write());
        Ok(())
    }

    #[test]
    fn test_build_store_requires_data() {
        let mut builder = load(vec![0x100, 0x104], warp::full_mask(2));
        builder.kind = Kind::Store;
        assert_eq!(
            builder.clone().build(),
            Err(RequestError::StoreData {
                lane: 0,
                expected: 4,
                got: 0
            })
        );
        builder.data = Some(vec![vec![1, 2, 3, 4], vec![5, 6]]);
        assert_eq!(
            builder.build(),
            Err(RequestError::StoreData {
                lane: 1,
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn test_build_preconditions() {
        let builder = load(vec![0x100, 0x104], warp::ActiveMask::ZERO);
        assert_eq!(builder.build(), Err(RequestError::EmptyActiveMask));

        let mut builder = load(vec![0x100, 0x104], warp::full_mask(2));
        builder.size = 0;
        assert_eq!(builder.build(), Err(RequestError::ZeroWidth));

        let builder = load(vec![0x100, 0x104], warp::active_mask([3]));
        assert_eq!(
            builder.build(),
            Err(RequestError::LaneOutOfRange {
                lane: 3,
                warp_size: 2
            })
        );
    }
}
