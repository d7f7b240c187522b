use super::{
    address, coalescer::TransactionInfo, config, request, request::WarpRequest,
};
use bitvec::BitArr;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type ChunkMask = BitArr!(for config::MAX_CHUNKS, in u64);
pub type ByteMask = BitArr!(for config::MAX_LINE_SIZE);

/// Unique id of a transaction, also used as its in-flight identifier.
pub type Id = u64;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::EnumCount,
)]
pub enum Status {
    Forming,
    Buffered,
    Translating,
    Translated,
    Dispatched,
    AwaitingResponse,
    Complete,
}

/// One line access derived from a warp request.
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    pub uid: Id,
    /// Owning warp request.
    pub request: request::Id,
    pub kind: request::Kind,
    /// Virtual line address.
    pub line_addr: address,
    /// Physical line address, once translated.
    pub physical_line_addr: Option<address>,
    /// Backend word size.
    pub word_size: u32,
    /// Access width of each served lane.
    pub lane_size: u32,
    /// Served lanes and their byte offsets within the line.
    pub lanes: SmallVec<[(usize, usize); 8]>,
    pub chunk_mask: ChunkMask,
    pub byte_mask: ByteMask,
    pub bank: usize,
    pub status: Status,
    /// Line sized payload.
    ///
    /// Holds the gathered store bytes for stores and the returned bytes for loads.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("uid", &self.uid)
            .field("request", &self.request)
            .field("kind", &self.kind)
            .field("line_addr", &format_args!("{:#x}", self.line_addr))
            .field(
                "physical_line_addr",
                &self.physical_line_addr.map(|addr| format!("{addr:#x}")),
            )
            .field("lanes", &self.lanes.iter().map(|(lane, _)| lane).collect::<Vec<_>>())
            .field("bank", &self.bank)
            .field("status", &self.status)
            .finish()
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?}@{:#x}[uid={}, req={}, bank={}, {:?}]",
            self.kind, self.line_addr, self.uid, self.request, self.bank, self.status
        )
    }
}

/// Request sent to the backend for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    /// In-flight identifier, echoed back with the response.
    pub id: Id,
    pub kind: request::Kind,
    /// Physical start address of the requested span.
    pub addr: address,
    /// Requested number of bytes.
    pub size: u32,
    /// Bytes to write within the requested span.
    ///
    /// Only set for stores.
    pub byte_mask: Option<Vec<bool>>,
    /// Store data for the requested span.
    pub data: Option<Vec<u8>>,
}

impl Packet {
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }
}

/// Smallest aligned power-of-two span of the line that covers all touched chunks.
///
/// Halves the line as long as only one half is used, but never goes below one chunk.
///
/// # Returns
/// The byte offset of the span within the line and its size.
#[must_use]
pub fn reduce(chunk_mask: &ChunkMask, config: &config::LSQ) -> (usize, u32) {
    let chunk_size = config.chunk_size as usize;
    let mut offset = 0;
    let mut size = config.line_size as usize;
    debug_assert!(chunk_mask[..config.num_chunks()].any());

    let used = |bytes: std::ops::Range<usize>| {
        bytes
            .step_by(chunk_size)
            .any(|byte| chunk_mask[byte / chunk_size])
    };
    while size > chunk_size {
        let half = size / 2;
        match (used(offset..offset + half), used(offset + half..offset + size)) {
            (true, false) => size = half,
            (false, true) => {
                offset += half;
                size = half;
            }
            _ => break,
        }
    }
    (offset, size as u32)
}

impl Transaction {
    /// Creates a transaction in `Forming` state from a coalesced line access.
    ///
    /// Store bytes are gathered in lane order, so the highest served lane wins
    /// when store ranges overlap.
    #[must_use]
    pub fn new(
        uid: Id,
        info: TransactionInfo,
        request: &WarpRequest,
        bank: usize,
        config: &config::LSQ,
    ) -> Self {
        let lanes: SmallVec<[(usize, usize); 8]> = info
            .lanes
            .iter()
            .map(|&lane| (lane, config.line_offset(request.lanes[lane].addr)))
            .collect();

        let mut data = vec![0; config.line_size as usize];
        if request.is_write() {
            let size = request.size as usize;
            for &(lane, offset) in &lanes {
                data[offset..offset + size].copy_from_slice(&request.lanes[lane].data[..size]);
            }
        }

        Self {
            uid,
            request: request.uid,
            kind: request.kind,
            line_addr: info.line_addr,
            physical_line_addr: None,
            word_size: config.word_size,
            lane_size: request.size,
            lanes,
            chunk_mask: info.chunk_mask,
            byte_mask: info.byte_mask,
            bank,
            status: Status::Forming,
            data,
        }
    }

    #[must_use]
    #[inline]
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    #[must_use]
    #[inline]
    pub fn is_translated(&self) -> bool {
        self.physical_line_addr.is_some()
    }

    /// Served lane ids in increasing order.
    pub fn served_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.lanes.iter().map(|(lane, _)| *lane)
    }

    /// Number of backend words needed to transfer the requested span.
    #[must_use]
    pub fn num_words(&self, config: &config::LSQ) -> u32 {
        let (_, size) = reduce(&self.chunk_mask, config);
        size.div_ceil(self.word_size)
    }

    /// Builds the backend packet, once translated.
    #[must_use]
    pub fn packet(&self, config: &config::LSQ) -> Option<Packet> {
        let physical_line_addr = self.physical_line_addr?;
        let (offset, size) = reduce(&self.chunk_mask, config);
        let span = offset..offset + size as usize;
        let (byte_mask, data) = if self.is_write() {
            let byte_mask = self.byte_mask[span.clone()].iter().map(|bit| *bit).collect();
            (Some(byte_mask), Some(self.data[span].to_vec()))
        } else {
            (None, None)
        };
        Some(Packet {
            id: self.uid,
            kind: self.kind,
            addr: physical_line_addr + offset as u64,
            size,
            byte_mask,
            data,
        })
    }

    /// Copies a load response into the line payload.
    ///
    /// The payload covers the span returned by [`reduce`], bytes outside of the
    /// chunk mask are ignored.
    pub fn fill(&mut self, payload: &[u8], config: &config::LSQ) -> Result<(), (usize, usize)> {
        let (offset, size) = reduce(&self.chunk_mask, config);
        if payload.len() != size as usize {
            return Err((size as usize, payload.len()));
        }
        let chunk_size = config.chunk_size as usize;
        for (i, byte) in payload.iter().enumerate() {
            let pos = offset + i;
            if self.chunk_mask[pos / chunk_size] {
                self.data[pos] = *byte;
            }
        }
        Ok(())
    }

    /// Scatters the line payload to the lanes this transaction serves.
    pub fn scatter(&self, request: &mut WarpRequest) {
        debug_assert_eq!(request.uid, self.request);
        let size = self.lane_size as usize;
        for &(lane, offset) in &self.lanes {
            request.lanes[lane].data[..size].copy_from_slice(&self.data[offset..offset + size]);
        }
    }
}
