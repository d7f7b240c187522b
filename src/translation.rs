//! Virtual to physical address translation.
//!
//! The load/store queue only sees the [`Translator`] interface: a translation is
//! requested for a virtual line and completes asynchronously, reported back through
//! [`crate::lsq::LoadStoreQueue::finish_translation`].
use super::{address, fifo::Fifo};
use rangemap::RangeMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Read,
    Write,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("page fault at {vaddr:#x}")]
    PageFault { vaddr: address },

    #[error("write to read-only page at {vaddr:#x}")]
    Protection { vaddr: address },
}

/// Asynchronous translation service.
pub trait Translator {
    /// Requests translation of the virtual line `vline`.
    ///
    /// Completion is reported back later, exactly once per request.
    fn request_translation(&mut self, vline: address, mode: Mode, now: u64);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub vline: address,
    pub mode: Mode,
    pub result: Result<address, Fault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    /// Physical minus virtual address.
    offset: i64,
    writable: bool,
}

/// Page table with a fixed translation latency.
///
/// Unmapped addresses fault.
#[derive(Debug)]
pub struct PageTable {
    latency: u64,
    mappings: RangeMap<address, Mapping>,
    pending: Fifo<(u64, Completion)>,
    pub num_requests: u64,
}

impl PageTable {
    #[must_use]
    pub fn new(latency: u64) -> Self {
        Self {
            latency,
            mappings: RangeMap::new(),
            pending: Fifo::default(),
            num_requests: 0,
        }
    }

    /// Maps virtual `range` to physical addresses starting at `physical_base`.
    pub fn map(&mut self, range: std::ops::Range<address>, physical_base: address, writable: bool) {
        let offset = physical_base as i64 - range.start as i64;
        self.mappings.insert(range, Mapping { offset, writable });
    }

    /// Removes any mapping for `range`.
    pub fn unmap(&mut self, range: std::ops::Range<address>) {
        self.mappings.remove(range);
    }

    /// Page table that maps the whole address space onto itself.
    #[must_use]
    pub fn identity(latency: u64) -> Self {
        let mut page_table = Self::new(latency);
        page_table.map(0..address::MAX, 0, true);
        page_table
    }

    pub fn translate(&self, vaddr: address, mode: Mode) -> Result<address, Fault> {
        let mapping = self
            .mappings
            .get(&vaddr)
            .ok_or(Fault::PageFault { vaddr })?;
        if mode == Mode::Write && !mapping.writable {
            return Err(Fault::Protection { vaddr });
        }
        Ok((vaddr as i64 + mapping.offset) as address)
    }

    /// Next completion due at or before `now`.
    pub fn pop_ready(&mut self, now: u64) -> Option<Completion> {
        match self.pending.first() {
            Some((ready, _)) if *ready <= now => self.pending.dequeue().map(|(_, c)| c),
            _ => None,
        }
    }

    /// Cycle at which the next completion is due.
    #[must_use]
    pub fn next_ready(&self) -> Option<u64> {
        self.pending.first().map(|(ready, _)| *ready)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Translator for PageTable {
    fn request_translation(&mut self, vline: address, mode: Mode, now: u64) {
        self.num_requests += 1;
        let result = self.translate(vline, mode);
        log::debug!(
            "translate {:#x} ({:?}) => {:?} ready at {}",
            vline,
            mode,
            result.as_ref().map(|addr| format!("{addr:#x}")),
            now + self.latency
        );
        // fixed latency keeps the queue ordered by ready time
        self.pending.enqueue((
            now + self.latency,
            Completion {
                vline,
                mode,
                result,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::{Fault, Mode, PageTable, Translator};

    #[test]
    fn test_page_table_translate() {
        let mut page_table = PageTable::new(10);
        page_table.map(0x1000..0x2000, 0x8000, true);
        page_table.map(0x2000..0x3000, 0x4000, false);

        assert_eq!(page_table.translate(0x1080, Mode::Read), Ok(0x8080));
        assert_eq!(page_table.translate(0x2080, Mode::Read), Ok(0x4080));
        assert_eq!(
            page_table.translate(0x2080, Mode::Write),
            Err(Fault::Protection { vaddr: 0x2080 })
        );
        assert_eq!(
            page_table.translate(0x3000, Mode::Read),
            Err(Fault::PageFault { vaddr: 0x3000 })
        );

        page_table.unmap(0x1000..0x1100);
        assert!(page_table.translate(0x1080, Mode::Read).is_err());
        assert_eq!(page_table.translate(0x1100, Mode::Read), Ok(0x8100));
    }

    #[test]
    fn test_page_table_latency() {
        let mut page_table = PageTable::identity(3);
        page_table.request_translation(0x100, Mode::Read, 0);
        page_table.request_translation(0x200, Mode::Write, 1);
        assert_eq!(page_table.next_ready(), Some(3));
        assert!(page_table.pop_ready(2).is_none());
        let completion = page_table.pop_ready(3).unwrap();
        assert_eq!(completion.vline, 0x100);
        assert_eq!(completion.result, Ok(0x100));
        assert!(page_table.pop_ready(3).is_none());
        assert_eq!(page_table.pop_ready(4).unwrap().mode, Mode::Write);
        assert!(page_table.is_idle());
        assert_eq!(page_table.num_requests, 2);
    }
}
