//! Load/store queue wired up with the backend, page table and core models.
use crate::{
    address, config,
    core::CoreModel,
    deadlock,
    interconn::ToyBackend,
    lsq::{Issue, LoadStoreQueue},
    request::WarpRequest,
    stats::Stats,
    translation::PageTable,
};
use color_eyre::{eyre, Section, SectionExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// Simulation configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lsq: config::LSQ,
    /// Cycles until the backend answers a packet
    pub backend_latency: u64, // 20
    /// Packets the backend holds in flight (unlimited if not set)
    pub backend_capacity: Option<usize>, // 8
    /// Cycles until a translation completes
    pub translation_latency: u64, // 10
    /// Requests the core writeback buffer holds (unlimited if not set)
    pub writeback_capacity: Option<usize>, // 2
    /// Virtual address ranges that page fault
    pub unmapped: Vec<Range<address>>,
    /// Virtual address ranges that fault on stores
    pub read_only: Vec<Range<address>>,
    /// Cycles without any state change before the run is aborted
    pub deadlock_threshold: u64, // 10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lsq: config::LSQ::default(),
            backend_latency: 20,
            backend_capacity: Some(8),
            translation_latency: 10,
            writeback_capacity: Some(2),
            unmapped: Vec::new(),
            read_only: Vec::new(),
            deadlock_threshold: 10_000,
        }
    }
}

impl Config {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, config::Error> {
        let config: Self = serde_yaml::from_reader(reader)?;
        config.lsq.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, config::Error> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    #[must_use]
    pub fn page_table(&self) -> PageTable {
        let mut page_table = PageTable::identity(self.translation_latency);
        for range in &self.read_only {
            page_table.map(range.clone(), range.start, false);
        }
        for range in &self.unmapped {
            page_table.unmap(range.clone());
        }
        page_table
    }
}

pub type LSQ = LoadStoreQueue<ToyBackend, PageTable, CoreModel>;

#[derive(Debug)]
pub struct Simulation {
    pub lsq: LSQ,
    /// Requests waiting to be issued.
    pending: VecDeque<WarpRequest>,
    cycle: u64,
    deadlock_threshold: u64,
}

impl Simulation {
    pub fn new(config: &Config) -> eyre::Result<Self> {
        let lsq = LoadStoreQueue::new(
            Arc::new(config.lsq.clone()),
            ToyBackend::new(config.backend_capacity, config.backend_latency),
            config.page_table(),
            CoreModel::new(config.writeback_capacity),
        )?;
        log::info!("{}", lsq.config());
        Ok(Self {
            lsq,
            pending: VecDeque::new(),
            cycle: 0,
            deadlock_threshold: config.deadlock_threshold,
        })
    }

    /// Queues a request for issue, requests are issued in order.
    pub fn push(&mut self, request: WarpRequest) {
        self.pending.push_back(request);
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.lsq.is_drained() && !self.lsq.core.busy()
    }

    /// Simulates the current cycle.
    pub fn step(&mut self) -> eyre::Result<()> {
        let now = self.cycle;
        while let Some(completion) = self.lsq.translator.pop_ready(now) {
            self.lsq
                .finish_translation(completion.vline, completion.mode, completion.result, now)?;
        }
        while let Some(response) = self.lsq.backend.pop_response(now) {
            self.lsq.on_response(response.id, &response.data, now)?;
        }
        if self.lsq.backend.take_retry() {
            self.lsq.on_retry_available(now);
        }
        if self.lsq.core.cycle(now) {
            self.lsq.on_core_retry_available(now);
        }
        if self.lsq.can_issue() {
            if let Some(request) = self.pending.pop_front() {
                if let Issue::Stalled(request) = self.lsq.issue(request, now)? {
                    self.pending.push_front(request);
                }
            }
        }
        self.lsq.process(now)?;
        Ok(())
    }

    /// Next cycle at which anything can happen.
    #[must_use]
    fn next_cycle(&self) -> Option<u64> {
        let now = self.cycle;
        let busy = (self.lsq.core.busy() || (!self.pending.is_empty() && self.lsq.can_issue()))
            .then_some(now + 1);
        [
            busy,
            self.lsq.next_event_time(),
            self.lsq.translator.next_ready(),
            self.lsq.backend.next_ready(),
        ]
        .into_iter()
        .flatten()
        .min()
        .map(|next| next.max(now + 1))
    }

    fn deadlock(&self, since: u64) -> eyre::Report {
        let state: deadlock::State = self.lsq.state();
        let counts = state.status_counts();
        eyre::eyre!(
            "deadlock at cycle {}: no progress since cycle {}",
            self.cycle,
            since
        )
        .with_section(move || format!("{counts:?}").header("Transactions:"))
        .with_section(move || format!("{state:#?}").header("State:"))
    }

    /// Runs until all requests are delivered or discarded.
    pub fn run(&mut self) -> eyre::Result<&Stats> {
        let mut last_change: Option<(deadlock::State, u64)> = None;
        loop {
            self.step()?;
            if self.is_done() {
                break;
            }

            let state = self.lsq.state();
            let unchanged_since = match &last_change {
                Some((last_state, since)) if *last_state == state => Some(*since),
                _ => None,
            };
            match unchanged_since {
                Some(since) if self.cycle - since > self.deadlock_threshold => {
                    return Err(self.deadlock(since));
                }
                Some(_) => {}
                None => last_change = Some((state, self.cycle)),
            }

            let Some(next) = self.next_cycle() else {
                let since = last_change.map_or(self.cycle, |(_, since)| since);
                return Err(self.deadlock(since));
            };
            self.cycle = next;
        }
        self.lsq.stats.cycles = self.cycle;
        log::info!("simulation done after {} cycles", self.cycle);
        Ok(&self.lsq.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Simulation};
    use crate::{config, request, testing, warp};
    use color_eyre::eyre;
    use pretty_assertions_sorted::assert_eq;

    fn small_config() -> Config {
        Config {
            lsq: config::LSQ {
                warp_size: 4,
                num_banks: 2,
                bank_depth: 2,
                ..config::LSQ::default()
            },
            backend_latency: 5,
            backend_capacity: Some(1),
            translation_latency: 3,
            writeback_capacity: Some(1),
            ..Config::default()
        }
    }

    #[test]
    fn test_store_then_load() -> eyre::Result<()> {
        testing::init_test();
        let mut sim = Simulation::new(&small_config())?;
        let addrs = vec![0x1000, 0x1004, 0x1080, 0x1084];
        let data: Vec<Vec<u8>> = (0..4u8).map(|lane| vec![lane + 1; 4]).collect();
        sim.push(testing::store(addrs.clone(), data.clone())?);
        sim.push(testing::load(addrs)?);

        let stats = sim.run()?.clone();
        assert_eq!(stats.warp_requests, 2);
        assert_eq!(stats.transactions, 4);
        assert_eq!(stats.deliveries, 2);
        // a single packet fits into the backend at a time
        assert!(stats.backend_retries > 0);

        let retired = &sim.lsq.core.retired;
        assert_eq!(retired.len(), 2);
        assert!(retired[0].is_write());
        let load = &retired[1];
        for (lane, expected) in data.iter().enumerate() {
            assert_eq!(load.data(lane), Some(expected.as_slice()));
        }
        assert!(sim.lsq.is_drained());
        Ok(())
    }

    #[test]
    fn test_many_requests_drain() -> eyre::Result<()> {
        testing::init_test();
        let mut sim = Simulation::new(&small_config())?;
        for i in 0..32u64 {
            let addrs = (0..4).map(|lane| i * 0x40 + lane * 0x24).collect();
            sim.push(testing::load(addrs)?);
        }
        let stats = sim.run()?;
        assert_eq!(stats.warp_requests, 32);
        assert_eq!(stats.deliveries, 32);
        assert_eq!(stats.responses, stats.transactions);
        assert_eq!(sim.lsq.core.retired.len(), 32);

        let mut uids: Vec<_> = sim.lsq.core.retired.iter().map(|req| req.uid).collect();
        uids.sort_unstable();
        assert_eq!(uids, (0..32).collect::<Vec<_>>());
        assert!(sim.lsq.is_drained());
        Ok(())
    }

    #[test]
    fn test_faulting_store_is_discarded() -> eyre::Result<()> {
        testing::init_test();
        let mut config = small_config();
        config.read_only = vec![0x2000..0x3000];
        let mut sim = Simulation::new(&config)?;

        let req = request::Builder {
            warp_size: 4,
            active_mask: warp::active_mask([1, 3]),
            addrs: vec![0, 0x2010, 0, 0x2014],
            data: Some(vec![vec![], vec![1; 4], vec![], vec![2; 4]]),
            size: 4,
            kind: request::Kind::Store,
            pc: 0x42,
            core_id: 0,
            warp_id: 7,
        }
        .build()?;
        sim.push(req);
        sim.push(testing::load(vec![0x2010, 0x2014, 0x2018, 0x201c])?);

        let stats = sim.run()?.clone();
        assert_eq!(stats.access_violations, 1);
        assert_eq!(stats.discarded_requests, 1);
        assert_eq!(stats.deliveries, 1);

        let violation = &sim.lsq.core.violations[0];
        assert_eq!(violation.warp_id, 7);
        assert_eq!(violation.pc, 0x42);
        assert_eq!(violation.vaddr, 0x2010);
        // the faulting store never reached memory
        assert_eq!(sim.lsq.backend.read(0x2010), 0);
        Ok(())
    }

    #[test]
    fn test_config_from_yaml() -> eyre::Result<()> {
        let yaml = r"
lsq:
  num_banks: 8
  bank_hashing_function: bitwise_xor
backend_latency: 100
unmapped:
  - start: 0
    end: 4096
";
        let config = Config::from_reader(yaml.as_bytes())?;
        assert_eq!(config.lsq.num_banks, 8);
        assert_eq!(config.lsq.warp_size, 32);
        assert_eq!(config.backend_latency, 100);
        assert_eq!(config.translation_latency, 10);
        assert!(config.page_table().translate(0x10, crate::translation::Mode::Read).is_err());
        assert!(config.page_table().translate(0x1010, crate::translation::Mode::Write).is_ok());
        Ok(())
    }
}
