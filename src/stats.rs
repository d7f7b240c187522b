use serde::{Deserialize, Serialize};

/// Per bank statistics.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// Transactions admitted to the bank.
    pub admitted: u64,
    /// Admission attempts refused because the bank was full.
    pub rejections: u64,
    /// Packets refused by the backend while at the head of this bank.
    pub backend_retries: u64,
    /// Largest observed occupancy.
    pub max_occupancy: usize,
}

impl std::ops::AddAssign for Bank {
    fn add_assign(&mut self, other: Self) {
        self.admitted += other.admitted;
        self.rejections += other.rejections;
        self.backend_retries += other.backend_retries;
        self.max_occupancy = self.max_occupancy.max(other.max_occupancy);
    }
}

/// Load/store queue statistics.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub cycles: u64,
    /// Warp requests accepted for coalescing.
    pub warp_requests: u64,
    pub loads: u64,
    pub stores: u64,
    /// Issues refused because the coalescing register was occupied.
    pub issue_stalls: u64,
    pub transactions: u64,
    /// Coalescing attempts that could not admit their batch.
    pub coalescing_stalls: u64,
    pub translation_requests: u64,
    /// Translations shared with an already pending request for the same line.
    pub coalesced_translations: u64,
    pub faulted_transactions: u64,
    pub access_violations: u64,
    /// Faulted warp requests dropped without delivery.
    pub discarded_requests: u64,
    pub backend_sends: u64,
    pub backend_bytes: u64,
    /// Backend words moved by the sent packets.
    pub backend_words: u64,
    pub backend_retries: u64,
    pub responses: u64,
    pub deliveries: u64,
    /// Deliveries refused by the core.
    pub delivery_retries: u64,
    /// Sum of issue to delivery latencies.
    pub total_latency: u64,
    pub max_latency: u64,
    pub banks: Vec<Bank>,
}

impl Stats {
    #[must_use]
    pub fn new(num_banks: usize) -> Self {
        Self {
            banks: vec![Bank::default(); num_banks],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mean_latency(&self) -> Option<f64> {
        (self.deliveries > 0).then(|| self.total_latency as f64 / self.deliveries as f64)
    }

    /// Average number of transactions a warp request was split into.
    #[must_use]
    pub fn transactions_per_request(&self) -> Option<f64> {
        (self.warp_requests > 0).then(|| self.transactions as f64 / self.warp_requests as f64)
    }

    pub fn record_latency(&mut self, latency: u64) {
        self.total_latency += latency;
        self.max_latency = self.max_latency.max(latency);
    }
}

impl std::ops::AddAssign for Stats {
    fn add_assign(&mut self, other: Self) {
        self.cycles = self.cycles.max(other.cycles);
        self.warp_requests += other.warp_requests;
        self.loads += other.loads;
        self.stores += other.stores;
        self.issue_stalls += other.issue_stalls;
        self.transactions += other.transactions;
        self.coalescing_stalls += other.coalescing_stalls;
        self.translation_requests += other.translation_requests;
        self.coalesced_translations += other.coalesced_translations;
        self.faulted_transactions += other.faulted_transactions;
        self.access_violations += other.access_violations;
        self.discarded_requests += other.discarded_requests;
        self.backend_sends += other.backend_sends;
        self.backend_bytes += other.backend_bytes;
        self.backend_words += other.backend_words;
        self.backend_retries += other.backend_retries;
        self.responses += other.responses;
        self.deliveries += other.deliveries;
        self.delivery_retries += other.delivery_retries;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
        if self.banks.len() < other.banks.len() {
            self.banks.resize(other.banks.len(), Bank::default());
        }
        for (bank, other) in self.banks.iter_mut().zip(other.banks) {
            *bank += other;
        }
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "cycles:                   {}", self.cycles)?;
        writeln!(
            f,
            "warp requests:            {} ({} loads, {} stores)",
            self.warp_requests, self.loads, self.stores
        )?;
        writeln!(f, "transactions:             {}", self.transactions)?;
        if let Some(ratio) = self.transactions_per_request() {
            writeln!(f, "transactions per request: {ratio:.2}")?;
        }
        writeln!(f, "issue stalls:             {}", self.issue_stalls)?;
        writeln!(f, "coalescing stalls:        {}", self.coalescing_stalls)?;
        writeln!(
            f,
            "translations:             {} ({} coalesced)",
            self.translation_requests, self.coalesced_translations
        )?;
        writeln!(
            f,
            "access violations:        {} ({} requests discarded)",
            self.access_violations, self.discarded_requests
        )?;
        writeln!(
            f,
            "backend sends:            {} ({} retries, {} in {} words)",
            self.backend_sends,
            self.backend_retries,
            human_bytes::human_bytes(self.backend_bytes as f64),
            self.backend_words
        )?;
        writeln!(
            f,
            "deliveries:               {} ({} retries)",
            self.deliveries, self.delivery_retries
        )?;
        if let Some(latency) = self.mean_latency() {
            writeln!(
                f,
                "latency:                  {latency:.2} mean, {} max",
                self.max_latency
            )?;
        }
        for (bank_id, bank) in self.banks.iter().enumerate() {
            writeln!(
                f,
                "bank {bank_id:>2}:                  {} admitted, {} rejections, {} backend retries, {} max occupancy",
                bank.admitted, bank.rejections, bank.backend_retries, bank.max_occupancy
            )?;
        }
        Ok(())
    }
}
