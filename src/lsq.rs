//! Load/store queue of a streaming multiprocessor.
//!
//! Warp requests enter through a single coalescing register, are split into line
//! transactions, buffered in banks, translated, dispatched to the backend and
//! reassembled into completed warp requests that are handed back to the core in
//! completion order.
use super::{
    address,
    bank::Banks,
    coalescer, config,
    core::{AccessViolation, CorePort},
    deadlock,
    event::EventQueue,
    fifo::Fifo,
    interconn::{self as ic, Backend},
    request::{self, RequestError, Timestamps, WarpRequest},
    stats::Stats,
    transaction::{self, Transaction},
    translation::{self, Fault, Translator},
};
use console::style;
use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("response for unknown in-flight transaction {0}")]
    UnknownTransaction(transaction::Id),

    #[error("transaction {transaction} belongs to unknown warp request {request}")]
    UnknownRequest {
        transaction: transaction::Id,
        request: request::Id,
    },

    #[error("response for transaction {id} has {got} bytes (expected {expected})")]
    PayloadSize {
        id: transaction::Id,
        expected: usize,
        got: usize,
    },

    #[error("warp request {0} has no outstanding transactions left")]
    OutstandingUnderflow(request::Id),

    #[error("translation of line {vline:#x} ({mode:?}) was never requested")]
    UnexpectedTranslation {
        vline: address,
        mode: translation::Mode,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Outcome of issuing a warp request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Issue {
    Accepted(request::Id),
    /// The coalescing register is occupied, the request is handed back.
    Stalled(WarpRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Coalesce,
    SendBackend(usize),
    SendResponse,
}

type Waiting = SmallVec<[(usize, transaction::Id); 4]>;

#[derive(Debug)]
pub struct LoadStoreQueue<B, T, C> {
    config: Arc<config::LSQ>,
    coalescing_register: Option<WarpRequest>,
    /// Banks that refused the batch of the coalescing register.
    waiting_on_banks: SmallVec<[usize; 4]>,
    /// An issue was refused since the register last freed.
    issue_refused: bool,
    banks: Banks,
    /// Admitted warp requests with outstanding transactions.
    requests: HashMap<request::Id, WarpRequest>,
    pending_translations: IndexMap<(address, translation::Mode), Waiting>,
    in_flight: HashMap<transaction::Id, Transaction>,
    delivery_queue: Fifo<WarpRequest>,
    core_port_blocked: bool,
    events: EventQueue<Event>,
    next_request_uid: request::Id,
    next_transaction_uid: transaction::Id,
    pub backend: B,
    pub translator: T,
    pub core: C,
    pub stats: Stats,
}

impl<B, T, C> LoadStoreQueue<B, T, C>
where
    B: Backend,
    T: Translator,
    C: CorePort,
{
    pub fn new(
        config: Arc<config::LSQ>,
        backend: B,
        translator: T,
        core: C,
    ) -> Result<Self, config::Error> {
        config.validate()?;
        Ok(Self {
            banks: Banks::new(&config),
            stats: Stats::new(config.num_banks),
            coalescing_register: None,
            waiting_on_banks: SmallVec::new(),
            issue_refused: false,
            requests: HashMap::new(),
            pending_translations: IndexMap::new(),
            in_flight: HashMap::new(),
            delivery_queue: Fifo::default(),
            core_port_blocked: false,
            events: EventQueue::new(),
            next_request_uid: 0,
            next_transaction_uid: 0,
            backend,
            translator,
            core,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &config::LSQ {
        &self.config
    }

    /// The coalescing register is free.
    #[must_use]
    pub fn can_issue(&self) -> bool {
        self.coalescing_register.is_none()
    }

    /// Issues a warp request into the coalescing register.
    ///
    /// Returns the request as [`Issue::Stalled`] if the register is occupied, in
    /// which case [`CorePort::retry_issue`] is called once the register frees.
    ///
    /// # Errors
    /// If the request violates the issue preconditions.
    pub fn issue(&mut self, mut request: WarpRequest, now: u64) -> Result<Issue, Error> {
        if self.coalescing_register.is_some() {
            log::debug!(
                "{}: {} (coalescing register occupied)",
                style("ISSUE STALLED").red(),
                request
            );
            self.stats.issue_stalls += 1;
            self.issue_refused = true;
            return Ok(Issue::Stalled(request));
        }
        self.check_issue(&request)?;

        let uid = self.next_request_uid;
        self.next_request_uid += 1;
        request.uid = uid;
        request.outstanding = 0;
        request.faulted = false;
        request.timestamps = Timestamps {
            issued: Some(now),
            ..Timestamps::default()
        };
        log::debug!("{}: {} at {}", style("ISSUE").bold(), request, now);

        self.stats.warp_requests += 1;
        if request.is_write() {
            self.stats.stores += 1;
        } else {
            self.stats.loads += 1;
        }
        self.coalescing_register = Some(request);
        self.events
            .schedule(Event::Coalesce, now + self.config.coalescing_latency);
        Ok(Issue::Accepted(uid))
    }

    fn check_issue(&self, request: &WarpRequest) -> Result<(), RequestError> {
        if request.warp_size != self.config.warp_size {
            return Err(RequestError::WarpSize {
                warp_size: request.warp_size,
                configured: self.config.warp_size,
            });
        }
        if request.lanes.len() != request.warp_size {
            return Err(RequestError::LaneCount {
                expected: request.warp_size,
                got: request.lanes.len(),
            });
        }
        if request.size == 0 {
            return Err(RequestError::ZeroWidth);
        }
        if request.active_lane_count() == 0 {
            return Err(RequestError::EmptyActiveMask);
        }
        let size = request.size as usize;
        if let Some(lane) = request
            .active_lanes()
            .find(|lane| request.lanes[*lane].data.len() != size)
        {
            return Err(RequestError::LaneData {
                lane,
                expected: size,
                got: request.lanes[lane].data.len(),
            });
        }
        let infos = coalescer::partition(request, &self.config)?;

        // a batch larger than a bank could never be admitted
        let demand = self.banks.demand(infos.iter().map(|info| info.line_addr));
        if let Some((bank, demand)) = demand
            .into_iter()
            .enumerate()
            .find(|(_, demand)| *demand > self.config.bank_depth)
        {
            return Err(RequestError::ExceedsBankCapacity {
                bank,
                demand,
                depth: self.config.bank_depth,
            });
        }
        Ok(())
    }

    /// Handles all events due at or before `now`.
    ///
    /// # Errors
    /// On protocol violations.
    pub fn process(&mut self, now: u64) -> Result<(), Error> {
        self.stats.cycles = self.stats.cycles.max(now);
        while let Some((time, event)) = self.events.pop_due(now) {
            match event {
                Event::Coalesce => self.coalesce(time)?,
                Event::SendBackend(bank) => self.send_backend(bank, time),
                Event::SendResponse => self.send_response(time),
            }
        }
        Ok(())
    }

    /// Time of the next internal event.
    #[must_use]
    pub fn next_event_time(&self) -> Option<u64> {
        self.events.next_time()
    }

    fn coalesce(&mut self, now: u64) -> Result<(), Error> {
        let Some(mut request) = self.coalescing_register.take() else {
            return Ok(());
        };
        let infos = coalescer::partition(&request, &self.config)?;
        request.outstanding = infos.len();

        let transactions: Vec<Transaction> = infos
            .into_iter()
            .enumerate()
            .map(|(i, info)| {
                let bank = self.banks.bank(info.line_addr);
                let uid = self.next_transaction_uid + i as u64;
                Transaction::new(uid, info, &request, bank, &self.config)
            })
            .collect();
        let placed: SmallVec<[(usize, transaction::Id, address); 8]> = transactions
            .iter()
            .map(|tx| (tx.bank, tx.uid, tx.line_addr))
            .collect();

        if let Err(rejected) = self.banks.admit_all(transactions) {
            log::debug!(
                "{}: {} waits on full banks {:?}",
                style("COALESCE STALLED").red(),
                request,
                rejected.full_banks
            );
            self.stats.coalescing_stalls += 1;
            for &bank in &rejected.full_banks {
                self.stats.banks[bank].rejections += 1;
            }
            self.waiting_on_banks = rejected.full_banks;
            self.coalescing_register = Some(request);
            return Ok(());
        }

        log::debug!(
            "{}: {} => {} transactions at {}",
            style("COALESCED").bold(),
            request,
            placed.len(),
            now
        );
        self.next_transaction_uid += placed.len() as u64;
        self.stats.transactions += placed.len() as u64;
        for &(bank, _, _) in &placed {
            let bank_stats = &mut self.stats.banks[bank];
            bank_stats.admitted += 1;
            bank_stats.max_occupancy = bank_stats.max_occupancy.max(self.banks.len(bank));
        }
        self.waiting_on_banks.clear();

        let mode = if request.is_write() {
            translation::Mode::Write
        } else {
            translation::Mode::Read
        };
        request.timestamps.coalesced = Some(now);
        self.requests.insert(request.uid, request);

        for (bank, uid, line_addr) in placed {
            self.request_translation(bank, uid, line_addr, mode, now);
        }

        if std::mem::take(&mut self.issue_refused) {
            self.core.retry_issue(now);
        }
        Ok(())
    }

    fn request_translation(
        &mut self,
        bank: usize,
        uid: transaction::Id,
        vline: address,
        mode: translation::Mode,
        now: u64,
    ) {
        if let Some(tx) = self.banks.get_mut(bank, uid) {
            tx.status = transaction::Status::Translating;
        }
        match self.pending_translations.get_mut(&(vline, mode)) {
            Some(waiting) if self.config.coalesce_translations => {
                log::trace!("translation of {:#x} already pending", vline);
                waiting.push((bank, uid));
                self.stats.coalesced_translations += 1;
                return;
            }
            Some(waiting) => waiting.push((bank, uid)),
            None => {
                self.pending_translations
                    .insert((vline, mode), smallvec![(bank, uid)]);
            }
        }
        self.stats.translation_requests += 1;
        self.translator.request_translation(vline, mode, now);
    }

    /// Completes a translation requested through [`Translator::request_translation`].
    ///
    /// Faults are escalated to the core as access violations.
    ///
    /// # Errors
    /// If no translation of `vline` is pending.
    pub fn finish_translation(
        &mut self,
        vline: address,
        mode: translation::Mode,
        result: Result<address, Fault>,
        now: u64,
    ) -> Result<(), Error> {
        let key = (vline, mode);
        let Some(waiting) = self.pending_translations.get_mut(&key) else {
            return Err(ProtocolError::UnexpectedTranslation { vline, mode }.into());
        };
        // without coalescing, every request resolves a single transaction
        let resolved: Waiting = if self.config.coalesce_translations || waiting.len() <= 1 {
            self.pending_translations
                .shift_remove(&key)
                .unwrap_or_default()
        } else {
            smallvec![waiting.remove(0)]
        };

        match result {
            Ok(physical_line_addr) => {
                for (bank, uid) in resolved {
                    let tx = self
                        .banks
                        .get_mut(bank, uid)
                        .ok_or(ProtocolError::UnknownTransaction(uid))?;
                    log::debug!(
                        "{}: {} => {:#x}",
                        style("TRANSLATED").bold(),
                        tx,
                        physical_line_addr
                    );
                    tx.physical_line_addr = Some(physical_line_addr);
                    tx.status = transaction::Status::Translated;
                    self.schedule_dispatch(bank, now);
                }
            }
            Err(fault) => {
                for (bank, uid) in resolved {
                    self.fault(bank, uid, &fault, now)?;
                }
            }
        }
        Ok(())
    }

    fn fault(
        &mut self,
        bank: usize,
        uid: transaction::Id,
        fault: &Fault,
        now: u64,
    ) -> Result<(), Error> {
        let tx = self
            .banks
            .remove(bank, uid)
            .ok_or(ProtocolError::UnknownTransaction(uid))?;
        self.stats.faulted_transactions += 1;

        let request = self
            .requests
            .get_mut(&tx.request)
            .ok_or(ProtocolError::UnknownRequest {
                transaction: uid,
                request: tx.request,
            })?;

        if !request.faulted {
            request.faulted = true;
            let vaddr = tx
                .served_lanes()
                .map(|lane| request.lanes[lane].addr)
                .min()
                .unwrap_or(tx.line_addr);
            let violation = AccessViolation {
                request: request.uid,
                warp_id: request.warp_id,
                core_id: request.core_id,
                pc: request.pc,
                vaddr,
                fault: fault.clone(),
            };
            log::warn!("{}: {}", style("ACCESS VIOLATION").red(), violation);
            self.stats.access_violations += 1;
            self.core.access_violation(violation, now);
        }

        request.outstanding = request
            .outstanding
            .checked_sub(1)
            .ok_or(ProtocolError::OutstandingUnderflow(request.uid))?;
        if request.outstanding == 0 {
            self.discard(tx.request);
        }

        // the faulted transaction might have been at the head
        self.bank_freed(bank, now);
        self.schedule_dispatch(bank, now);
        Ok(())
    }

    fn discard(&mut self, request: request::Id) {
        if let Some(request) = self.requests.remove(&request) {
            log::debug!("{}: {}", style("DISCARD").red(), request);
            self.stats.discarded_requests += 1;
        }
    }

    /// Retries coalescing if the register waits on `bank`.
    fn bank_freed(&mut self, bank: usize, now: u64) {
        if self.coalescing_register.is_some() && self.waiting_on_banks.contains(&bank) {
            self.events
                .schedule(Event::Coalesce, now + self.config.coalescing_latency);
        }
    }

    /// Schedules a dispatch attempt if the head of `bank` is ready to go.
    fn schedule_dispatch(&mut self, bank: usize, now: u64) {
        if self.banks.is_blocked(bank) {
            return;
        }
        if self
            .banks
            .head(bank)
            .is_some_and(Transaction::is_translated)
        {
            self.events
                .schedule(Event::SendBackend(bank), now + self.config.dispatch_latency);
        }
    }

    fn send_backend(&mut self, bank: usize, now: u64) {
        if self.banks.is_blocked(bank) {
            return;
        }
        let Some(packet) = self
            .banks
            .head(bank)
            .and_then(|tx| tx.packet(&self.config))
        else {
            return;
        };
        let size = packet.size;

        match self.backend.send(packet, now) {
            ic::Status::Accepted => {
                let Some(mut tx) = self.banks.pop_head(bank) else {
                    return;
                };
                tx.status = transaction::Status::Dispatched;
                log::debug!("{}: {} at {}", style("DISPATCH").bold(), tx, now);
                self.stats.backend_sends += 1;
                self.stats.backend_bytes += u64::from(size);
                self.stats.backend_words += u64::from(tx.num_words(&self.config));

                tx.status = transaction::Status::AwaitingResponse;
                self.in_flight.insert(tx.uid, tx);

                self.bank_freed(bank, now);
                self.schedule_dispatch(bank, now);
            }
            ic::Status::Retry => {
                log::debug!(
                    "{}: bank {} blocked at {}",
                    style("BACKEND RETRY").red(),
                    bank,
                    now
                );
                self.banks.set_blocked(bank, true);
                self.stats.backend_retries += 1;
                self.stats.banks[bank].backend_retries += 1;
            }
        }
    }

    /// The backend can accept again after refusing a packet.
    ///
    /// Only banks blocked by a refused packet are retried.
    pub fn on_retry_available(&mut self, now: u64) {
        for bank in self.banks.take_blocked() {
            log::trace!("retry bank {}", bank);
            self.schedule_dispatch(bank, now);
        }
    }

    /// Handles the backend response for an in-flight transaction.
    ///
    /// # Errors
    /// If `id` is not in flight or the payload does not match the request.
    pub fn on_response(
        &mut self,
        id: transaction::Id,
        payload: &[u8],
        now: u64,
    ) -> Result<(), Error> {
        let mut tx = self
            .in_flight
            .remove(&id)
            .ok_or(ProtocolError::UnknownTransaction(id))?;
        let request = self
            .requests
            .get_mut(&tx.request)
            .ok_or(ProtocolError::UnknownRequest {
                transaction: id,
                request: tx.request,
            })?;

        if !tx.is_write() {
            tx.fill(payload, &self.config)
                .map_err(|(expected, got)| ProtocolError::PayloadSize { id, expected, got })?;
            tx.scatter(request);
        }
        request.outstanding = request
            .outstanding
            .checked_sub(1)
            .ok_or(ProtocolError::OutstandingUnderflow(request.uid))?;
        tx.status = transaction::Status::Complete;
        self.stats.responses += 1;
        log::debug!(
            "{}: {} ({} outstanding)",
            style("RESPONSE").bold(),
            tx,
            request.outstanding
        );

        if request.outstanding > 0 {
            return Ok(());
        }
        if request.faulted {
            self.discard(tx.request);
            return Ok(());
        }
        let Some(mut request) = self.requests.remove(&tx.request) else {
            return Ok(());
        };
        request.timestamps.completed = Some(now);
        self.delivery_queue.enqueue(request);
        if !self.core_port_blocked {
            self.events
                .schedule(Event::SendResponse, now + self.config.response_latency);
        }
        Ok(())
    }

    fn send_response(&mut self, now: u64) {
        if self.core_port_blocked {
            return;
        }
        let Some(mut request) = self.delivery_queue.dequeue() else {
            return;
        };
        request.timestamps.delivered = Some(now);
        let latency = request.latency();
        let uid = request.uid;

        match self.core.deliver(request, now) {
            Ok(()) => {
                log::debug!("{}: request {} at {}", style("DELIVER").green(), uid, now);
                self.stats.deliveries += 1;
                if let Some(latency) = latency {
                    self.stats.record_latency(latency);
                }
                if !self.delivery_queue.is_empty() {
                    self.events
                        .schedule(Event::SendResponse, now + self.config.response_latency);
                }
            }
            Err(mut request) => {
                log::debug!("{}: request {} at {}", style("CORE RETRY").red(), uid, now);
                request.timestamps.delivered = None;
                self.delivery_queue.requeue(request);
                self.core_port_blocked = true;
                self.stats.delivery_retries += 1;
            }
        }
    }

    /// The core can accept again after refusing a delivery.
    pub fn on_core_retry_available(&mut self, now: u64) {
        self.core_port_blocked = false;
        if !self.delivery_queue.is_empty() {
            self.events
                .schedule(Event::SendResponse, now + self.config.response_latency);
        }
    }

    /// Nothing is held and no work is pending.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.coalescing_register.is_none()
            && self.banks.is_empty()
            && self.requests.is_empty()
            && self.pending_translations.is_empty()
            && self.in_flight.is_empty()
            && self.delivery_queue.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> deadlock::State {
        let mut state = deadlock::State::new(self.banks.num_banks());
        state.coalescing_register = self.coalescing_register.as_ref().map(|req| req.uid);
        state.waiting_on_banks = self.waiting_on_banks.to_vec();
        for (bank, txs) in state.banks.iter_mut().enumerate() {
            txs.extend(self.banks.bank_iter(bank).map(|tx| (tx.uid, tx.status)));
            if self.banks.is_blocked(bank) {
                state.blocked_banks.push(bank);
            }
        }
        state.pending_translations = self
            .pending_translations
            .iter()
            .map(|((vline, mode), waiting)| (*vline, *mode, waiting.len()))
            .collect();
        state.in_flight = self.in_flight.keys().copied().collect();
        state.in_flight.sort_unstable();
        state.outstanding = self
            .requests
            .values()
            .map(|req| (req.uid, req.outstanding))
            .collect();
        state.outstanding.sort_unstable();
        state.delivery_queue = self.delivery_queue.iter().map(|req| req.uid).collect();
        state.core_port_blocked = self.core_port_blocked;
        state
    }
}
