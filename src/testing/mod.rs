//! Test helpers and scripted collaborators.
use crate::{
    address,
    core::{AccessViolation, CorePort},
    interconn::{Backend, Status},
    request::{self, WarpRequest},
    transaction::{self, Packet},
    translation::{Mode, Translator},
    warp,
};
use std::collections::VecDeque;

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_test() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
        color_eyre::install().ok();
    });
}

/// Fully active load of 4 byte words.
pub fn load(addrs: Vec<address>) -> Result<WarpRequest, request::RequestError> {
    let warp_size = addrs.len();
    request::Builder {
        warp_size,
        active_mask: warp::full_mask(warp_size),
        addrs,
        data: None,
        size: 4,
        kind: request::Kind::Load,
        pc: 0x100,
        core_id: 0,
        warp_id: 0,
    }
    .build()
}

/// Fully active store of 4 byte words.
pub fn store(addrs: Vec<address>, data: Vec<Vec<u8>>) -> Result<WarpRequest, request::RequestError> {
    let warp_size = addrs.len();
    request::Builder {
        warp_size,
        active_mask: warp::full_mask(warp_size),
        addrs,
        data: Some(data),
        size: 4,
        kind: request::Kind::Store,
        pc: 0x200,
        core_id: 0,
        warp_id: 0,
    }
    .build()
}

/// Byte the [`ScriptedBackend`] returns for `addr`.
#[must_use]
pub fn pattern(addr: address) -> u8 {
    (addr % 251) as u8
}

/// Backend that answers with a scripted sequence of statuses.
///
/// Accepts everything once the script is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    pub script: VecDeque<Status>,
    /// Every send attempt.
    pub attempts: Vec<(u64, transaction::Id)>,
    /// Accepted packets not yet answered.
    pub accepted: Vec<(u64, Packet)>,
}

impl ScriptedBackend {
    pub fn retry_next(&mut self, n: usize) {
        self.script.extend(std::iter::repeat(Status::Retry).take(n));
    }

    /// Takes the accepted packets along with their load payloads.
    pub fn take_responses(&mut self) -> Vec<(transaction::Id, Vec<u8>)> {
        self.accepted
            .drain(..)
            .map(|(_, packet)| {
                let payload = if packet.is_write() {
                    Vec::new()
                } else {
                    (0..u64::from(packet.size))
                        .map(|i| pattern(packet.addr + i))
                        .collect()
                };
                (packet.id, payload)
            })
            .collect()
    }
}

impl Backend for ScriptedBackend {
    fn send(&mut self, packet: Packet, now: u64) -> Status {
        self.attempts.push((now, packet.id));
        let status = self.script.pop_front().unwrap_or(Status::Accepted);
        if status == Status::Accepted {
            self.accepted.push((now, packet));
        }
        status
    }
}

/// Translator that only records requests, completions are driven by the test.
#[derive(Debug, Default)]
pub struct DeferredTranslator {
    pub requests: Vec<(address, Mode, u64)>,
}

impl Translator for DeferredTranslator {
    fn request_translation(&mut self, vline: address, mode: Mode, now: u64) {
        self.requests.push((vline, mode, now));
    }
}

/// Core port that records deliveries and refuses a scripted number of them.
#[derive(Debug, Default)]
pub struct RecordingCore {
    pub refuse: usize,
    pub delivered: Vec<(u64, WarpRequest)>,
    pub refused: Vec<(u64, request::Id)>,
    pub violations: Vec<AccessViolation>,
    pub issue_retries: Vec<u64>,
}

impl RecordingCore {
    #[must_use]
    pub fn delivered_ids(&self) -> Vec<request::Id> {
        self.delivered.iter().map(|(_, req)| req.uid).collect()
    }
}

impl CorePort for RecordingCore {
    fn deliver(&mut self, request: WarpRequest, now: u64) -> Result<(), WarpRequest> {
        if self.refuse > 0 {
            self.refuse -= 1;
            self.refused.push((now, request.uid));
            return Err(request);
        }
        self.delivered.push((now, request));
        Ok(())
    }

    fn access_violation(&mut self, violation: AccessViolation, _now: u64) {
        self.violations.push(violation);
    }

    fn retry_issue(&mut self, now: u64) {
        self.issue_retries.push(now);
    }
}
