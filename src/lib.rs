#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::large_enum_variant
)]

pub mod bank;
pub mod coalescer;
pub mod config;
pub mod core;
pub mod deadlock;
pub mod event;
pub mod fifo;
pub mod interconn;
pub mod lsq;
pub mod request;
pub mod set_index;
pub mod sim;
pub mod stats;
pub mod trace;
pub mod transaction;
pub mod translation;
pub mod warp;

#[cfg(test)]
pub mod testing;

pub use lsq::LoadStoreQueue;

pub type address = u64;
