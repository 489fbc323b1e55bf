//! # Meridian Engine
//!
//! The core state machine of the Meridian perpetual-futures exchange.
//!
//! ## Features
//! - Market registry with per-market risk parameters
//! - Margin accounts with isolated and cross accounting
//! - Position lifecycle driven by the external matching engine
//! - Multi-source oracle aggregation with circuit breakers and EMA mark
//! - Funding accrual and settlement on UTC-aligned boundaries
//! - Tiered liquidations with an insurance-fund backstop and ADL
//! - K-line aggregation across seven intervals
//!
//! ## Architecture
//! - All state lives in a prefix-keyed byte store owned by the block host
//! - The host drives blocks: `begin_block`, messages, `end_block`
//! - The end-of-block pipeline runs serially: oracle update, funding tick,
//!   liquidation sweep, K-line rollup
//! - Events accumulate per block and are drained by the host

pub mod account;
pub mod funding;
pub mod keeper;
pub mod kline;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod msgs;
pub mod oracle;
pub mod position;
pub mod queries;
pub mod storage;
pub mod store;
pub mod trading;

pub use keeper::Keeper;
pub use store::{MemStore, Store};
