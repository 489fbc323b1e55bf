//! # Keeper
//!
//! Owns the store handle for the duration of a block and exposes every
//! mutating operation of the core. The host drives the lifecycle:
//!
//! 1. `begin_block(time, height)` — inject the block clock
//! 2. message handlers / matching-engine callbacks
//! 3. `end_block()` — oracle update, funding tick, liquidation sweep,
//!    K-line rollup, strictly in that order
//! 4. `take_events()` — drain the block's event stream
//!
//! The keeper never reads wall-clock time and never keeps entity state in
//! memory between calls; everything goes through the store so the host can
//! commit or discard a block atomically.

use log::warn;

use meridian_common::{Event, MeridianError};

use crate::storage;
use crate::store::Store;

pub struct Keeper<S: Store> {
    store: S,
    block_time: i64,
    block_height: u64,
    events: Vec<Event>,
}

impl<S: Store> Keeper<S> {
    pub fn new(store: S) -> Keeper<S> {
        Keeper {
            store,
            block_time: 0,
            block_height: 0,
            events: Vec::new(),
        }
    }

    /// Write genesis state: configuration singletons, the default insurance
    /// fund, the default markets and oracle sources. Idempotent only on an
    /// empty store; a populated chain must not call it again.
    pub fn init_genesis(&mut self) -> Result<(), MeridianError> {
        storage::set_oracle_config(&mut self.store, &Default::default());
        storage::set_funding_config(&mut self.store, &Default::default());
        storage::set_liquidation_config(&mut self.store, &Default::default());
        self.ensure_insurance_fund(crate::market::DEFAULT_INSURANCE_FUND);
        self.init_default_markets()?;
        self.init_default_oracle_sources()?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Block lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    pub fn begin_block(&mut self, time: i64, height: u64) {
        self.block_time = time;
        self.block_height = height;
    }

    /// The end-of-block pipeline. Phases run serially; a failure in one
    /// item is logged and never aborts the rest of the phase.
    pub fn end_block(&mut self) {
        let markets = storage::iter_markets(&self.store);
        for market in &markets {
            if market.status != meridian_common::MarketStatus::Active {
                continue;
            }
            match self.update_price_with_protection(&market.market_id) {
                Ok(()) => {}
                Err(MeridianError::InsufficientOracleSources) => {
                    // prior price is retained by contract
                    log::debug!(
                        "oracle aggregation skipped for {}: not enough sources",
                        market.market_id
                    );
                }
                Err(err) => warn!(
                    "oracle update failed for {}: {}",
                    market.market_id, err
                ),
            }
        }

        self.funding_tick();
        self.liquidation_sweep();
        self.aggregate_klines();
    }

    pub fn block_time(&self) -> i64 {
        self.block_time
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Store and event access
    // ═══════════════════════════════════════════════════════════════════════

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The host owns commit/abort; it may also stage state directly, e.g.
    /// when importing a snapshot.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub(crate) fn emit(&mut self, event: Event) {
        log::debug!("event {}: {:?}", event.name(), event);
        self.events.push(event);
    }

    /// Drain the events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Events accumulated so far in this block, without draining.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn ensure_insurance_fund(&mut self, fund_id: &str) {
        if storage::get_insurance_fund(&self.store, fund_id).is_none() {
            storage::set_insurance_fund(
                &mut self.store,
                &meridian_common::InsuranceFund {
                    fund_id: fund_id.to_string(),
                    balance: rust_decimal::Decimal::ZERO,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use meridian_common::MarketStatus;

    #[test]
    fn genesis_seeds_markets_sources_and_configs() {
        let mut keeper = Keeper::new(MemStore::new());
        keeper.begin_block(1_700_000_000, 1);
        keeper.init_genesis().unwrap();

        let markets = storage::iter_markets(keeper.store());
        let ids: Vec<&str> = markets.iter().map(|m| m.market_id.as_str()).collect();
        assert_eq!(ids, vec!["ARB-USDC", "BTC-USDC", "ETH-USDC", "SOL-USDC"]);
        assert!(markets.iter().all(|m| m.status == MarketStatus::Active));

        assert!(!storage::iter_oracle_sources(keeper.store()).is_empty());
        assert!(storage::get_insurance_fund(keeper.store(), "main").is_some());
        assert_eq!(storage::get_oracle_config(keeper.store()).min_sources, 2);
    }

    #[test]
    fn begin_block_sets_the_clock() {
        let mut keeper = Keeper::new(MemStore::new());
        keeper.begin_block(1_700_000_123, 42);
        assert_eq!(keeper.block_time(), 1_700_000_123);
        assert_eq!(keeper.block_height(), 42);
    }

    #[test]
    fn events_drain_once() {
        let mut keeper = Keeper::new(MemStore::new());
        keeper.emit(Event::MarketCreated {
            market_id: "BTC-USDC".to_string(),
        });
        assert_eq!(keeper.events().len(), 1);
        assert_eq!(keeper.take_events().len(), 1);
        assert!(keeper.take_events().is_empty());
    }
}
