//! # Query Surface
//!
//! Read-only views over the store for the RPC/WebSocket layer. Queries
//! never mutate and never emit events; the values returned are snapshots.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use meridian_common::{
    math, EmaPrice, FundingRate, Kline, KlineInterval, MarginMode, Market, MarketStatus,
    MeridianError, OracleSource, Position, PriceInfo, Side,
};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

/// Account snapshot with derived fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub trader: String,
    pub balance: Decimal,
    pub locked_margin: Decimal,
    pub available_balance: Decimal,
    pub margin_mode: MarginMode,
    pub cross_margin_pnl: Decimal,
    /// Balance plus aggregate unrealized PnL at current marks
    pub equity: Decimal,
}

/// Health snapshot of one position at the current mark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionHealth {
    pub market_id: String,
    pub trader: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub margin: Decimal,
    pub unrealized_pnl: Decimal,
    /// `None` while the market has no mark price
    pub margin_ratio: Option<Decimal>,
    pub maintenance_rate: Decimal,
    pub liquidation_price: Decimal,
    pub healthy: bool,
}

impl<S: Store> Keeper<S> {
    pub fn query_markets(&self) -> Vec<Market> {
        storage::iter_markets(self.store())
    }

    pub fn query_market(&self, market_id: &str) -> Option<Market> {
        storage::get_market(self.store(), market_id)
    }

    pub fn query_markets_by_status(&self, status: MarketStatus) -> Vec<Market> {
        storage::iter_markets(self.store())
            .into_iter()
            .filter(|m| m.status == status)
            .collect()
    }

    pub fn query_account(&self, trader: &str) -> Result<AccountSummary, MeridianError> {
        let account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
        let health = self.cross_account_health(trader);
        Ok(AccountSummary {
            trader: account.trader.clone(),
            balance: account.balance,
            locked_margin: account.locked_margin,
            available_balance: account.available_balance(),
            margin_mode: account.margin_mode,
            cross_margin_pnl: account.cross_margin_pnl,
            equity: account.balance + health.total_unrealized,
        })
    }

    pub fn query_positions_by_trader(&self, trader: &str) -> Vec<Position> {
        storage::iter_trader_positions(self.store(), trader)
    }

    pub fn query_positions_by_market(&self, market_id: &str) -> Vec<Position> {
        storage::iter_market_positions(self.store(), market_id)
    }

    pub fn query_position_health(
        &self,
        market_id: &str,
        trader: &str,
    ) -> Result<PositionHealth, MeridianError> {
        let market = storage::get_market(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;
        let position = storage::get_position(self.store(), market_id, trader).ok_or_else(|| {
            MeridianError::PositionNotFound {
                trader: trader.to_string(),
                market_id: market_id.to_string(),
            }
        })?;
        let mark = storage::get_price_info(self.store(), market_id)
            .map(|info| info.mark_price)
            .unwrap_or(Decimal::ZERO);

        let unrealized = if mark > Decimal::ZERO {
            math::unrealized_pnl(position.side, position.size, position.entry_price, mark)
        } else {
            Decimal::ZERO
        };
        let margin_ratio =
            math::position_margin_ratio(position.margin, unrealized, position.size, mark);
        let healthy = margin_ratio
            .map(|ratio| ratio >= market.maintenance_margin_rate)
            .unwrap_or(true);

        Ok(PositionHealth {
            market_id: position.market_id.clone(),
            trader: position.trader.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            mark_price: mark,
            margin: position.margin,
            unrealized_pnl: unrealized,
            margin_ratio,
            maintenance_rate: market.maintenance_margin_rate,
            liquidation_price: position.liquidation_price,
            healthy,
        })
    }

    pub fn query_price(&self, market_id: &str) -> Option<PriceInfo> {
        storage::get_price_info(self.store(), market_id)
    }

    pub fn query_ema(&self, market_id: &str) -> Option<EmaPrice> {
        storage::get_ema_price(self.store(), market_id)
    }

    pub fn query_funding_rate(&self, market_id: &str) -> Option<FundingRate> {
        storage::latest_funding_rate(self.store(), market_id)
    }

    pub fn query_funding_history(
        &self,
        market_id: &str,
        from: i64,
        to: i64,
    ) -> Vec<FundingRate> {
        storage::iter_funding_rates(self.store(), market_id, from, to)
    }

    pub fn query_klines(
        &self,
        market_id: &str,
        interval: KlineInterval,
        from: i64,
        to: i64,
    ) -> Vec<Kline> {
        storage::iter_klines(self.store(), market_id, interval, from, to)
    }

    pub fn query_latest_kline(
        &self,
        market_id: &str,
        interval: KlineInterval,
    ) -> Option<Kline> {
        storage::latest_kline(self.store(), market_id, interval)
    }

    pub fn query_oracle_sources(&self) -> Vec<OracleSource> {
        storage::iter_oracle_sources(self.store())
    }

    /// Dry-run aggregation of the current submission snapshot.
    pub fn query_aggregate_price(&self, market_id: &str) -> Result<Decimal, MeridianError> {
        self.aggregate_price(market_id)
    }
}
