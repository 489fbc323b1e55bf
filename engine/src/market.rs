//! # Market Registry
//!
//! Market creation, parameter updates, status transitions and statistics.
//! Creating a market also seeds its zero price record and its first
//! UTC-aligned funding boundary.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use meridian_common::math;
use meridian_common::{Event, Market, MarketStats, MarketStatus, MeridianError, PriceInfo};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

/// Insurance fund backing the default markets.
pub const DEFAULT_INSURANCE_FUND: &str = "main";

/// Partial update of a market's risk parameters. `None` leaves the field
/// untouched; identifiers and assets are immutable after creation.
#[derive(Clone, Debug, Default)]
pub struct MarketUpdate {
    pub max_leverage: Option<Decimal>,
    pub initial_margin_rate: Option<Decimal>,
    pub maintenance_margin_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
    pub maker_fee_rate: Option<Decimal>,
    pub min_order_size: Option<Decimal>,
    pub max_order_size: Option<Decimal>,
    pub max_position_size: Option<Decimal>,
    pub funding_interval_secs: Option<i64>,
}

impl<S: Store> Keeper<S> {
    pub fn create_market(&mut self, mut market: Market) -> Result<(), MeridianError> {
        validate_market(&market)?;
        if storage::get_market(self.store(), &market.market_id).is_some() {
            return Err(MeridianError::MarketExists(market.market_id));
        }

        let now = self.block_time();
        market.created_at = now;
        market.updated_at = now;

        let market_id = market.market_id.clone();
        let interval = market.funding_interval_secs;
        let fund_id = market.insurance_fund_id.clone();

        storage::set_market(self.store_mut(), &market);
        storage::set_price_info(self.store_mut(), &PriceInfo::zero(&market_id, now));
        storage::set_next_funding_time(
            self.store_mut(),
            &market_id,
            math::next_interval_boundary(now, interval),
        );
        self.ensure_insurance_fund(&fund_id);

        self.emit(Event::MarketCreated { market_id });
        Ok(())
    }

    pub fn update_market(
        &mut self,
        market_id: &str,
        update: MarketUpdate,
    ) -> Result<(), MeridianError> {
        let mut market = storage::get_market(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;

        if let Some(v) = update.max_leverage {
            market.max_leverage = v;
        }
        if let Some(v) = update.initial_margin_rate {
            market.initial_margin_rate = v;
        }
        if let Some(v) = update.maintenance_margin_rate {
            market.maintenance_margin_rate = v;
        }
        if let Some(v) = update.taker_fee_rate {
            market.taker_fee_rate = v;
        }
        if let Some(v) = update.maker_fee_rate {
            market.maker_fee_rate = v;
        }
        if let Some(v) = update.min_order_size {
            market.min_order_size = v;
        }
        if let Some(v) = update.max_order_size {
            market.max_order_size = v;
        }
        if let Some(v) = update.max_position_size {
            market.max_position_size = v;
        }
        if let Some(v) = update.funding_interval_secs {
            market.funding_interval_secs = v;
        }

        validate_market(&market)?;
        market.updated_at = self.block_time();
        storage::set_market(self.store_mut(), &market);

        self.emit(Event::MarketUpdated {
            market_id: market_id.to_string(),
        });
        Ok(())
    }

    pub fn set_market_status(
        &mut self,
        market_id: &str,
        status: MarketStatus,
    ) -> Result<(), MeridianError> {
        let mut market = storage::get_market(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;
        if market.status == status {
            return Ok(());
        }
        market.status = status;
        market.updated_at = self.block_time();
        storage::set_market(self.store_mut(), &market);

        self.emit(Event::MarketStatusChanged {
            market_id: market_id.to_string(),
            status,
        });
        Ok(())
    }

    pub fn list_active_markets(&self) -> Vec<Market> {
        storage::iter_markets(self.store())
            .into_iter()
            .filter(|m| m.status == MarketStatus::Active)
            .collect()
    }

    pub fn market_stats(&self, market_id: &str) -> Result<MarketStats, MeridianError> {
        if storage::get_market(self.store(), market_id).is_none() {
            return Err(MeridianError::MarketNotFound(market_id.to_string()));
        }
        let (long_oi, short_oi, count) = self.open_interest(market_id);
        let info = storage::get_price_info(self.store(), market_id)
            .unwrap_or_else(|| PriceInfo::zero(market_id, self.block_time()));
        let funding_rate = storage::latest_funding_rate(self.store(), market_id)
            .map(|r| r.rate)
            .unwrap_or(Decimal::ZERO);

        Ok(MarketStats {
            market_id: market_id.to_string(),
            long_open_interest: long_oi,
            short_open_interest: short_oi,
            position_count: count,
            funding_rate,
            mark_price: info.mark_price,
            index_price: info.index_price,
            last_price: info.last_price,
        })
    }

    /// Seed the four default markets: BTC, ETH, SOL and ARB against USDC at
    /// 50x leverage, 5%/2.5% margin rates, 0.05%/0.02% fees and a one-hour
    /// funding interval.
    pub fn init_default_markets(&mut self) -> Result<(), MeridianError> {
        let now = self.block_time();
        for market in default_markets(now) {
            self.create_market(market)?;
        }
        Ok(())
    }
}

fn validate_market(market: &Market) -> Result<(), MeridianError> {
    if market.market_id.is_empty()
        || market.base_asset.is_empty()
        || market.quote_asset.is_empty()
        || market.insurance_fund_id.is_empty()
    {
        return Err(MeridianError::InvalidParameter);
    }
    if market.max_leverage <= Decimal::ZERO {
        return Err(MeridianError::InvalidLeverage);
    }
    if market.maintenance_margin_rate <= Decimal::ZERO
        || market.maintenance_margin_rate >= market.initial_margin_rate
        || market.initial_margin_rate >= Decimal::ONE
    {
        return Err(MeridianError::InvalidParameter);
    }
    if market.taker_fee_rate < Decimal::ZERO || market.maker_fee_rate < Decimal::ZERO {
        return Err(MeridianError::InvalidParameter);
    }
    if market.tick_size <= Decimal::ZERO {
        return Err(MeridianError::InvalidPrice);
    }
    if market.lot_size <= Decimal::ZERO
        || market.min_order_size <= Decimal::ZERO
        || market.max_order_size < market.min_order_size
        || market.max_position_size <= Decimal::ZERO
    {
        return Err(MeridianError::InvalidQuantity);
    }
    if market.funding_interval_secs <= 0 {
        return Err(MeridianError::InvalidParameter);
    }
    Ok(())
}

fn base_market(now: i64) -> Market {
    Market {
        market_id: String::new(),
        base_asset: String::new(),
        quote_asset: "USDC".to_string(),
        max_leverage: dec!(50),
        initial_margin_rate: dec!(0.05),
        maintenance_margin_rate: dec!(0.025),
        taker_fee_rate: dec!(0.0005),
        maker_fee_rate: dec!(0.0002),
        tick_size: Decimal::ONE,
        lot_size: Decimal::ONE,
        min_order_size: Decimal::ONE,
        max_order_size: Decimal::ONE,
        max_position_size: Decimal::ONE,
        funding_interval_secs: 3_600,
        insurance_fund_id: DEFAULT_INSURANCE_FUND.to_string(),
        status: MarketStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

fn default_markets(now: i64) -> Vec<Market> {
    let mut btc = base_market(now);
    btc.market_id = "BTC-USDC".to_string();
    btc.base_asset = "BTC".to_string();
    btc.tick_size = dec!(0.1);
    btc.lot_size = dec!(0.0001);
    btc.min_order_size = dec!(0.0001);
    btc.max_order_size = dec!(100);
    btc.max_position_size = dec!(500);

    let mut eth = base_market(now);
    eth.market_id = "ETH-USDC".to_string();
    eth.base_asset = "ETH".to_string();
    eth.tick_size = dec!(0.01);
    eth.lot_size = dec!(0.001);
    eth.min_order_size = dec!(0.001);
    eth.max_order_size = dec!(1000);
    eth.max_position_size = dec!(5000);

    let mut sol = base_market(now);
    sol.market_id = "SOL-USDC".to_string();
    sol.base_asset = "SOL".to_string();
    sol.tick_size = dec!(0.001);
    sol.lot_size = dec!(0.01);
    sol.min_order_size = dec!(0.01);
    sol.max_order_size = dec!(50000);
    sol.max_position_size = dec!(250000);

    let mut arb = base_market(now);
    arb.market_id = "ARB-USDC".to_string();
    arb.base_asset = "ARB".to_string();
    arb.tick_size = dec!(0.0001);
    arb.lot_size = dec!(1);
    arb.min_order_size = dec!(1);
    arb.max_order_size = dec!(1000000);
    arb.max_position_size = dec!(5000000);

    vec![btc, eth, sol, arb]
}
