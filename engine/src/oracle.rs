//! # Oracle Aggregation
//!
//! Source registry, price submission guards and the per-block index/mark
//! pipeline: staleness filtering, time-decayed weighting, median outlier
//! rejection, weighted mean, per-block change clamp and EMA smoothing.

use rust_decimal::Decimal;

use meridian_common::{
    math, EmaPrice, Event, MeridianError, OracleSource, OracleSourcePrice, PriceInfo,
};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

impl<S: Store> Keeper<S> {
    /// Register a source, or refresh its weight if it already exists.
    pub fn register_oracle_source(
        &mut self,
        source_id: &str,
        weight: u32,
    ) -> Result<(), MeridianError> {
        if source_id.is_empty() || weight < 1 {
            return Err(MeridianError::InvalidParameter);
        }
        let source = match storage::get_oracle_source(self.store(), source_id) {
            Some(mut source) => {
                source.weight = weight;
                source
            }
            None => OracleSource {
                source_id: source_id.to_string(),
                weight,
                is_active: true,
                last_update: 0,
                last_price: Decimal::ZERO,
                reliability: Decimal::ONE,
            },
        };
        storage::set_oracle_source(self.store_mut(), &source);
        Ok(())
    }

    pub fn set_source_active(
        &mut self,
        source_id: &str,
        active: bool,
    ) -> Result<(), MeridianError> {
        let mut source = storage::get_oracle_source(self.store(), source_id)
            .ok_or_else(|| MeridianError::SourceNotFound(source_id.to_string()))?;
        source.is_active = active;
        storage::set_oracle_source(self.store_mut(), &source);
        Ok(())
    }

    /// Seed the default source set.
    pub fn init_default_oracle_sources(&mut self) -> Result<(), MeridianError> {
        for (source_id, weight) in [("binance", 3), ("coinbase", 2), ("okx", 2), ("kraken", 1)] {
            self.register_oracle_source(source_id, weight)?;
        }
        Ok(())
    }

    /// Record one source's price for one market. Rejected when the source
    /// is unknown or inactive, or when the submission deviates from the
    /// current mark by more than the circuit-breaker threshold.
    pub fn submit_source_price(
        &mut self,
        source_id: &str,
        market_id: &str,
        price: Decimal,
    ) -> Result<(), MeridianError> {
        let mut source = storage::get_oracle_source(self.store(), source_id)
            .ok_or_else(|| MeridianError::SourceNotFound(source_id.to_string()))?;
        if !source.is_active {
            return Err(MeridianError::SourceInactive(source_id.to_string()));
        }
        if storage::get_market(self.store(), market_id).is_none() {
            return Err(MeridianError::MarketNotFound(market_id.to_string()));
        }
        if price <= Decimal::ZERO {
            return Err(MeridianError::InvalidPrice);
        }

        let config = storage::get_oracle_config(self.store());
        if let Some(info) = storage::get_price_info(self.store(), market_id) {
            if info.mark_price > Decimal::ZERO {
                // deviation_ratio is total for a positive mark
                let deviation = math::deviation_ratio(price, info.mark_price)
                    .ok_or(MeridianError::DivisionByZero)?;
                if deviation > config.circuit_breaker_pct {
                    return Err(MeridianError::CircuitBreakerTripped);
                }
            }
        }

        let now = self.block_time();
        storage::set_source_price(
            self.store_mut(),
            &OracleSourcePrice {
                source_id: source_id.to_string(),
                market_id: market_id.to_string(),
                price,
                timestamp: now,
            },
        );
        source.last_update = now;
        source.last_price = price;
        storage::set_oracle_source(self.store_mut(), &source);

        self.emit(Event::OraclePriceSubmitted {
            source_id: source_id.to_string(),
            market_id: market_id.to_string(),
            price,
        });
        Ok(())
    }

    /// Aggregate the surviving submissions for a market into one index
    /// price.
    ///
    /// # Pipeline
    /// 1. Latest submission per active source, dropping those older than
    ///    `max_price_age_secs` (strictly older; the boundary survives)
    /// 2. Time-decayed weight `w * max(0.1, (1 - age/max_age)^2)`
    /// 3. Median outlier filter at `max_deviation` (strict `>` drops)
    /// 4. Weighted arithmetic mean; fails below `min_sources` survivors
    pub fn aggregate_price(&self, market_id: &str) -> Result<Decimal, MeridianError> {
        let config = storage::get_oracle_config(self.store());
        let now = self.block_time();

        let mut candidates: Vec<(Decimal, Decimal)> = Vec::new();
        for source in storage::iter_oracle_sources(self.store()) {
            if !source.is_active {
                continue;
            }
            let submission =
                match storage::get_source_price(self.store(), &source.source_id, market_id) {
                    Some(submission) => submission,
                    None => continue,
                };
            if submission.price <= Decimal::ZERO {
                continue;
            }
            let age = (now - submission.timestamp).max(0);
            if age > config.max_price_age_secs {
                continue;
            }
            let weight = math::time_decay_weight(source.weight, age, config.max_price_age_secs);
            candidates.push((submission.price, weight));
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        let prices: Vec<Decimal> = candidates.iter().map(|(p, _)| *p).collect();
        let median = match math::median(&prices) {
            Some(median) => median,
            None => return Err(MeridianError::InsufficientOracleSources),
        };

        let survivors: Vec<(Decimal, Decimal)> = candidates
            .into_iter()
            .filter(|(price, _)| {
                math::deviation_ratio(*price, median)
                    .map(|d| d <= config.max_deviation)
                    .unwrap_or(false)
            })
            .collect();
        if (survivors.len() as u32) < config.min_sources {
            return Err(MeridianError::InsufficientOracleSources);
        }

        math::weighted_mean(&survivors).ok_or(MeridianError::InsufficientOracleSources)
    }

    /// Recompute the index price, clamp its per-block change and feed it
    /// through the EMA filter into the mark price. On aggregation failure
    /// the prior prices are retained and the error is surfaced.
    pub fn update_price_with_protection(
        &mut self,
        market_id: &str,
    ) -> Result<(), MeridianError> {
        let aggregate = self.aggregate_price(market_id)?;
        let config = storage::get_oracle_config(self.store());
        let now = self.block_time();

        let mut info = storage::get_price_info(self.store(), market_id)
            .unwrap_or_else(|| PriceInfo::zero(market_id, now));

        let mut index = aggregate;
        if info.index_price > Decimal::ZERO {
            let max_delta = info.index_price * config.max_price_change;
            let delta = aggregate - info.index_price;
            if delta.abs() > max_delta {
                index = if delta > Decimal::ZERO {
                    info.index_price + max_delta
                } else {
                    info.index_price - max_delta
                };
                self.emit(Event::PriceChangeLimited {
                    market_id: market_id.to_string(),
                    raw_price: aggregate,
                    clamped_price: index,
                });
            }
        }

        let prior_ema = storage::get_ema_price(self.store(), market_id)
            .map(|e| e.value)
            .unwrap_or(Decimal::ZERO);
        let ema = if prior_ema > Decimal::ZERO {
            math::ema_step(config.ema_alpha, index, prior_ema)
        } else {
            // the first observation seeds the filter
            index
        };
        let block_height = self.block_height();
        storage::set_ema_price(
            self.store_mut(),
            &EmaPrice {
                market_id: market_id.to_string(),
                value: ema,
                last_updated: now,
                block_height,
            },
        );

        info.mark_price = ema;
        info.index_price = index;
        info.timestamp = now;
        storage::set_price_info(self.store_mut(), &info);

        self.emit(Event::PriceUpdated {
            market_id: market_id.to_string(),
            mark_price: ema,
            index_price: index,
        });
        Ok(())
    }
}
