//! # Funding Pipeline
//!
//! Rate computation and settlement. Rates combine a damped mark/index
//! premium with an open-interest imbalance adjustment, both clamped
//! symmetrically. Settlement walks a market's positions in key order, so
//! the payment sequence is reproducible across nodes.

use log::warn;
use rust_decimal::Decimal;

use meridian_common::{math, Event, FundingPayment, FundingRate, MarketStatus, MeridianError, Side};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

impl<S: Store> Keeper<S> {
    /// End-of-block driver: settle every active market whose boundary has
    /// been reached. A single market's failure is logged and skipped.
    pub fn funding_tick(&mut self) {
        for market in storage::iter_markets(self.store()) {
            if market.status != MarketStatus::Active {
                continue;
            }
            let due = match storage::get_next_funding_time(self.store(), &market.market_id) {
                Some(next) => self.block_time() >= next,
                None => false,
            };
            if !due {
                continue;
            }
            if let Err(err) = self.settle_funding(&market.market_id) {
                warn!("funding settlement failed for {}: {}", market.market_id, err);
            }
        }
    }

    /// Settle funding for one market.
    ///
    /// # Flow
    /// 1. Mark the market Settling
    /// 2. Compute and append the rate
    /// 3. Walk positions in key order, applying `size * mark * rate`
    ///    (longs pay a positive rate, shorts receive it)
    /// 4. Advance the boundary and restore Active
    pub fn settle_funding(&mut self, market_id: &str) -> Result<(), MeridianError> {
        let mut market = storage::get_market(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;
        if market.status == MarketStatus::Settling {
            return Err(MeridianError::FundingAlreadySettled(market_id.to_string()));
        }

        let now = self.block_time();
        let next = storage::get_next_funding_time(self.store(), market_id)
            .ok_or_else(|| MeridianError::FundingNotDue(market_id.to_string()))?;
        if now < next {
            return Err(MeridianError::FundingNotDue(market_id.to_string()));
        }

        let info = storage::get_price_info(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;
        if info.mark_price <= Decimal::ZERO || info.index_price <= Decimal::ZERO {
            // no reference prices yet; push the boundary instead of spinning
            warn!("skipping funding for {}: no oracle prices", market_id);
            storage::set_next_funding_time(
                self.store_mut(),
                market_id,
                math::next_interval_boundary(now, market.funding_interval_secs),
            );
            return Ok(());
        }

        market.status = MarketStatus::Settling;
        market.updated_at = now;
        storage::set_market(self.store_mut(), &market);

        let rate = self.compute_funding_rate(market_id, info.mark_price, info.index_price)?;
        storage::append_funding_rate(
            self.store_mut(),
            &FundingRate {
                market_id: market_id.to_string(),
                rate,
                mark_price: info.mark_price,
                index_price: info.index_price,
                timestamp: now,
            },
        );

        // the walk is trader-lexicographic within the market prefix
        let mut affected = 0u64;
        for position in storage::iter_market_positions(self.store(), market_id) {
            let payment = position.size * info.mark_price * rate;
            let delta = match position.side {
                Side::Long => -payment,
                Side::Short => payment,
            };

            let mut account = match storage::get_account(self.store(), &position.trader) {
                Some(account) => account,
                None => {
                    warn!("funding: missing account {} skipped", position.trader);
                    continue;
                }
            };
            account.balance += delta;
            account.updated_at = now;
            storage::set_account(self.store_mut(), &account);

            let payment_id = storage::next_funding_payment_id(self.store_mut());
            storage::append_funding_payment(
                self.store_mut(),
                &FundingPayment {
                    payment_id,
                    trader: position.trader.clone(),
                    market_id: market_id.to_string(),
                    amount: delta,
                    rate,
                    timestamp: now,
                },
            );
            affected += 1;
        }

        storage::set_next_funding_time(
            self.store_mut(),
            market_id,
            math::next_interval_boundary(now, market.funding_interval_secs),
        );
        market.status = MarketStatus::Active;
        storage::set_market(self.store_mut(), &market);

        self.emit(Event::FundingSettled {
            market_id: market_id.to_string(),
            rate,
            mark_price: info.mark_price,
            index_price: info.index_price,
            positions_affected: affected,
        });
        Ok(())
    }

    /// Open-interest adjusted rate:
    /// `clamp(clamp(damping * premium) + oi_factor * imbalance)`.
    pub fn compute_funding_rate(
        &self,
        market_id: &str,
        mark_price: Decimal,
        index_price: Decimal,
    ) -> Result<Decimal, MeridianError> {
        let config = storage::get_funding_config(self.store());
        let base = math::funding_base_rate(
            mark_price,
            index_price,
            config.damping_factor,
            config.max_rate,
        )
        .ok_or(MeridianError::DivisionByZero)?;

        let (long_oi, short_oi, _) = self.open_interest(market_id);
        let imbalance = math::oi_imbalance(long_oi, short_oi);
        Ok(math::funding_rate(
            base,
            imbalance,
            config.oi_damping_factor,
            config.max_rate,
        ))
    }
}
