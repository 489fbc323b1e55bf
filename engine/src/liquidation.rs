//! # Liquidation Engine
//!
//! Tiered liquidation policy driven by the margin ratio at the mark price:
//! a warning tier, a partial close with cooldown, and an emergency full
//! close backed by the insurance fund with auto-deleveraging as the last
//! resort. Cross-margin accounts are evaluated at account level and shed
//! their largest-notional position first.

use std::collections::BTreeSet;

use log::warn;
use rust_decimal::Decimal;

use meridian_common::events::LiquidationTier;
use meridian_common::{
    math, Event, LiquidationConfig, MarginMode, Market, MarketStatus, MeridianError, Position,
    Side,
};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

/// Escalation decision for one ratio against one maintenance floor.
fn select_tier(ratio: Decimal, floor: Decimal, config: &LiquidationConfig) -> Option<LiquidationTier> {
    if ratio >= floor * config.warning_factor {
        return None;
    }
    if ratio >= floor {
        return Some(LiquidationTier::Warning);
    }
    if ratio > floor * config.emergency_factor {
        return Some(LiquidationTier::Partial);
    }
    Some(LiquidationTier::Emergency)
}

impl<S: Store> Keeper<S> {
    /// End-of-block sweep over every position. Per-item failures are
    /// logged; the sweep always completes.
    pub fn liquidation_sweep(&mut self) {
        let mut evaluated_cross: BTreeSet<String> = BTreeSet::new();

        for market in storage::iter_markets(self.store()) {
            if market.status != MarketStatus::Active {
                continue;
            }
            let mark = storage::get_price_info(self.store(), &market.market_id)
                .map(|info| info.mark_price)
                .unwrap_or(Decimal::ZERO);
            if mark <= Decimal::ZERO {
                continue;
            }

            for position in storage::iter_market_positions(self.store(), &market.market_id) {
                let account = match storage::get_account(self.store(), &position.trader) {
                    Some(account) => account,
                    None => {
                        warn!("sweep: missing account {} skipped", position.trader);
                        continue;
                    }
                };
                let outcome = match account.margin_mode {
                    MarginMode::Isolated => self.evaluate_isolated(&market, &position, mark),
                    MarginMode::Cross => {
                        if !evaluated_cross.insert(position.trader.clone()) {
                            continue;
                        }
                        self.evaluate_cross_account(&position.trader)
                    }
                };
                if let Err(err) = outcome {
                    warn!(
                        "sweep: {} in {} failed: {}",
                        position.trader, market.market_id, err
                    );
                }
            }
        }
    }

    /// Explicit liquidation entry point, e.g. for an external liquidator.
    /// The liquidator share of the penalty is paid to `liquidator` when
    /// given, otherwise it accrues to the insurance fund.
    pub fn liquidate(
        &mut self,
        market_id: &str,
        trader: &str,
        liquidator: Option<&str>,
    ) -> Result<(), MeridianError> {
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
        if mark <= Decimal::ZERO {
            return Err(MeridianError::InvalidPrice);
        }
        let account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;

        let config = storage::get_liquidation_config(self.store());
        let (ratio, floor) = match account.margin_mode {
            MarginMode::Isolated => {
                let unrealized =
                    math::unrealized_pnl(position.side, position.size, position.entry_price, mark);
                let ratio =
                    math::position_margin_ratio(position.margin, unrealized, position.size, mark)
                        .ok_or(MeridianError::DivisionByZero)?;
                (ratio, market.maintenance_margin_rate)
            }
            MarginMode::Cross => {
                let health = self.cross_account_health(trader);
                let ratio = health.margin_ratio.ok_or(MeridianError::NotLiquidatable)?;
                (ratio, config.cross_margin_threshold)
            }
        };

        match select_tier(ratio, floor, &config) {
            None | Some(LiquidationTier::Warning) => Err(MeridianError::NotLiquidatable),
            Some(LiquidationTier::Partial) => {
                if self.in_cooldown(market_id, trader, &config) {
                    return Err(MeridianError::LiquidationCooldownActive);
                }
                self.execute_partial(&market, trader, mark, liquidator)
            }
            Some(LiquidationTier::Emergency) => {
                self.execute_full(&market, trader, mark, liquidator)
            }
        }
    }

    fn in_cooldown(&self, market_id: &str, trader: &str, config: &LiquidationConfig) -> bool {
        match storage::get_liquidation_cooldown(self.store(), market_id, trader) {
            Some(last) => self.block_time() - last < config.cooldown_secs,
            None => false,
        }
    }

    fn evaluate_isolated(
        &mut self,
        market: &Market,
        position: &Position,
        mark: Decimal,
    ) -> Result<(), MeridianError> {
        let config = storage::get_liquidation_config(self.store());
        let unrealized =
            math::unrealized_pnl(position.side, position.size, position.entry_price, mark);
        let ratio =
            match math::position_margin_ratio(position.margin, unrealized, position.size, mark) {
                Some(ratio) => ratio,
                None => return Ok(()),
            };

        match select_tier(ratio, market.maintenance_margin_rate, &config) {
            None => Ok(()),
            Some(LiquidationTier::Warning) => {
                self.emit(Event::LiquidationWarning {
                    trader: position.trader.clone(),
                    market_id: market.market_id.clone(),
                    margin_ratio: ratio,
                });
                Ok(())
            }
            Some(LiquidationTier::Partial) => {
                // cooldown applies to tier 2 only; tier 3 bypasses it
                if self.in_cooldown(&market.market_id, &position.trader, &config) {
                    return Ok(());
                }
                self.execute_partial(market, &position.trader, mark, None)
            }
            Some(LiquidationTier::Emergency) => {
                self.execute_full(market, &position.trader, mark, None)
            }
        }
    }

    /// Account-level evaluation for cross mode. Writes the aggregate uPnL
    /// snapshot and liquidates the largest-notional position when the
    /// account ratio breaches the cross threshold.
    fn evaluate_cross_account(&mut self, trader: &str) -> Result<(), MeridianError> {
        let health = self.cross_account_health(trader);

        let mut account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
        account.cross_margin_pnl = health.total_unrealized;
        storage::set_account(self.store_mut(), &account);

        let ratio = match health.margin_ratio {
            Some(ratio) => ratio,
            None => return Ok(()),
        };
        let config = storage::get_liquidation_config(self.store());
        let tier = match select_tier(ratio, config.cross_margin_threshold, &config) {
            Some(tier) => tier,
            None => return Ok(()),
        };

        let target = match self.largest_notional_position(trader) {
            Some(target) => target,
            None => return Ok(()),
        };
        let market = storage::get_market(self.store(), &target.market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(target.market_id.clone()))?;
        let mark = storage::get_price_info(self.store(), &target.market_id)
            .map(|info| info.mark_price)
            .unwrap_or(Decimal::ZERO);
        if mark <= Decimal::ZERO {
            return Ok(());
        }

        match tier {
            LiquidationTier::Warning => {
                self.emit(Event::LiquidationWarning {
                    trader: trader.to_string(),
                    market_id: target.market_id.clone(),
                    margin_ratio: ratio,
                });
                Ok(())
            }
            LiquidationTier::Partial => {
                if self.in_cooldown(&target.market_id, trader, &config) {
                    return Ok(());
                }
                self.execute_partial(&market, trader, mark, None)
            }
            LiquidationTier::Emergency => self.execute_full(&market, trader, mark, None),
        }
    }

    /// The trader's position with the highest mark notional; ties resolve
    /// to the first market in key order.
    fn largest_notional_position(&self, trader: &str) -> Option<Position> {
        let mut best: Option<(Decimal, Position)> = None;
        for position in storage::iter_trader_positions(self.store(), trader) {
            let mark = storage::get_price_info(self.store(), &position.market_id)
                .map(|info| info.mark_price)
                .unwrap_or(Decimal::ZERO);
            let reference = if mark > Decimal::ZERO {
                mark
            } else {
                position.entry_price
            };
            let notional = position.notional(reference);
            match &best {
                Some((top, _)) if notional <= *top => {}
                _ => best = Some((notional, position)),
            }
        }
        best.map(|(_, position)| position)
    }

    /// Tier 2: market-close a fraction of the position and charge the
    /// penalty on the closed notional. Starts the cooldown window.
    fn execute_partial(
        &mut self,
        market: &Market,
        trader: &str,
        mark: Decimal,
        liquidator: Option<&str>,
    ) -> Result<(), MeridianError> {
        let config = storage::get_liquidation_config(self.store());
        let position = storage::get_position(self.store(), &market.market_id, trader)
            .ok_or_else(|| MeridianError::PositionNotFound {
                trader: trader.to_string(),
                market_id: market.market_id.clone(),
            })?;

        self.emit(Event::LiquidationStarted {
            trader: trader.to_string(),
            market_id: market.market_id.clone(),
            tier: LiquidationTier::Partial,
        });

        let close_size = position.size * config.partial_close_fraction;
        self.close_position_portion(&market.market_id, trader, close_size, mark)?;

        let penalty = close_size * mark * config.penalty_rate;
        self.charge_penalty(market, trader, penalty, liquidator, &config);

        let cooldown_time = self.block_time();
        storage::set_liquidation_cooldown(
            self.store_mut(),
            &market.market_id,
            trader,
            cooldown_time,
        );

        self.emit(Event::LiquidationCompleted {
            trader: trader.to_string(),
            market_id: market.market_id.clone(),
            closed_size: close_size,
            penalty,
        });
        Ok(())
    }

    /// Tier 3: close the whole position, charge the penalty, cover bad
    /// debt from the insurance fund and fall through to ADL when the fund
    /// cannot absorb it.
    fn execute_full(
        &mut self,
        market: &Market,
        trader: &str,
        mark: Decimal,
        liquidator: Option<&str>,
    ) -> Result<(), MeridianError> {
        let config = storage::get_liquidation_config(self.store());
        let position = storage::get_position(self.store(), &market.market_id, trader)
            .ok_or_else(|| MeridianError::PositionNotFound {
                trader: trader.to_string(),
                market_id: market.market_id.clone(),
            })?;

        self.emit(Event::LiquidationStarted {
            trader: trader.to_string(),
            market_id: market.market_id.clone(),
            tier: LiquidationTier::Emergency,
        });

        // captured before the close, while margin and size are intact
        let bankruptcy = math::bankruptcy_price(
            position.side,
            position.entry_price,
            position.margin,
            position.size,
        );
        let counter_side = position.side.opposite();
        let full_size = position.size;

        self.close_position_portion(&market.market_id, trader, full_size, mark)?;
        let penalty = full_size * mark * config.penalty_rate;
        self.charge_penalty(market, trader, penalty, liquidator, &config);
        let cooldown_time = self.block_time();
        storage::set_liquidation_cooldown(
            self.store_mut(),
            &market.market_id,
            trader,
            cooldown_time,
        );

        // bad debt: the realized loss exceeded the margin
        let mut account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
        if account.balance < Decimal::ZERO {
            let mut deficit = -account.balance;
            if let Some(mut fund) =
                storage::get_insurance_fund(self.store(), &market.insurance_fund_id)
            {
                let covered = fund.balance.max(Decimal::ZERO).min(deficit);
                if covered > Decimal::ZERO {
                    fund.balance -= covered;
                    storage::set_insurance_fund(self.store_mut(), &fund);
                    account.balance += covered;
                    deficit -= covered;
                }
            }
            storage::set_account(self.store_mut(), &account);

            if deficit > Decimal::ZERO {
                if let Some(bankruptcy) = bankruptcy {
                    let covered =
                        self.auto_deleverage(market, counter_side, bankruptcy, mark, deficit);
                    if covered > Decimal::ZERO {
                        let mut account = storage::get_account(self.store(), trader)
                            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
                        account.balance += covered.min(deficit);
                        storage::set_account(self.store_mut(), &account);
                    }
                }
            }
        }

        self.emit(Event::LiquidationCompleted {
            trader: trader.to_string(),
            market_id: market.market_id.clone(),
            closed_size: full_size,
            penalty,
        });
        Ok(())
    }

    /// Debit the penalty and distribute it: the liquidator share to the
    /// caller when present, the rest (or all of it in the end-block sweep)
    /// to the insurance fund.
    fn charge_penalty(
        &mut self,
        market: &Market,
        trader: &str,
        penalty: Decimal,
        liquidator: Option<&str>,
        config: &LiquidationConfig,
    ) {
        if penalty <= Decimal::ZERO {
            return;
        }
        if let Some(mut account) = storage::get_account(self.store(), trader) {
            account.balance -= penalty;
            account.updated_at = self.block_time();
            storage::set_account(self.store_mut(), &account);
        }

        let mut fund_share = penalty;
        if let Some(liquidator) = liquidator {
            let liquidator_share = penalty * config.liquidator_share;
            fund_share = penalty - liquidator_share;
            let mut account = self.get_or_create_account(liquidator);
            account.balance += liquidator_share;
            account.updated_at = self.block_time();
            storage::set_account(self.store_mut(), &account);
        }
        if let Some(mut fund) =
            storage::get_insurance_fund(self.store(), &market.insurance_fund_id)
        {
            fund.balance += fund_share;
            storage::set_insurance_fund(self.store_mut(), &fund);
        }
    }

    /// Auto-deleveraging: rank counter-side positions by `uPnL * leverage`
    /// descending (ties by trader id) and reduce them at the bankruptcy
    /// price until the deficit is covered. Returns the value clawed back.
    fn auto_deleverage(
        &mut self,
        market: &Market,
        counter_side: Side,
        bankruptcy: Decimal,
        mark: Decimal,
        deficit: Decimal,
    ) -> Decimal {
        let per_unit = (mark - bankruptcy).abs();
        if per_unit <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut candidates: Vec<(Decimal, Position)> =
            storage::iter_market_positions(self.store(), &market.market_id)
                .into_iter()
                .filter(|p| p.side == counter_side)
                .map(|p| {
                    let unrealized =
                        math::unrealized_pnl(p.side, p.size, p.entry_price, mark);
                    (unrealized * p.leverage, p)
                })
                .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.trader.cmp(&b.1.trader)));

        let mut remaining = deficit;
        let mut covered_total = Decimal::ZERO;
        for (_, candidate) in candidates {
            if remaining <= Decimal::ZERO {
                break;
            }
            let needed = remaining / per_unit;
            let reduce = needed.min(candidate.size);
            if reduce <= Decimal::ZERO {
                continue;
            }
            if let Err(err) = self.close_position_portion(
                &market.market_id,
                &candidate.trader,
                reduce,
                bankruptcy,
            ) {
                warn!("adl: reducing {} failed: {}", candidate.trader, err);
                continue;
            }
            let covered = per_unit * reduce;
            remaining -= covered;
            covered_total += covered;
            self.emit(Event::AdlTriggered {
                market_id: market.market_id.clone(),
                trader: candidate.trader.clone(),
                covered,
            });
        }
        if remaining > Decimal::ZERO {
            warn!(
                "adl: {} uncovered bad debt remains in {}",
                remaining, market.market_id
            );
        }
        covered_total
    }
}
