//! # Trade Application
//!
//! `apply_trade` is the matching-engine callback, invoked once per trader
//! side of every fill. It owns the position lifecycle: open, add, reduce,
//! close and flip. The fill itself already happened, so fee collection is
//! best-effort and validation failures surface to the host as log-and-carry
//! errors rather than aborting the match.

use rust_decimal::Decimal;

use meridian_common::{math, Event, Market, MarketStatus, MeridianError, Side};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

impl<S: Store> Keeper<S> {
    /// Apply one side of a fill to the book of record.
    ///
    /// # Flow
    /// 1. Same-side (or no) position: open or add, locking initial margin
    /// 2. Opposite side, not larger: reduce at the mark price
    /// 3. Opposite side, larger: close fully, then open the remainder
    /// 4. Debit the fee (down to zero), update last price and K-lines
    pub fn apply_trade(
        &mut self,
        trader: &str,
        market_id: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Result<(), MeridianError> {
        let market = storage::get_market(self.store(), market_id)
            .ok_or_else(|| MeridianError::MarketNotFound(market_id.to_string()))?;
        match market.status {
            MarketStatus::Active => {}
            MarketStatus::Paused => {
                return Err(MeridianError::MarketPaused(market_id.to_string()))
            }
            _ => return Err(MeridianError::MarketNotActive(market_id.to_string())),
        }
        if size <= Decimal::ZERO {
            return Err(MeridianError::InvalidQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(MeridianError::InvalidPrice);
        }
        if fee < Decimal::ZERO {
            return Err(MeridianError::InvalidAmount);
        }

        let side = Side::from_is_buy(is_buy);
        self.get_or_create_account(trader);

        match storage::get_position(self.store(), market_id, trader) {
            None => self.open_or_add(&market, trader, side, size, price)?,
            Some(position) if position.side == side => {
                self.open_or_add(&market, trader, side, size, price)?
            }
            Some(position) => {
                if size <= position.size {
                    self.reduce_from_trade(&market, trader, size, price)?;
                } else {
                    let remainder = size - position.size;
                    self.reduce_from_trade(&market, trader, position.size, price)?;
                    self.open_or_add(&market, trader, side, remainder, price)?;
                }
            }
        }

        self.collect_trade_fee(&market, trader, fee);

        let now = self.block_time();
        let mut info = storage::get_price_info(self.store(), market_id)
            .unwrap_or_else(|| meridian_common::PriceInfo::zero(market_id, now));
        info.last_price = price;
        info.timestamp = now;
        storage::set_price_info(self.store_mut(), &info);

        self.update_kline(market_id, price, size);
        Ok(())
    }

    /// Create a position or add to a same-side one, averaging the entry
    /// price and locking the new initial margin.
    fn open_or_add(
        &mut self,
        market: &Market,
        trader: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> Result<(), MeridianError> {
        if size < market.min_order_size {
            return Err(MeridianError::OrderSizeTooSmall);
        }
        if size > market.max_order_size {
            return Err(MeridianError::OrderSizeTooLarge);
        }

        let existing = storage::get_position(self.store(), &market.market_id, trader);
        let old_size = existing.as_ref().map(|p| p.size).unwrap_or(Decimal::ZERO);
        if old_size + size > market.max_position_size {
            return Err(MeridianError::PositionSizeTooLarge);
        }

        self.check_margin_requirement(trader, &market.market_id, side, size, price)?;
        let required = math::initial_margin(size, price, market.initial_margin_rate);

        let now = self.block_time();
        let position = match existing {
            Some(mut position) => {
                // combined size is positive, averaging cannot fail
                let entry = math::average_entry_price(
                    position.size,
                    position.entry_price,
                    size,
                    price,
                )
                .ok_or(MeridianError::DivisionByZero)?;
                position.size += size;
                position.entry_price = entry;
                position.margin += required;
                position.leverage = position.notional(entry) / position.margin;
                position.liquidation_price =
                    math::liquidation_price(side, entry, market.maintenance_margin_rate);
                position.updated_at = now;
                position
            }
            None => {
                let notional = size * price;
                meridian_common::Position {
                    market_id: market.market_id.clone(),
                    trader: trader.to_string(),
                    side,
                    size,
                    entry_price: price,
                    margin: required,
                    leverage: notional / required,
                    liquidation_price: math::liquidation_price(
                        side,
                        price,
                        market.maintenance_margin_rate,
                    ),
                    opened_at: now,
                    updated_at: now,
                }
            }
        };
        storage::set_position(self.store_mut(), &position);

        let mut account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
        account.locked_margin += required;
        account.updated_at = now;
        storage::set_account(self.store_mut(), &account);

        self.emit(Event::OpenPosition {
            trader: trader.to_string(),
            market_id: market.market_id.clone(),
            side,
            size,
            price,
            margin: required,
        });
        Ok(())
    }

    /// Close `reduce_size` against an opposite-side fill, realizing PnL at
    /// the current mark price. The trade price stands in while a market has
    /// no mark yet.
    fn reduce_from_trade(
        &mut self,
        market: &Market,
        trader: &str,
        reduce_size: Decimal,
        trade_price: Decimal,
    ) -> Result<(), MeridianError> {
        let mark = storage::get_price_info(self.store(), &market.market_id)
            .map(|info| info.mark_price)
            .unwrap_or(Decimal::ZERO);
        let close_price = if mark > Decimal::ZERO { mark } else { trade_price };

        let closed =
            self.close_position_portion(&market.market_id, trader, reduce_size, close_price)?;

        let event = if closed.closed_all {
            Event::ClosePosition {
                trader: trader.to_string(),
                market_id: market.market_id.clone(),
                size: reduce_size,
                price: close_price,
                realized_pnl: closed.realized_pnl,
            }
        } else {
            Event::ReducePosition {
                trader: trader.to_string(),
                market_id: market.market_id.clone(),
                size: reduce_size,
                price: close_price,
                realized_pnl: closed.realized_pnl,
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Debit the trade fee from the balance, down to zero. The trade is
    /// already matched, so an underfunded fee is collected partially and
    /// reported instead of failing the call. Collected fees accrue to the
    /// market's insurance fund.
    fn collect_trade_fee(&mut self, market: &Market, trader: &str, fee: Decimal) {
        if fee <= Decimal::ZERO {
            return;
        }
        let mut account = match storage::get_account(self.store(), trader) {
            Some(account) => account,
            None => return,
        };

        let paid = if account.balance >= fee {
            fee
        } else {
            account.balance.max(Decimal::ZERO)
        };
        account.balance -= paid;
        account.updated_at = self.block_time();
        storage::set_account(self.store_mut(), &account);

        if paid < fee {
            self.emit(Event::PartialFeeCollected {
                trader: trader.to_string(),
                market_id: market.market_id.clone(),
                fee_due: fee,
                fee_paid: paid,
            });
        }
        if paid > Decimal::ZERO {
            if let Some(mut fund) =
                storage::get_insurance_fund(self.store(), &market.insurance_fund_id)
            {
                fund.balance += paid;
                storage::set_insurance_fund(self.store_mut(), &fund);
            }
        }
    }
}
