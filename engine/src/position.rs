//! # Position Helpers
//!
//! Shared position-record arithmetic used by trading, funding and
//! liquidation: proportional closes, open-interest totals and ownership
//! checks. Event emission stays with the callers, which know whether a
//! close is a trade, a liquidation or an ADL reduction.

use rust_decimal::Decimal;

use meridian_common::{math, MeridianError};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

/// Result of closing a fraction of a position.
#[derive(Clone, Copy, Debug)]
pub struct ClosedPortion {
    /// PnL realized at the close price, already credited to the balance
    pub realized_pnl: Decimal,
    /// Margin released back to the free balance
    pub released_margin: Decimal,
    /// True when the close removed the position record
    pub closed_all: bool,
}

impl<S: Store> Keeper<S> {
    pub fn has_open_positions(&self, trader: &str) -> bool {
        !storage::iter_trader_positions(self.store(), trader).is_empty()
    }

    /// Long and short open interest plus the open-position count of a
    /// market, in one deterministic walk.
    pub(crate) fn open_interest(&self, market_id: &str) -> (Decimal, Decimal, u64) {
        let mut long_oi = Decimal::ZERO;
        let mut short_oi = Decimal::ZERO;
        let mut count = 0u64;
        for position in storage::iter_market_positions(self.store(), market_id) {
            match position.side {
                meridian_common::Side::Long => long_oi += position.size,
                meridian_common::Side::Short => short_oi += position.size,
            }
            count += 1;
        }
        (long_oi, short_oi, count)
    }

    /// Close `close_size` of a position at `close_price`: realize PnL into
    /// the balance, release margin proportionally and delete the record at
    /// zero size.
    pub(crate) fn close_position_portion(
        &mut self,
        market_id: &str,
        trader: &str,
        close_size: Decimal,
        close_price: Decimal,
    ) -> Result<ClosedPortion, MeridianError> {
        if close_size <= Decimal::ZERO {
            return Err(MeridianError::InvalidQuantity);
        }
        let mut position = storage::get_position(self.store(), market_id, trader).ok_or_else(
            || MeridianError::PositionNotFound {
                trader: trader.to_string(),
                market_id: market_id.to_string(),
            },
        )?;
        if close_size > position.size {
            return Err(MeridianError::CannotReducePosition);
        }

        let realized_pnl =
            math::unrealized_pnl(position.side, close_size, position.entry_price, close_price);
        // position.size > 0 is a store invariant
        let released_margin = position.margin * close_size / position.size;

        let now = self.block_time();
        let mut account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;
        account.balance += realized_pnl;
        account.locked_margin -= released_margin;
        account.updated_at = now;
        storage::set_account(self.store_mut(), &account);

        let closed_all = close_size == position.size;
        if closed_all {
            storage::delete_position(self.store_mut(), market_id, trader);
        } else {
            position.size -= close_size;
            position.margin -= released_margin;
            position.updated_at = now;
            storage::set_position(self.store_mut(), &position);
        }

        Ok(ClosedPortion {
            realized_pnl,
            released_margin,
            closed_all,
        })
    }
}
