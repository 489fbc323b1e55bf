//! # Margin Engine
//!
//! Pre-trade margin checks and account health computations. Isolated
//! positions are evaluated on their own margin; cross accounts aggregate
//! margin and unrealized PnL across every open position.

use rust_decimal::Decimal;

use meridian_common::{math, MarginMode, MarketStatus, MeridianError, Side};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

/// Aggregate health of a cross-margin account.
#[derive(Clone, Copy, Debug)]
pub struct CrossAccountHealth {
    /// Sum of position margins plus unrealized PnL
    pub equity: Decimal,
    /// Sum of position notionals at the mark price
    pub total_notional: Decimal,
    /// Sum of unrealized PnL alone
    pub total_unrealized: Decimal,
    /// `equity / total_notional`, `None` when the account is flat
    pub margin_ratio: Option<Decimal>,
}

impl<S: Store> Keeper<S> {
    /// Matching-engine pre-check: verify the trader can fund the initial
    /// margin of a prospective order before it is accepted into the book.
    pub fn check_margin_requirement(
        &self,
        trader: &str,
        market_id: &str,
        _side: Side,
        qty: Decimal,
        price: Decimal,
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
        if qty <= Decimal::ZERO {
            return Err(MeridianError::InvalidQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(MeridianError::InvalidPrice);
        }

        let required = math::initial_margin(qty, price, market.initial_margin_rate);
        let account = match storage::get_account(self.store(), trader) {
            Some(account) => account,
            None => return Err(MeridianError::InsufficientBalance),
        };

        match account.margin_mode {
            MarginMode::Isolated => {
                // raw free balance only
                if account.available_balance() < required {
                    return Err(MeridianError::InsufficientBalance);
                }
            }
            MarginMode::Cross => {
                let health = self.cross_account_health(trader);
                let available =
                    account.balance - account.locked_margin + health.total_unrealized;
                if available < required {
                    return Err(MeridianError::InsufficientMargin);
                }
            }
        }
        Ok(())
    }

    /// Aggregate margin, notional and unrealized PnL across a trader's
    /// positions. Markets without a mark price yet contribute their entry
    /// notional and zero PnL.
    pub(crate) fn cross_account_health(&self, trader: &str) -> CrossAccountHealth {
        let mut equity = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        let mut total_unrealized = Decimal::ZERO;

        for position in storage::iter_trader_positions(self.store(), trader) {
            let mark = storage::get_price_info(self.store(), &position.market_id)
                .map(|info| info.mark_price)
                .unwrap_or(Decimal::ZERO);
            let (unrealized, notional) = if mark > Decimal::ZERO {
                (
                    math::unrealized_pnl(position.side, position.size, position.entry_price, mark),
                    position.notional(mark),
                )
            } else {
                (Decimal::ZERO, position.notional(position.entry_price))
            };
            equity += position.margin + unrealized;
            total_unrealized += unrealized;
            total_notional += notional;
        }

        let margin_ratio = if total_notional > Decimal::ZERO {
            Some(equity / total_notional)
        } else {
            None
        };
        CrossAccountHealth {
            equity,
            total_notional,
            total_unrealized,
            margin_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use meridian_common::{Account, Position, PriceInfo};
    use rust_decimal_macros::dec;

    fn keeper_with_market() -> Keeper<MemStore> {
        let mut keeper = Keeper::new(MemStore::new());
        keeper.begin_block(1_700_000_000, 1);
        keeper.init_default_markets().unwrap();
        keeper
    }

    fn fund(keeper: &mut Keeper<MemStore>, trader: &str, balance: Decimal, mode: MarginMode) {
        let mut account = Account::new(trader, 0);
        account.balance = balance;
        account.margin_mode = mode;
        storage::set_account(keeper.store_mut(), &account);
    }

    fn mark(keeper: &mut Keeper<MemStore>, market_id: &str, price: Decimal) {
        let mut info = PriceInfo::zero(market_id, 0);
        info.mark_price = price;
        info.index_price = price;
        storage::set_price_info(keeper.store_mut(), &info);
    }

    #[test]
    fn isolated_check_uses_free_balance() {
        let mut keeper = keeper_with_market();
        fund(&mut keeper, "alice", dec!(260), MarginMode::Isolated);

        // 0.1 BTC at 50_000 requires 250 initial margin
        keeper
            .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(0.1), dec!(50000))
            .unwrap();

        let err = keeper
            .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(0.2), dec!(50000))
            .unwrap_err();
        assert_eq!(err, MeridianError::InsufficientBalance);
    }

    #[test]
    fn cross_check_counts_unrealized_pnl() {
        let mut keeper = keeper_with_market();
        fund(&mut keeper, "alice", dec!(300), MarginMode::Cross);
        mark(&mut keeper, "ETH-USDC", dec!(3500));

        // a winning ETH position adds headroom
        storage::set_position(
            keeper.store_mut(),
            &Position {
                market_id: "ETH-USDC".to_string(),
                trader: "alice".to_string(),
                side: Side::Long,
                size: dec!(1),
                entry_price: dec!(3000),
                margin: dec!(150),
                leverage: dec!(20),
                liquidation_price: dec!(2925),
                opened_at: 0,
                updated_at: 0,
            },
        );
        let mut account = storage::get_account(keeper.store(), "alice").unwrap();
        account.locked_margin = dec!(150);
        storage::set_account(keeper.store_mut(), &account);

        // free balance 150 < 250 required, but +500 uPnL covers it
        keeper
            .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(0.1), dec!(50000))
            .unwrap();

        // push the position under water and the check fails
        mark(&mut keeper, "ETH-USDC", dec!(2900));
        let err = keeper
            .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(0.1), dec!(50000))
            .unwrap_err();
        assert_eq!(err, MeridianError::InsufficientMargin);
    }

    #[test]
    fn cross_health_matches_hand_calc() {
        let mut keeper = keeper_with_market();
        fund(&mut keeper, "alice", dec!(500), MarginMode::Cross);
        mark(&mut keeper, "BTC-USDC", dec!(48500));

        storage::set_position(
            keeper.store_mut(),
            &Position {
                market_id: "BTC-USDC".to_string(),
                trader: "alice".to_string(),
                side: Side::Long,
                size: dec!(0.1),
                entry_price: dec!(50000),
                margin: dec!(250),
                leverage: dec!(20),
                liquidation_price: dec!(48750),
                opened_at: 0,
                updated_at: 0,
            },
        );

        let health = keeper.cross_account_health("alice");
        assert_eq!(health.equity, dec!(100.0));
        assert_eq!(health.total_notional, dec!(4850.0));
        assert_eq!(health.total_unrealized, dec!(-150.0));
        // (250 - 150) / 4850 = 2.06%, below the 2.5% floor
        let ratio = health.margin_ratio.unwrap();
        assert!(ratio < dec!(0.025));
        assert_eq!(ratio.round_dp(6), dec!(0.020619));
    }

    #[test]
    fn paused_market_rejects_orders() {
        let mut keeper = keeper_with_market();
        fund(&mut keeper, "alice", dec!(10000), MarginMode::Isolated);
        keeper
            .set_market_status("BTC-USDC", MarketStatus::Paused)
            .unwrap();

        let err = keeper
            .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(0.1), dec!(50000))
            .unwrap_err();
        assert_eq!(err, MeridianError::MarketPaused("BTC-USDC".to_string()));
    }

    #[test]
    fn unknown_market_and_account() {
        let keeper = {
            let mut k = Keeper::new(MemStore::new());
            k.begin_block(0, 1);
            k.init_default_markets().unwrap();
            k
        };
        assert_eq!(
            keeper
                .check_margin_requirement("alice", "DOGE-USDC", Side::Long, dec!(1), dec!(1))
                .unwrap_err(),
            MeridianError::MarketNotFound("DOGE-USDC".to_string())
        );
        assert_eq!(
            keeper
                .check_margin_requirement("alice", "BTC-USDC", Side::Long, dec!(1), dec!(1))
                .unwrap_err(),
            MeridianError::InsufficientBalance
        );
    }
}
