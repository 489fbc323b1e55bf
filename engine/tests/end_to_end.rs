//! End-to-end scenarios driven through the public keeper surface, the way
//! the block host would: begin_block, messages, end_block, drained events.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use engine::{storage, Keeper, MemStore};
use meridian_common::{
    math, Event, MarginMode, MarketStatus, MeridianError, Position, PriceInfo, Side,
};

// one hour into a UTC day so funding boundaries are in the near future
const GENESIS: i64 = 1_700_000_000 - (1_700_000_000 % 86_400) + 3_600;

fn new_chain() -> Keeper<MemStore> {
    let mut keeper = Keeper::new(MemStore::new());
    keeper.begin_block(GENESIS, 1);
    keeper.init_genesis().unwrap();
    keeper.take_events();
    keeper
}

/// Establish a mark price the way the oracle pipeline would: two sources
/// submit, then the protected update runs.
fn establish_mark(keeper: &mut Keeper<MemStore>, market_id: &str, price: Decimal) {
    keeper
        .submit_source_price("binance", market_id, price)
        .unwrap();
    keeper
        .submit_source_price("coinbase", market_id, price)
        .unwrap();
    keeper.update_price_with_protection(market_id).unwrap();
}

#[test]
fn scenario_open_and_close_long_profitable() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(1000)).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.1), dec!(50000), dec!(0.25))
        .unwrap();

    keeper.begin_block(GENESIS + 5, 2);
    establish_mark(&mut keeper, "BTC-USDC", dec!(52000));

    keeper
        .apply_trade("alice", "BTC-USDC", false, dec!(0.1), dec!(52000), dec!(0))
        .unwrap();

    // realized +200 on top of 1000 - 0.25 open fee
    let account = storage::get_account(keeper.store(), "alice").unwrap();
    assert_eq!(account.balance, dec!(1199.75));
    assert_eq!(account.locked_margin, dec!(0.000));
    assert!(storage::get_position(keeper.store(), "BTC-USDC", "alice").is_none());
}

#[test]
fn scenario_cross_margin_account_is_flagged_and_liquidated() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(500)).unwrap();
    keeper.set_margin_mode("alice", MarginMode::Cross).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.1), dec!(50000), dec!(0))
        .unwrap();
    keeper.take_events();

    // mark drops to 48_500: account ratio (250 - 150)/4850 = 2.06% < 2.5%
    keeper.begin_block(GENESIS + 5, 2);
    keeper
        .submit_source_price("binance", "BTC-USDC", dec!(48500))
        .unwrap();
    keeper
        .submit_source_price("coinbase", "BTC-USDC", dec!(48500))
        .unwrap();
    keeper.end_block();

    let events = keeper.take_events();
    assert!(events.iter().any(|e| e.name() == "liquidation_started"));
    assert!(events.iter().any(|e| e.name() == "liquidation_completed"));

    // the single position is the largest-notional one; it was closed at mark
    let position = storage::get_position(keeper.store(), "BTC-USDC", "alice").unwrap();
    assert!(position.size < dec!(0.1));

    let account = storage::get_account(keeper.store(), "alice").unwrap();
    assert_eq!(account.cross_margin_pnl, dec!(-150.0));
}

#[test]
fn scenario_funding_direction_and_exact_offset() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(100000)).unwrap();
    keeper.deposit("bob", dec!(100000)).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(1), dec!(50500), dec!(0))
        .unwrap();
    keeper
        .apply_trade("bob", "BTC-USDC", false, dec!(1), dec!(50500), dec!(0))
        .unwrap();

    // mark 50_500 vs index 50_000, balanced open interest
    let mut info = PriceInfo::zero("BTC-USDC", GENESIS);
    info.mark_price = dec!(50500);
    info.index_price = dec!(50000);
    storage::set_price_info(keeper.store_mut(), &info);

    let rate = keeper
        .compute_funding_rate("BTC-USDC", dec!(50500), dec!(50000))
        .unwrap();
    assert_eq!(rate, dec!(0.0005));

    let next = storage::get_next_funding_time(keeper.store(), "BTC-USDC").unwrap();
    keeper.begin_block(next, 2); // exactly at the boundary triggers
    keeper.settle_funding("BTC-USDC").unwrap();

    // payment = 1 * 50500 * 0.0005 = 25.25; the long pays, the short receives
    let alice = storage::get_account(keeper.store(), "alice").unwrap();
    let bob = storage::get_account(keeper.store(), "bob").unwrap();
    assert_eq!(alice.balance, dec!(100000) - dec!(25.25));
    assert_eq!(bob.balance, dec!(100000) + dec!(25.25));

    let net: Decimal = storage::iter_funding_payments(keeper.store())
        .iter()
        .map(|p| p.amount)
        .sum();
    assert_eq!(net, Decimal::ZERO);
}

#[test]
fn scenario_oracle_circuit_breaker() {
    let mut keeper = new_chain();
    establish_mark(&mut keeper, "BTC-USDC", dec!(50000));

    // 56_000 deviates 12% from the 50_000 mark
    assert_eq!(
        keeper
            .submit_source_price("okx", "BTC-USDC", dec!(56000))
            .unwrap_err(),
        MeridianError::CircuitBreakerTripped
    );

    // the next aggregate is built without the rejected submission
    keeper.begin_block(GENESIS + 5, 2);
    let aggregate = keeper.query_aggregate_price("BTC-USDC").unwrap();
    assert_eq!(aggregate, dec!(50000));
}

#[test]
fn scenario_oi_adjusted_funding_rate() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(1)).unwrap();
    keeper.deposit("bob", dec!(1)).unwrap();
    // craft an imbalanced book: 100 long vs 50 short
    for (trader, side, size) in [
        ("alice", Side::Long, dec!(100)),
        ("bob", Side::Short, dec!(50)),
    ] {
        storage::set_position(
            keeper.store_mut(),
            &Position {
                market_id: "BTC-USDC".to_string(),
                trader: trader.to_string(),
                side,
                size,
                entry_price: dec!(50000),
                margin: size * dec!(50000) * dec!(0.05),
                leverage: dec!(20),
                liquidation_price: math::liquidation_price(side, dec!(50000), dec!(0.025)),
                opened_at: GENESIS,
                updated_at: GENESIS,
            },
        );
    }

    // zero premium; 0.05 * (1/3) imbalance pins at the +0.5% cap, longs pay
    let rate = keeper
        .compute_funding_rate("BTC-USDC", dec!(50000), dec!(50000))
        .unwrap();
    assert!(rate > Decimal::ZERO);
    assert_eq!(rate, dec!(0.005));
}

#[test]
fn scenario_margin_mode_change_blocked_by_open_position() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(1000)).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.1), dec!(50000), dec!(0))
        .unwrap();

    assert_eq!(
        keeper.set_margin_mode("alice", MarginMode::Cross).unwrap_err(),
        MeridianError::CannotChangeMarginModeWithPositions
    );
    let account = storage::get_account(keeper.store(), "alice").unwrap();
    assert_eq!(account.margin_mode, MarginMode::Isolated);
}

#[test]
fn locked_margin_mirrors_position_margins_after_mixed_flow() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(100000)).unwrap();
    keeper.deposit("bob", dec!(100000)).unwrap();

    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.2), dec!(50000), dec!(1))
        .unwrap();
    keeper
        .apply_trade("bob", "BTC-USDC", false, dec!(0.2), dec!(50000), dec!(1))
        .unwrap();
    keeper
        .apply_trade("alice", "ETH-USDC", true, dec!(2), dec!(3000), dec!(0.5))
        .unwrap();
    establish_mark(&mut keeper, "BTC-USDC", dec!(50000));
    keeper
        .apply_trade("alice", "BTC-USDC", false, dec!(0.05), dec!(50100), dec!(0.2))
        .unwrap();

    for trader in ["alice", "bob"] {
        let account = storage::get_account(keeper.store(), trader).unwrap();
        let total_margin: Decimal = storage::iter_all_positions(keeper.store())
            .iter()
            .filter(|p| p.trader == trader)
            .map(|p| p.margin)
            .sum();
        assert_eq!(account.locked_margin, total_margin);
        assert!(account.locked_margin >= Decimal::ZERO);
    }

    // position invariants hold for everything still open
    for position in storage::iter_all_positions(keeper.store()) {
        assert!(position.size > Decimal::ZERO);
        assert!(position.entry_price > Decimal::ZERO);
        assert!(position.margin > Decimal::ZERO);
        let market = storage::get_market(keeper.store(), &position.market_id).unwrap();
        assert_eq!(
            position.liquidation_price,
            math::liquidation_price(
                position.side,
                position.entry_price,
                market.maintenance_margin_rate
            )
        );
    }
}

#[test]
fn mark_price_follows_the_ema_recurrence_exactly() {
    let mut keeper = new_chain();
    establish_mark(&mut keeper, "BTC-USDC", dec!(50000));

    let alpha = dec!(0.1);
    let mut expected = dec!(50000);
    for (offset, index) in [(10, dec!(50200)), (20, dec!(50400)), (30, dec!(50100))] {
        keeper.begin_block(GENESIS + offset, 2);
        establish_mark(&mut keeper, "BTC-USDC", index);
        expected = alpha * index + (Decimal::ONE - alpha) * expected;

        let info = storage::get_price_info(keeper.store(), "BTC-USDC").unwrap();
        assert_eq!(info.mark_price, expected);
        assert_eq!(info.index_price, index);
    }
}

#[test]
fn funding_walk_order_is_trader_lexicographic() {
    let mut keeper = new_chain();
    for trader in ["mallory", "alice", "zed", "bob"] {
        keeper.deposit(trader, dec!(100000)).unwrap();
    }
    // two balanced pairs so the book nets flat
    keeper
        .apply_trade("mallory", "BTC-USDC", true, dec!(1), dec!(50500), dec!(0))
        .unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", false, dec!(1), dec!(50500), dec!(0))
        .unwrap();
    keeper
        .apply_trade("zed", "BTC-USDC", true, dec!(1), dec!(50500), dec!(0))
        .unwrap();
    keeper
        .apply_trade("bob", "BTC-USDC", false, dec!(1), dec!(50500), dec!(0))
        .unwrap();

    let mut info = PriceInfo::zero("BTC-USDC", GENESIS);
    info.mark_price = dec!(50500);
    info.index_price = dec!(50000);
    storage::set_price_info(keeper.store_mut(), &info);

    let next = storage::get_next_funding_time(keeper.store(), "BTC-USDC").unwrap();
    keeper.begin_block(next, 2);
    keeper.settle_funding("BTC-USDC").unwrap();

    let order: Vec<String> = storage::iter_funding_payments(keeper.store())
        .into_iter()
        .map(|p| p.trader)
        .collect();
    assert_eq!(order, vec!["alice", "bob", "mallory", "zed"]);
}

#[test]
fn trade_at_the_liquidation_price_reduces_without_liquidating() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(100000)).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.1), dec!(50000), dec!(0))
        .unwrap();
    let liq_price = storage::get_position(keeper.store(), "BTC-USDC", "alice")
        .unwrap()
        .liquidation_price;

    // mark sits exactly on the liquidation price
    let mut info = storage::get_price_info(keeper.store(), "BTC-USDC").unwrap();
    info.mark_price = liq_price;
    info.index_price = liq_price;
    storage::set_price_info(keeper.store_mut(), &info);
    keeper.take_events();

    keeper
        .apply_trade("alice", "BTC-USDC", false, dec!(0.05), liq_price, dec!(0))
        .unwrap();

    let events = keeper.take_events();
    assert!(events.iter().any(|e| e.name() == "reduce_position"));
    assert!(!events.iter().any(|e| e.name().starts_with("liquidation")));
    let position = storage::get_position(keeper.store(), "BTC-USDC", "alice").unwrap();
    assert_eq!(position.size, dec!(0.05));
}

#[test]
fn open_then_close_at_the_same_mark_is_neutral_modulo_fees() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(1000)).unwrap();
    establish_mark(&mut keeper, "BTC-USDC", dec!(50000));

    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.1), dec!(50000), dec!(2.5))
        .unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", false, dec!(0.1), dec!(50000), dec!(2.5))
        .unwrap();

    let account = storage::get_account(keeper.store(), "alice").unwrap();
    assert_eq!(account.balance, dec!(995.0));
    assert_eq!(account.locked_margin, dec!(0.000));
}

#[test]
fn full_pipeline_block_produces_prices_candles_and_settlement() {
    let mut keeper = new_chain();
    keeper.deposit("alice", dec!(100000)).unwrap();
    keeper.deposit("bob", dec!(100000)).unwrap();

    // block 1: oracle submissions and trades, then the pipeline
    keeper
        .submit_source_price("binance", "BTC-USDC", dec!(50000))
        .unwrap();
    keeper
        .submit_source_price("coinbase", "BTC-USDC", dec!(50050))
        .unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(1), dec!(50000), dec!(25))
        .unwrap();
    keeper
        .apply_trade("bob", "BTC-USDC", false, dec!(1), dec!(50000), dec!(25))
        .unwrap();
    keeper.end_block();

    let info = storage::get_price_info(keeper.store(), "BTC-USDC").unwrap();
    assert!(info.mark_price > Decimal::ZERO);
    assert_eq!(info.last_price, dec!(50000));

    let candle = keeper
        .query_latest_kline("BTC-USDC", meridian_common::KlineInterval::M1)
        .unwrap();
    assert_eq!(candle.volume, dec!(2)); // both fill sides counted
    assert_eq!(candle.trade_count, 2);

    // block 2: jump past the funding boundary, the tick settles
    let next = storage::get_next_funding_time(keeper.store(), "BTC-USDC").unwrap();
    keeper.begin_block(next, 2);
    keeper
        .submit_source_price("binance", "BTC-USDC", dec!(50000))
        .unwrap();
    keeper
        .submit_source_price("coinbase", "BTC-USDC", dec!(50050))
        .unwrap();
    keeper.end_block();

    assert!(storage::latest_funding_rate(keeper.store(), "BTC-USDC").is_some());
    let events = keeper.take_events();
    assert!(events.iter().any(|e| e.name() == "funding_settled"));
    if let Some(Event::FundingSettled {
        positions_affected, ..
    }) = events.iter().find(|e| e.name() == "funding_settled")
    {
        assert_eq!(*positions_affected, 2);
    }

    // a market whose status is Settling never sticks around
    let market = storage::get_market(keeper.store(), "BTC-USDC").unwrap();
    assert_eq!(market.status, MarketStatus::Active);
}

#[test]
fn aggregating_twice_and_rolling_up_twice_are_idempotent() {
    let mut keeper = new_chain();
    keeper
        .submit_source_price("binance", "BTC-USDC", dec!(50000))
        .unwrap();
    keeper
        .submit_source_price("okx", "BTC-USDC", dec!(50100))
        .unwrap();
    assert_eq!(
        keeper.query_aggregate_price("BTC-USDC").unwrap(),
        keeper.query_aggregate_price("BTC-USDC").unwrap()
    );

    keeper.deposit("alice", dec!(100000)).unwrap();
    keeper
        .apply_trade("alice", "BTC-USDC", true, dec!(0.5), dec!(50000), dec!(0))
        .unwrap();
    keeper.aggregate_klines();
    let first = keeper.query_latest_kline("BTC-USDC", meridian_common::KlineInterval::H1);
    keeper.aggregate_klines();
    let second = keeper.query_latest_kline("BTC-USDC", meridian_common::KlineInterval::H1);
    assert_eq!(first, second);
}
