//! Block-by-block simulation of the Meridian core: a deterministic price
//! path, two traders on opposite sides, funding boundaries and the full
//! end-of-block pipeline. Useful for eyeballing the engine without a host.

use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use engine::{Keeper, MemStore};
use meridian_common::KlineInterval;

const BLOCK_SECS: i64 = 5;

fn utc(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Deterministic sawtooth around 50_000 so runs are reproducible.
fn index_price(height: u64) -> Decimal {
    let step = (height % 40) as i64;
    let offset = if step < 20 { step } else { 40 - step };
    dec!(50000) + Decimal::from(offset * 25)
}

fn main() {
    env_logger::init();

    let mut keeper = Keeper::new(MemStore::new());
    let genesis: i64 = 1_700_000_000 - (1_700_000_000 % 86_400);
    keeper.begin_block(genesis, 1);
    keeper.init_genesis().expect("genesis");

    keeper.deposit("alice", dec!(100000)).expect("deposit");
    keeper.deposit("bob", dec!(100000)).expect("deposit");
    info!("genesis at {} with default markets", utc(genesis));

    let mut height = 1u64;
    // a bit more than an hour of five-second blocks crosses one funding
    // boundary
    for _ in 0..800 {
        height += 1;
        let now = genesis + (height as i64) * BLOCK_SECS;
        keeper.begin_block(now, height);

        let price = index_price(height);
        for source in ["binance", "coinbase", "okx"] {
            if let Err(err) = keeper.submit_source_price(source, "BTC-USDC", price) {
                info!("submission rejected: {err}");
            }
        }

        // alternate sides so the book stays balanced
        let result = if height % 2 == 0 {
            keeper
                .apply_trade("alice", "BTC-USDC", true, dec!(0.01), price, dec!(0.25))
                .and_then(|_| {
                    keeper.apply_trade("bob", "BTC-USDC", false, dec!(0.01), price, dec!(0.25))
                })
        } else {
            keeper
                .apply_trade("alice", "BTC-USDC", false, dec!(0.01), price, dec!(0.25))
                .and_then(|_| {
                    keeper.apply_trade("bob", "BTC-USDC", true, dec!(0.01), price, dec!(0.25))
                })
        };
        if let Err(err) = result {
            info!("trade skipped at height {height}: {err}");
        }

        keeper.end_block();
        for event in keeper.take_events() {
            if event.name() == "funding_settled" {
                info!("{}: {:?}", utc(now), event);
            }
        }
    }

    let info_btc = keeper.query_price("BTC-USDC").expect("price info");
    println!("== BTC-USDC after {height} blocks ==");
    println!("mark  {}", info_btc.mark_price);
    println!("index {}", info_btc.index_price);
    println!("last  {}", info_btc.last_price);

    if let Some(candle) = keeper.query_latest_kline("BTC-USDC", KlineInterval::H1) {
        println!(
            "1h candle o={} h={} l={} c={} vol={} trades={}",
            candle.open, candle.high, candle.low, candle.close, candle.volume, candle.trade_count
        );
    }
    if let Some(rate) = keeper.query_funding_rate("BTC-USDC") {
        println!("last funding rate {} at {}", rate.rate, utc(rate.timestamp));
    }
    for trader in ["alice", "bob"] {
        let summary = keeper.query_account(trader).expect("account");
        println!(
            "{trader}: balance={} locked={} available={}",
            summary.balance, summary.locked_margin, summary.available_balance
        );
    }
}
