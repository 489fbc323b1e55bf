//! # K-line Aggregation
//!
//! Every applied trade updates the open candle of all seven intervals; the
//! end-of-block rollup recomputes the open higher-interval candles from
//! their 1m constituents, which makes it idempotent by construction.

use rust_decimal::Decimal;

use meridian_common::{math, Kline, KlineInterval};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

impl<S: Store> Keeper<S> {
    /// Fold one trade into the open candle of every interval.
    pub(crate) fn update_kline(&mut self, market_id: &str, price: Decimal, volume: Decimal) {
        let now = self.block_time();
        for interval in KlineInterval::ALL {
            let bucket = math::bucket_start(now, interval.secs());
            let kline = match storage::get_kline(self.store(), market_id, interval, bucket) {
                Some(mut kline) => {
                    kline.high = kline.high.max(price);
                    kline.low = kline.low.min(price);
                    kline.close = price;
                    kline.volume += volume;
                    kline.turnover += price * volume;
                    kline.trade_count += 1;
                    kline
                }
                None => Kline {
                    market_id: market_id.to_string(),
                    interval,
                    bucket_start: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                    turnover: price * volume,
                    trade_count: 1,
                },
            };
            storage::set_kline(self.store_mut(), &kline);
        }
    }

    /// Recompute the open higher-interval candles of every market from
    /// their 1m constituents. Re-running on an unchanged trade log is a
    /// no-op.
    pub fn aggregate_klines(&mut self) {
        let now = self.block_time();
        let market_ids: Vec<String> = storage::iter_markets(self.store())
            .into_iter()
            .map(|m| m.market_id)
            .collect();

        for market_id in market_ids {
            for interval in KlineInterval::ALL.into_iter().skip(1) {
                let bucket = math::bucket_start(now, interval.secs());
                let minutes = storage::iter_klines(
                    self.store(),
                    &market_id,
                    KlineInterval::M1,
                    bucket,
                    bucket + interval.secs(),
                );
                let rebuilt = match rollup(&market_id, interval, bucket, &minutes) {
                    Some(rebuilt) => rebuilt,
                    None => continue,
                };
                storage::set_kline(self.store_mut(), &rebuilt);
            }
        }
    }
}

/// Combine 1m candles into one higher-interval candle. `None` when the
/// window has no constituents.
fn rollup(
    market_id: &str,
    interval: KlineInterval,
    bucket_start: i64,
    minutes: &[Kline],
) -> Option<Kline> {
    let first = minutes.first()?;
    let last = minutes.last()?;

    let mut high = first.high;
    let mut low = first.low;
    let mut volume = Decimal::ZERO;
    let mut turnover = Decimal::ZERO;
    let mut trade_count = 0u64;
    for minute in minutes {
        high = high.max(minute.high);
        low = low.min(minute.low);
        volume += minute.volume;
        turnover += minute.turnover;
        trade_count += minute.trade_count;
    }

    Some(Kline {
        market_id: market_id.to_string(),
        interval,
        bucket_start,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        turnover,
        trade_count,
    })
}
