//! # Financial Math
//!
//! Pure calculations shared by the engine: margin, PnL, funding, oracle
//! weighting, EMA smoothing and K-line bucketing. All functions are total
//! over their documented domain; any division whose denominator could be
//! non-positive returns `Option` so the caller decides how to surface it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Side;

/// Floor of the oracle time-decay factor. A source at the staleness limit
/// still contributes a tenth of its weight.
pub const MIN_DECAY_FACTOR: Decimal = dec!(0.1);

/// Initial margin required to open `size` at `price`.
///
/// # Formula
/// `margin = size * price * initial_rate`
pub fn initial_margin(size: Decimal, price: Decimal, initial_rate: Decimal) -> Decimal {
    size * price * initial_rate
}

/// Maintenance margin of a position at the mark price.
///
/// # Formula
/// `margin = size * mark_price * maintenance_rate`
pub fn maintenance_margin(size: Decimal, mark_price: Decimal, maintenance_rate: Decimal) -> Decimal {
    size * mark_price * maintenance_rate
}

/// Liquidation price derived from the entry price.
///
/// # Formula
/// For Long:  `entry * (1 - maintenance_rate)`
/// For Short: `entry * (1 + maintenance_rate)`
pub fn liquidation_price(side: Side, entry_price: Decimal, maintenance_rate: Decimal) -> Decimal {
    match side {
        Side::Long => entry_price * (Decimal::ONE - maintenance_rate),
        Side::Short => entry_price * (Decimal::ONE + maintenance_rate),
    }
}

/// Unrealized PnL of `size` held from `entry_price`, valued at `mark_price`.
///
/// # Formula
/// For Long:  `size * (mark - entry)`
/// For Short: `size * (entry - mark)`
pub fn unrealized_pnl(side: Side, size: Decimal, entry_price: Decimal, mark_price: Decimal) -> Decimal {
    match side {
        Side::Long => size * (mark_price - entry_price),
        Side::Short => size * (entry_price - mark_price),
    }
}

/// Margin ratio of a position. `None` when the notional is non-positive.
///
/// # Formula
/// `(margin + unrealized_pnl) / (size * mark_price)`
pub fn position_margin_ratio(
    margin: Decimal,
    unrealized: Decimal,
    size: Decimal,
    mark_price: Decimal,
) -> Option<Decimal> {
    let notional = size * mark_price;
    if notional <= Decimal::ZERO {
        return None;
    }
    Some((margin + unrealized) / notional)
}

/// Volume-weighted average entry price after adding to a position.
/// `None` when the combined size is non-positive.
pub fn average_entry_price(
    old_size: Decimal,
    old_entry: Decimal,
    add_size: Decimal,
    add_price: Decimal,
) -> Option<Decimal> {
    let total = old_size + add_size;
    if total <= Decimal::ZERO {
        return None;
    }
    Some((old_size * old_entry + add_size * add_price) / total)
}

/// Price at which a position's margin is exactly exhausted. Used to value
/// auto-deleveraged reductions. `None` when size is non-positive.
pub fn bankruptcy_price(
    side: Side,
    entry_price: Decimal,
    margin: Decimal,
    size: Decimal,
) -> Option<Decimal> {
    if size <= Decimal::ZERO {
        return None;
    }
    let per_unit = margin / size;
    Some(match side {
        Side::Long => entry_price - per_unit,
        Side::Short => entry_price + per_unit,
    })
}

/// Clamp `value` into `[min, max]`.
pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

/// Premium component of the funding rate. `None` when the index price is
/// non-positive.
///
/// # Formula
/// `clamp(damping * (mark - index) / index, -max_rate, max_rate)`
pub fn funding_base_rate(
    mark_price: Decimal,
    index_price: Decimal,
    damping: Decimal,
    max_rate: Decimal,
) -> Option<Decimal> {
    if index_price <= Decimal::ZERO {
        return None;
    }
    let premium = (mark_price - index_price) / index_price;
    Some(clamp(damping * premium, -max_rate, max_rate))
}

/// Open-interest imbalance in `[-1, 1]`. Zero when there is no open
/// interest at all.
///
/// # Formula
/// `(long_oi - short_oi) / (long_oi + short_oi)`
pub fn oi_imbalance(long_oi: Decimal, short_oi: Decimal) -> Decimal {
    let total = long_oi + short_oi;
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (long_oi - short_oi) / total
}

/// Open-interest adjusted funding rate.
///
/// # Formula
/// `clamp(base + oi_factor * imbalance, -max_rate, max_rate)`
pub fn funding_rate(
    base: Decimal,
    imbalance: Decimal,
    oi_factor: Decimal,
    max_rate: Decimal,
) -> Decimal {
    clamp(base + oi_factor * imbalance, -max_rate, max_rate)
}

/// One EMA update.
///
/// # Formula
/// `alpha * value + (1 - alpha) * prior`
pub fn ema_step(alpha: Decimal, value: Decimal, prior: Decimal) -> Decimal {
    alpha * value + (Decimal::ONE - alpha) * prior
}

/// Time-decayed aggregation weight of an oracle submission.
///
/// # Formula
/// `weight * max(0.1, (1 - age / max_age)^2)`
///
/// Decimal weights keep the fractional part exactly, so no integer scaling
/// is applied. Callers guarantee `0 <= age <= max_age` and `max_age > 0`.
pub fn time_decay_weight(weight: u32, age_secs: i64, max_age_secs: i64) -> Decimal {
    let ratio = Decimal::from(age_secs) / Decimal::from(max_age_secs);
    let fresh = Decimal::ONE - ratio;
    let factor = (fresh * fresh).max(MIN_DECAY_FACTOR);
    Decimal::from(weight) * factor
}

/// Relative deviation `|value - reference| / reference`. `None` when the
/// reference is non-positive.
pub fn deviation_ratio(value: Decimal, reference: Decimal) -> Option<Decimal> {
    if reference <= Decimal::ZERO {
        return None;
    }
    Some((value - reference).abs() / reference)
}

/// Simple median of an ascending-sorted price slice.
pub fn median(sorted: &[Decimal]) -> Option<Decimal> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / dec!(2))
    }
}

/// Arithmetic mean of prices weighted by the paired weights. `None` when
/// the total weight is non-positive.
pub fn weighted_mean(pairs: &[(Decimal, Decimal)]) -> Option<Decimal> {
    let total: Decimal = pairs.iter().map(|(_, w)| *w).sum();
    if total <= Decimal::ZERO {
        return None;
    }
    let weighted: Decimal = pairs.iter().map(|(p, w)| *p * *w).sum();
    Some(weighted / total)
}

/// Start of the candle bucket containing `timestamp` for a span in seconds.
///
/// # Formula
/// `floor(t / span) * span`
pub fn bucket_start(timestamp: i64, span_secs: i64) -> i64 {
    timestamp - timestamp.rem_euclid(span_secs)
}

/// Next funding boundary strictly after `now`, aligned to `interval_secs`
/// from the UTC day start.
pub fn next_interval_boundary(now: i64, interval_secs: i64) -> i64 {
    let day_start = now - now.rem_euclid(86_400);
    let elapsed = now - day_start;
    day_start + (elapsed / interval_secs + 1) * interval_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_amounts() {
        // 0.1 BTC at 50_000 with 5% initial margin
        assert_eq!(initial_margin(dec!(0.1), dec!(50000), dec!(0.05)), dec!(250.000));
        assert_eq!(
            maintenance_margin(dec!(0.1), dec!(50000), dec!(0.025)),
            dec!(125.0000)
        );
    }

    #[test]
    fn liquidation_price_per_side() {
        assert_eq!(
            liquidation_price(Side::Long, dec!(50000), dec!(0.025)),
            dec!(48750.000)
        );
        assert_eq!(
            liquidation_price(Side::Short, dec!(50000), dec!(0.025)),
            dec!(51250.000)
        );
    }

    #[test]
    fn pnl_signs() {
        assert_eq!(
            unrealized_pnl(Side::Long, dec!(0.1), dec!(50000), dec!(52000)),
            dec!(200.0)
        );
        assert_eq!(
            unrealized_pnl(Side::Long, dec!(0.1), dec!(50000), dec!(48500)),
            dec!(-150.0)
        );
        assert_eq!(
            unrealized_pnl(Side::Short, dec!(0.1), dec!(50000), dec!(48500)),
            dec!(150.0)
        );
    }

    #[test]
    fn margin_ratio_matches_hand_calc() {
        // margin 250, uPnL -150, 0.1 BTC at mark 48_500
        let ratio = position_margin_ratio(dec!(250), dec!(-150), dec!(0.1), dec!(48500)).unwrap();
        assert_eq!(ratio.round_dp(6), dec!(0.020619));
        assert!(position_margin_ratio(dec!(250), dec!(0), dec!(0), dec!(48500)).is_none());
    }

    #[test]
    fn entry_averaging() {
        // 1 @ 50_000 plus 1 @ 52_000 averages to 51_000
        let avg = average_entry_price(dec!(1), dec!(50000), dec!(1), dec!(52000)).unwrap();
        assert_eq!(avg, dec!(51000));
        assert!(average_entry_price(dec!(0), dec!(0), dec!(0), dec!(50000)).is_none());
    }

    #[test]
    fn bankruptcy_price_per_side() {
        // long 0.1 with 250 margin: entry - 2_500
        let price = bankruptcy_price(Side::Long, dec!(50000), dec!(250), dec!(0.1)).unwrap();
        assert_eq!(price, dec!(47500));
        let price = bankruptcy_price(Side::Short, dec!(50000), dec!(250), dec!(0.1)).unwrap();
        assert_eq!(price, dec!(52500));
    }

    #[test]
    fn funding_base_rate_damped_and_clamped() {
        // mark 50_500, index 50_000: premium 1%, damped to 0.05%
        let rate = funding_base_rate(dec!(50500), dec!(50000), dec!(0.05), dec!(0.005)).unwrap();
        assert_eq!(rate, dec!(0.0005));

        // a huge premium pins at the clamp
        let rate = funding_base_rate(dec!(60000), dec!(50000), dec!(0.05), dec!(0.005)).unwrap();
        assert_eq!(rate, dec!(0.005));

        assert!(funding_base_rate(dec!(50500), dec!(0), dec!(0.05), dec!(0.005)).is_none());
    }

    #[test]
    fn oi_imbalance_bounds() {
        assert_eq!(oi_imbalance(dec!(0), dec!(0)), Decimal::ZERO);
        assert_eq!(oi_imbalance(dec!(100), dec!(100)), Decimal::ZERO);
        let imbalance = oi_imbalance(dec!(100), dec!(50));
        assert_eq!(imbalance.round_dp(6), dec!(0.333333));
        assert_eq!(oi_imbalance(dec!(100), dec!(0)), Decimal::ONE);
    }

    #[test]
    fn funding_rate_oi_adjustment_clamps() {
        // zero premium, one-third imbalance: 0.05 * 1/3 exceeds the cap
        let imbalance = oi_imbalance(dec!(100), dec!(50));
        let rate = funding_rate(Decimal::ZERO, imbalance, dec!(0.05), dec!(0.005));
        assert_eq!(rate, dec!(0.005));

        let rate = funding_rate(Decimal::ZERO, -imbalance, dec!(0.05), dec!(0.005));
        assert_eq!(rate, dec!(-0.005));
    }

    #[test]
    fn ema_recurrence_holds_exactly() {
        let alpha = dec!(0.1);
        let mut ema = dec!(50000); // seeded with the first observation
        for value in [dec!(50200), dec!(50400), dec!(50100)] {
            let next = ema_step(alpha, value, ema);
            assert_eq!(next, alpha * value + (Decimal::ONE - alpha) * ema);
            ema = next;
        }
    }

    #[test]
    fn decay_weight_endpoints() {
        // fresh submission keeps the full weight
        assert_eq!(time_decay_weight(3, 0, 300), dec!(3));
        // at the staleness limit the floor applies
        assert_eq!(time_decay_weight(3, 300, 300), dec!(0.3));
        // halfway: (1 - 0.5)^2 = 0.25
        assert_eq!(time_decay_weight(4, 150, 300), dec!(1.00));
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[dec!(1), dec!(2), dec!(3)]), Some(dec!(2)));
        assert_eq!(median(&[dec!(1), dec!(2), dec!(3), dec!(4)]), Some(dec!(2.5)));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn weighted_mean_stays_within_bounds() {
        let pairs = [
            (dec!(50000), dec!(3)),
            (dec!(50100), dec!(2)),
            (dec!(49900), dec!(1)),
        ];
        let mean = weighted_mean(&pairs).unwrap();
        assert!(mean >= dec!(49900) && mean <= dec!(50100));
        assert!(weighted_mean(&[]).is_none());
    }

    #[test]
    fn bucket_start_floors_to_span() {
        assert_eq!(bucket_start(1_700_000_125, 60), 1_700_000_100);
        assert_eq!(bucket_start(1_700_000_100, 60), 1_700_000_100);
        assert_eq!(bucket_start(86_399, 86_400), 0);
    }

    #[test]
    fn funding_boundary_aligns_to_utc_day() {
        // 1_700_006_400 is 02:00:00 UTC on a day starting at 1_699_999_200?
        // use a synthetic day: day_start 864_000, one hour interval
        let day_start = 864_000;
        assert_eq!(next_interval_boundary(day_start, 3_600), day_start + 3_600);
        assert_eq!(next_interval_boundary(day_start + 1, 3_600), day_start + 3_600);
        assert_eq!(
            next_interval_boundary(day_start + 3_599, 3_600),
            day_start + 3_600
        );
        // exactly on a boundary advances to the next one
        assert_eq!(
            next_interval_boundary(day_start + 3_600, 3_600),
            day_start + 7_200
        );
        // 8h interval stays aligned to the day start
        assert_eq!(
            next_interval_boundary(day_start + 9 * 3_600, 8 * 3_600),
            day_start + 16 * 3_600
        );
    }

    #[test]
    fn clamp_is_inclusive() {
        assert_eq!(clamp(dec!(5), dec!(0), dec!(10)), dec!(5));
        assert_eq!(clamp(dec!(-1), dec!(0), dec!(10)), dec!(0));
        assert_eq!(clamp(dec!(11), dec!(0), dec!(10)), dec!(10));
    }
}
