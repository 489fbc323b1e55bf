//! # Core Data Types
//!
//! All shared data structures of the Meridian protocol. Every entity that
//! lives in the store is defined here; the engine crate serializes these
//! records into prefix-keyed blobs.
//!
//! All monetary fields are `rust_decimal::Decimal`: a 96-bit signed decimal
//! with exact string round-trips. Timestamps are unix seconds provided by
//! the block host.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Direction of a trading position.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Side {
    /// Long position - profits when price goes up
    Long,
    /// Short position - profits when price goes down
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Side implied by the taker direction of a fill.
    pub fn from_is_buy(is_buy: bool) -> Side {
        if is_buy {
            Side::Long
        } else {
            Side::Short
        }
    }
}

/// Margin accounting mode of an account.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MarginMode {
    /// Each position owns its margin; liquidation decisions are per-position.
    Isolated,
    /// Positions share account equity; liquidation decisions are per-account.
    Cross,
}

/// Lifecycle status of a market.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Created but not yet trading
    Inactive,
    /// Open for trading
    Active,
    /// Transient: funding settlement in progress
    Settling,
    /// Trading suspended by governance
    Paused,
}

/// A perpetual-futures market and its risk parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Market identifier, e.g. "BTC-USDC"
    pub market_id: String,
    /// Base asset symbol (what is traded)
    pub base_asset: String,
    /// Quote asset symbol (what is settled in)
    pub quote_asset: String,
    /// Maximum leverage allowed for orders
    pub max_leverage: Decimal,
    /// Initial margin rate (fraction of notional locked on open)
    pub initial_margin_rate: Decimal,
    /// Maintenance margin rate (fraction of notional below which a
    /// position is liquidatable)
    pub maintenance_margin_rate: Decimal,
    /// Taker fee rate on notional
    pub taker_fee_rate: Decimal,
    /// Maker fee rate on notional
    pub maker_fee_rate: Decimal,
    /// Minimum price increment
    pub tick_size: Decimal,
    /// Minimum size increment
    pub lot_size: Decimal,
    /// Minimum order size
    pub min_order_size: Decimal,
    /// Maximum order size
    pub max_order_size: Decimal,
    /// Maximum position size per trader
    pub max_position_size: Decimal,
    /// Funding interval in seconds
    pub funding_interval_secs: i64,
    /// Insurance fund backing this market's liquidations
    pub insurance_fund_id: String,
    pub status: MarketStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A trader's margin account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Trader identifier
    pub trader: String,
    /// Total quote-asset balance, locked margin included
    pub balance: Decimal,
    /// Margin locked by open positions. Mirrors the sum of position margins.
    pub locked_margin: Decimal,
    pub margin_mode: MarginMode,
    /// Aggregate unrealized PnL snapshot written by the cross-margin
    /// evaluation; zero for isolated accounts.
    pub cross_margin_pnl: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Account {
    pub fn new(trader: &str, now: i64) -> Account {
        Account {
            trader: trader.to_string(),
            balance: Decimal::ZERO,
            locked_margin: Decimal::ZERO,
            margin_mode: MarginMode::Isolated,
            cross_margin_pnl: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance not locked as margin, clamped at zero.
    pub fn available_balance(&self) -> Decimal {
        (self.balance - self.locked_margin).max(Decimal::ZERO)
    }
}

/// An open position. One record per (trader, market); deleted at zero size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub trader: String,
    pub side: Side,
    /// Base-asset size, always positive
    pub size: Decimal,
    /// Volume-weighted average entry price
    pub entry_price: Decimal,
    /// Margin owned by this position
    pub margin: Decimal,
    /// Notional / margin at the last write
    pub leverage: Decimal,
    /// Derived on every write, never a free variable
    pub liquidation_price: Decimal,
    pub opened_at: i64,
    pub updated_at: i64,
}

impl Position {
    /// Position value at the given price.
    pub fn notional(&self, price: Decimal) -> Decimal {
        self.size * price
    }
}

/// Reference prices for a market.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub market_id: String,
    /// EMA-smoothed index price; basis for margin and PnL
    pub mark_price: Decimal,
    /// Aggregated oracle price after the per-block change clamp
    pub index_price: Decimal,
    /// Most recent traded price; updated only by trades
    pub last_price: Decimal,
    pub timestamp: i64,
}

impl PriceInfo {
    pub fn zero(market_id: &str, now: i64) -> PriceInfo {
        PriceInfo {
            market_id: market_id.to_string(),
            mark_price: Decimal::ZERO,
            index_price: Decimal::ZERO,
            last_price: Decimal::ZERO,
            timestamp: now,
        }
    }
}

/// A registered oracle price source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleSource {
    pub source_id: String,
    /// Aggregation weight, integer >= 1
    pub weight: u32,
    /// Inactive sources are excluded from aggregation
    pub is_active: bool,
    /// Unix seconds of the latest submission
    pub last_update: i64,
    /// Latest submitted price across all markets
    pub last_price: Decimal,
    /// Operator-maintained quality score in [0, 1]
    pub reliability: Decimal,
}

/// Latest price submission of one source for one market. Overwritten on
/// every new submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleSourcePrice {
    pub source_id: String,
    pub market_id: String,
    pub price: Decimal,
    pub timestamp: i64,
}

/// One entry of the append-only funding rate log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub market_id: String,
    pub rate: Decimal,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub timestamp: i64,
}

/// One funding transfer applied to a trader. Append-only; the amounts of
/// one settlement sum to zero on a balanced book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundingPayment {
    /// Monotonically increasing payment id
    pub payment_id: u64,
    pub trader: String,
    pub market_id: String,
    /// Signed balance delta (negative = trader paid)
    pub amount: Decimal,
    pub rate: Decimal,
    pub timestamp: i64,
}

/// Candle intervals tracked by the K-line aggregator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KlineInterval {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 7] = [
        KlineInterval::M1,
        KlineInterval::M5,
        KlineInterval::M15,
        KlineInterval::M30,
        KlineInterval::H1,
        KlineInterval::H4,
        KlineInterval::D1,
    ];

    pub fn secs(self) -> i64 {
        match self {
            KlineInterval::M1 => 60,
            KlineInterval::M5 => 300,
            KlineInterval::M15 => 900,
            KlineInterval::M30 => 1_800,
            KlineInterval::H1 => 3_600,
            KlineInterval::H4 => 14_400,
            KlineInterval::D1 => 86_400,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KlineInterval::M1 => "1m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::M30 => "30m",
            KlineInterval::H1 => "1h",
            KlineInterval::H4 => "4h",
            KlineInterval::D1 => "1d",
        }
    }
}

/// One OHLCV candle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub market_id: String,
    pub interval: KlineInterval,
    /// Bucket start, unix seconds, aligned to the interval span
    pub bucket_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Cumulative base-asset volume within the bucket
    pub volume: Decimal,
    /// Cumulative price * volume within the bucket
    pub turnover: Decimal,
    pub trade_count: u64,
}

/// EMA filter state for a market's mark price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmaPrice {
    pub market_id: String,
    pub value: Decimal,
    pub last_updated: i64,
    pub block_height: u64,
}

/// Insurance fund backing liquidations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub fund_id: String,
    pub balance: Decimal,
}

/// Market statistics snapshot returned by queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub market_id: String,
    /// Sum of long position sizes
    pub long_open_interest: Decimal,
    /// Sum of short position sizes
    pub short_open_interest: Decimal,
    pub position_count: u64,
    /// Latest settled funding rate, zero if none yet
    pub funding_rate: Decimal,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub last_price: Decimal,
}

/// Oracle aggregation configuration (singleton).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Minimum surviving sources for a valid aggregate
    pub min_sources: u32,
    /// Submissions older than this are excluded
    pub max_price_age_secs: i64,
    /// Submissions deviating more than this from the median are dropped
    pub max_deviation: Decimal,
    /// EMA smoothing factor for the mark price
    pub ema_alpha: Decimal,
    /// Per-block clamp on the index price change
    pub max_price_change: Decimal,
    /// Submissions deviating more than this from the mark are rejected
    pub circuit_breaker_pct: Decimal,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            min_sources: 2,
            max_price_age_secs: 300,           // 5 minutes
            max_deviation: dec!(0.02),         // 2%
            ema_alpha: dec!(0.1),
            max_price_change: dec!(0.05),      // 5% per block
            circuit_breaker_pct: dec!(0.10),   // 10%
        }
    }
}

/// Funding configuration (singleton).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Default funding interval for new markets, seconds
    pub interval_secs: i64,
    /// Damping factor applied to the mark/index premium
    pub damping_factor: Decimal,
    /// Coefficient applied to the open-interest imbalance
    pub oi_damping_factor: Decimal,
    /// Rate clamp, applied symmetrically
    pub max_rate: Decimal,
}

impl FundingConfig {
    pub fn min_rate(&self) -> Decimal {
        -self.max_rate
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,          // 1 hour
            damping_factor: dec!(0.05),
            oi_damping_factor: dec!(0.05),
            max_rate: dec!(0.005),         // +-0.5%
        }
    }
}

/// Liquidation configuration (singleton).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Penalty on liquidated notional
    pub penalty_rate: Decimal,
    /// Share of the penalty paid to an external liquidator
    pub liquidator_share: Decimal,
    /// Share of the penalty paid to the insurance fund
    pub insurance_share: Decimal,
    /// Minimum seconds between liquidation attempts on one position
    pub cooldown_secs: i64,
    /// Fraction of size closed by a partial (tier 2) liquidation
    pub partial_close_fraction: Decimal,
    /// Warning threshold as a multiple of the maintenance rate
    pub warning_factor: Decimal,
    /// Emergency threshold as a multiple of the maintenance rate
    pub emergency_factor: Decimal,
    /// Maintenance ratio floor for cross-margin accounts
    pub cross_margin_threshold: Decimal,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            penalty_rate: dec!(0.01),           // 1%
            liquidator_share: dec!(0.30),
            insurance_share: dec!(0.70),
            cooldown_secs: 30,
            partial_close_fraction: dec!(0.25),
            warning_factor: dec!(2.5),
            emergency_factor: dec!(0.6),
            cross_margin_threshold: dec!(0.025), // 2.5%
        }
    }
}
