//! # Event Protocol
//!
//! The closed list of events emitted by the core. Events are a contract
//! with off-chain consumers: each kind has a stable name and an explicitly
//! typed attribute set. The keeper accumulates events per block; the host
//! drains them after `end_block`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{MarginMode, MarketStatus, Side};

/// Liquidation escalation tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LiquidationTier {
    Warning = 1,
    Partial = 2,
    Emergency = 3,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Deposit {
        trader: String,
        amount: Decimal,
        new_balance: Decimal,
    },
    Withdraw {
        trader: String,
        amount: Decimal,
        new_balance: Decimal,
    },
    MarginModeChanged {
        trader: String,
        mode: MarginMode,
    },
    MarketCreated {
        market_id: String,
    },
    MarketUpdated {
        market_id: String,
    },
    MarketStatusChanged {
        market_id: String,
        status: MarketStatus,
    },
    OpenPosition {
        trader: String,
        market_id: String,
        side: Side,
        size: Decimal,
        price: Decimal,
        margin: Decimal,
    },
    ReducePosition {
        trader: String,
        market_id: String,
        size: Decimal,
        price: Decimal,
        realized_pnl: Decimal,
    },
    ClosePosition {
        trader: String,
        market_id: String,
        size: Decimal,
        price: Decimal,
        realized_pnl: Decimal,
    },
    PartialFeeCollected {
        trader: String,
        market_id: String,
        fee_due: Decimal,
        fee_paid: Decimal,
    },
    FundingSettled {
        market_id: String,
        rate: Decimal,
        mark_price: Decimal,
        index_price: Decimal,
        positions_affected: u64,
    },
    OraclePriceSubmitted {
        source_id: String,
        market_id: String,
        price: Decimal,
    },
    PriceUpdated {
        market_id: String,
        mark_price: Decimal,
        index_price: Decimal,
    },
    PriceChangeLimited {
        market_id: String,
        raw_price: Decimal,
        clamped_price: Decimal,
    },
    LiquidationWarning {
        trader: String,
        market_id: String,
        margin_ratio: Decimal,
    },
    LiquidationStarted {
        trader: String,
        market_id: String,
        tier: LiquidationTier,
    },
    LiquidationCompleted {
        trader: String,
        market_id: String,
        closed_size: Decimal,
        penalty: Decimal,
    },
    AdlTriggered {
        market_id: String,
        trader: String,
        covered: Decimal,
    },
}

impl Event {
    /// Stable event name; part of the external contract.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Deposit { .. } => "deposit",
            Event::Withdraw { .. } => "withdraw",
            Event::MarginModeChanged { .. } => "margin_mode_changed",
            Event::MarketCreated { .. } => "market_created",
            Event::MarketUpdated { .. } => "market_updated",
            Event::MarketStatusChanged { .. } => "market_status_changed",
            Event::OpenPosition { .. } => "open_position",
            Event::ReducePosition { .. } => "reduce_position",
            Event::ClosePosition { .. } => "close_position",
            Event::PartialFeeCollected { .. } => "partial_fee_collected",
            Event::FundingSettled { .. } => "funding_settled",
            Event::OraclePriceSubmitted { .. } => "oracle_price_submitted",
            Event::PriceUpdated { .. } => "price_updated",
            Event::PriceChangeLimited { .. } => "price_change_limited",
            Event::LiquidationWarning { .. } => "liquidation_warning",
            Event::LiquidationStarted { .. } => "liquidation_started",
            Event::LiquidationCompleted { .. } => "liquidation_completed",
            Event::AdlTriggered { .. } => "adl_triggered",
        }
    }
}
