//! # Error Definitions
//!
//! All error kinds surfaced by the Meridian core. Every kind carries a
//! stable numeric code, grouped by category; RPC responses expose both the
//! code and the human-readable message.

use thiserror::Error;

/// Meridian protocol errors.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MeridianError {
    // ───────────────────────────────────────────────────────────────
    // General / validation (1-99)
    // ───────────────────────────────────────────────────────────────
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("price must be positive")]
    InvalidPrice,
    #[error("leverage out of range")]
    InvalidLeverage,
    #[error("division by zero or non-positive denominator")]
    DivisionByZero,
    #[error("invalid parameter")]
    InvalidParameter,

    // ───────────────────────────────────────────────────────────────
    // Market (100-199)
    // ───────────────────────────────────────────────────────────────
    #[error("market {0} not found")]
    MarketNotFound(String),
    #[error("market {0} already exists")]
    MarketExists(String),
    #[error("market {0} is not active")]
    MarketNotActive(String),
    #[error("market {0} is paused")]
    MarketPaused(String),
    #[error("order size below market minimum")]
    OrderSizeTooSmall,
    #[error("order size above market maximum")]
    OrderSizeTooLarge,
    #[error("position size would exceed market maximum")]
    PositionSizeTooLarge,

    // ───────────────────────────────────────────────────────────────
    // Account (200-299)
    // ───────────────────────────────────────────────────────────────
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("insufficient margin")]
    InsufficientMargin,
    #[error("cannot change margin mode with open positions")]
    CannotChangeMarginModeWithPositions,

    // ───────────────────────────────────────────────────────────────
    // Position (300-399)
    // ───────────────────────────────────────────────────────────────
    #[error("position not found for trader {trader} in market {market_id}")]
    PositionNotFound { trader: String, market_id: String },
    #[error("cannot reduce position by more than its size")]
    CannotReducePosition,

    // ───────────────────────────────────────────────────────────────
    // Oracle (400-499)
    // ───────────────────────────────────────────────────────────────
    #[error("oracle source {0} not found")]
    SourceNotFound(String),
    #[error("oracle source {0} is inactive")]
    SourceInactive(String),
    #[error("submitted price deviates too far from the mark price")]
    CircuitBreakerTripped,
    #[error("not enough oracle sources survived aggregation")]
    InsufficientOracleSources,

    // ───────────────────────────────────────────────────────────────
    // Funding (500-599)
    // ───────────────────────────────────────────────────────────────
    #[error("funding is not due for market {0}")]
    FundingNotDue(String),
    #[error("funding settlement already in progress for market {0}")]
    FundingAlreadySettled(String),

    // ───────────────────────────────────────────────────────────────
    // Liquidation (600-699)
    // ───────────────────────────────────────────────────────────────
    #[error("position is healthy and cannot be liquidated")]
    NotLiquidatable,
    #[error("liquidation cooldown has not elapsed")]
    LiquidationCooldownActive,
}

impl MeridianError {
    /// Stable numeric code for RPC responses. Codes never change across
    /// releases for a given chain.
    pub fn code(&self) -> u32 {
        match self {
            MeridianError::InvalidAmount => 1,
            MeridianError::InvalidQuantity => 2,
            MeridianError::InvalidPrice => 3,
            MeridianError::InvalidLeverage => 4,
            MeridianError::DivisionByZero => 5,
            MeridianError::InvalidParameter => 6,

            MeridianError::MarketNotFound(_) => 100,
            MeridianError::MarketExists(_) => 101,
            MeridianError::MarketNotActive(_) => 102,
            MeridianError::MarketPaused(_) => 103,
            MeridianError::OrderSizeTooSmall => 104,
            MeridianError::OrderSizeTooLarge => 105,
            MeridianError::PositionSizeTooLarge => 106,

            MeridianError::AccountNotFound(_) => 200,
            MeridianError::InsufficientBalance => 201,
            MeridianError::InsufficientMargin => 202,
            MeridianError::CannotChangeMarginModeWithPositions => 203,

            MeridianError::PositionNotFound { .. } => 300,
            MeridianError::CannotReducePosition => 301,

            MeridianError::SourceNotFound(_) => 400,
            MeridianError::SourceInactive(_) => 401,
            MeridianError::CircuitBreakerTripped => 402,
            MeridianError::InsufficientOracleSources => 403,

            MeridianError::FundingNotDue(_) => 500,
            MeridianError::FundingAlreadySettled(_) => 501,

            MeridianError::NotLiquidatable => 600,
            MeridianError::LiquidationCooldownActive => 601,
        }
    }
}
