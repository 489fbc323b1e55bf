//! # Message Handlers
//!
//! The user-facing RPC surface. Amounts arrive as decimal strings and are
//! parsed exactly; responses carry the resulting balances. Every error maps
//! to a stable numeric code plus a human-readable message via `RpcError`.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use meridian_common::{MarginMode, MeridianError};

use crate::keeper::Keeper;
use crate::store::Store;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsgDeposit {
    pub trader: String,
    /// Decimal string, e.g. "1000.5"
    pub amount: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepositResponse {
    pub new_balance: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsgWithdraw {
    pub trader: String,
    pub amount: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub new_balance: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsgSetMarginMode {
    pub trader: String,
    pub mode: MarginMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MsgSubmitSourcePrice {
    pub source_id: String,
    pub market_id: String,
    pub price: String,
}

/// Wire form of an error: stable code plus message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: u32,
    pub message: String,
}

impl From<MeridianError> for RpcError {
    fn from(err: MeridianError) -> RpcError {
        RpcError {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, MeridianError> {
    Decimal::from_str(raw.trim()).map_err(|_| MeridianError::InvalidAmount)
}

fn parse_price(raw: &str) -> Result<Decimal, MeridianError> {
    Decimal::from_str(raw.trim()).map_err(|_| MeridianError::InvalidPrice)
}

impl<S: Store> Keeper<S> {
    pub fn handle_deposit(&mut self, msg: &MsgDeposit) -> Result<DepositResponse, MeridianError> {
        let amount = parse_amount(&msg.amount)?;
        let new_balance = self.deposit(&msg.trader, amount)?;
        Ok(DepositResponse { new_balance })
    }

    pub fn handle_withdraw(
        &mut self,
        msg: &MsgWithdraw,
    ) -> Result<WithdrawResponse, MeridianError> {
        let amount = parse_amount(&msg.amount)?;
        let new_balance = self.withdraw(&msg.trader, amount)?;
        Ok(WithdrawResponse { new_balance })
    }

    pub fn handle_set_margin_mode(
        &mut self,
        msg: &MsgSetMarginMode,
    ) -> Result<(), MeridianError> {
        self.set_margin_mode(&msg.trader, msg.mode)
    }

    pub fn handle_submit_source_price(
        &mut self,
        msg: &MsgSubmitSourcePrice,
    ) -> Result<(), MeridianError> {
        let price = parse_price(&msg.price)?;
        self.submit_source_price(&msg.source_id, &msg.market_id, price)
    }
}
