//! # Account Lifecycle
//!
//! Balance custody and margin-mode management. Balances only ever go
//! negative through funding or realized losses; withdrawals are capped by
//! the free balance and fees never overdraw.

use rust_decimal::Decimal;

use meridian_common::{Account, Event, MarginMode, MeridianError};

use crate::keeper::Keeper;
use crate::storage;
use crate::store::Store;

impl<S: Store> Keeper<S> {
    /// Fetch the account, creating a zero-balance isolated account on first
    /// touch.
    pub fn get_or_create_account(&mut self, trader: &str) -> Account {
        match storage::get_account(self.store(), trader) {
            Some(account) => account,
            None => {
                let account = Account::new(trader, self.block_time());
                storage::set_account(self.store_mut(), &account);
                account
            }
        }
    }

    pub fn deposit(&mut self, trader: &str, amount: Decimal) -> Result<Decimal, MeridianError> {
        if amount <= Decimal::ZERO {
            return Err(MeridianError::InvalidAmount);
        }
        let mut account = self.get_or_create_account(trader);
        account.balance += amount;
        account.updated_at = self.block_time();
        storage::set_account(self.store_mut(), &account);

        let new_balance = account.balance;
        self.emit(Event::Deposit {
            trader: trader.to_string(),
            amount,
            new_balance,
        });
        Ok(new_balance)
    }

    pub fn withdraw(&mut self, trader: &str, amount: Decimal) -> Result<Decimal, MeridianError> {
        if amount <= Decimal::ZERO {
            return Err(MeridianError::InvalidAmount);
        }
        let mut account = storage::get_account(self.store(), trader)
            .ok_or_else(|| MeridianError::AccountNotFound(trader.to_string()))?;

        // locked margin can never leave the account
        if account.balance - account.locked_margin < amount {
            return Err(MeridianError::InsufficientBalance);
        }
        account.balance -= amount;
        account.updated_at = self.block_time();
        storage::set_account(self.store_mut(), &account);

        let new_balance = account.balance;
        self.emit(Event::Withdraw {
            trader: trader.to_string(),
            amount,
            new_balance,
        });
        Ok(new_balance)
    }

    pub fn set_margin_mode(
        &mut self,
        trader: &str,
        mode: MarginMode,
    ) -> Result<(), MeridianError> {
        let mut account = self.get_or_create_account(trader);
        if account.margin_mode == mode {
            return Ok(());
        }
        if self.has_open_positions(trader) {
            return Err(MeridianError::CannotChangeMarginModeWithPositions);
        }
        account.margin_mode = mode;
        account.updated_at = self.block_time();
        storage::set_account(self.store_mut(), &account);

        self.emit(Event::MarginModeChanged {
            trader: trader.to_string(),
            mode,
        });
        Ok(())
    }
}
