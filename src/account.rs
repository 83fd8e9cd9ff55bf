// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Credit account.
//!
//! An account is a single balance guarded by its own lock. Balances only
//! move through [`Ledger::transact`](crate::Ledger::transact), which stages
//! debits and credits on copies of the locked [`AccountData`] and writes
//! them back together.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use ecoride_ledger::{Account, AccountRef};
//!
//! let account = Account::new(AccountRef::EscrowPool, dec!(0));
//! assert_eq!(account.balance(), dec!(0));
//! ```

use crate::LedgerError;
use crate::base::AccountRef;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug, Clone)]
pub(crate) struct AccountData {
    pub(crate) account: AccountRef,
    pub(crate) balance: Decimal,
}

impl AccountData {
    fn new(account: AccountRef, balance: Decimal) -> Self {
        Self { account, balance }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance of {} went negative: {}",
            self.account,
            self.balance
        );
    }

    /// Increases the balance. Fails if the result would not fit a `Decimal`.
    pub(crate) fn credit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        self.assert_invariants();
        Ok(())
    }

    /// Decreases the balance, refusing to go below zero.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }
}

/// Ledger account.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(account: AccountRef, opening_balance: Decimal) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(account, opening_balance)),
        }
    }

    pub fn account(&self) -> AccountRef {
        self.inner.lock().account
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 2)?;
        state.serialize_field("account", &data.account)?;
        state.serialize_field(
            "balance",
            &data.balance.round_dp(Account::DECIMAL_PRECISION),
        )?;
        state.end()
    }
}
