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

//! Account ledger.
//!
//! The [`Ledger`] owns every credit account and is the only way balances
//! change after an account is opened. Multi-account changes run through
//! [`Ledger::transact`]:
//!
//! 1. the named accounts are locked in [`AccountRef`] order,
//! 2. the caller stages transfers on a [`Draft`] holding copies of the
//!    locked balances,
//! 3. if the caller returns `Ok`, the copies are written back before any
//!    lock is released; on `Err` they are dropped and nothing changes.
//!
//! Locking every participant up front in one global order rules out both
//! lost updates and lock-order deadlocks between concurrent transactions.

use crate::account::{Account, AccountData};
use crate::base::AccountRef;
use crate::transaction::Posting;
use crate::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Staged changes over a set of locked accounts.
///
/// Only balanced transfers can be staged, so a committed draft never
/// creates or destroys credits.
pub struct Draft<'a> {
    guards: Vec<MutexGuard<'a, AccountData>>,
    staged: Vec<AccountData>,
    postings: Vec<Posting>,
}

impl<'a> Draft<'a> {
    fn new(guards: Vec<MutexGuard<'a, AccountData>>) -> Self {
        let staged = guards.iter().map(|guard| (**guard).clone()).collect();
        Self {
            guards,
            staged,
            postings: Vec::new(),
        }
    }

    fn position(&self, account: AccountRef) -> Result<usize, LedgerError> {
        self.staged
            .binary_search_by_key(&account, |data| data.account)
            .map_err(|_| LedgerError::UnknownAccount(account))
    }

    /// Balance of `account` including everything staged so far.
    pub fn balance(&self, account: AccountRef) -> Result<Decimal, LedgerError> {
        let index = self.position(account)?;
        Ok(self.staged[index].balance)
    }

    /// Stages a move of `amount` credits from `from` to `to`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::InvalidInput`] - `from` and `to` are the same account.
    /// - [`LedgerError::UnknownAccount`] - account not locked by this transaction.
    /// - [`LedgerError::InsufficientFunds`] - `from` would go negative.
    pub fn transfer(
        &mut self,
        from: AccountRef,
        to: AccountRef,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if from == to {
            return Err(LedgerError::InvalidInput(format!(
                "transfer from {from} to itself"
            )));
        }
        let source = self.position(from)?;
        let target = self.position(to)?;

        self.staged[source].debit(amount)?;
        // Amount was validated by the debit.
        self.staged[target].credit(amount)?;

        self.postings.push(Posting { from, to, amount });
        Ok(())
    }

    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }

    fn commit(mut self) {
        debug_assert_eq!(
            self.guards.iter().map(|g| g.balance).sum::<Decimal>(),
            self.staged.iter().map(|s| s.balance).sum::<Decimal>(),
            "Invariant violated: draft does not conserve credits"
        );
        for (guard, staged) in self.guards.iter_mut().zip(self.staged.drain(..)) {
            **guard = staged;
        }
    }
}

/// Collection of credit accounts with atomic multi-account transfers.
///
/// # Invariants
///
/// - No balance is ever negative.
/// - The sum of all balances equals the credits issued through [`Ledger::open`].
pub struct Ledger {
    accounts: DashMap<AccountRef, Arc<Account>>,
    issued: Mutex<Decimal>,
}

impl Ledger {
    /// Creates a ledger holding the two empty pools.
    pub fn new() -> Self {
        let accounts = DashMap::new();
        for pool in [AccountRef::PlatformFeePool, AccountRef::EscrowPool] {
            accounts.insert(pool, Arc::new(Account::new(pool, Decimal::ZERO)));
        }
        Self {
            accounts,
            issued: Mutex::new(Decimal::ZERO),
        }
    }

    /// Opens `account` with an opening balance, issuing those credits.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative opening balance, or total
    ///   issuance would overflow.
    /// - [`LedgerError::AlreadyExists`] - account already open.
    pub fn open(&self, account: AccountRef, opening_balance: Decimal) -> Result<(), LedgerError> {
        if opening_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        match self.accounts.entry(account) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(format!("account {account}"))),
            Entry::Vacant(entry) => {
                let mut issued = self.issued.lock();
                *issued = issued
                    .checked_add(opening_balance)
                    .ok_or(LedgerError::InvalidAmount)?;
                entry.insert(Arc::new(Account::new(account, opening_balance)));
                Ok(())
            }
        }
    }

    pub fn balance(&self, account: AccountRef) -> Option<Decimal> {
        self.accounts.get(&account).map(|entry| entry.balance())
    }

    /// Sum of all balances.
    ///
    /// Accounts are read one at a time; under concurrent transfers the
    /// result is only meaningful once the ledger is quiescent.
    pub fn total(&self) -> Decimal {
        self.accounts.iter().map(|entry| entry.balance()).sum()
    }

    /// Credits issued as opening balances since the ledger was created.
    pub fn issued(&self) -> Decimal {
        *self.issued.lock()
    }

    /// Returns an iterator over all accounts.
    pub fn accounts(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, AccountRef, Arc<Account>>>
    {
        self.accounts.iter()
    }

    /// Runs `stage` over the locked `accounts` and commits its transfers
    /// if, and only if, it returns `Ok`.
    ///
    /// Duplicate entries in `accounts` are ignored. The closure may perform
    /// other fallible work (such as a write-ahead archive append); any error
    /// it returns discards every staged transfer.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownAccount`] - an account was never opened.
    /// - Any error returned by `stage`.
    pub fn transact<T, F>(&self, accounts: &[AccountRef], stage: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Draft<'_>) -> Result<T, LedgerError>,
    {
        let mut order = accounts.to_vec();
        order.sort();
        order.dedup();

        // Clone the handles out first so no shard guard is held while waiting
        // on an account lock.
        let handles = order
            .iter()
            .map(|account| {
                self.accounts
                    .get(account)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or(LedgerError::UnknownAccount(*account))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let guards = handles.iter().map(|handle| handle.lock()).collect();
        let mut draft = Draft::new(guards);

        let value = stage(&mut draft)?;
        tracing::debug!(postings = draft.postings().len(), "committing draft");
        draft.commit();
        Ok(value)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
