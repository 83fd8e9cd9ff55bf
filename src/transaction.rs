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

//! Committed credit movements.
//!
//! Every movement is a balanced [`Posting`]: the amount leaves one account
//! and lands in another, so the ledger-wide sum never changes. A
//! [`TransactionRecord`] groups the postings of one booking, payout, refund
//! or cancellation and is what the archive stores.

use crate::base::{AccountRef, RequestId, RideId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Posting {
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Passenger pays the ride price into escrow and the service fee to the platform.
    Booking,
    /// Escrow releases the ride price to the driver.
    Payout,
    /// Escrow returns the ride price to the passenger, plus compensation.
    Refund,
    /// Driver cancelled; every passenger gets price and fee back.
    Cancellation,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub kind: TransactionKind,
    pub request: RequestId,
    pub ride: RideId,
    /// User whose session issued the operation.
    pub actor: UserId,
    pub postings: Vec<Posting>,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        kind: TransactionKind,
        request: RequestId,
        ride: RideId,
        actor: UserId,
        postings: Vec<Posting>,
    ) -> Self {
        Self {
            kind,
            request,
            ride,
            actor,
            postings,
            recorded_at: Utc::now(),
        }
    }

    /// Net effect of this transaction on `account` (credits minus debits).
    pub fn net(&self, account: AccountRef) -> Decimal {
        self.postings
            .iter()
            .map(|posting| {
                let mut delta = Decimal::ZERO;
                if posting.to == account {
                    delta += posting.amount;
                }
                if posting.from == account {
                    delta -= posting.amount;
                }
                delta
            })
            .sum()
    }
}
