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

//! Post-trip validations.
//!
//! One validation exists per (ride, passenger) once the ride is finished.
//! It carries the driver and price so that settling it only needs the
//! validation and the accounts, never the ride.
//!
//! ```text
//! Pending ──confirm──► Validated
//!    │
//!    └──dispute──► Disputed ──resolve (driver)────► Resolved
//!                      │
//!                      └────resolve (passenger)──► Refunded
//! ```

use crate::LedgerError;
use crate::base::{UserId, ValidationKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Awaiting the passenger ("non validé").
    Pending,
    /// Passenger confirmed the trip; driver paid.
    Validated,
    /// Passenger contested the trip ("litige").
    Disputed,
    /// Dispute settled in the driver's favour; driver paid.
    Resolved,
    /// Dispute settled in the passenger's favour ("remboursé").
    Refunded,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Disputed => "disputed",
            ValidationStatus::Resolved => "resolved",
            ValidationStatus::Refunded => "refunded",
        }
    }

    /// Whether the trip ended with the driver being paid.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationStatus::Validated | ValidationStatus::Resolved)
    }

    fn can_become(&self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        matches!(
            (self, next),
            (Pending, Validated) | (Pending, Disputed) | (Disputed, Resolved) | (Disputed, Refunded)
        )
    }
}

/// Which side an employee rules for when closing a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Pay the driver, as a passenger confirmation would.
    Driver,
    /// Refund the passenger.
    Passenger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub key: ValidationKey,
    pub driver: UserId,
    pub price: Decimal,
    pub status: ValidationStatus,
    /// Passenger's complaint, set when the dispute is opened.
    pub comment: Option<String>,
    /// Staff member who closed the dispute.
    pub resolved_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl Validation {
    pub(crate) fn new(key: ValidationKey, driver: UserId, price: Decimal) -> Self {
        Self {
            key,
            driver,
            price,
            status: ValidationStatus::Pending,
            comment: None,
            resolved_by: None,
            updated_at: Utc::now(),
        }
    }

    /// Checks that moving to `next` is allowed, without changing anything.
    pub(crate) fn check_transition(&self, next: ValidationStatus) -> Result<(), LedgerError> {
        if self.status.can_become(next) {
            Ok(())
        } else {
            Err(LedgerError::InvalidState {
                expected: match next {
                    ValidationStatus::Validated | ValidationStatus::Disputed => "pending",
                    _ => "disputed",
                },
                found: self.status.as_str(),
            })
        }
    }

    /// Applies a transition previously accepted by [`Self::check_transition`].
    pub(crate) fn set_status(&mut self, next: ValidationStatus) {
        debug_assert!(self.status.can_become(next));
        self.status = next;
        self.updated_at = Utc::now();
    }
}
