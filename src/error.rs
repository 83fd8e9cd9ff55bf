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

//! Error types for marketplace and ledger operations.

use crate::base::{AccountRef, Plate, RequestId, ReviewId, RideId, UserId, ValidationKey};
use thiserror::Error;

/// Closed taxonomy every [`LedgerError`] falls into.
///
/// Callers that only need to decide how to react (reject input, deny access,
/// ask for more credits, reload and retry, back off) match on this instead
/// of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a reference to something that does not exist.
    Validation,
    /// Role or ownership check failed.
    Authorization,
    /// A debit would take an account below zero.
    InsufficientFunds,
    /// The targeted record changed state, or the request was already applied.
    Conflict,
    /// A collaborator (archive) could not be reached.
    UpstreamUnavailable,
}

/// Marketplace and ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Rating outside 1..=5
    #[error("rating must be between 1 and 5")]
    InvalidRating,

    /// Free-form input failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("ride {0} not found")]
    RideNotFound(RideId),

    #[error("vehicle {0} not found")]
    VehicleNotFound(Plate),

    #[error("validation {0} not found")]
    ValidationNotFound(ValidationKey),

    #[error("review {0} not found")]
    ReviewNotFound(ReviewId),

    /// Account was not opened, or not part of the running transaction
    #[error("unknown account {0}")]
    UnknownAccount(AccountRef),

    /// Caller lacks the role or ownership the operation requires
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Account was blocked by an administrator
    #[error("user {0} is blocked")]
    UserBlocked(UserId),

    /// Debit would exceed the available balance
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Ride has no free seat left
    #[error("no seat available on ride {0}")]
    SeatUnavailable(RideId),

    /// Passenger already booked this ride
    #[error("user {0} already booked ride {1}")]
    AlreadyBooked(UserId, RideId),

    /// Record is not in the state the operation expects
    #[error("invalid state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// Record with the same key already exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Idempotency key was already used by a committed operation
    #[error("request {0} already processed")]
    DuplicateRequest(RequestId),

    /// Historical archive rejected the write
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::InvalidRating
            | LedgerError::InvalidInput(_)
            | LedgerError::UserNotFound(_)
            | LedgerError::RideNotFound(_)
            | LedgerError::VehicleNotFound(_)
            | LedgerError::ValidationNotFound(_)
            | LedgerError::ReviewNotFound(_)
            | LedgerError::UnknownAccount(_) => ErrorKind::Validation,
            LedgerError::Forbidden(_) | LedgerError::UserBlocked(_) => ErrorKind::Authorization,
            LedgerError::InsufficientFunds => ErrorKind::InsufficientFunds,
            LedgerError::SeatUnavailable(_)
            | LedgerError::AlreadyBooked(..)
            | LedgerError::InvalidState { .. }
            | LedgerError::AlreadyExists(_)
            | LedgerError::DuplicateRequest(_) => ErrorKind::Conflict,
            LedgerError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
        }
    }
}
