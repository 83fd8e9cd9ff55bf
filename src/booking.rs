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

//! Booking transaction.
//!
//! A passenger joins a ride by paying the ride price into escrow and the
//! service fee to the platform pool. The seat, both transfers and the
//! archived record are applied as one unit while the ride is locked.

use crate::archive::ArchiveRecord;
use crate::base::{AccountRef, RequestId, RideId};
use crate::engine::Engine;
use crate::ride::RideStatus;
use crate::session::Session;
use crate::transaction::{TransactionKind, TransactionRecord};
use crate::user::Capacity;
use crate::LedgerError;
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    /// Books a seat on `ride` for the session's user.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - caller lacks the passenger capacity or drives the ride.
    /// - [`LedgerError::UserBlocked`] - caller was blocked.
    /// - [`LedgerError::DuplicateRequest`] - `request` was already used.
    /// - [`LedgerError::RideNotFound`] / [`LedgerError::InvalidState`] - ride missing or not bookable.
    /// - [`LedgerError::AlreadyBooked`] - caller already aboard.
    /// - [`LedgerError::SeatUnavailable`] - ride is full.
    /// - [`LedgerError::InsufficientFunds`] - balance below price plus fee.
    /// - [`LedgerError::UpstreamUnavailable`] - archive refused the record.
    ///
    /// On error nothing changes.
    pub fn book(
        &self,
        session: &Session,
        ride: RideId,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        let passenger = session.user_id();
        self.try_book(session, ride, request)
            .inspect(|record| {
                info!(
                    ride = %ride,
                    passenger = %passenger,
                    request = %request,
                    postings = record.postings.len(),
                    "booking committed"
                )
            })
            .inspect_err(|err| {
                warn!(ride = %ride, passenger = %passenger, request = %request, %err, "booking rejected")
            })
    }

    fn try_book(
        &self,
        session: &Session,
        ride_id: RideId,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        session.require_capacity(Capacity::Passenger)?;
        let passenger = session.user_id();
        self.ensure_active(passenger)?;

        let reservation = self.operations.reserve(request)?;
        let handle = self.ride_handle(ride_id)?;
        let mut ride = handle.lock();

        ride.status.ensure(RideStatus::Active)?;
        if ride.driver == passenger {
            return Err(LedgerError::Forbidden("drivers cannot book their own ride"));
        }
        if ride.has_passenger(passenger) {
            return Err(LedgerError::AlreadyBooked(passenger, ride_id));
        }
        if ride.free_seats() == 0 {
            return Err(LedgerError::SeatUnavailable(ride_id));
        }

        let price = ride.price;
        let fee = self.credits.service_fee;
        let payer = AccountRef::User(passenger);

        let record = self.ledger.transact(
            &[payer, AccountRef::PlatformFeePool, AccountRef::EscrowPool],
            |draft| {
                let due = price.checked_add(fee).ok_or(LedgerError::InvalidAmount)?;
                if draft.balance(payer)? < due {
                    return Err(LedgerError::InsufficientFunds);
                }
                if fee > Decimal::ZERO {
                    draft.transfer(payer, AccountRef::PlatformFeePool, fee)?;
                }
                draft.transfer(payer, AccountRef::EscrowPool, price)?;

                let record = TransactionRecord::new(
                    TransactionKind::Booking,
                    request,
                    ride_id,
                    passenger,
                    draft.postings().to_vec(),
                );
                self.archive
                    .append(vec![ArchiveRecord::Transaction(record.clone())])?;
                Ok(record)
            },
        )?;

        ride.passengers.push(passenger);
        debug_assert!(ride.passengers.len() <= usize::from(ride.seats));
        reservation.commit(TransactionKind::Booking);
        Ok(record)
    }
}
