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

//! Settlement transactions.
//!
//! After a ride is finished each passenger's share sits in escrow until the
//! matching validation settles:
//!
//! - the passenger confirms the trip, or an employee rules for the driver:
//!   the price moves from escrow to the driver;
//! - an employee rules for the passenger: the price moves back from escrow
//!   and the platform pool adds the refund compensation.
//!
//! Cancelling a ride before departure is settled here too: every passenger
//! gets the price and the service fee back.
//!
//! Every variant is one [`Ledger::transact`](crate::Ledger::transact) unit
//! with its archive batch written ahead, taken while the validation (or
//! ride) is locked, so a validation settles at most once.

use crate::archive::ArchiveRecord;
use crate::base::{AccountRef, RequestId, RideId, UserId, ValidationKey};
use crate::engine::Engine;
use crate::ride::RideStatus;
use crate::session::Session;
use crate::transaction::{TransactionKind, TransactionRecord};
use crate::validation::{DisputeOutcome, Validation, ValidationStatus};
use crate::LedgerError;
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    /// Passenger confirms the trip went well; the driver is paid.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ValidationNotFound`] - caller was not aboard the finished ride.
    /// - [`LedgerError::InvalidState`] - validation already confirmed or disputed.
    /// - [`LedgerError::DuplicateRequest`] - `request` was already used.
    /// - [`LedgerError::UpstreamUnavailable`] - archive refused the record.
    pub fn confirm_trip(
        &self,
        session: &Session,
        ride: RideId,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        let key = ValidationKey::new(ride, session.user_id());
        self.settle(session, key, ValidationStatus::Validated, request)
            .inspect_err(|err| warn!(validation = %key, request = %request, %err, "confirmation rejected"))
    }

    /// Passenger contests the trip. The validation waits for an employee.
    pub fn open_dispute(
        &self,
        session: &Session,
        ride: RideId,
        comment: &str,
    ) -> Result<(), LedgerError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(LedgerError::InvalidInput("dispute comment is required".into()));
        }
        self.ensure_active(session.user_id())?;

        let key = ValidationKey::new(ride, session.user_id());
        let handle = self.validation_handle(key)?;
        let mut validation = handle.lock();
        validation.check_transition(ValidationStatus::Disputed)?;

        self.archive
            .append(vec![ArchiveRecord::Dispute {
                key,
                status: ValidationStatus::Disputed,
                comment: Some(comment.to_string()),
                by: session.user_id(),
            }])
            .inspect_err(|err| warn!(validation = %key, %err, "archive rejected dispute"))?;

        validation.comment = Some(comment.to_string());
        validation.set_status(ValidationStatus::Disputed);
        info!(validation = %key, driver = %validation.driver, "dispute opened");
        Ok(())
    }

    /// Employee closes a dispute in favour of one side.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - caller is neither employee nor administrator.
    /// - [`LedgerError::InvalidState`] - validation is not disputed.
    /// - [`LedgerError::DuplicateRequest`] - `request` was already used.
    /// - [`LedgerError::UpstreamUnavailable`] - archive refused the records.
    pub fn resolve_dispute(
        &self,
        session: &Session,
        key: ValidationKey,
        outcome: DisputeOutcome,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        session.require_staff()?;
        let next = match outcome {
            DisputeOutcome::Driver => ValidationStatus::Resolved,
            DisputeOutcome::Passenger => ValidationStatus::Refunded,
        };
        self.settle(session, key, next, request)
            .inspect_err(|err| warn!(validation = %key, ?outcome, %err, "resolution rejected"))
    }

    /// Moves `key` to `next`, paying the driver or refunding the passenger.
    fn settle(
        &self,
        session: &Session,
        key: ValidationKey,
        next: ValidationStatus,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        let actor = session.user_id();
        self.ensure_active(actor)?;

        let reservation = self.operations.reserve(request)?;
        let handle = self.validation_handle(key)?;
        let mut validation = handle.lock();
        validation.check_transition(next)?;

        let (kind, accounts) = match next {
            ValidationStatus::Refunded => (
                TransactionKind::Refund,
                vec![
                    AccountRef::EscrowPool,
                    AccountRef::PlatformFeePool,
                    AccountRef::User(key.passenger),
                ],
            ),
            _ => (
                TransactionKind::Payout,
                vec![AccountRef::EscrowPool, AccountRef::User(validation.driver)],
            ),
        };

        let record = self.ledger.transact(&accounts, |draft| {
            match kind {
                TransactionKind::Refund => {
                    let passenger = AccountRef::User(key.passenger);
                    draft.transfer(AccountRef::EscrowPool, passenger, validation.price)?;
                    let compensation = self.credits.refund_compensation;
                    if compensation > Decimal::ZERO {
                        draft.transfer(AccountRef::PlatformFeePool, passenger, compensation)?;
                    }
                }
                _ => draft.transfer(
                    AccountRef::EscrowPool,
                    AccountRef::User(validation.driver),
                    validation.price,
                )?,
            }

            let record = TransactionRecord::new(
                kind,
                request,
                key.ride,
                actor,
                draft.postings().to_vec(),
            );
            let mut batch = vec![ArchiveRecord::Transaction(record.clone())];
            if next != ValidationStatus::Validated {
                batch.push(dispute_record(&validation, next, actor));
            }
            self.archive.append(batch)?;
            Ok(record)
        })?;

        validation.set_status(next);
        if next != ValidationStatus::Validated {
            validation.resolved_by = Some(actor);
        }
        reservation.commit(kind);
        info!(
            validation = %key,
            status = next.as_str(),
            amount = %validation.price,
            by = %actor,
            "validation settled"
        );
        Ok(record)
    }

    /// Driver cancels a ride that has not started. Every passenger is
    /// refunded the price from escrow and the service fee from the
    /// platform pool, in one unit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - caller is not the ride's driver.
    /// - [`LedgerError::InvalidState`] - ride already started, finished or cancelled.
    /// - [`LedgerError::DuplicateRequest`] - `request` was already used.
    /// - [`LedgerError::UpstreamUnavailable`] - archive refused the records.
    pub fn cancel_ride(
        &self,
        session: &Session,
        ride: RideId,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.try_cancel(session, ride, request)
            .inspect(|record| {
                info!(ride = %ride, refunds = record.postings.len(), "ride cancelled")
            })
            .inspect_err(|err| warn!(ride = %ride, request = %request, %err, "cancellation rejected"))
    }

    fn try_cancel(
        &self,
        session: &Session,
        ride_id: RideId,
        request: RequestId,
    ) -> Result<TransactionRecord, LedgerError> {
        self.ensure_active(session.user_id())?;
        let reservation = self.operations.reserve(request)?;
        let handle = self.ride_handle(ride_id)?;
        let mut ride = handle.lock();
        Self::ensure_driver(session, &ride)?;
        ride.status.ensure(RideStatus::Active)?;

        let fee = self.credits.service_fee;
        let mut accounts = vec![AccountRef::EscrowPool, AccountRef::PlatformFeePool];
        accounts.extend(ride.passengers.iter().map(|id| AccountRef::User(*id)));

        let mut cancelled = ride.clone();
        cancelled.status = RideStatus::Inactive;

        let record = self.ledger.transact(&accounts, |draft| {
            for passenger in &cancelled.passengers {
                let account = AccountRef::User(*passenger);
                draft.transfer(AccountRef::EscrowPool, account, cancelled.price)?;
                if fee > Decimal::ZERO {
                    draft.transfer(AccountRef::PlatformFeePool, account, fee)?;
                }
            }
            let record = TransactionRecord::new(
                TransactionKind::Cancellation,
                request,
                ride_id,
                session.user_id(),
                draft.postings().to_vec(),
            );
            self.archive.append(vec![
                ArchiveRecord::Transaction(record.clone()),
                ArchiveRecord::Ride(cancelled.clone()),
            ])?;
            Ok(record)
        })?;

        *ride = cancelled;
        reservation.commit(TransactionKind::Cancellation);
        Ok(record)
    }
}

fn dispute_record(validation: &Validation, status: ValidationStatus, by: UserId) -> ArchiveRecord {
    ArchiveRecord::Dispute {
        key: validation.key,
        status,
        comment: validation.comment.clone(),
        by,
    }
}
