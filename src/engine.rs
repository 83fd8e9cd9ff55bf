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

//! Marketplace engine.
//!
//! The [`Engine`] owns the ledger and every marketplace record, and exposes
//! the operations users and staff perform. Credit-moving operations live in
//! [`booking`](crate::booking) and [`settlement`](crate::settlement); this
//! module covers registration, vehicles and the ride lifecycle.
//!
//! # Locking
//!
//! Rides and validations are individually locked records cloned out of
//! their [`DashMap`] before locking. Operations always acquire locks in the
//! order ride → validation → accounts, and never hold a map shard guard
//! while waiting on a record lock.

use crate::archive::{Archive, ArchiveRecord, MemoryArchive};
use crate::base::{AccountRef, Plate, RideId, UserId, ValidationKey};
use crate::config::{CreditSettings, LedgerConfig};
use crate::ledger::Ledger;
use crate::operation_log::OperationLog;
use crate::review::ReviewStore;
use crate::ride::{NewRide, NewVehicle, Ride, RideQuery, RideStatus, Vehicle};
use crate::session::Session;
use crate::user::{Capacity, NewUser, User, UserStatus};
use crate::validation::Validation;
use crate::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Carpooling marketplace engine.
///
/// # Invariants
///
/// - A ride never carries more passengers than its seat count.
/// - Every booked passenger paid `price + service_fee` in one atomic unit.
/// - A validation is settled (paid out or refunded) at most once.
/// - The ledger-wide balance equals the credits issued at sign-up.
pub struct Engine {
    pub(crate) credits: CreditSettings,
    pub(crate) ledger: Ledger,
    pub(crate) users: DashMap<UserId, User>,
    pub(crate) vehicles: DashMap<Plate, Vehicle>,
    pub(crate) rides: DashMap<RideId, Arc<Mutex<Ride>>>,
    pub(crate) validations: DashMap<ValidationKey, Arc<Mutex<Validation>>>,
    pub(crate) reviews: ReviewStore,
    pub(crate) operations: OperationLog,
    pub(crate) archive: Arc<dyn Archive>,
    next_ride: AtomicU32,
}

impl Engine {
    /// Creates an engine with the default tariff and an in-memory archive.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self::with_archive(config, Arc::new(MemoryArchive::new()))
    }

    pub fn with_archive(config: LedgerConfig, archive: Arc<dyn Archive>) -> Self {
        Engine {
            credits: config.credits,
            ledger: Ledger::new(),
            users: DashMap::new(),
            vehicles: DashMap::new(),
            rides: DashMap::new(),
            validations: DashMap::new(),
            reviews: ReviewStore::new(),
            operations: OperationLog::new(),
            archive,
            next_ride: AtomicU32::new(1),
        }
    }

    pub fn credits(&self) -> &CreditSettings {
        &self.credits
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn reviews(&self) -> &ReviewStore {
        &self.reviews
    }

    pub fn operations(&self) -> &OperationLog {
        &self.operations
    }

    pub fn balance(&self, account: AccountRef) -> Option<Decimal> {
        self.ledger.balance(account)
    }

    // === Users ===

    /// Registers a user under the id issued by the identity provider and
    /// opens their credit account with the sign-up bonus.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidInput`] - malformed email or empty name.
    /// - [`LedgerError::AlreadyExists`] - id already registered.
    pub fn register_user(&self, id: UserId, new_user: NewUser) -> Result<User, LedgerError> {
        let user = new_user.into_user(id)?;
        match self.users.entry(id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(format!("user {id}"))),
            Entry::Vacant(entry) => {
                self.ledger
                    .open(AccountRef::User(id), self.credits.signup_bonus)?;
                entry.insert(user.clone());
                info!(user = %id, role = ?user.role, "user registered");
                Ok(user)
            }
        }
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|entry| entry.value().clone())
    }

    /// Opens a session for an active user.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UserNotFound`] - unknown id.
    /// - [`LedgerError::UserBlocked`] - user was blocked by an administrator.
    pub fn session(&self, id: UserId) -> Result<Session, LedgerError> {
        let user = self.users.get(&id).ok_or(LedgerError::UserNotFound(id))?;
        if user.status == UserStatus::Blocked {
            return Err(LedgerError::UserBlocked(id));
        }
        Ok(Session::for_user(&user))
    }

    /// Blocks or reactivates a user. Administrators only.
    pub fn set_user_status(
        &self,
        session: &Session,
        target: UserId,
        status: UserStatus,
    ) -> Result<(), LedgerError> {
        session.require_admin()?;
        self.ensure_active(session.user_id())?;
        if target == session.user_id() && status == UserStatus::Blocked {
            return Err(LedgerError::Forbidden("administrators cannot block themselves"));
        }
        let mut user = self
            .users
            .get_mut(&target)
            .ok_or(LedgerError::UserNotFound(target))?;
        user.status = status;
        info!(user = %target, ?status, by = %session.user_id(), "user status changed");
        Ok(())
    }

    /// Sessions are long-lived; writes re-check that the caller was not
    /// blocked since the session was opened.
    pub(crate) fn ensure_active(&self, id: UserId) -> Result<(), LedgerError> {
        let user = self.users.get(&id).ok_or(LedgerError::UserNotFound(id))?;
        if user.status == UserStatus::Blocked {
            return Err(LedgerError::UserBlocked(id));
        }
        Ok(())
    }

    // === Vehicles ===

    /// Registers a vehicle for the session's driver.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - caller lacks the driver capacity.
    /// - [`LedgerError::InvalidInput`] - empty plate or seat count out of range.
    /// - [`LedgerError::AlreadyExists`] - plate already registered.
    pub fn register_vehicle(
        &self,
        session: &Session,
        new_vehicle: NewVehicle,
    ) -> Result<Vehicle, LedgerError> {
        session.require_capacity(Capacity::Driver)?;
        self.ensure_active(session.user_id())?;
        let vehicle = new_vehicle.into_vehicle(session.user_id())?;

        match self.vehicles.entry(vehicle.plate.clone()) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(format!(
                "vehicle {}",
                vehicle.plate
            ))),
            Entry::Vacant(entry) => {
                entry.insert(vehicle.clone());
                Ok(vehicle)
            }
        }
    }

    pub fn vehicle(&self, plate: &str) -> Option<Vehicle> {
        self.vehicles
            .get(&Plate::new(plate))
            .map(|entry| entry.value().clone())
    }

    // === Rides ===

    /// Publishes a ride with one of the driver's vehicles.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Forbidden`] - not a driver, or not the vehicle's owner.
    /// - [`LedgerError::VehicleNotFound`] - unknown plate.
    /// - [`LedgerError::InvalidAmount`] - price is not positive or above [`MAX_PRICE`](crate::MAX_PRICE).
    /// - [`LedgerError::InvalidInput`] - missing route or arrival before departure.
    pub fn publish_ride(&self, session: &Session, new_ride: NewRide) -> Result<RideId, LedgerError> {
        session.require_capacity(Capacity::Driver)?;
        self.ensure_active(session.user_id())?;

        let plate = Plate::new(&new_ride.vehicle);
        let vehicle = self
            .vehicles
            .get(&plate)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::VehicleNotFound(plate))?;
        if vehicle.owner != session.user_id() {
            return Err(LedgerError::Forbidden("vehicle belongs to another driver"));
        }

        let ride = new_ride.into_ride(
            || RideId(self.next_ride.fetch_add(1, Ordering::Relaxed)),
            &vehicle,
        )?;
        let id = ride.id;
        info!(
            ride = %id,
            driver = %ride.driver,
            price = %ride.price,
            seats = ride.seats,
            "ride published"
        );
        self.rides.insert(id, Arc::new(Mutex::new(ride)));
        Ok(id)
    }

    /// Snapshot of a ride.
    pub fn ride(&self, id: RideId) -> Option<Ride> {
        self.ride_handle(id).ok().map(|ride| ride.lock().clone())
    }

    pub(crate) fn ride_handle(&self, id: RideId) -> Result<Arc<Mutex<Ride>>, LedgerError> {
        self.rides
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::RideNotFound(id))
    }

    /// Bookable rides matching `query`, earliest departure first.
    pub fn search_rides(&self, query: &RideQuery) -> Vec<Ride> {
        let handles: Vec<_> = self
            .rides
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut rides: Vec<Ride> = handles
            .iter()
            .filter_map(|handle| {
                let ride = handle.lock();
                ride.matches(query).then(|| ride.clone())
            })
            .collect();
        rides.sort_by(|a, b| a.departure.cmp(&b.departure).then(a.id.cmp(&b.id)));
        rides
    }

    /// Driver sets off: `Active` → `InProgress`. Bookings close.
    pub fn start_ride(&self, session: &Session, id: RideId) -> Result<(), LedgerError> {
        self.ensure_active(session.user_id())?;
        let handle = self.ride_handle(id)?;
        let mut ride = handle.lock();
        Self::ensure_driver(session, &ride)?;
        ride.status.ensure(RideStatus::Active)?;
        ride.status = RideStatus::InProgress;
        info!(ride = %id, passengers = ride.passengers.len(), "ride started");
        Ok(())
    }

    /// Driver arrives: `InProgress` → `Finished`.
    ///
    /// Archives the final ride and opens one pending validation per
    /// passenger. Returns the validation keys.
    pub fn finish_ride(
        &self,
        session: &Session,
        id: RideId,
    ) -> Result<Vec<ValidationKey>, LedgerError> {
        self.ensure_active(session.user_id())?;
        let handle = self.ride_handle(id)?;
        let mut ride = handle.lock();
        Self::ensure_driver(session, &ride)?;
        ride.status.ensure(RideStatus::InProgress)?;

        let mut finished = ride.clone();
        finished.status = RideStatus::Finished;
        self.archive
            .append(vec![ArchiveRecord::Ride(finished.clone())])
            .inspect_err(|err| warn!(ride = %id, %err, "archive rejected finished ride"))?;

        let keys: Vec<ValidationKey> = finished
            .passengers
            .iter()
            .map(|passenger| ValidationKey::new(id, *passenger))
            .collect();
        for key in &keys {
            self.validations.insert(
                *key,
                Arc::new(Mutex::new(Validation::new(*key, finished.driver, finished.price))),
            );
        }
        *ride = finished;
        info!(ride = %id, validations = keys.len(), "ride finished");
        Ok(keys)
    }

    pub(crate) fn ensure_driver(session: &Session, ride: &Ride) -> Result<(), LedgerError> {
        if ride.driver == session.user_id() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("only the ride's driver may do this"))
        }
    }

    // === Validations ===

    /// Snapshot of a validation.
    pub fn validation(&self, key: ValidationKey) -> Option<Validation> {
        self.validation_handle(key)
            .ok()
            .map(|validation| validation.lock().clone())
    }

    pub(crate) fn validation_handle(
        &self,
        key: ValidationKey,
    ) -> Result<Arc<Mutex<Validation>>, LedgerError> {
        self.validations
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::ValidationNotFound(key))
    }

    /// Validations awaiting an employee, oldest update first.
    pub fn open_disputes(&self) -> Vec<Validation> {
        let handles: Vec<_> = self
            .validations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut disputes: Vec<Validation> = handles
            .iter()
            .map(|handle| handle.lock().clone())
            .filter(|validation| {
                validation.status == crate::validation::ValidationStatus::Disputed
            })
            .collect();
        disputes.sort_by_key(|validation| validation.updated_at);
        disputes
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
