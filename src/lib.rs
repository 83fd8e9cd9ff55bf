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

//! # EcoRide Ledger
//!
//! Transactional credit ledger for a carpooling marketplace. Passengers pay
//! for rides with platform credits held in escrow until the trip is
//! validated; employees settle disputes; drivers are rated by the
//! passengers they carried.
//!
//! ## Core Components
//!
//! - [`Ledger`]: credit accounts with atomic multi-account transfers
//! - [`Engine`]: users, vehicles, rides and validations, plus the booking
//!   and settlement transactions that move credits between them
//! - [`Archive`]: write-once historical mirror of every committed change
//! - [`LedgerError`]: error type, grouped by [`ErrorKind`]
//!
//! ## Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use ecoride_ledger::{
//!     AccountRef, Capacity, DisputeOutcome, Engine, NewRide, NewUser, NewVehicle, RequestId,
//!     Role, UserId, ValidationKey,
//! };
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//!
//! let mut driver = NewUser::passenger("driver@example.com", "Driver");
//! driver.capacities = vec![Capacity::Driver];
//! engine.register_user(UserId(1), driver).unwrap();
//! engine.register_user(UserId(2), NewUser::passenger("p@example.com", "Passenger")).unwrap();
//! let mut employee = NewUser::passenger("staff@example.com", "Staff");
//! employee.role = Role::Employee;
//! engine.register_user(UserId(3), employee).unwrap();
//!
//! let driver = engine.session(UserId(1)).unwrap();
//! engine
//!     .register_vehicle(&driver, NewVehicle {
//!         plate: "AB-123-CD".into(),
//!         model: "Zoe".into(),
//!         seats: 4,
//!         electric: true,
//!         preferences: Default::default(),
//!     })
//!     .unwrap();
//! let ride = engine
//!     .publish_ride(&driver, NewRide {
//!         vehicle: "AB-123-CD".into(),
//!         origin: "Paris".into(),
//!         destination: "Lyon".into(),
//!         departure: Utc::now() + Duration::days(1),
//!         arrival: None,
//!         price: dec!(10),
//!     })
//!     .unwrap();
//!
//! // Booking: price into escrow, 2-credit fee to the platform.
//! let passenger = engine.session(UserId(2)).unwrap();
//! engine.book(&passenger, ride, RequestId(1)).unwrap();
//! assert_eq!(engine.balance(AccountRef::User(UserId(2))), Some(dec!(8)));
//! assert_eq!(engine.balance(AccountRef::PlatformFeePool), Some(dec!(2)));
//! assert_eq!(engine.balance(AccountRef::EscrowPool), Some(dec!(10)));
//!
//! engine.start_ride(&driver, ride).unwrap();
//! engine.finish_ride(&driver, ride).unwrap();
//! engine.open_dispute(&passenger, ride, "took a long detour").unwrap();
//!
//! // Employee rules for the driver: escrow releases the price.
//! let employee = engine.session(UserId(3)).unwrap();
//! let key = ValidationKey::new(ride, UserId(2));
//! engine
//!     .resolve_dispute(&employee, key, DisputeOutcome::Driver, RequestId(2))
//!     .unwrap();
//! assert_eq!(engine.balance(AccountRef::EscrowPool), Some(dec!(0)));
//! assert_eq!(engine.balance(AccountRef::User(UserId(1))), Some(dec!(30)));
//! ```
//!
//! ## Thread Safety
//!
//! Every [`Engine`] operation takes `&self`. Rides, validations and accounts
//! carry their own locks, taken in one global order, so unrelated bookings
//! and settlements proceed in parallel while conflicting ones serialize.

pub mod account;
pub mod archive;
mod base;
mod booking;
pub mod config;
mod engine;
pub mod error;
mod ledger;
mod operation_log;
pub mod review;
pub mod ride;
mod session;
mod settlement;
mod transaction;
pub mod user;
pub mod validation;

pub use account::Account;
pub use archive::{Archive, ArchiveEntry, ArchiveError, ArchiveRecord, MemoryArchive, ReviewAction};
pub use base::{AccountRef, Plate, RequestId, ReviewId, RideId, UserId, ValidationKey};
pub use config::{CONFIG_FILE_NAME, ConfigError, CreditSettings, LedgerConfig};
pub use engine::Engine;
pub use error::{ErrorKind, LedgerError};
pub use ledger::{Draft, Ledger};
pub use operation_log::{OperationLog, OperationState, Reservation};
pub use review::{MAX_RATING, MIN_RATING, Review, ReviewStore};
pub use ride::{MAX_PRICE, MAX_SEATS, NewRide, NewVehicle, Preferences, Ride, RideQuery, RideStatus, Vehicle};
pub use session::Session;
pub use transaction::{Posting, TransactionKind, TransactionRecord};
pub use user::{Capacity, NewUser, Role, User, UserStatus};
pub use validation::{DisputeOutcome, Validation, ValidationStatus};
