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

//! Vehicles and rides.
//!
//! Ride lifecycle:
//!
//! ```text
//! Active ──start──► InProgress ──finish──► Finished
//!    │
//!    └──cancel──► Inactive
//! ```

use crate::LedgerError;
use crate::base::{Plate, RideId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Largest seat count accepted for a private car.
pub const MAX_SEATS: u8 = 8;

/// Highest price per seat a driver may ask, in credits.
pub const MAX_PRICE: Decimal = dec!(1000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub smoking: bool,
    pub animals: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub plate: Plate,
    pub owner: UserId,
    pub model: String,
    /// Passenger seats offered, driver excluded.
    pub seats: u8,
    pub electric: bool,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVehicle {
    pub plate: String,
    pub model: String,
    pub seats: u8,
    pub electric: bool,
    #[serde(default)]
    pub preferences: Preferences,
}

impl NewVehicle {
    pub(crate) fn into_vehicle(self, owner: UserId) -> Result<Vehicle, LedgerError> {
        let plate = Plate::new(&self.plate);
        if plate.is_empty() {
            return Err(LedgerError::InvalidInput("licence plate is empty".into()));
        }
        if self.seats == 0 || self.seats > MAX_SEATS {
            return Err(LedgerError::InvalidInput(format!(
                "seat count must be between 1 and {MAX_SEATS}"
            )));
        }
        Ok(Vehicle {
            plate,
            owner,
            model: self.model.trim().to_string(),
            seats: self.seats,
            electric: self.electric,
            preferences: self.preferences,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Published and open for booking ("actif").
    Active,
    /// Driver has set off ("en_cours").
    InProgress,
    /// Arrived; passengers may validate ("terminé").
    Finished,
    /// Cancelled by the driver ("inactif").
    Inactive,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Active => "active",
            RideStatus::InProgress => "in_progress",
            RideStatus::Finished => "finished",
            RideStatus::Inactive => "inactive",
        }
    }

    pub(crate) fn ensure(self, expected: RideStatus) -> Result<(), LedgerError> {
        if self == expected {
            Ok(())
        } else {
            Err(LedgerError::InvalidState {
                expected: expected.as_str(),
                found: self.as_str(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub driver: UserId,
    pub vehicle: Plate,
    /// Copied from the vehicle at publish time.
    pub seats: u8,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub arrival: Option<DateTime<Utc>>,
    /// Price per passenger, in credits.
    pub price: Decimal,
    /// Published with an electric vehicle.
    pub ecological: bool,
    pub passengers: Vec<UserId>,
    pub status: RideStatus,
}

impl Ride {
    pub fn free_seats(&self) -> usize {
        usize::from(self.seats).saturating_sub(self.passengers.len())
    }

    pub fn has_passenger(&self, user: UserId) -> bool {
        self.passengers.contains(&user)
    }

    /// Whether the ride is bookable and satisfies `query`.
    pub fn matches(&self, query: &RideQuery) -> bool {
        self.status == RideStatus::Active
            && self.free_seats() > 0
            && query
                .origin
                .as_deref()
                .is_none_or(|origin| same_place(&self.origin, origin))
            && query
                .destination
                .as_deref()
                .is_none_or(|destination| same_place(&self.destination, destination))
            && query.max_price.is_none_or(|max| self.price <= max)
            && (!query.ecological_only || self.ecological)
            && query
                .departs_after
                .is_none_or(|after| self.departure >= after)
    }
}

/// Case-insensitive place comparison, accents included ("ORLÉANS" is "orléans").
fn same_place(place: &str, wanted: &str) -> bool {
    place.to_lowercase() == wanted.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRide {
    pub vehicle: String,
    pub origin: String,
    pub destination: String,
    pub departure: DateTime<Utc>,
    pub arrival: Option<DateTime<Utc>>,
    pub price: Decimal,
}

impl NewRide {
    /// Validates the offer, then takes an id from `allocate` and builds the
    /// ride. Rejected offers never consume an id.
    pub(crate) fn into_ride<F>(self, allocate: F, vehicle: &Vehicle) -> Result<Ride, LedgerError>
    where
        F: FnOnce() -> RideId,
    {
        if self.price <= Decimal::ZERO || self.price > MAX_PRICE {
            return Err(LedgerError::InvalidAmount);
        }
        let origin = self.origin.trim().to_string();
        let destination = self.destination.trim().to_string();
        if origin.is_empty() || destination.is_empty() {
            return Err(LedgerError::InvalidInput(
                "origin and destination are required".into(),
            ));
        }
        if self.arrival.is_some_and(|arrival| arrival <= self.departure) {
            return Err(LedgerError::InvalidInput(
                "arrival must be after departure".into(),
            ));
        }
        Ok(Ride {
            id: allocate(),
            driver: vehicle.owner,
            vehicle: vehicle.plate.clone(),
            seats: vehicle.seats,
            origin,
            destination,
            departure: self.departure,
            arrival: self.arrival,
            price: self.price,
            ecological: vehicle.electric,
            passengers: Vec::new(),
            status: RideStatus::Active,
        })
    }
}

/// Ride search filters. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub ecological_only: bool,
    pub departs_after: Option<DateTime<Utc>>,
}
