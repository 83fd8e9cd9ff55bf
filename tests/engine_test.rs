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

//! Engine public API integration tests.

use chrono::{Duration, Utc};
use ecoride_ledger::{
    AccountRef, Archive, ArchiveRecord, Capacity, DisputeOutcome, Engine, ErrorKind, LedgerConfig,
    LedgerError, MAX_PRICE, MemoryArchive, NewRide, NewUser, NewVehicle, OperationState, RequestId, RideId,
    RideQuery, RideStatus, Role, Session, TransactionKind, UserId, UserStatus, ValidationKey,
    ValidationStatus,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

const DRIVER: UserId = UserId(1);
const EMPLOYEE: UserId = UserId(50);
const ADMIN: UserId = UserId(99);

fn register_driver(engine: &Engine, id: UserId, plate: &str, seats: u8) -> Session {
    let mut driver = NewUser::passenger(&format!("driver{id}@example.com"), "Driver");
    driver.capacities = vec![Capacity::Driver, Capacity::Passenger];
    engine.register_user(id, driver).unwrap();
    let session = engine.session(id).unwrap();
    engine
        .register_vehicle(
            &session,
            NewVehicle {
                plate: plate.into(),
                model: "Kangoo".into(),
                seats,
                electric: false,
                preferences: Default::default(),
            },
        )
        .unwrap();
    session
}

fn register_passenger(engine: &Engine, id: u32) -> Session {
    engine
        .register_user(
            UserId(id),
            NewUser::passenger(&format!("user{id}@example.com"), "Passenger"),
        )
        .unwrap();
    engine.session(UserId(id)).unwrap()
}

fn register_staff(engine: &Engine, id: UserId, role: Role) -> Session {
    let mut staff = NewUser::passenger(&format!("staff{id}@example.com"), "Staff");
    staff.role = role;
    staff.capacities.clear();
    engine.register_user(id, staff).unwrap();
    engine.session(id).unwrap()
}

fn publish(engine: &Engine, driver: &Session, plate: &str, price: Decimal) -> RideId {
    engine
        .publish_ride(
            driver,
            NewRide {
                vehicle: plate.into(),
                origin: "Grenoble".into(),
                destination: "Annecy".into(),
                departure: Utc::now() + Duration::days(1),
                arrival: Some(Utc::now() + Duration::days(1) + Duration::hours(2)),
                price,
            },
        )
        .unwrap()
}

fn balance(engine: &Engine, account: AccountRef) -> Decimal {
    engine.balance(account).unwrap()
}

#[test]
fn booking_then_employee_validation() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 4);
    let passenger = register_passenger(&engine, 2);
    let employee = register_staff(&engine, EMPLOYEE, Role::Employee);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(10));

    engine.book(&passenger, ride, RequestId(1)).unwrap();
    assert_eq!(balance(&engine, AccountRef::User(UserId(2))), dec!(8));
    assert_eq!(balance(&engine, AccountRef::PlatformFeePool), dec!(2));
    assert_eq!(balance(&engine, AccountRef::EscrowPool), dec!(10));

    engine.start_ride(&driver, ride).unwrap();
    let keys = engine.finish_ride(&driver, ride).unwrap();
    assert_eq!(keys, vec![ValidationKey::new(ride, UserId(2))]);

    engine.open_dispute(&passenger, ride, "smoked all the way").unwrap();
    engine
        .resolve_dispute(&employee, keys[0], DisputeOutcome::Driver, RequestId(2))
        .unwrap();

    assert_eq!(balance(&engine, AccountRef::EscrowPool), dec!(0));
    assert_eq!(balance(&engine, AccountRef::User(DRIVER)), dec!(30));
    assert_eq!(engine.ledger().total(), engine.ledger().issued());
}

#[test]
fn both_validate_paths_move_the_same_amounts() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 4);
    let alice = register_passenger(&engine, 2);
    let bob = register_passenger(&engine, 3);
    let employee = register_staff(&engine, EMPLOYEE, Role::Employee);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(7.5));

    engine.book(&alice, ride, RequestId(1)).unwrap();
    engine.book(&bob, ride, RequestId(2)).unwrap();
    engine.start_ride(&driver, ride).unwrap();
    engine.finish_ride(&driver, ride).unwrap();

    let confirmed = engine.confirm_trip(&alice, ride, RequestId(3)).unwrap();
    engine.open_dispute(&bob, ride, "late").unwrap();
    let resolved = engine
        .resolve_dispute(
            &employee,
            ValidationKey::new(ride, UserId(3)),
            DisputeOutcome::Driver,
            RequestId(4),
        )
        .unwrap();

    for record in [&confirmed, &resolved] {
        assert_eq!(record.kind, TransactionKind::Payout);
        assert_eq!(record.net(AccountRef::EscrowPool), dec!(-7.5));
        assert_eq!(record.net(AccountRef::User(DRIVER)), dec!(7.5));
    }
    assert_eq!(
        engine.validation(ValidationKey::new(ride, UserId(2))).unwrap().status,
        ValidationStatus::Validated
    );
    assert_eq!(
        engine.validation(ValidationKey::new(ride, UserId(3))).unwrap().status,
        ValidationStatus::Resolved
    );
    assert_eq!(balance(&engine, AccountRef::EscrowPool), dec!(0));
    assert_eq!(balance(&engine, AccountRef::User(DRIVER)), dec!(35));
}

#[test]
fn refund_returns_price_plus_compensation() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 4);
    let passenger = register_passenger(&engine, 2);
    let employee = register_staff(&engine, EMPLOYEE, Role::Employee);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(10));

    engine.book(&passenger, ride, RequestId(1)).unwrap();
    engine.start_ride(&driver, ride).unwrap();
    engine.finish_ride(&driver, ride).unwrap();
    engine.open_dispute(&passenger, ride, "dropped me halfway").unwrap();

    let escrow_before = balance(&engine, AccountRef::EscrowPool);
    let platform_before = balance(&engine, AccountRef::PlatformFeePool);
    let passenger_before = balance(&engine, AccountRef::User(UserId(2)));

    let record = engine
        .resolve_dispute(
            &employee,
            ValidationKey::new(ride, UserId(2)),
            DisputeOutcome::Passenger,
            RequestId(2),
        )
        .unwrap();

    assert_eq!(record.kind, TransactionKind::Refund);
    assert_eq!(balance(&engine, AccountRef::EscrowPool), escrow_before - dec!(10));
    assert_eq!(
        balance(&engine, AccountRef::User(UserId(2))),
        passenger_before + dec!(11)
    );
    assert_eq!(
        balance(&engine, AccountRef::PlatformFeePool),
        platform_before - dec!(1)
    );
    assert_eq!(balance(&engine, AccountRef::User(DRIVER)), dec!(20));
    assert_eq!(engine.ledger().total(), engine.ledger().issued());
}

#[test]
fn cancelled_ride_restores_pre_booking_balances() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(6));
    let passengers: Vec<Session> = (2..5).map(|id| register_passenger(&engine, id)).collect();

    for (i, passenger) in passengers.iter().enumerate() {
        engine.book(passenger, ride, RequestId(i as u64 + 1)).unwrap();
    }
    assert!(engine.search_rides(&RideQuery::default()).is_empty(), "ride is full");

    engine.cancel_ride(&driver, ride, RequestId(100)).unwrap();

    for passenger in &passengers {
        assert_eq!(balance(&engine, AccountRef::User(passenger.user_id())), dec!(20));
    }
    assert_eq!(balance(&engine, AccountRef::EscrowPool), dec!(0));
    assert_eq!(balance(&engine, AccountRef::PlatformFeePool), dec!(0));
    assert_eq!(engine.ride(ride).unwrap().status, RideStatus::Inactive);
    assert!(matches!(
        engine.book(&passengers[0], ride, RequestId(101)),
        Err(LedgerError::InvalidState { .. })
    ));
}

#[test]
fn blocked_users_cannot_book() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let admin = register_staff(&engine, ADMIN, Role::Administrator);
    let passenger = register_passenger(&engine, 2);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(5));

    engine
        .set_user_status(&admin, UserId(2), UserStatus::Blocked)
        .unwrap();

    // An already-issued session is re-checked on every write.
    let err = engine.book(&passenger, ride, RequestId(1)).unwrap_err();
    assert_eq!(err, LedgerError::UserBlocked(UserId(2)));
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(balance(&engine, AccountRef::User(UserId(2))), dec!(20));

    engine
        .set_user_status(&admin, UserId(2), UserStatus::Active)
        .unwrap();
    engine.book(&passenger, ride, RequestId(1)).unwrap();
}

#[test]
fn driver_cannot_book_own_ride() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(5));

    assert_eq!(
        engine.book(&driver, ride, RequestId(1)),
        Err(LedgerError::Forbidden("drivers cannot book their own ride"))
    );
}

#[test]
fn duplicate_key_is_rejected_across_operations() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let passenger = register_passenger(&engine, 2);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(5));

    engine.book(&passenger, ride, RequestId(42)).unwrap();
    assert_eq!(
        engine.operations().state(RequestId(42)),
        Some(OperationState::Committed(TransactionKind::Booking))
    );

    let err = engine.cancel_ride(&driver, ride, RequestId(42)).unwrap_err();
    assert_eq!(err, LedgerError::DuplicateRequest(RequestId(42)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(engine.ride(ride).unwrap().status, RideStatus::Active);
}

#[test]
fn archive_keeps_history_of_committed_changes() {
    let archive = Arc::new(MemoryArchive::new());
    let engine = Engine::with_archive(LedgerConfig::default(), archive.clone());
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let passenger = register_passenger(&engine, 2);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(5));

    let started = Utc::now() - Duration::seconds(1);
    engine.book(&passenger, ride, RequestId(1)).unwrap();
    engine.start_ride(&driver, ride).unwrap();
    engine.finish_ride(&driver, ride).unwrap();
    engine.confirm_trip(&passenger, ride, RequestId(2)).unwrap();
    engine.submit_review(&passenger, ride, 5, "smooth").unwrap();

    let kinds: Vec<TransactionKind> = archive.transactions().iter().map(|tx| tx.kind).collect();
    assert_eq!(kinds, vec![TransactionKind::Booking, TransactionKind::Payout]);

    let entries = archive
        .query(started..Utc::now() + Duration::seconds(1))
        .unwrap();
    assert_eq!(entries.len(), 4);
    assert!(matches!(&entries[1].record, ArchiveRecord::Ride(r) if r.status == RideStatus::Finished));
    assert!(matches!(&entries[3].record, ArchiveRecord::Review { rating: 5, .. }));
}

#[test]
fn search_filters_and_orders() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let mut electric = NewUser::passenger("ev@example.com", "EV");
    electric.capacities = vec![Capacity::Driver];
    engine.register_user(UserId(7), electric).unwrap();
    let ev_driver = engine.session(UserId(7)).unwrap();
    engine
        .register_vehicle(
            &ev_driver,
            NewVehicle {
                plate: "EV-000-01".into(),
                model: "e-208".into(),
                seats: 3,
                electric: true,
                preferences: Default::default(),
            },
        )
        .unwrap();

    let cheap = publish(&engine, &driver, "AB-123-CD", dec!(4));
    let green = publish(&engine, &ev_driver, "EV-000-01", dec!(9));

    let all: Vec<RideId> = engine
        .search_rides(&RideQuery::default())
        .iter()
        .map(|ride| ride.id)
        .collect();
    assert_eq!(all.len(), 2);

    let eco = engine.search_rides(&RideQuery {
        ecological_only: true,
        ..RideQuery::default()
    });
    assert_eq!(eco.len(), 1);
    assert_eq!(eco[0].id, green);

    let budget = engine.search_rides(&RideQuery {
        destination: Some("ANNECY".into()),
        max_price: Some(dec!(5)),
        ..RideQuery::default()
    });
    assert_eq!(budget.len(), 1);
    assert_eq!(budget[0].id, cheap);
}

#[test]
fn custom_tariff_from_config() {
    let config = LedgerConfig::from_toml_str(
        r#"
        [credits]
        service_fee = "1.5"
        signup_bonus = "30"
        "#,
    )
    .unwrap();
    let engine = Engine::with_config(config);
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 3);
    let passenger = register_passenger(&engine, 2);
    let ride = publish(&engine, &driver, "AB-123-CD", dec!(10));

    engine.book(&passenger, ride, RequestId(1)).unwrap();

    assert_eq!(balance(&engine, AccountRef::User(UserId(2))), dec!(18.5));
    assert_eq!(balance(&engine, AccountRef::PlatformFeePool), dec!(1.5));
    assert_eq!(engine.ledger().issued(), dec!(60));
}

#[test]
fn extreme_prices_are_refused_without_panicking() {
    let engine = Engine::new();
    let driver = register_driver(&engine, DRIVER, "AB-123-CD", 4);
    let passenger = register_passenger(&engine, 2);

    let offer = |price| NewRide {
        vehicle: "AB-123-CD".into(),
        origin: "Grenoble".into(),
        destination: "Annecy".into(),
        departure: Utc::now() + Duration::days(1),
        arrival: None,
        price,
    };
    assert_eq!(
        engine.publish_ride(&driver, offer(Decimal::MAX)),
        Err(LedgerError::InvalidAmount)
    );
    assert_eq!(
        engine.publish_ride(&driver, offer(MAX_PRICE + dec!(1))),
        Err(LedgerError::InvalidAmount)
    );

    let dearest = publish(&engine, &driver, "AB-123-CD", MAX_PRICE);
    assert_eq!(
        engine.book(&passenger, dearest, RequestId(1)),
        Err(LedgerError::InsufficientFunds)
    );
    assert_eq!(balance(&engine, AccountRef::User(UserId(2))), dec!(20));
    assert_eq!(engine.ledger().total(), engine.ledger().issued());
}
