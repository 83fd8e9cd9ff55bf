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

//! Concurrency tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real engine from many threads and verify that the
//! ride → validation → accounts lock order neither deadlocks nor lets two
//! conflicting writes both succeed.

use chrono::{Duration as ChronoDuration, Utc};
use ecoride_ledger::{
    AccountRef, Capacity, DisputeOutcome, Engine, ErrorKind, LedgerError, NewRide, NewUser,
    NewVehicle, RequestId, RideId, Role, Session, UserId, ValidationKey, ValidationStatus,
};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

// === Fixtures ===

const STAFF: UserId = UserId(1_000);

fn passenger(engine: &Engine, id: u32) -> Session {
    engine
        .register_user(
            UserId(id),
            NewUser::passenger(&format!("p{id}@example.com"), "Passenger"),
        )
        .unwrap();
    engine.session(UserId(id)).unwrap()
}

fn driver_with_ride(engine: &Engine, id: u32, seats: u8, price: Decimal) -> (Session, RideId) {
    let mut driver = NewUser::passenger(&format!("d{id}@example.com"), "Driver");
    driver.capacities = vec![Capacity::Driver];
    engine.register_user(UserId(id), driver).unwrap();
    let session = engine.session(UserId(id)).unwrap();
    let plate = format!("DL-{id:04}");
    engine
        .register_vehicle(
            &session,
            NewVehicle {
                plate: plate.clone(),
                model: "Bus".into(),
                seats,
                electric: false,
                preferences: Default::default(),
            },
        )
        .unwrap();
    let ride = engine
        .publish_ride(
            &session,
            NewRide {
                vehicle: plate,
                origin: "Metz".into(),
                destination: "Nancy".into(),
                departure: Utc::now() + ChronoDuration::hours(1),
                arrival: None,
                price,
            },
        )
        .unwrap();
    (session, ride)
}

fn staff(engine: &Engine) -> Session {
    let mut staff = NewUser::passenger("staff@example.com", "Staff");
    staff.role = Role::Employee;
    engine.register_user(STAFF, staff).unwrap();
    engine.session(STAFF).unwrap()
}

// === Tests ===

/// Two passengers race for the last seat: exactly one gets it.
#[test]
fn last_seat_goes_to_exactly_one_passenger() {
    let detector = start_deadlock_detector();

    for round in 0..50u32 {
        let engine = Arc::new(Engine::new());
        let (_, ride) = driver_with_ride(&engine, 1, 1, dec!(10));
        let contenders: Vec<Session> = (2..4).map(|id| passenger(&engine, id)).collect();
        let barrier = Arc::new(Barrier::new(contenders.len()));

        let handles: Vec<_> = contenders
            .into_iter()
            .enumerate()
            .map(|(i, session)| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.book(&session, ride, RequestId(i as u64 + 1))
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("Thread panicked"))
            .collect();

        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1, "round {round}: {results:?}");
        let loser = results.iter().find_map(|result| result.as_ref().err()).unwrap();
        assert_eq!(*loser, LedgerError::SeatUnavailable(ride));
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        assert_eq!(engine.ride(ride).unwrap().passengers.len(), 1);
        assert_eq!(engine.balance(AccountRef::EscrowPool), Some(dec!(10)));
        assert_eq!(engine.ledger().total(), engine.ledger().issued());
    }

    stop_deadlock_detector(detector);
}

/// A passenger confirmation racing an employee resolution settles once.
#[test]
fn confirm_and_resolve_settle_once() {
    let detector = start_deadlock_detector();

    for round in 0..50u32 {
        let engine = Arc::new(Engine::new());
        let (driver, ride) = driver_with_ride(&engine, 1, 1, dec!(10));
        let rider = passenger(&engine, 2);
        let employee = staff(&engine);
        engine.book(&rider, ride, RequestId(1)).unwrap();
        engine.start_ride(&driver, ride).unwrap();
        engine.finish_ride(&driver, ride).unwrap();
        let key = ValidationKey::new(ride, UserId(2));

        let barrier = Arc::new(Barrier::new(3));
        let confirm = {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let rider = rider.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.confirm_trip(&rider, ride, RequestId(2)).is_ok()
            })
        };
        let dispute = {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.open_dispute(&rider, ride, "changed my mind").is_ok()
            })
        };
        let resolve = {
            let engine = engine.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                // Retry until the dispute lands or the confirmation wins.
                for attempt in 0..1_000u64 {
                    match engine.resolve_dispute(
                        &employee,
                        key,
                        DisputeOutcome::Passenger,
                        RequestId(100 + attempt),
                    ) {
                        Ok(_) => return true,
                        Err(LedgerError::InvalidState { found: "pending", .. }) => {
                            thread::yield_now()
                        }
                        Err(_) => return false,
                    }
                }
                false
            })
        };

        let confirmed = confirm.join().expect("Thread panicked");
        let disputed = dispute.join().expect("Thread panicked");
        let refunded = resolve.join().expect("Thread panicked");

        assert!(confirmed != disputed, "round {round}: exactly one of confirm/dispute");
        assert!(!(confirmed && refunded), "round {round}: settled twice");

        let status = engine.validation(key).unwrap().status;
        let driver_balance = engine.balance(AccountRef::User(UserId(1))).unwrap();
        if confirmed {
            assert_eq!(status, ValidationStatus::Validated);
            assert_eq!(driver_balance, dec!(30));
        } else if refunded {
            assert_eq!(status, ValidationStatus::Refunded);
            assert_eq!(driver_balance, dec!(20));
            assert_eq!(engine.balance(AccountRef::User(UserId(2))), Some(dec!(19)));
        }
        assert_eq!(engine.ledger().total(), engine.ledger().issued());
    }

    stop_deadlock_detector(detector);
}

/// Many passengers booking, cancelling and settling across shared rides.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());

    const RIDES: u32 = 8;
    const NUM_THREADS: u32 = 16;

    let rides: Vec<(Session, RideId)> = (0..RIDES)
        .map(|i| driver_with_ride(&engine, 500 + i, 4, dec!(3)))
        .collect();
    let rides = Arc::new(rides);
    let sessions: Vec<Session> = (1..=NUM_THREADS).map(|id| passenger(&engine, id)).collect();
    let requests = Arc::new(AtomicU64::new(1));

    let handles: Vec<_> = sessions
        .into_iter()
        .enumerate()
        .map(|(t, session)| {
            let engine = engine.clone();
            let rides = rides.clone();
            let requests = requests.clone();
            thread::spawn(move || {
                for i in 0..RIDES as usize {
                    let (driver, ride) = &rides[(t + i) % rides.len()];
                    let request = RequestId(requests.fetch_add(1, Ordering::SeqCst));
                    let _ = engine.book(&session, *ride, request);
                    let _ = engine.search_rides(&Default::default());

                    if t % 4 == 0 {
                        let request = RequestId(requests.fetch_add(1, Ordering::SeqCst));
                        let _ = engine.cancel_ride(driver, *ride, request);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    // Settle whatever is left.
    for (driver, ride) in rides.iter() {
        if engine.start_ride(driver, *ride).is_ok() {
            for key in engine.finish_ride(driver, *ride).unwrap() {
                let session = engine.session(key.passenger).unwrap();
                let request = RequestId(requests.fetch_add(1, Ordering::SeqCst));
                engine.confirm_trip(&session, *ride, request).unwrap();
            }
        }
    }

    stop_deadlock_detector(detector);

    assert_eq!(engine.balance(AccountRef::EscrowPool), Some(Decimal::ZERO));
    assert_eq!(engine.ledger().total(), engine.ledger().issued());
    for (_, ride) in rides.iter() {
        let ride = engine.ride(*ride).unwrap();
        assert!(ride.passengers.len() <= usize::from(ride.seats));
    }
}

/// Concurrent review submissions for the same trip store a single review.
#[test]
fn no_duplicate_reviews_under_contention() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::new());
    let (driver, ride) = driver_with_ride(&engine, 1, 1, dec!(5));
    let rider = passenger(&engine, 2);
    engine.book(&rider, ride, RequestId(1)).unwrap();
    engine.start_ride(&driver, ride).unwrap();
    engine.finish_ride(&driver, ride).unwrap();
    engine.confirm_trip(&rider, ride, RequestId(2)).unwrap();

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let engine = engine.clone();
            let rider = rider.clone();
            thread::spawn(move || engine.submit_review(&rider, ride, 1 + i % 5, "ok").is_ok())
        })
        .collect();

    let stored = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .filter(|ok| *ok)
        .count();

    stop_deadlock_detector(detector);

    assert_eq!(stored, 1);
    assert_eq!(engine.reviews_for(UserId(1)).len(), 1);
}
