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

use chrono::{Duration, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer, WriterBuilder};
use ecoride_ledger::{
    AccountRef, CONFIG_FILE_NAME, Capacity, DisputeOutcome, Engine, LedgerConfig, LedgerError,
    NewRide, NewUser, NewVehicle, RequestId, RideId, Role, TransactionKind, UserId, UserStatus,
    ValidationKey,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// EcoRide Ledger - Replay marketplace operations from a CSV file
///
/// Reads operations from a CSV file and outputs account balances to stdout.
/// Supports registration, vehicles, ride lifecycle, bookings, settlement,
/// disputes and reviews.
#[derive(Parser, Debug)]
#[command(name = "ecoride-ledger")]
#[command(about = "Replays carpooling marketplace operations and prints credit balances", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,actor,subject,detail,key,origin,destination
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Tariff configuration (TOML). Defaults to ./ecoride.toml when present.
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Also write the committed request keys, in commit order, to this CSV file
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ecoride_ledger=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .or_else(|| Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|path| path.exists()));
    let config = match config_path.as_deref().map(LedgerConfig::load) {
        None => LedgerConfig::default(),
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_operations(BufReader::new(file), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_accounts(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if let Some(path) = args.journal {
        let written = File::create(&path)
            .map_err(csv::Error::from)
            .and_then(|file| write_journal(&engine, file));
        if let Err(e) = written {
            eprintln!("Error writing journal '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

#[derive(Error, Debug)]
enum RowError {
    #[error("malformed row: {0}")]
    Malformed(String),

    #[error(transparent)]
    Rejected(#[from] LedgerError),
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, actor, subject, detail, key, origin, destination`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    actor: u32,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    detail: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    key: Option<u64>,
    #[serde(default)]
    origin: String,
    #[serde(default)]
    destination: String,
}

impl CsvRecord {
    fn ride(&self) -> Result<RideId, RowError> {
        parse(&self.subject, "ride id").map(RideId)
    }

    fn user(&self) -> Result<UserId, RowError> {
        parse(&self.subject, "user id").map(UserId)
    }

    fn request(&self) -> Result<RequestId, RowError> {
        self.key
            .map(RequestId)
            .ok_or_else(|| RowError::Malformed(format!("'{}' needs an idempotency key", self.op)))
    }

    /// Applies the row to `engine` on behalf of `actor`.
    fn apply(&self, engine: &Engine) -> Result<(), RowError> {
        let actor = UserId(self.actor);
        if self.op.eq_ignore_ascii_case("register") {
            return register(engine, actor, &self.subject, &self.detail);
        }

        let session = engine.session(actor)?;
        match self.op.to_lowercase().as_str() {
            "block" | "unblock" => {
                let status = if self.op.eq_ignore_ascii_case("block") {
                    UserStatus::Blocked
                } else {
                    UserStatus::Active
                };
                engine.set_user_status(&session, self.user()?, status)?;
            }
            "vehicle" => {
                // detail: "<seats>" or "<seats>:electric"
                let (seats, energy) = self
                    .detail
                    .split_once(':')
                    .unwrap_or((self.detail.as_str(), ""));
                engine.register_vehicle(
                    &session,
                    NewVehicle {
                        plate: self.subject.clone(),
                        model: self.origin.clone(),
                        seats: parse(seats, "seat count")?,
                        electric: energy.eq_ignore_ascii_case("electric"),
                        preferences: Default::default(),
                    },
                )?;
            }
            "publish" => {
                let departure = Utc::now() + Duration::days(1);
                let ride = engine.publish_ride(
                    &session,
                    NewRide {
                        vehicle: self.subject.clone(),
                        origin: self.origin.clone(),
                        destination: self.destination.clone(),
                        departure,
                        arrival: None,
                        price: parse::<Decimal>(&self.detail, "price")?,
                    },
                )?;
                debug!(ride = %ride, "published from replay");
            }
            "book" => {
                engine.book(&session, self.ride()?, self.request()?)?;
            }
            "start" => engine.start_ride(&session, self.ride()?)?,
            "finish" => {
                engine.finish_ride(&session, self.ride()?)?;
            }
            "cancel" => {
                engine.cancel_ride(&session, self.ride()?, self.request()?)?;
            }
            "confirm" => {
                engine.confirm_trip(&session, self.ride()?, self.request()?)?;
            }
            "dispute" => engine.open_dispute(&session, self.ride()?, &self.detail)?,
            "resolve" => {
                // subject: "<ride>/<passenger>"
                let (ride, passenger) = self
                    .subject
                    .split_once('/')
                    .ok_or_else(|| RowError::Malformed(format!("bad validation '{}'", self.subject)))?;
                let key = ValidationKey::new(
                    RideId(parse(ride, "ride id")?),
                    UserId(parse(passenger, "user id")?),
                );
                let outcome = match self.detail.to_lowercase().as_str() {
                    "driver" => DisputeOutcome::Driver,
                    "passenger" => DisputeOutcome::Passenger,
                    other => return Err(RowError::Malformed(format!("unknown outcome '{other}'"))),
                };
                engine.resolve_dispute(&session, key, outcome, self.request()?)?;
            }
            "review" => {
                engine.submit_review(
                    &session,
                    self.ride()?,
                    parse(&self.detail, "rating")?,
                    &self.origin,
                )?;
            }
            other => return Err(RowError::Malformed(format!("unknown operation '{other}'"))),
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, RowError> {
    raw.parse()
        .map_err(|_| RowError::Malformed(format!("invalid {what} '{raw}'")))
}

/// `register,<id>,<role>,<capacities>`; capacities are `;`-separated.
fn register(engine: &Engine, id: UserId, role: &str, capacities: &str) -> Result<(), RowError> {
    let mut new_user = NewUser::passenger(&format!("user{id}@ecoride.invalid"), &format!("User {id}"));
    if !role.is_empty() {
        new_user.role = role
            .parse::<Role>()
            .map_err(|_| RowError::Malformed(format!("unknown role '{role}'")))?;
    }
    if !capacities.is_empty() {
        new_user.capacities = capacities
            .split(';')
            .map(|capacity| {
                capacity
                    .trim()
                    .parse::<Capacity>()
                    .map_err(|_| RowError::Malformed(format!("unknown capacity '{capacity}'")))
            })
            .collect::<Result<_, _>>()?;
    }
    engine.register_user(id, new_user)?;
    Ok(())
}

/// Replay operations from a CSV reader.
///
/// Rows are streamed, so the input can be arbitrarily large. Ride ids are
/// assigned in publish order starting at 1. Malformed rows and rejected
/// operations are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `op, actor, subject, detail, key, origin, destination`
///
/// | op | subject | detail | key | origin | destination |
/// |----|---------|--------|-----|--------|-------------|
/// | `register` | role | capacities (`driver;passenger`) | | | |
/// | `block` / `unblock` | user | | | | |
/// | `vehicle` | plate | seats, optionally `:electric` | | model | |
/// | `publish` | plate | price | | from | to |
/// | `book` / `cancel` / `confirm` | ride | | request | | |
/// | `start` / `finish` | ride | | | | |
/// | `dispute` | ride | comment | | | |
/// | `resolve` | `ride/passenger` | `driver` or `passenger` | request | | |
/// | `review` | ride | rating | | comment | |
///
/// # Example
///
/// ```csv
/// op,actor,subject,detail,key,origin,destination
/// register,1,,driver,,,
/// register,2,,,,,
/// vehicle,1,AB-123-CD,4:electric,,Zoe,
/// publish,1,AB-123-CD,10,,Paris,Lyon
/// book,2,1,,1,,
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn process_operations<R: Read>(reader: R, config: LedgerConfig) -> Result<Engine, csv::Error> {
    let engine = Engine::with_config(config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };

        if let Err(e) = record.apply(&engine) {
            warn!(line = line + 2, op = %record.op, actor = record.actor, error = %e, "skipping row");
        }
    }

    Ok(engine)
}

#[derive(Serialize)]
struct BalanceRow {
    account: AccountRef,
    balance: Decimal,
}

/// Write every account balance to a CSV writer, pools first, users by id.
///
/// # CSV Format
///
/// Columns: `account, balance`
///
/// ```csv
/// account,balance
/// platform,2.00
/// escrow,10.00
/// user:1,20.00
/// user:2,8.00
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut rows: Vec<BalanceRow> = engine
        .ledger()
        .accounts()
        .map(|entry| {
            let mut balance = entry.balance();
            balance.rescale(2);
            BalanceRow {
                account: *entry.key(),
                balance,
            }
        })
        .collect();
    rows.sort_by_key(|row| row.account);

    for row in &rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct JournalRow {
    request: RequestId,
    kind: TransactionKind,
}

/// Write the operations committed during the replay, in commit order.
///
/// ```csv
/// request,kind
/// 1,booking
/// 2,payout
/// ```
///
/// Drains the engine's operation log, so a second call writes only the header.
pub fn write_journal<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    let committed = engine.operations().drain_committed();
    debug!(operations = committed.len(), "writing journal");

    // Header is written explicitly so an empty journal still has one.
    wtr.write_record(["request", "kind"])?;
    for (request, kind) in committed {
        wtr.serialize(JournalRow { request, kind })?;
    }
    wtr.flush()?;
    Ok(())
}
