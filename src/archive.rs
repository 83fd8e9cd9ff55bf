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

//! Write-once historical archive.
//!
//! The archive mirrors committed transactions, finished or cancelled rides,
//! disputes and review moderation for reporting. It is never read back as a
//! source of truth. Writes are batches appended *before* the matching state
//! change is applied: if the archive refuses a batch, the operation fails
//! and nothing changes.

use crate::LedgerError;
use crate::base::{ReviewId, UserId, ValidationKey};
use crate::ride::Ride;
use crate::transaction::TransactionRecord;
use crate::validation::ValidationStatus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive unavailable: {0}")]
    Unavailable(String),
}

impl From<ArchiveError> for LedgerError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Unavailable(reason) => LedgerError::UpstreamUnavailable(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Created,
    Edited,
    Deleted,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ArchiveRecord {
    Transaction(TransactionRecord),
    /// Final state of a finished or cancelled ride.
    Ride(Ride),
    Dispute {
        key: ValidationKey,
        status: ValidationStatus,
        comment: Option<String>,
        by: UserId,
    },
    Review {
        review: ReviewId,
        action: ReviewAction,
        by: UserId,
        rating: u8,
        comment: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchiveEntry {
    pub archived_at: DateTime<Utc>,
    pub record: ArchiveRecord,
}

/// Append-only store for historical records.
pub trait Archive: Send + Sync {
    /// Appends every record of `batch`, or none of them.
    fn append(&self, batch: Vec<ArchiveRecord>) -> Result<(), ArchiveError>;

    /// Entries archived within `range`, oldest first.
    fn query(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ArchiveEntry>, ArchiveError>;
}

/// In-process [`Archive`].
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Mutex<Vec<ArchiveEntry>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every entry, oldest first.
    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries.lock().clone()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match &entry.record {
                ArchiveRecord::Transaction(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Archive for MemoryArchive {
    fn append(&self, batch: Vec<ArchiveRecord>) -> Result<(), ArchiveError> {
        let archived_at = Utc::now();
        self.entries.lock().extend(
            batch
                .into_iter()
                .map(|record| ArchiveEntry { archived_at, record }),
        );
        Ok(())
    }

    fn query(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|entry| range.contains(&entry.archived_at))
            .cloned()
            .collect())
    }
}
