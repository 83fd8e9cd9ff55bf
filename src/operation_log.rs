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

//! Idempotency log for financial writes.
//!
//! Every booking, settlement and cancellation carries a [`RequestId`]. The
//! key is reserved before the write starts and recorded once it commits, so
//! a replayed request is refused instead of charging twice, while a request
//! that failed may be retried with the same key.

use crate::LedgerError;
use crate::base::RequestId;
use crate::transaction::TransactionKind;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// A write holding this key is in progress.
    Reserved,
    Committed(TransactionKind),
}

/// A thread-safe idempotency log.
///
/// Request keys live in a [`DashMap`] keyed by [`RequestId`]; committed keys
/// are also pushed onto a [`SegQueue`] in the order they committed, until a
/// reader takes them with [`OperationLog::drain_committed`].
#[derive(Debug)]
pub struct OperationLog {
    operations: DashMap<RequestId, OperationState>,
    committed: SegQueue<(RequestId, TransactionKind)>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
            committed: SegQueue::new(),
        }
    }

    /// Reserves `request` for a write about to start.
    ///
    /// The reservation is released when the returned guard is dropped
    /// without [`Reservation::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateRequest`] if the key is reserved or
    /// already committed.
    pub fn reserve(&self, request: RequestId) -> Result<Reservation<'_>, LedgerError> {
        // Entry API makes check-and-insert atomic across threads.
        match self.operations.entry(request) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateRequest(request)),
            Entry::Vacant(entry) => {
                entry.insert(OperationState::Reserved);
                Ok(Reservation {
                    log: self,
                    request,
                    committed: false,
                })
            }
        }
    }

    pub fn state(&self, request: RequestId) -> Option<OperationState> {
        self.operations.get(&request).map(|entry| *entry.value())
    }

    /// Takes every operation committed since the last drain, oldest first.
    ///
    /// Keys stay refused after draining; only the journal is emptied.
    pub fn drain_committed(&self) -> Vec<(RequestId, TransactionKind)> {
        std::iter::from_fn(|| self.committed.pop()).collect()
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending claim on a [`RequestId`].
#[derive(Debug)]
pub struct Reservation<'a> {
    log: &'a OperationLog,
    request: RequestId,
    committed: bool,
}

impl Reservation<'_> {
    pub fn commit(mut self, kind: TransactionKind) {
        self.log
            .operations
            .insert(self.request, OperationState::Committed(kind));
        self.log.committed.push((self.request, kind));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.log.operations.remove(&self.request);
        }
    }
}
