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

//! Per-request caller context.
//!
//! A [`Session`] is built by [`Engine::session`](crate::Engine::session) from
//! the stored user and handed explicitly to every operation that needs to
//! know who is acting. Sessions cannot be constructed outside the crate, so
//! holding one proves the user existed and was active when it was issued.

use crate::LedgerError;
use crate::base::UserId;
use crate::user::{Capacity, Role, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user: UserId,
    role: Role,
    capacities: Vec<Capacity>,
}

impl Session {
    pub(crate) fn for_user(user: &User) -> Self {
        Self {
            user: user.id,
            role: user.role,
            capacities: user.capacities.clone(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Employee | Role::Administrator)
    }

    pub(crate) fn require_capacity(&self, capacity: Capacity) -> Result<(), LedgerError> {
        if self.capacities.contains(&capacity) {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(match capacity {
                Capacity::Driver => "driver capacity required",
                Capacity::Passenger => "passenger capacity required",
            }))
        }
    }

    /// Employees and administrators moderate disputes and reviews.
    pub(crate) fn require_staff(&self) -> Result<(), LedgerError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("employee or administrator role required"))
        }
    }

    pub(crate) fn require_admin(&self) -> Result<(), LedgerError> {
        if self.role == Role::Administrator {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("administrator role required"))
        }
    }
}
