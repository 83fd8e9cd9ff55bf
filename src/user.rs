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

//! Users, their platform role and the capacities they ride in.

use crate::LedgerError;
use crate::base::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Single platform role ("role" on the user document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Employee,
    Administrator,
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "utilisateur" => Ok(Role::User),
            "employee" | "employé" | "employe" => Ok(Role::Employee),
            "administrator" | "admin" | "administrateur" => Ok(Role::Administrator),
            other => Err(LedgerError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// How a user takes part in rides ("roles" on the user document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Driver,
    Passenger,
}

impl FromStr for Capacity {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "driver" | "chauffeur" => Ok(Capacity::Driver),
            "passenger" | "passager" => Ok(Capacity::Passenger),
            other => Err(LedgerError::InvalidInput(format!(
                "unknown capacity '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub role: Role,
    pub capacities: Vec<Capacity>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_capacity(&self, capacity: Capacity) -> bool {
        self.capacities.contains(&capacity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub role: Role,
    pub capacities: Vec<Capacity>,
}

impl NewUser {
    /// A passenger-only account with the default role.
    pub fn passenger(email: &str, display_name: &str) -> Self {
        Self {
            email: email.to_string(),
            display_name: display_name.to_string(),
            photo_url: None,
            role: Role::User,
            capacities: vec![Capacity::Passenger],
        }
    }

    pub(crate) fn into_user(self, id: UserId) -> Result<User, LedgerError> {
        let email = self.email.trim().to_lowercase();
        // Shape check only; the identity provider owns real verification.
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(LedgerError::InvalidInput(format!("invalid email '{email}'")));
        }
        let display_name = self.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(LedgerError::InvalidInput("display name is empty".into()));
        }

        let mut capacities = Vec::with_capacity(self.capacities.len());
        for capacity in self.capacities {
            if !capacities.contains(&capacity) {
                capacities.push(capacity);
            }
        }

        Ok(User {
            id,
            email,
            display_name,
            photo_url: self.photo_url,
            role: self.role,
            capacities,
            status: UserStatus::Active,
            created_at: Utc::now(),
        })
    }
}
