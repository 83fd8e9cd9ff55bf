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

//! Ledger configuration, read from `ecoride.toml`.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! platform's standard tariff: a 2-credit service fee per booking, 1 credit
//! of compensation on refunded disputes and 20 credits granted at sign-up.
//!
//! ```toml
//! [credits]
//! service_fee = "2"
//! refund_compensation = "1"
//! signup_bonus = "20"
//! ```

use crate::ride::MAX_PRICE;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Canonical config file name.
pub const CONFIG_FILE_NAME: &str = "ecoride.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub credits: CreditSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditSettings {
    /// Charged to the passenger on every booking, credited to the platform pool.
    #[serde(default = "default_service_fee")]
    pub service_fee: Decimal,
    /// Paid from the platform pool to a passenger whose dispute is upheld.
    #[serde(default = "default_refund_compensation")]
    pub refund_compensation: Decimal,
    /// Opening balance of every new user account.
    #[serde(default = "default_signup_bonus")]
    pub signup_bonus: Decimal,
}

fn default_service_fee() -> Decimal {
    dec!(2)
}

fn default_refund_compensation() -> Decimal {
    dec!(1)
}

fn default_signup_bonus() -> Decimal {
    dec!(20)
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            service_fee: default_service_fee(),
            refund_compensation: default_refund_compensation(),
            signup_bonus: default_signup_bonus(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let credits = &self.credits;
        for (name, value) in [
            ("service_fee", credits.service_fee),
            ("refund_compensation", credits.refund_compensation),
            ("signup_bonus", credits.signup_bonus),
        ] {
            if value < Decimal::ZERO {
                return Err(ConfigError::Invalid(format!("{name} must not be negative")));
            }
            if value > MAX_PRICE {
                return Err(ConfigError::Invalid(format!(
                    "{name} must not exceed {MAX_PRICE} credits"
                )));
            }
        }
        // Compensation is paid out of collected fees.
        if credits.refund_compensation > credits.service_fee {
            return Err(ConfigError::Invalid(
                "refund_compensation must not exceed service_fee".into(),
            ));
        }
        Ok(())
    }
}
