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

//! Driver reviews ("avis").
//!
//! Reviews are not part of the credit flow; the store only guarantees one
//! review per (ride, author) and computes a driver's mean rating on read.

use crate::LedgerError;
use crate::archive::{ArchiveRecord, ReviewAction};
use crate::base::{ReviewId, RideId, UserId, ValidationKey};
use crate::engine::Engine;
use crate::session::Session;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub ride: RideId,
    pub driver: UserId,
    pub author: UserId,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn check_rating(rating: u8) -> Result<(), LedgerError> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(LedgerError::InvalidRating)
    }
}

#[derive(Debug)]
pub struct ReviewStore {
    reviews: DashMap<ReviewId, Review>,
    by_ride_author: DashMap<(RideId, UserId), ReviewId>,
    next_id: AtomicU64,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self {
            reviews: DashMap::new(),
            by_ride_author: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores a new review. `publish` runs once the review is built and
    /// before it becomes visible; its error aborts the insert.
    pub(crate) fn insert<F>(
        &self,
        ride: RideId,
        driver: UserId,
        author: UserId,
        rating: u8,
        comment: &str,
        publish: F,
    ) -> Result<Review, LedgerError>
    where
        F: FnOnce(&Review) -> Result<(), LedgerError>,
    {
        check_rating(rating)?;
        match self.by_ride_author.entry((ride, author)) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(format!(
                "review of ride {ride} by user {author}"
            ))),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let review = Review {
                    id: ReviewId(self.next_id.fetch_add(1, Ordering::Relaxed)),
                    ride,
                    driver,
                    author,
                    rating,
                    comment: comment.trim().to_string(),
                    created_at: now,
                    updated_at: now,
                };
                publish(&review)?;
                slot.insert(review.id);
                self.reviews.insert(review.id, review.clone());
                Ok(review)
            }
        }
    }

    /// Applies `change` to a copy of the review, runs `publish` on the
    /// result and stores it only if both succeed.
    pub(crate) fn update<F, P>(
        &self,
        id: ReviewId,
        change: F,
        publish: P,
    ) -> Result<Review, LedgerError>
    where
        F: FnOnce(&mut Review),
        P: FnOnce(&Review) -> Result<(), LedgerError>,
    {
        let mut entry = self
            .reviews
            .get_mut(&id)
            .ok_or(LedgerError::ReviewNotFound(id))?;
        let mut edited = entry.value().clone();
        change(&mut edited);
        check_rating(edited.rating)?;
        edited.updated_at = Utc::now();
        publish(&edited)?;
        *entry = edited.clone();
        Ok(edited)
    }

    pub(crate) fn remove<F>(&self, id: ReviewId, publish: F) -> Result<Review, LedgerError>
    where
        F: FnOnce(&Review) -> Result<(), LedgerError>,
    {
        // The entry stays locked across `publish` so concurrent deletes of
        // the same review audit it once. It is released before the index is
        // touched; `insert` locks the index first.
        let review = match self.reviews.entry(id) {
            Entry::Vacant(_) => return Err(LedgerError::ReviewNotFound(id)),
            Entry::Occupied(entry) => {
                publish(entry.get())?;
                entry.remove()
            }
        };
        self.by_ride_author.remove(&(review.ride, review.author));
        Ok(review)
    }

    pub fn get(&self, id: ReviewId) -> Option<Review> {
        self.reviews.get(&id).map(|entry| entry.value().clone())
    }

    /// Reviews of `driver`, oldest first.
    pub fn for_driver(&self, driver: UserId) -> Vec<Review> {
        let mut reviews: Vec<Review> = self
            .reviews
            .iter()
            .filter(|entry| entry.driver == driver)
            .map(|entry| entry.value().clone())
            .collect();
        reviews.sort_by_key(|review| review.id);
        reviews
    }

    /// Mean rating of `driver`, rounded to two decimals. `None` without reviews.
    pub fn average_rating(&self, driver: UserId) -> Option<Decimal> {
        let (sum, count) = self
            .reviews
            .iter()
            .filter(|entry| entry.driver == driver)
            .fold((0u64, 0u64), |(sum, count), entry| {
                (sum + u64::from(entry.rating), count + 1)
            });
        if count == 0 {
            return None;
        }
        Some((Decimal::from(sum) / Decimal::from(count)).round_dp(2))
    }
}

impl Default for ReviewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Rates the driver of a ride the author travelled on.
    ///
    /// The author's validation for the ride must have ended with the driver
    /// being paid (confirmed, or resolved in the driver's favour).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ValidationNotFound`] - author was not aboard the finished ride.
    /// - [`LedgerError::InvalidState`] - trip not confirmed yet, disputed or refunded.
    /// - [`LedgerError::InvalidRating`] - rating outside 1..=5.
    /// - [`LedgerError::AlreadyExists`] - author already reviewed this ride.
    pub fn submit_review(
        &self,
        session: &Session,
        ride: RideId,
        rating: u8,
        comment: &str,
    ) -> Result<Review, LedgerError> {
        let author = session.user_id();
        self.ensure_active(author)?;
        let validation = self
            .validation(ValidationKey::new(ride, author))
            .ok_or(LedgerError::ValidationNotFound(ValidationKey::new(ride, author)))?;
        if !validation.status.is_accepted() {
            return Err(LedgerError::InvalidState {
                expected: "validated",
                found: validation.status.as_str(),
            });
        }

        let review = self
            .reviews
            .insert(ride, validation.driver, author, rating, comment, |review| {
                self.audit(review, ReviewAction::Created, author)
            })?;
        info!(review = %review.id, driver = %review.driver, rating, "review submitted");
        Ok(review)
    }

    /// Staff moderation: replaces the rating and/or the comment.
    pub fn edit_review(
        &self,
        session: &Session,
        id: ReviewId,
        rating: Option<u8>,
        comment: Option<&str>,
    ) -> Result<Review, LedgerError> {
        session.require_staff()?;
        let by = session.user_id();
        self.ensure_active(by)?;
        self.reviews
            .update(
                id,
                |review| {
                    if let Some(rating) = rating {
                        review.rating = rating;
                    }
                    if let Some(comment) = comment {
                        review.comment = comment.trim().to_string();
                    }
                },
                |review| self.audit(review, ReviewAction::Edited, by),
            )
            .inspect(|review| info!(review = %id, rating = review.rating, by = %by, "review edited"))
            .inspect_err(|err| warn!(review = %id, %err, "review edit rejected"))
    }

    /// Staff moderation: removes a review.
    pub fn delete_review(&self, session: &Session, id: ReviewId) -> Result<Review, LedgerError> {
        session.require_staff()?;
        let by = session.user_id();
        self.ensure_active(by)?;
        let review = self
            .reviews
            .remove(id, |review| self.audit(review, ReviewAction::Deleted, by))?;
        info!(review = %id, by = %by, "review deleted");
        Ok(review)
    }

    pub fn reviews_for(&self, driver: UserId) -> Vec<Review> {
        self.reviews.for_driver(driver)
    }

    pub fn average_rating(&self, driver: UserId) -> Option<Decimal> {
        self.reviews.average_rating(driver)
    }

    fn audit(&self, review: &Review, action: ReviewAction, by: UserId) -> Result<(), LedgerError> {
        self.archive
            .append(vec![ArchiveRecord::Review {
                review: review.id,
                action,
                by,
                rating: review.rating,
                comment: review.comment.clone(),
            }])
            .inspect_err(|err| warn!(review = %review.id, ?action, %err, "archive rejected review audit"))?;
        Ok(())
    }
}
