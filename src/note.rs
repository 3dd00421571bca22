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

//! Purchasable study notes.
//!
//! A note tracks who bought it, how often it was downloaded, and one
//! review per buyer. Access rules live here: the owner always has access,
//! everyone else must buy first.

use crate::base::{NoteId, SaleId, UserId};
use crate::error::MarketError;
use crate::user::PurchasedNote;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A buyer's review of a note. One per reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: UserId,
    /// 1 to 5.
    pub rating: u8,
    pub comment: String,
}

#[derive(Debug)]
struct NoteData {
    note_id: NoteId,
    owner_id: UserId,
    title: String,
    price: Decimal,
    cover_path: String,
    file_path: String,
    purchased_by: HashSet<UserId>,
    /// Counts first downloads at purchase time and re-downloads.
    downloads: u64,
    reviews: HashMap<UserId, Review>,
}

impl NoteData {
    fn assert_invariants(&self) {
        debug_assert!(
            !self.purchased_by.contains(&self.owner_id),
            "Invariant violated: owner {} appears in purchased_by",
            self.owner_id
        );
    }

    fn grant_access(&mut self, buyer: UserId) -> Result<(), MarketError> {
        if buyer == self.owner_id {
            return Err(MarketError::SelfPurchase);
        }
        if !self.purchased_by.insert(buyer) {
            return Err(MarketError::AlreadyPurchased);
        }
        self.downloads += 1;
        self.assert_invariants();
        Ok(())
    }
}

/// Purchasable note document.
#[derive(Debug)]
pub struct Note {
    inner: Mutex<NoteData>,
}

impl Note {
    pub fn new(
        note_id: NoteId,
        owner_id: UserId,
        title: &str,
        price: Decimal,
        cover_path: &str,
        file_path: &str,
    ) -> Self {
        Self {
            inner: Mutex::new(NoteData {
                note_id,
                owner_id,
                title: title.to_owned(),
                price,
                cover_path: cover_path.to_owned(),
                file_path: file_path.to_owned(),
                purchased_by: HashSet::new(),
                downloads: 0,
                reviews: HashMap::new(),
            }),
        }
    }

    pub fn owner_id(&self) -> UserId {
        self.inner.lock().owner_id
    }

    pub fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    pub fn price(&self) -> Decimal {
        self.inner.lock().price
    }

    pub fn downloads(&self) -> u64 {
        self.inner.lock().downloads
    }

    pub fn buyer_count(&self) -> usize {
        self.inner.lock().purchased_by.len()
    }

    /// Owner or prior buyer.
    pub fn has_access(&self, user: UserId) -> bool {
        let data = self.inner.lock();
        user == data.owner_id || data.purchased_by.contains(&user)
    }

    pub fn is_purchased_by(&self, user: UserId) -> bool {
        self.inner.lock().purchased_by.contains(&user)
    }

    /// Records a purchase: adds the buyer and counts the initial download.
    ///
    /// # Errors
    ///
    /// - [`MarketError::SelfPurchase`] - buyer owns the note.
    /// - [`MarketError::AlreadyPurchased`] - buyer already has access.
    pub fn grant_access(&self, buyer: UserId) -> Result<(), MarketError> {
        self.inner.lock().grant_access(buyer)
    }

    /// Counts a re-download. Returns the new download total.
    ///
    /// # Errors
    ///
    /// - [`MarketError::AccessDenied`] - user is neither owner nor buyer.
    pub fn record_download(&self, user: UserId) -> Result<u64, MarketError> {
        let mut data = self.inner.lock();
        if user != data.owner_id && !data.purchased_by.contains(&user) {
            return Err(MarketError::AccessDenied);
        }
        data.downloads += 1;
        Ok(data.downloads)
    }

    /// Adds a review. Reviewers must have bought the note, which also
    /// rules out the owner reviewing their own work.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidRating`] - rating outside 1 to 5.
    /// - [`MarketError::AccessDenied`] - reviewer never bought the note.
    /// - [`MarketError::AlreadyReviewed`] - reviewer already has a review.
    pub fn add_review(
        &self,
        reviewer: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<(), MarketError> {
        if !(1..=5).contains(&rating) {
            return Err(MarketError::InvalidRating);
        }
        let mut data = self.inner.lock();
        if !data.purchased_by.contains(&reviewer) {
            return Err(MarketError::AccessDenied);
        }
        if data.reviews.contains_key(&reviewer) {
            return Err(MarketError::AlreadyReviewed);
        }
        data.reviews.insert(
            reviewer,
            Review {
                reviewer,
                rating,
                comment: comment.to_owned(),
            },
        );
        Ok(())
    }

    /// Replaces an existing review in place.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidRating`] - rating outside 1 to 5.
    /// - [`MarketError::ReviewNotFound`] - reviewer has no review here.
    pub fn update_review(
        &self,
        reviewer: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<(), MarketError> {
        if !(1..=5).contains(&rating) {
            return Err(MarketError::InvalidRating);
        }
        let mut data = self.inner.lock();
        match data.reviews.get_mut(&reviewer) {
            Some(review) => {
                review.rating = rating;
                review.comment = comment.to_owned();
                Ok(())
            }
            None => Err(MarketError::ReviewNotFound),
        }
    }

    pub fn review_by(&self, reviewer: UserId) -> Option<Review> {
        self.inner.lock().reviews.get(&reviewer).cloned()
    }

    pub fn review_count(&self) -> usize {
        self.inner.lock().reviews.len()
    }

    /// Mean rating across reviews, 2 decimal places.
    pub fn average_rating(&self) -> Option<Decimal> {
        let data = self.inner.lock();
        if data.reviews.is_empty() {
            return None;
        }
        let sum: u64 = data.reviews.values().map(|r| u64::from(r.rating)).sum();
        Some((Decimal::from(sum) / Decimal::from(data.reviews.len() as u64)).round_dp(2))
    }

    /// Builds the denormalized snapshot stored on the buyer at settlement.
    pub fn purchase_snapshot(&self, sale_id: SaleId) -> PurchasedNote {
        let data = self.inner.lock();
        PurchasedNote {
            note_id: data.note_id,
            sale_id,
            title: data.title.clone(),
            price: data.price,
            cover_path: data.cover_path.clone(),
            file_path: data.file_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn note() -> Note {
        Note::new(
            NoteId(1),
            UserId(1),
            "Organic Chemistry Summary",
            dec!(15.00),
            "covers/oc.png",
            "files/oc.pdf",
        )
    }

    #[test]
    fn owner_cannot_be_granted_access() {
        let note = note();
        assert_eq!(note.grant_access(UserId(1)), Err(MarketError::SelfPurchase));
        assert_eq!(note.buyer_count(), 0);
        assert_eq!(note.downloads(), 0);
    }

    #[test]
    fn duplicate_grant_rejected() {
        let note = note();
        note.grant_access(UserId(2)).unwrap();
        assert_eq!(
            note.grant_access(UserId(2)),
            Err(MarketError::AlreadyPurchased)
        );
        assert_eq!(note.buyer_count(), 1);
        assert_eq!(note.downloads(), 1);
    }

    #[test]
    fn grant_counts_initial_download() {
        let note = note();
        note.grant_access(UserId(2)).unwrap();
        note.grant_access(UserId(3)).unwrap();
        assert_eq!(note.downloads(), 2);
    }

    #[test]
    fn redownload_requires_access() {
        let note = note();
        assert_eq!(
            note.record_download(UserId(2)),
            Err(MarketError::AccessDenied)
        );

        note.grant_access(UserId(2)).unwrap();
        assert_eq!(note.record_download(UserId(2)), Ok(2));
        // Owner can always pull their own file.
        assert_eq!(note.record_download(UserId(1)), Ok(3));
    }

    #[test]
    fn review_requires_purchase() {
        let note = note();
        assert_eq!(
            note.add_review(UserId(2), 4, "solid"),
            Err(MarketError::AccessDenied)
        );
    }

    #[test]
    fn one_review_per_buyer() {
        let note = note();
        note.grant_access(UserId(2)).unwrap();
        note.add_review(UserId(2), 4, "solid").unwrap();
        assert_eq!(
            note.add_review(UserId(2), 5, "actually great"),
            Err(MarketError::AlreadyReviewed)
        );

        note.update_review(UserId(2), 5, "actually great").unwrap();
        assert_eq!(note.review_by(UserId(2)).unwrap().rating, 5);
        assert_eq!(note.review_count(), 1);
    }

    #[test]
    fn update_without_review_fails() {
        let note = note();
        note.grant_access(UserId(2)).unwrap();
        assert_eq!(
            note.update_review(UserId(2), 3, "meh"),
            Err(MarketError::ReviewNotFound)
        );
    }

    #[test]
    fn rating_range_enforced() {
        let note = note();
        note.grant_access(UserId(2)).unwrap();
        assert_eq!(
            note.add_review(UserId(2), 0, ""),
            Err(MarketError::InvalidRating)
        );
        assert_eq!(
            note.add_review(UserId(2), 6, ""),
            Err(MarketError::InvalidRating)
        );
    }

    #[test]
    fn average_rating_rounds() {
        let note = note();
        for (buyer, rating) in [(2, 5), (3, 4), (4, 4)] {
            note.grant_access(UserId(buyer)).unwrap();
            note.add_review(UserId(buyer), rating, "").unwrap();
        }
        // (5 + 4 + 4) / 3 = 4.3333... -> 4.33
        assert_eq!(note.average_rating(), Some(dec!(4.33)));
    }

    #[test]
    fn snapshot_copies_current_fields() {
        let note = note();
        let snapshot = note.purchase_snapshot(SaleId(9));
        assert_eq!(snapshot.note_id, NoteId(1));
        assert_eq!(snapshot.sale_id, SaleId(9));
        assert_eq!(snapshot.title, "Organic Chemistry Summary");
        assert_eq!(snapshot.price, dec!(15.00));
    }
}
