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

//! User accounts.
//!
//! A user carries a seller balance (credited on each sale of their notes,
//! debited on completed withdrawals) and a denormalized history of the
//! notes they bought.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use notemarket_rs::{User, UserId};
//!
//! let user = User::new(UserId(1), "alice");
//! assert_eq!(user.balance(), dec!(0.00));
//! ```

use crate::base::{NoteId, SaleId, UserId};
use crate::error::MarketError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashSet;

/// Denormalized snapshot of a purchased note, kept on the buyer.
///
/// Captured at settlement time so the buyer's library survives later
/// edits to the note itself.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct PurchasedNote {
    pub note_id: NoteId,
    pub sale_id: SaleId,
    pub title: String,
    pub price: Decimal,
    pub cover_path: String,
    pub file_path: String,
}

#[derive(Debug)]
struct UserData {
    user_id: UserId,
    display_name: String,
    balance: Decimal,
    /// One entry per note, in purchase order.
    purchased_notes: Vec<PurchasedNote>,
    likes: HashSet<NoteId>,
}

impl UserData {
    fn new(user_id: UserId, display_name: String) -> Self {
        Self {
            user_id,
            display_name,
            balance: Decimal::ZERO,
            purchased_notes: Vec::new(),
            likes: HashSet::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Increases the balance. Settlement guarantees a non-negative amount.
    fn credit(&mut self, amount: Decimal) {
        debug_assert!(amount >= Decimal::ZERO, "credit of negative amount");
        self.balance += amount;
        self.assert_invariants();
    }

    /// Decreases the balance.
    fn debit(&mut self, amount: Decimal) -> Result<(), MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(MarketError::InsufficientBalance);
        }
        self.balance -= amount;
        self.assert_invariants();
        Ok(())
    }

    /// Appends a purchase snapshot. Returns false if the note is already
    /// in the history.
    fn record_purchase(&mut self, snapshot: PurchasedNote) -> bool {
        if self
            .purchased_notes
            .iter()
            .any(|p| p.note_id == snapshot.note_id)
        {
            return false;
        }
        self.purchased_notes.push(snapshot);
        true
    }
}

/// Marketplace user account.
#[derive(Debug)]
pub struct User {
    inner: Mutex<UserData>,
}

impl User {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(user_id: UserId, display_name: &str) -> Self {
        Self {
            inner: Mutex::new(UserData::new(user_id, display_name.to_owned())),
        }
    }

    pub fn id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn display_name(&self) -> String {
        self.inner.lock().display_name.clone()
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Credits seller earnings onto the balance.
    ///
    /// Amounts come out of a commission split and are never negative; a
    /// zero payout (fully-clamped commission) is a valid credit.
    pub fn credit(&self, amount: Decimal) {
        self.inner.lock().credit(amount);
    }

    /// Debits the balance, failing rather than going negative.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidAmount`] - amount is zero or negative.
    /// - [`MarketError::InsufficientBalance`] - balance does not cover it.
    pub fn debit(&self, amount: Decimal) -> Result<(), MarketError> {
        self.inner.lock().debit(amount)
    }

    /// Appends a purchase snapshot to the buyer's library.
    ///
    /// Returns false (and stores nothing) if the note is already there.
    pub fn record_purchase(&self, snapshot: PurchasedNote) -> bool {
        self.inner.lock().record_purchase(snapshot)
    }

    pub fn has_purchased(&self, note_id: NoteId) -> bool {
        self.inner
            .lock()
            .purchased_notes
            .iter()
            .any(|p| p.note_id == note_id)
    }

    pub fn purchased_notes(&self) -> Vec<PurchasedNote> {
        self.inner.lock().purchased_notes.clone()
    }

    pub fn purchase_count(&self) -> usize {
        self.inner.lock().purchased_notes.len()
    }

    /// Toggles a like on a note. Returns true if the note is now liked.
    pub fn toggle_like(&self, note_id: NoteId) -> bool {
        let mut data = self.inner.lock();
        if data.likes.remove(&note_id) {
            false
        } else {
            data.likes.insert(note_id);
            true
        }
    }

    pub fn likes(&self, note_id: NoteId) -> bool {
        self.inner.lock().likes.contains(&note_id)
    }
}

impl Serialize for User {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("User", 4)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("name", &data.display_name)?;
        state.serialize_field("balance", &data.balance.round_dp(User::DECIMAL_PRECISION))?;
        state.serialize_field("purchases", &data.purchased_notes.len())?;
        state.end()
    }
}
