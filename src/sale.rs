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

//! Sale records and the purchase idempotency ledger.
//!
//! A [`Sale`] is written exactly once per successful purchase and never
//! mutated. The [`SaleLedger`] owns the `(note, buyer)` idempotency key:
//! a purchase first *reserves* the key, then performs the settlement
//! writes, then *records* the finished sale. Retried or concurrent
//! requests for the same key fail at the reservation, before anything
//! is written.

use crate::base::{NoteId, SaleId, UserId};
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Immutable record of one purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sale {
    pub sale_id: SaleId,
    pub note_id: NoteId,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    /// Seller payout. `amount + commission` equals the note price.
    pub amount: Decimal,
    pub commission: Decimal,
    /// Invoice reference issued by the payment gateway.
    pub invoice_id: String,
    pub created_at: DateTime<Utc>,
}

/// Slot states for one `(note, buyer)` key.
#[derive(Debug, Clone)]
enum Slot {
    /// Key claimed by an in-flight purchase.
    Reserved,
    Recorded(Arc<Sale>),
}

/// Concurrent sale log with purchase deduplication.
///
/// A [`DashMap`] keyed by `(note, buyer)` gives O(1) atomic
/// check-and-claim through the entry API; that claim is the transaction
/// boundary for the whole purchase flow.
#[derive(Debug)]
pub struct SaleLedger {
    slots: DashMap<(NoteId, UserId), Slot>,
    next_sale_id: AtomicU64,
}

impl Default for SaleLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SaleLedger {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_sale_id: AtomicU64::new(1),
        }
    }

    /// Atomically claims the `(note, buyer)` key for an in-flight purchase.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::AlreadyPurchased`] if the key is reserved or
    /// recorded; exactly one of any set of concurrent claims succeeds.
    pub fn reserve(&self, note_id: NoteId, buyer_id: UserId) -> Result<(), MarketError> {
        match self.slots.entry((note_id, buyer_id)) {
            Entry::Occupied(_) => Err(MarketError::AlreadyPurchased),
            Entry::Vacant(entry) => {
                entry.insert(Slot::Reserved);
                Ok(())
            }
        }
    }

    /// Releases a reservation whose purchase failed a later precondition.
    pub fn abort(&self, note_id: NoteId, buyer_id: UserId) {
        self.slots.remove(&(note_id, buyer_id));
    }

    /// Allocates the next sale ID.
    pub fn next_sale_id(&self) -> SaleId {
        SaleId(self.next_sale_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Finalizes a reserved key with the finished sale record.
    pub fn record(&self, sale: Sale) -> Arc<Sale> {
        let key = (sale.note_id, sale.buyer_id);
        let sale = Arc::new(sale);
        self.slots.insert(key, Slot::Recorded(Arc::clone(&sale)));
        sale
    }

    /// Looks up a finished sale. Reservations are not visible here.
    pub fn get(&self, note_id: NoteId, buyer_id: UserId) -> Option<Arc<Sale>> {
        match self.slots.get(&(note_id, buyer_id))?.value() {
            Slot::Recorded(sale) => Some(Arc::clone(sale)),
            Slot::Reserved => None,
        }
    }

    /// All finished sales in settlement order.
    pub fn sales(&self) -> Vec<Arc<Sale>> {
        let mut sales: Vec<Arc<Sale>> = self
            .slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Recorded(sale) => Some(Arc::clone(sale)),
                Slot::Reserved => None,
            })
            .collect();
        sales.sort_by_key(|sale| sale.sale_id);
        sales
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Recorded(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
