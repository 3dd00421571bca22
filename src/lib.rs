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

//! # Notemarket
//!
//! This library provides the settlement engine for a study-note
//! marketplace: note purchases with a platform commission split, seller
//! balances, a reviewed withdrawal lifecycle, and fire-and-forget
//! notifications.
//!
//! ## Core Components
//!
//! - [`MarketEngine`]: Central engine owning all collections and flows
//! - [`User`]: Account with seller balance and purchase history
//! - [`Note`]: Purchasable document with buyers, downloads, and reviews
//! - [`Sale`]: Immutable record of one settled purchase
//! - [`Withdrawal`]: Payout request with a reviewed state machine
//! - [`MarketError`]: Error types for every operation
//!
//! ## Example
//!
//! ```
//! use notemarket_rs::MarketEngine;
//! use rust_decimal_macros::dec;
//!
//! let engine = MarketEngine::new();
//!
//! let seller = engine.register_user("alice");
//! let buyer = engine.register_user("bob");
//! let note = engine
//!     .publish_note(seller, "Linear Algebra II", dec!(100.00), "covers/la2.png", "files/la2.pdf")
//!     .unwrap();
//!
//! // 10% platform + 3% payment + 2.00 fixed fee on 100.00
//! let sale = engine.purchase(note, buyer, "inv-001").unwrap();
//! assert_eq!(sale.commission, dec!(15.00));
//! assert_eq!(sale.amount, dec!(85.00));
//!
//! let account = engine.get_user(&seller).unwrap();
//! assert_eq!(account.balance(), dec!(85.00));
//! ```
//!
//! ## Thread Safety
//!
//! All engine operations take `&self` and are safe to call from many
//! threads; concurrent purchases of the same note by the same buyer
//! settle exactly once.

pub mod base;
pub mod commission;
pub mod course;
mod engine;
pub mod error;
pub mod note;
pub mod outbox;
pub mod sale;
pub mod user;
pub mod withdrawal;

pub use base::{CourseId, NoteId, SaleId, UserId, WithdrawalId};
pub use commission::{CommissionBreakdown, CommissionSchedule, ProfitBreakdown, profit};
pub use course::{Course, CourseModule, Lesson};
pub use engine::MarketEngine;
pub use error::MarketError;
pub use note::{Note, Review};
pub use outbox::{Notification, NotificationKind, NotificationSink, Outbox, SinkError};
pub use sale::{Sale, SaleLedger};
pub use user::{PurchasedNote, User};
pub use withdrawal::{RoutingInfo, Withdrawal, WithdrawalDecision, WithdrawalStatus};
