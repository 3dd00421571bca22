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

//! Marketplace settlement engine.
//!
//! The [`MarketEngine`] owns every collection (users, notes, sales,
//! withdrawals, courses, ratings, notifications) and performs the two
//! money flows:
//!
//! - **Purchase**: split the note price into commission and payout,
//!   record an immutable sale, grant the buyer access, credit the
//!   seller, snapshot the purchase onto the buyer.
//! - **Withdrawal**: pending requests are reviewed, and an accepted
//!   request debits the balance exactly once at completion.
//!
//! # Atomicity
//!
//! Purchases have no rollback problem by construction: everything that
//! can fail (lookups, self-purchase, duplicate detection) happens before
//! the first write, and the [`SaleLedger`] reservation on the
//! `(note, buyer)` key serializes concurrent attempts. Withdrawal
//! completion runs its debit inside the withdrawal's status lock, so
//! re-invocation cannot debit twice.
//!
//! # Thread Safety
//!
//! Collections are [`DashMap`]s; per-entity state sits behind its own
//! mutex. Entity locks are leaves: no operation holds two of them at
//! once, except withdrawal completion, which takes withdrawal → user in
//! that fixed order.

use crate::base::{CourseId, NoteId, UserId, WithdrawalId};
use crate::commission::{self, CommissionSchedule, ProfitBreakdown};
use crate::course::Course;
use crate::error::MarketError;
use crate::note::Note;
use crate::outbox::{Notification, NotificationKind, NotificationSink, Outbox};
use crate::sale::{Sale, SaleLedger};
use crate::user::User;
use crate::withdrawal::{RoutingInfo, Withdrawal, WithdrawalDecision};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

/// Settlement engine over the marketplace collections.
///
/// # Invariants
///
/// - At most one sale per `(note, buyer)` pair, ever.
/// - A note owner never appears among its buyers.
/// - `sale.amount + sale.commission` equals the note price at sale time.
/// - User balances never go negative.
/// - A withdrawal debits its user exactly once, on the
///   `Accepted -> Completed` transition.
pub struct MarketEngine {
    users: DashMap<UserId, User>,
    notes: DashMap<NoteId, Note>,
    withdrawals: DashMap<WithdrawalId, Withdrawal>,
    courses: DashMap<CourseId, Course>,
    /// `(seller, rater) -> score`; re-rating overwrites.
    seller_ratings: DashMap<(UserId, UserId), u8>,
    ledger: SaleLedger,
    outbox: Outbox,
    schedule: CommissionSchedule,
    sink: Option<Box<dyn NotificationSink>>,
    next_user_id: AtomicU32,
    next_note_id: AtomicU32,
    next_withdrawal_id: AtomicU32,
    next_course_id: AtomicU32,
}

impl MarketEngine {
    /// Creates an empty engine with the default fee schedule and no
    /// live-push sink.
    pub fn new() -> Self {
        MarketEngine {
            users: DashMap::new(),
            notes: DashMap::new(),
            withdrawals: DashMap::new(),
            courses: DashMap::new(),
            seller_ratings: DashMap::new(),
            ledger: SaleLedger::new(),
            outbox: Outbox::new(),
            schedule: CommissionSchedule::default(),
            sink: None,
            next_user_id: AtomicU32::new(1),
            next_note_id: AtomicU32::new(1),
            next_withdrawal_id: AtomicU32::new(1),
            next_course_id: AtomicU32::new(1),
        }
    }

    /// Replaces the fee schedule.
    pub fn with_schedule(mut self, schedule: CommissionSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Attaches a live-push sink used by [`deliver_notifications`].
    ///
    /// [`deliver_notifications`]: MarketEngine::deliver_notifications
    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn schedule(&self) -> CommissionSchedule {
        self.schedule
    }

    // === Accounts & catalog ===

    /// Registers a user. IDs are assigned sequentially from 1.
    pub fn register_user(&self, display_name: &str) -> UserId {
        let user_id = UserId(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        self.users.insert(user_id, User::new(user_id, display_name));
        user_id
    }

    /// Publishes a note for sale.
    ///
    /// # Errors
    ///
    /// - [`MarketError::UserNotFound`] - owner is not registered.
    /// - [`MarketError::InvalidAmount`] - price is zero or negative.
    pub fn publish_note(
        &self,
        owner_id: UserId,
        title: &str,
        price: Decimal,
        cover_path: &str,
        file_path: &str,
    ) -> Result<NoteId, MarketError> {
        if !self.users.contains_key(&owner_id) {
            return Err(MarketError::UserNotFound);
        }
        if price <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        let note_id = NoteId(self.next_note_id.fetch_add(1, Ordering::Relaxed));
        self.notes.insert(
            note_id,
            Note::new(note_id, owner_id, title, price, cover_path, file_path),
        );
        Ok(note_id)
    }

    // === Purchase settlement ===

    /// Settles a note purchase and returns the immutable sale record.
    ///
    /// `invoice_id` is the payment gateway's reference for the already
    /// collected payment; it is recorded on the sale, not verified.
    ///
    /// # Errors
    ///
    /// - [`MarketError::NoteNotFound`] / [`MarketError::UserNotFound`] -
    ///   missing participant; nothing written.
    /// - [`MarketError::SelfPurchase`] - buyer owns the note.
    /// - [`MarketError::AlreadyPurchased`] - this `(note, buyer)` pair
    ///   already settled (or is settling on another thread); the losing
    ///   call writes nothing and the seller balance is untouched.
    pub fn purchase(
        &self,
        note_id: NoteId,
        buyer_id: UserId,
        invoice_id: &str,
    ) -> Result<Arc<Sale>, MarketError> {
        let note = self.notes.get(&note_id).ok_or(MarketError::NoteNotFound)?;
        let seller_id = note.owner_id();
        if buyer_id == seller_id {
            return Err(MarketError::SelfPurchase);
        }
        // At most one users-map guard is held at a time; holding buyer and
        // seller together could deadlock against an insert on their shard.
        if !self.users.contains_key(&buyer_id) {
            return Err(MarketError::UserNotFound);
        }
        let seller = self.users.get(&seller_id).ok_or(MarketError::UserNotFound)?;

        // The reservation is the transaction boundary: of any set of
        // concurrent or retried requests for this key, exactly one gets
        // past this line. Everything before it is read-only.
        self.ledger.reserve(note_id, buyer_id)?;

        if let Err(err) = note.grant_access(buyer_id) {
            // Reachable only if the note was mutated outside a purchase.
            self.ledger.abort(note_id, buyer_id);
            return Err(err);
        }

        let price = note.price();
        let split = self.schedule.breakdown(price);
        let sale = self.ledger.record(Sale {
            sale_id: self.ledger.next_sale_id(),
            note_id,
            seller_id,
            buyer_id,
            amount: split.payout,
            commission: split.commission,
            invoice_id: invoice_id.to_owned(),
            created_at: Utc::now(),
        });

        // Nothing below can fail: a recorded sale always has the seller
        // credited and the buyer's library updated.
        seller.credit(split.payout);
        drop(seller);
        // Users are never removed, so the buyer looked up above still exists.
        if let Some(buyer) = self.users.get(&buyer_id) {
            let recorded = buyer.record_purchase(note.purchase_snapshot(sale.sale_id));
            debug_assert!(recorded, "ledger reservation guarantees a fresh snapshot");
        }

        let title = note.title();
        self.outbox.emit(Notification::new(
            buyer_id,
            NotificationKind::Purchase,
            "Purchase complete",
            &format!("You bought \"{title}\" for {price}"),
        ));
        self.outbox.emit(Notification::new(
            seller_id,
            NotificationKind::Sale,
            "Note sold",
            &format!("\"{title}\" sold for {price}, your payout is {}", split.payout),
        ));

        info!(
            sale = %sale.sale_id,
            note = %note_id,
            buyer = %buyer_id,
            seller = %seller_id,
            amount = %sale.amount,
            commission = %sale.commission,
            "sale settled"
        );
        Ok(sale)
    }

    /// Counts a re-download of an already accessible note.
    pub fn record_download(&self, note_id: NoteId, user_id: UserId) -> Result<u64, MarketError> {
        if !self.users.contains_key(&user_id) {
            return Err(MarketError::UserNotFound);
        }
        let note = self.notes.get(&note_id).ok_or(MarketError::NoteNotFound)?;
        note.record_download(user_id)
    }

    // === Reviews & ratings ===

    /// Adds a buyer review to a note and notifies the owner.
    pub fn add_review(
        &self,
        note_id: NoteId,
        reviewer: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<(), MarketError> {
        if !self.users.contains_key(&reviewer) {
            return Err(MarketError::UserNotFound);
        }
        let note = self.notes.get(&note_id).ok_or(MarketError::NoteNotFound)?;
        note.add_review(reviewer, rating, comment)?;

        self.outbox.emit(Notification::new(
            note.owner_id(),
            NotificationKind::Review,
            "New review",
            &format!("\"{}\" received a {rating}-star review", note.title()),
        ));
        Ok(())
    }

    /// Replaces an existing review.
    pub fn update_review(
        &self,
        note_id: NoteId,
        reviewer: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<(), MarketError> {
        let note = self.notes.get(&note_id).ok_or(MarketError::NoteNotFound)?;
        note.update_review(reviewer, rating, comment)
    }

    /// Rates a seller. Raters must have bought at least one of the
    /// seller's notes; re-rating overwrites the previous score.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidRating`] - score outside 1 to 5.
    /// - [`MarketError::SelfRating`] - seller rating themselves.
    /// - [`MarketError::UserNotFound`] - unknown seller or rater.
    /// - [`MarketError::AccessDenied`] - rater never bought from seller.
    pub fn rate_seller(
        &self,
        seller_id: UserId,
        rater_id: UserId,
        score: u8,
    ) -> Result<(), MarketError> {
        if !(1..=5).contains(&score) {
            return Err(MarketError::InvalidRating);
        }
        if seller_id == rater_id {
            return Err(MarketError::SelfRating);
        }
        if !self.users.contains_key(&seller_id) {
            return Err(MarketError::UserNotFound);
        }
        let rater = self.users.get(&rater_id).ok_or(MarketError::UserNotFound)?;

        let bought_from_seller = rater.purchased_notes().iter().any(|p| {
            self.notes
                .get(&p.note_id)
                .is_some_and(|note| note.owner_id() == seller_id)
        });
        if !bought_from_seller {
            return Err(MarketError::AccessDenied);
        }

        self.seller_ratings.insert((seller_id, rater_id), score);
        Ok(())
    }

    /// Mean seller score, 2 decimal places.
    pub fn seller_rating(&self, seller_id: UserId) -> Option<Decimal> {
        let scores: Vec<u8> = self
            .seller_ratings
            .iter()
            .filter(|entry| entry.key().0 == seller_id)
            .map(|entry| *entry.value())
            .collect();
        if scores.is_empty() {
            return None;
        }
        let sum: u64 = scores.iter().map(|&s| u64::from(s)).sum();
        Some((Decimal::from(sum) / Decimal::from(scores.len() as u64)).round_dp(2))
    }

    /// Toggles a like. Returns true if the note is now liked.
    pub fn toggle_like(&self, user_id: UserId, note_id: NoteId) -> Result<bool, MarketError> {
        if !self.notes.contains_key(&note_id) {
            return Err(MarketError::NoteNotFound);
        }
        let user = self.users.get(&user_id).ok_or(MarketError::UserNotFound)?;
        Ok(user.toggle_like(note_id))
    }

    // === Withdrawal settlement ===

    /// Opens a pending withdrawal request.
    ///
    /// The balance check here is advisory; purchases may change the
    /// balance before completion, where the authoritative check runs.
    ///
    /// # Errors
    ///
    /// - [`MarketError::UserNotFound`] - unknown user.
    /// - [`MarketError::InvalidAmount`] - amount zero or negative.
    /// - [`MarketError::InsufficientBalance`] - amount exceeds the
    ///   current balance.
    pub fn request_withdrawal(
        &self,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<WithdrawalId, MarketError> {
        let user = self.users.get(&user_id).ok_or(MarketError::UserNotFound)?;
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        if amount > user.balance() {
            return Err(MarketError::InsufficientBalance);
        }

        let withdrawal_id = WithdrawalId(self.next_withdrawal_id.fetch_add(1, Ordering::Relaxed));
        self.withdrawals
            .insert(withdrawal_id, Withdrawal::new(withdrawal_id, user_id, amount));

        self.outbox.emit(Notification::new(
            user_id,
            NotificationKind::Withdrawal,
            "Withdrawal requested",
            &format!("Your withdrawal of {amount} is pending review"),
        ));
        Ok(withdrawal_id)
    }

    /// Accepts or rejects a pending withdrawal.
    pub fn review_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        decision: WithdrawalDecision,
    ) -> Result<(), MarketError> {
        let withdrawal = self
            .withdrawals
            .get(&withdrawal_id)
            .ok_or(MarketError::WithdrawalNotFound)?;
        withdrawal.review(decision)?;

        let verdict = match decision {
            WithdrawalDecision::Accept => "accepted",
            WithdrawalDecision::Reject => "rejected",
        };
        self.outbox.emit(Notification::new(
            withdrawal.user_id(),
            NotificationKind::Withdrawal,
            "Withdrawal reviewed",
            &format!("Your withdrawal of {} was {verdict}", withdrawal.amount()),
        ));
        Ok(())
    }

    /// Completes an accepted withdrawal: debits the balance exactly once,
    /// stores routing metadata, and returns the remaining balance.
    ///
    /// # Errors
    ///
    /// - [`MarketError::WithdrawalNotFound`] / [`MarketError::UserNotFound`]
    /// - [`MarketError::InvalidTransition`] - not `Accepted` (a pending
    ///   withdrawal must be accepted first; a completed one stays
    ///   completed and is not debited again).
    /// - [`MarketError::InsufficientBalance`] - balance no longer covers
    ///   the amount; the withdrawal stays `Accepted`.
    pub fn complete_withdrawal(
        &self,
        withdrawal_id: WithdrawalId,
        routing_number: &str,
        routing_date: DateTime<Utc>,
    ) -> Result<Decimal, MarketError> {
        let withdrawal = self
            .withdrawals
            .get(&withdrawal_id)
            .ok_or(MarketError::WithdrawalNotFound)?;
        let user_id = withdrawal.user_id();
        let user = self.users.get(&user_id).ok_or(MarketError::UserNotFound)?;

        // Status check and debit share the withdrawal lock; lock order is
        // withdrawal -> user, everywhere.
        withdrawal.complete_with(
            RoutingInfo {
                number: routing_number.to_owned(),
                date: routing_date,
            },
            |amount| user.debit(amount),
        )?;

        let balance = user.balance();
        self.outbox.emit(Notification::new(
            user_id,
            NotificationKind::Withdrawal,
            "Withdrawal completed",
            &format!(
                "Your withdrawal of {} was paid out, remaining balance {balance}",
                withdrawal.amount()
            ),
        ));

        info!(
            withdrawal = %withdrawal_id,
            user = %user_id,
            amount = %withdrawal.amount(),
            %balance,
            "withdrawal settled"
        );
        Ok(balance)
    }

    // === Courses ===

    /// Creates an empty course owned by `author_id`.
    pub fn create_course(&self, author_id: UserId, title: &str) -> Result<CourseId, MarketError> {
        if !self.users.contains_key(&author_id) {
            return Err(MarketError::UserNotFound);
        }
        let course_id = CourseId(self.next_course_id.fetch_add(1, Ordering::Relaxed));
        self.courses
            .insert(course_id, Course::new(course_id, author_id, title));
        Ok(course_id)
    }

    /// Appends a module to a course. Returns the module index.
    pub fn add_module(
        &self,
        course_id: CourseId,
        author_id: UserId,
        title: &str,
    ) -> Result<usize, MarketError> {
        let course = self
            .courses
            .get(&course_id)
            .ok_or(MarketError::CourseNotFound)?;
        course.add_module(author_id, title)
    }

    /// Appends a lesson to a course module.
    pub fn add_lesson(
        &self,
        course_id: CourseId,
        author_id: UserId,
        module_index: usize,
        title: &str,
        video_path: &str,
    ) -> Result<(), MarketError> {
        let course = self
            .courses
            .get(&course_id)
            .ok_or(MarketError::CourseNotFound)?;
        course.add_lesson(author_id, module_index, title, video_path)
    }

    // === Notifications & reporting ===

    /// Broadcasts an announcement to every registered user.
    pub fn announce(&self, title: &str, message: &str) {
        for user in self.users.iter() {
            self.outbox.emit(Notification::new(
                *user.key(),
                NotificationKind::Announcement,
                title,
                message,
            ));
        }
    }

    /// Drains queued notifications into inboxes (and the sink, if any).
    /// Returns the number delivered.
    pub fn deliver_notifications(&self) -> usize {
        self.outbox.deliver(self.sink.as_deref())
    }

    /// A user's inbox, oldest first. Call
    /// [`deliver_notifications`](MarketEngine::deliver_notifications)
    /// first to flush the queue.
    pub fn notifications(&self, user_id: UserId) -> Vec<Notification> {
        self.outbox.inbox(user_id)
    }

    pub fn mark_notification_read(
        &self,
        user_id: UserId,
        index: usize,
    ) -> Result<(), MarketError> {
        self.outbox.mark_read(user_id, index)
    }

    pub fn unread_count(&self, user_id: UserId) -> usize {
        self.outbox.unread_count(user_id)
    }

    /// Projects the platform profit share over a seller's live balance.
    pub fn seller_profit(
        &self,
        user_id: UserId,
        percent: Decimal,
    ) -> Result<ProfitBreakdown, MarketError> {
        let user = self.users.get(&user_id).ok_or(MarketError::UserNotFound)?;
        Ok(commission::profit(user.balance(), percent))
    }

    // === Read surface ===

    pub fn get_user(
        &self,
        user_id: &UserId,
    ) -> Option<dashmap::mapref::one::Ref<'_, UserId, User>> {
        self.users.get(user_id)
    }

    pub fn get_note(
        &self,
        note_id: &NoteId,
    ) -> Option<dashmap::mapref::one::Ref<'_, NoteId, Note>> {
        self.notes.get(note_id)
    }

    pub fn get_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Option<dashmap::mapref::one::Ref<'_, WithdrawalId, Withdrawal>> {
        self.withdrawals.get(withdrawal_id)
    }

    pub fn get_course(
        &self,
        course_id: &CourseId,
    ) -> Option<dashmap::mapref::one::Ref<'_, CourseId, Course>> {
        self.courses.get(course_id)
    }

    /// Returns an iterator over all user accounts.
    ///
    /// Useful for generating balance reports.
    pub fn users(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, User>> {
        self.users.iter()
    }

    /// The sale for a `(note, buyer)` pair, if settled.
    pub fn get_sale(&self, note_id: NoteId, buyer_id: UserId) -> Option<Arc<Sale>> {
        self.ledger.get(note_id, buyer_id)
    }

    /// All sales in settlement order.
    pub fn sales(&self) -> Vec<Arc<Sale>> {
        self.ledger.sales()
    }
}

impl Default for MarketEngine {
    fn default() -> Self {
        Self::new()
    }
}
