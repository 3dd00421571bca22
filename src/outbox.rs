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

//! Notification outbox.
//!
//! Settlement code emits notifications into a lock-free queue and moves
//! on; nothing in the purchase or withdrawal path waits on delivery.
//! [`Outbox::deliver`] later drains the queue into per-user inboxes and,
//! if a [`NotificationSink`] is attached, pushes each record over it.
//! A sink failure is logged and the record is kept; delivery problems
//! never surface to the operation that triggered the notification.

use crate::base::UserId;
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Notification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Purchase,
    Sale,
    Withdrawal,
    Review,
    Announcement,
}

/// A message for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: UserId, kind: NotificationKind, title: &str, message: &str) -> Self {
        Self {
            user_id,
            title: title.to_owned(),
            message: message.to_owned(),
            kind,
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Error raised by a live-push sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("notification sink failed: {0}")]
pub struct SinkError(pub String);

/// Live-push seam for notifications (e.g. a connected client).
///
/// Implementations must not block for long; delivery runs on whatever
/// thread calls [`Outbox::deliver`].
pub trait NotificationSink: Send + Sync {
    fn push(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Lock-free notification queue plus per-user inboxes.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: SegQueue<Notification>,
    inboxes: DashMap<UserId, Vec<Notification>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            pending: SegQueue::new(),
            inboxes: DashMap::new(),
        }
    }

    /// Enqueues a notification. Never blocks, never fails.
    pub fn emit(&self, notification: Notification) {
        self.pending.push(notification);
    }

    /// Number of notifications emitted but not yet delivered.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drains the queue into inboxes, pushing each record over `sink`
    /// when one is attached. Returns the number of records delivered.
    ///
    /// Sink failures are logged and the record is stored anyway; the
    /// user finds it in their inbox on the next read.
    pub fn deliver(&self, sink: Option<&dyn NotificationSink>) -> usize {
        let mut delivered = 0;
        while let Some(notification) = self.pending.pop() {
            if let Some(sink) = sink {
                if let Err(err) = sink.push(&notification) {
                    warn!(user = %notification.user_id, %err, "live push failed, keeping record");
                }
            }
            self.inboxes
                .entry(notification.user_id)
                .or_default()
                .push(notification);
            delivered += 1;
        }
        delivered
    }

    /// Snapshot of a user's inbox, oldest first.
    pub fn inbox(&self, user_id: UserId) -> Vec<Notification> {
        self.inboxes
            .get(&user_id)
            .map(|inbox| inbox.clone())
            .unwrap_or_default()
    }

    /// Marks the notification at `index` (inbox order) as read.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::NotificationNotFound`] if the user has no
    /// inbox or the index is out of range.
    pub fn mark_read(&self, user_id: UserId, index: usize) -> Result<(), MarketError> {
        let mut inbox = self
            .inboxes
            .get_mut(&user_id)
            .ok_or(MarketError::NotificationNotFound)?;
        let notification = inbox
            .get_mut(index)
            .ok_or(MarketError::NotificationNotFound)?;
        notification.read = true;
        Ok(())
    }

    pub fn unread_count(&self, user_id: UserId) -> usize {
        self.inboxes
            .get(&user_id)
            .map(|inbox| inbox.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }
}
