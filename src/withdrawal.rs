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

//! Withdrawal requests.
//!
//! Implemented state machine:
//!
//  Pending ──accept──► Accepted ──complete──► Completed
//     │
//     └──reject──► Rejected
//!
//! The balance debit happens exactly once, inside [`Withdrawal::complete_with`],
//! while the status lock is held. Completing anything but an `Accepted`
//! withdrawal fails, so a retried completion cannot debit twice.

use crate::base::{UserId, WithdrawalId};
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Withdrawal lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

/// Reviewer verdict on a pending withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalDecision {
    Accept,
    Reject,
}

/// Payout routing metadata, set only on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub number: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug)]
struct WithdrawalData {
    withdrawal_id: WithdrawalId,
    user_id: UserId,
    amount: Decimal,
    status: WithdrawalStatus,
    routing: Option<RoutingInfo>,
}

/// A user's request to pay out part of their seller balance.
#[derive(Debug)]
pub struct Withdrawal {
    inner: Mutex<WithdrawalData>,
}

impl Withdrawal {
    pub fn new(withdrawal_id: WithdrawalId, user_id: UserId, amount: Decimal) -> Self {
        Self {
            inner: Mutex::new(WithdrawalData {
                withdrawal_id,
                user_id,
                amount,
                status: WithdrawalStatus::Pending,
                routing: None,
            }),
        }
    }

    pub fn id(&self) -> WithdrawalId {
        self.inner.lock().withdrawal_id
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn amount(&self) -> Decimal {
        self.inner.lock().amount
    }

    pub fn status(&self) -> WithdrawalStatus {
        self.inner.lock().status
    }

    pub fn routing(&self) -> Option<RoutingInfo> {
        self.inner.lock().routing.clone()
    }

    /// Applies a reviewer decision to a pending withdrawal.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::InvalidTransition`] unless the current
    /// status is `Pending`.
    pub fn review(&self, decision: WithdrawalDecision) -> Result<(), MarketError> {
        let mut data = self.inner.lock();
        if data.status != WithdrawalStatus::Pending {
            return Err(MarketError::InvalidTransition);
        }
        data.status = match decision {
            WithdrawalDecision::Accept => WithdrawalStatus::Accepted,
            WithdrawalDecision::Reject => WithdrawalStatus::Rejected,
        };
        Ok(())
    }

    /// Completes an accepted withdrawal, running `debit` inside the
    /// status critical section.
    ///
    /// The status is checked and the debit applied under one lock, so a
    /// concurrent or retried completion observes `Completed` and fails
    /// without touching the balance. If the debit itself fails, the
    /// withdrawal stays `Accepted` and no routing metadata is stored.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidTransition`] - status is not `Accepted`
    ///   (this includes `Pending`: completion requires a prior accept).
    /// - Any error returned by `debit`.
    pub fn complete_with<F>(&self, routing: RoutingInfo, debit: F) -> Result<(), MarketError>
    where
        F: FnOnce(Decimal) -> Result<(), MarketError>,
    {
        let mut data = self.inner.lock();
        if data.status != WithdrawalStatus::Accepted {
            return Err(MarketError::InvalidTransition);
        }
        debit(data.amount)?;
        data.status = WithdrawalStatus::Completed;
        data.routing = Some(routing);
        Ok(())
    }
}
