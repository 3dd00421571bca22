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

//! Error types for marketplace operations.

use thiserror::Error;

/// Marketplace operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    /// Referenced user does not exist
    #[error("user not found")]
    UserNotFound,

    /// Referenced note does not exist
    #[error("note not found")]
    NoteNotFound,

    /// Referenced withdrawal does not exist
    #[error("withdrawal not found")]
    WithdrawalNotFound,

    /// Referenced course does not exist
    #[error("course not found")]
    CourseNotFound,

    /// Referenced course module does not exist
    #[error("course module not found")]
    ModuleNotFound,

    /// Referenced notification does not exist
    #[error("notification not found")]
    NotificationNotFound,

    /// A note cannot be purchased by its owner
    #[error("cannot purchase own note")]
    SelfPurchase,

    /// The buyer already owns this note
    #[error("note already purchased")]
    AlreadyPurchased,

    /// Caller does not own or has not purchased the target
    #[error("access denied")]
    AccessDenied,

    /// The reviewer already reviewed this note
    #[error("note already reviewed")]
    AlreadyReviewed,

    /// No review by this user exists on the note
    #[error("review not found")]
    ReviewNotFound,

    /// Rating is outside the 1 to 5 range
    #[error("invalid rating (must be 1 to 5)")]
    InvalidRating,

    /// A seller cannot rate themselves
    #[error("cannot rate own account")]
    SelfRating,

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit would exceed the available balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Withdrawal status transition is not allowed
    #[error("invalid withdrawal status transition")]
    InvalidTransition,
}

#[cfg(test)]
mod tests {
    use super::MarketError;

    #[test]
    fn error_display_messages() {
        assert_eq!(MarketError::UserNotFound.to_string(), "user not found");
        assert_eq!(MarketError::NoteNotFound.to_string(), "note not found");
        assert_eq!(
            MarketError::WithdrawalNotFound.to_string(),
            "withdrawal not found"
        );
        assert_eq!(MarketError::CourseNotFound.to_string(), "course not found");
        assert_eq!(
            MarketError::SelfPurchase.to_string(),
            "cannot purchase own note"
        );
        assert_eq!(
            MarketError::AlreadyPurchased.to_string(),
            "note already purchased"
        );
        assert_eq!(MarketError::AccessDenied.to_string(), "access denied");
        assert_eq!(
            MarketError::InvalidRating.to_string(),
            "invalid rating (must be 1 to 5)"
        );
        assert_eq!(
            MarketError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            MarketError::InsufficientBalance.to_string(),
            "insufficient balance"
        );
        assert_eq!(
            MarketError::InvalidTransition.to_string(),
            "invalid withdrawal status transition"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = MarketError::InsufficientBalance;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
