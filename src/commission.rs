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

//! Commission and profit arithmetic.
//!
//! Pure functions over [`Decimal`] values, no I/O. The platform takes a
//! percentage cut, a payment-processing percentage, and a fixed fee per
//! sale; whatever remains is the seller payout.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Platform fee schedule applied to every note sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSchedule {
    /// Platform cut as a fraction of the price (0.10 = 10%).
    pub platform_percent: Decimal,
    /// Payment-processing cut as a fraction of the price.
    pub payment_percent: Decimal,
    /// Flat fee charged per sale.
    pub fixed_fee: Decimal,
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self {
            platform_percent: Decimal::new(10, 2),
            payment_percent: Decimal::new(3, 2),
            fixed_fee: Decimal::new(200, 2),
        }
    }
}

/// Result of splitting a note price into commission and payout.
///
/// Invariant: `commission + payout == price` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionBreakdown {
    pub commission: Decimal,
    pub payout: Decimal,
}

impl CommissionSchedule {
    /// Splits a price into the platform commission and the seller payout.
    ///
    /// The commission is clamped to `[0, price]`, so a low-priced note
    /// settles with a zero payout rather than a negative one.
    pub fn breakdown(&self, price: Decimal) -> CommissionBreakdown {
        let raw =
            self.platform_percent * price + self.fixed_fee + self.payment_percent * price;
        let commission = raw.min(price).max(Decimal::ZERO);
        CommissionBreakdown {
            commission,
            payout: price - commission,
        }
    }
}

/// Profit projection over a seller balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfitBreakdown {
    pub profit: Decimal,
    pub total: Decimal,
}

/// Computes `profit = balance * percent` and `total = balance + profit`,
/// both rounded to 2 decimal places, half-up.
pub fn profit(balance: Decimal, percent: Decimal) -> ProfitBreakdown {
    let profit = (balance * percent)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let total =
        (balance + profit).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    ProfitBreakdown { profit, total }
}
