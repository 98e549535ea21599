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

//! Payment transactions and their single-shot finalization.
//!
//! A transaction is created `Pending` when payment is initiated and moves
//! to `Success` or `Failed` exactly once, no matter how many times the
//! gateway replays the callback. The raw payload of the finalizing
//! callback is kept for audit; transactions are never deleted.

use crate::base::{OrderId, StudentId, TermId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Payment transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Outcome of a finalization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeResult {
    /// First callback for this order; the outcome was recorded.
    Applied(PaymentStatus),
    /// The order was already terminal; nothing was re-applied.
    AlreadyFinal(PaymentStatus),
}

#[derive(Debug)]
struct PaymentData {
    order_id: OrderId,
    student_id: StudentId,
    term_id: TermId,
    amount: Decimal,
    provider: String,
    status: PaymentStatus,
    /// Computed by the gateway signature check of the finalizing callback.
    signature_valid: bool,
    /// Finalizing callback payload, kept verbatim for audit.
    raw_payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

/// One tuition payment against a student and term.
#[derive(Debug)]
pub struct PaymentTransaction {
    inner: Mutex<PaymentData>,
}

impl PaymentTransaction {
    pub fn new(
        order_id: OrderId,
        student_id: StudentId,
        term_id: TermId,
        amount: Decimal,
        provider: &str,
    ) -> Self {
        Self {
            inner: Mutex::new(PaymentData {
                order_id,
                student_id,
                term_id,
                amount,
                provider: provider.to_string(),
                status: PaymentStatus::Pending,
                signature_valid: false,
                raw_payload: None,
                created_at: Utc::now(),
                finalized_at: None,
            }),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.inner.lock().order_id.clone()
    }

    pub fn student_id(&self) -> StudentId {
        self.inner.lock().student_id
    }

    pub fn term_id(&self) -> TermId {
        self.inner.lock().term_id
    }

    pub fn amount(&self) -> Decimal {
        self.inner.lock().amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.lock().status
    }

    /// Records the callback outcome, exactly once.
    ///
    /// The terminal check and the write are a single conditional update
    /// under the entry's mutex, so two racing callbacks cannot both apply.
    /// The losing (or replayed) caller learns the recorded outcome via
    /// [`FinalizeResult::AlreadyFinal`] and must not repeat side effects.
    pub(crate) fn finalize(
        &self,
        outcome: PaymentStatus,
        signature_valid: bool,
        raw_payload: serde_json::Value,
    ) -> FinalizeResult {
        debug_assert!(outcome.is_terminal(), "finalize called with Pending");
        let mut data = self.inner.lock();
        if data.status.is_terminal() {
            return FinalizeResult::AlreadyFinal(data.status);
        }
        data.status = outcome;
        data.signature_valid = signature_valid;
        data.raw_payload = Some(raw_payload);
        data.finalized_at = Some(Utc::now());
        FinalizeResult::Applied(outcome)
    }

    /// Point-in-time copy for read paths and reports.
    pub fn snapshot(&self) -> PaymentSnapshot {
        let data = self.inner.lock();
        PaymentSnapshot {
            order: data.order_id.clone(),
            student: data.student_id,
            term: data.term_id,
            amount: data.amount,
            provider: data.provider.clone(),
            status: data.status,
            signature_valid: data.signature_valid,
            created_at: data.created_at,
            finalized_at: data.finalized_at,
        }
    }
}

/// Serializable view of a payment transaction.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub order: OrderId,
    pub student: StudentId,
    pub term: TermId,
    pub amount: Decimal,
    pub provider: String,
    pub status: PaymentStatus,
    pub signature_valid: bool,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Serialize for PaymentTransaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("PaymentTransaction", 8)?;
        state.serialize_field("order", &data.order_id)?;
        state.serialize_field("student", &data.student_id)?;
        state.serialize_field("term", &data.term_id)?;
        state.serialize_field("amount", &data.amount)?;
        state.serialize_field("provider", &data.provider)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("signature_valid", &data.signature_valid)?;
        state.serialize_field("finalized_at", &data.finalized_at)?;
        state.end()
    }
}
