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

//! Payment-callback reconciliation.
//!
//! Gateways deliver the outcome of a payment asynchronously and retry the
//! callback until it is acknowledged, so the same logical event arrives
//! multiple times, possibly out of order with enrollment activity. The
//! handler is idempotent end to end:
//!
//! 1. dispatch on the provider id and verify the payload signature,
//! 2. look up the transaction by order id (never create one),
//! 3. if already terminal, acknowledge with the recorded outcome and stop,
//! 4. otherwise record the outcome once and, on success, move every
//!    `PendingPayment` registration of that student and term to `Paid`.
//!
//! The batch step is per-registration all-or-nothing: one entry that lost
//! a race to a cancel is reported, not retried, and never blocks the rest.
//! No section lock is taken anywhere on this path; every mutation is a
//! conditional update guarded by the entity's own mutex.

use crate::base::{OrderId, RegistrationId};
use crate::billing::BillingEvent;
use crate::error::{CallbackError, EnrollError};
use crate::payment::{FinalizeResult, PaymentStatus};
use crate::registrar::Registrar;
use crate::registration::RegistrationStatus;
use chrono::Utc;

/// Acknowledgement returned to the webhook layer.
#[derive(Debug, Clone)]
pub enum CallbackAck {
    /// First callback for this order; the outcome was applied.
    Finalized(ReconcileReport),
    /// The order was already terminal. The recorded outcome is returned
    /// so the gateway receives a success acknowledgement and stops
    /// retrying, but nothing was re-applied.
    Replayed(PaymentStatus),
}

/// What a first-time reconciliation actually did.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub order: OrderId,
    pub outcome: PaymentStatus,
    /// Registrations moved to `Paid`.
    pub updated: Vec<RegistrationId>,
    /// Registrations that were `PendingPayment` at the scan but could not
    /// be finalized (e.g. a cancel won the race). Reported, never fatal.
    pub skipped: Vec<(RegistrationId, EnrollError)>,
    /// Whether a tuition-paid billing event was emitted.
    pub billing_emitted: bool,
}

impl Registrar {
    /// Handles one raw provider callback.
    ///
    /// Replaying the same payload any number of times yields the same
    /// final transaction and registration states as applying it once, and
    /// the tuition-credit side effect fires exactly once.
    ///
    /// # Errors
    ///
    /// Rejections ([`CallbackError`]) mean the gateway should retry:
    /// unknown provider, malformed payload, bad signature, or an order id
    /// with no transaction. None of them mutate any state.
    pub fn handle_callback(
        &self,
        provider: &str,
        raw_payload: &str,
    ) -> Result<CallbackAck, CallbackError> {
        let parsed = self.gateways().parse(provider, raw_payload).map_err(|err| {
            tracing::warn!(provider, %err, "callback rejected");
            err
        })?;

        let tx = self
            .payment_entry(&parsed.order_id)
            .ok_or_else(|| CallbackError::UnknownTransaction(parsed.order_id.clone()))?;

        let outcome = if parsed.success {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        };

        // Signature already verified above; the stored flag records that
        // computation for the audit trail.
        match tx.finalize(outcome, true, parsed.payload) {
            FinalizeResult::AlreadyFinal(recorded) => {
                tracing::warn!(
                    order = %parsed.order_id,
                    ?recorded,
                    "replayed callback acknowledged without reprocessing"
                );
                Ok(CallbackAck::Replayed(recorded))
            }
            FinalizeResult::Applied(PaymentStatus::Failed) => {
                tracing::info!(order = %parsed.order_id, code = %parsed.result_code, "payment failed");
                Ok(CallbackAck::Finalized(ReconcileReport {
                    order: parsed.order_id,
                    outcome: PaymentStatus::Failed,
                    updated: Vec::new(),
                    skipped: Vec::new(),
                    billing_emitted: false,
                }))
            }
            FinalizeResult::Applied(_) => {
                let student_id = tx.student_id();
                let term_id = tx.term_id();
                let amount = tx.amount();
                drop(tx);

                let mut updated = Vec::new();
                let mut skipped = Vec::new();
                for entry in self.registrations_iter() {
                    let reg = entry.value();
                    if reg.student_id() != student_id
                        || reg.status() != RegistrationStatus::PendingPayment
                        || self.section_term(reg.section_id()) != Some(term_id)
                    {
                        continue;
                    }
                    match reg.transition(RegistrationStatus::Paid) {
                        Ok(()) => updated.push(reg.id()),
                        // Lost a race (typically to a cancel) between the
                        // status scan and the conditional update.
                        Err(err) => {
                            tracing::warn!(registration = %reg.id(), %err, "skipped in paid batch");
                            skipped.push((reg.id(), err));
                        }
                    }
                }

                let billing_emitted = self.billing().emit_once(BillingEvent {
                    order: parsed.order_id.clone(),
                    student: student_id,
                    term: term_id,
                    amount,
                    emitted_at: Utc::now(),
                });

                tracing::info!(
                    order = %parsed.order_id,
                    %student_id,
                    %term_id,
                    paid = updated.len(),
                    skipped = skipped.len(),
                    "payment reconciled"
                );

                Ok(CallbackAck::Finalized(ReconcileReport {
                    order: parsed.order_id,
                    outcome: PaymentStatus::Success,
                    updated,
                    skipped,
                    billing_emitted,
                }))
            }
        }
    }
}
