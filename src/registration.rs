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

//! Registration ledger entries and their status state machine.
//!
//! Permitted transitions:
//!
//! ```text
//! Registered ──────► PendingApproval ──────► Approved
//!     │                    │                    │
//!     ├────────────────────┴────────────────────┤
//!     ▼                                         ▼
//! Cancelled ◄──── PendingPayment ◄──────────────┘
//!                      │
//!                      └──► Paid ──► Completed
//! ```
//!
//! `Cancelled` and `Completed` are terminal. `Paid → Cancelled` is
//! deliberately absent: once payment is recorded, a racing cancel request
//! loses and is rejected as an invalid transition. Registrations are never
//! deleted; cancellation is a status, so the ledger keeps its audit trail.

use crate::base::{RegistrationId, SectionId, StudentId};
use crate::error::EnrollError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Status of a registration ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Initial status after a successful register operation.
    Registered,
    /// Waiting in the approval workflow (managed externally).
    PendingApproval,
    /// Approval granted; tuition not yet billed.
    Approved,
    /// Tuition billed; awaiting the gateway's payment outcome.
    PendingPayment,
    /// Payment confirmed by the reconciliation handler.
    Paid,
    /// Terminal: withdrawn or payment failed/timed out.
    Cancelled,
    /// Terminal: term closed with payment settled.
    Completed,
}

impl RegistrationStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Active registrations hold a seat and block duplicates.
    pub fn is_active(&self) -> bool {
        *self != Self::Cancelled
    }

    /// Whether `self -> to` appears in the permitted transition table.
    pub fn can_transition_to(&self, to: Self) -> bool {
        use RegistrationStatus::*;
        matches!(
            (*self, to),
            (Registered, PendingApproval)
                | (Registered, PendingPayment)
                | (Registered, Cancelled)
                | (PendingApproval, Approved)
                | (PendingApproval, Cancelled)
                | (Approved, PendingPayment)
                | (Approved, Cancelled)
                | (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Paid, Completed)
        )
    }
}

#[derive(Debug)]
struct RegistrationData {
    id: RegistrationId,
    student_id: StudentId,
    section_id: SectionId,
    status: RegistrationStatus,
    /// Informational schedule-overlap flag set at registration time.
    conflict: bool,
    created_at: DateTime<Utc>,
    transitioned_at: DateTime<Utc>,
}

/// A student's registration against one section.
///
/// Status changes are conditional updates under the entry's own mutex:
/// the check against the transition table and the write happen atomically,
/// which is what the reconciliation path relies on in place of the section
/// lock.
#[derive(Debug)]
pub struct Registration {
    inner: Mutex<RegistrationData>,
}

impl Registration {
    pub fn new(
        id: RegistrationId,
        student_id: StudentId,
        section_id: SectionId,
        conflict: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            inner: Mutex::new(RegistrationData {
                id,
                student_id,
                section_id,
                status: RegistrationStatus::Registered,
                conflict,
                created_at: now,
                transitioned_at: now,
            }),
        }
    }

    pub fn id(&self) -> RegistrationId {
        self.inner.lock().id
    }

    pub fn student_id(&self) -> StudentId {
        self.inner.lock().student_id
    }

    pub fn section_id(&self) -> SectionId {
        self.inner.lock().section_id
    }

    pub fn status(&self) -> RegistrationStatus {
        self.inner.lock().status
    }

    pub fn conflict(&self) -> bool {
        self.inner.lock().conflict
    }

    /// Applies `to` if the transition table permits it from the current
    /// status; otherwise fails with [`EnrollError::InvalidTransition`] and
    /// leaves the entry untouched.
    pub fn transition(&self, to: RegistrationStatus) -> Result<(), EnrollError> {
        let mut data = self.inner.lock();
        if !data.status.can_transition_to(to) {
            return Err(EnrollError::InvalidTransition {
                from: data.status,
                to,
            });
        }
        data.status = to;
        data.transitioned_at = Utc::now();
        Ok(())
    }

    /// Moves the entry to a new section. Only the transfer operation calls
    /// this, while holding both section locks.
    pub(crate) fn move_to_section(&self, new_section: SectionId) {
        self.inner.lock().section_id = new_section;
    }

    /// Point-in-time copy for read paths and reports.
    pub fn snapshot(&self) -> RegistrationSnapshot {
        let data = self.inner.lock();
        RegistrationSnapshot {
            id: data.id,
            student: data.student_id,
            section: data.section_id,
            status: data.status,
            conflict: data.conflict,
            created_at: data.created_at,
            transitioned_at: data.transitioned_at,
        }
    }
}

/// Serializable view of a registration.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct RegistrationSnapshot {
    pub id: RegistrationId,
    pub student: StudentId,
    pub section: SectionId,
    pub status: RegistrationStatus,
    pub conflict: bool,
    pub created_at: DateTime<Utc>,
    pub transitioned_at: DateTime<Utc>,
}

impl Serialize for Registration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Registration", 7)?;
        state.serialize_field("id", &data.id)?;
        state.serialize_field("student", &data.student_id)?;
        state.serialize_field("section", &data.section_id)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("conflict", &data.conflict)?;
        state.serialize_field("created_at", &data.created_at)?;
        state.serialize_field("transitioned_at", &data.transitioned_at)?;
        state.end()
    }
}
