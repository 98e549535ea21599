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

//! Enrollment orchestration.
//!
//! The [`Registrar`] is the central component that serializes every
//! capacity-mutating operation through the per-section lock manager:
//!
//! - **Register**: claim a seat and open a ledger entry, atomically.
//! - **Cancel**: close the entry and return the seat.
//! - **Transfer**: move an entry between sections, all-or-nothing, with
//!   both section locks held in ascending-id order.
//! - **Initiate payment**: open a pending transaction and bill the
//!   student's eligible registrations for the term.
//! - **Term close**: batch-complete paid registrations.
//!
//! Payment callbacks are handled in [`crate::reconcile`]; they mutate
//! registration status through conditional updates and never take section
//! locks.
//!
//! # Invariants
//!
//! - `current_count` of a section always equals its number of active
//!   (non-cancelled) registrations.
//! - At most one active registration exists per (student, section) pair.
//! - The seat counter and the ledger write for one operation happen inside
//!   the same locked critical section.

use crate::base::{OrderId, RegistrationId, SectionId, StudentId, TermId};
use crate::billing::BillingQueue;
use crate::error::EnrollError;
use crate::gateway::GatewayRegistry;
use crate::lock::{LockManager, RetryPolicy, section_key};
use crate::payment::{PaymentSnapshot, PaymentTransaction};
use crate::registration::{Registration, RegistrationSnapshot, RegistrationStatus};
use crate::section::{Section, SectionSnapshot, SectionSpec};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// How many times a cancel/transfer re-reads the registration's section
/// when a concurrent transfer moves it between the read and the lock grab.
const SECTION_MOVE_RETRIES: u32 = 8;

/// Course registration engine.
pub struct Registrar {
    /// Named TTL locks, one key per section.
    locks: LockManager,
    /// Section registry with seat counters.
    sections: DashMap<SectionId, Section>,
    /// Registration ledger; entries are never removed.
    registrations: DashMap<RegistrationId, Registration>,
    /// Active (student, section) pairs for duplicate detection.
    active: DashMap<(StudentId, SectionId), RegistrationId>,
    /// Payment transactions by externally issued order id.
    payments: DashMap<OrderId, PaymentTransaction>,
    /// Provider profiles for callback dispatch.
    gateways: GatewayRegistry,
    /// Outbound tuition-paid events.
    billing: BillingQueue,
    next_registration_id: AtomicU64,
    policy: RetryPolicy,
}

impl Registrar {
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Engine with a custom lock retry policy, mainly for tests and for
    /// hosts that propagate request deadlines.
    pub fn with_retry_policy(policy: RetryPolicy) -> Self {
        Registrar {
            locks: LockManager::new(),
            sections: DashMap::new(),
            registrations: DashMap::new(),
            active: DashMap::new(),
            payments: DashMap::new(),
            gateways: GatewayRegistry::new(),
            billing: BillingQueue::new(),
            next_registration_id: AtomicU64::new(1),
            policy,
        }
    }

    /// Adds a section to the registry.
    ///
    /// Sections are created by the scheduling workflow; the engine only
    /// needs them to exist before students register.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::InvalidCapacity`] for a zero capacity.
    /// - [`EnrollError::DuplicateSection`] if the id is taken.
    pub fn add_section(&self, spec: SectionSpec) -> Result<(), EnrollError> {
        let section_id = spec.section_id;
        let section = Section::new(spec)?;
        match self.sections.entry(section_id) {
            Entry::Occupied(_) => Err(EnrollError::DuplicateSection),
            Entry::Vacant(entry) => {
                entry.insert(section);
                Ok(())
            }
        }
    }

    /// Registers a student into a section.
    ///
    /// The duplicate check, the capacity check, the counter increment, and
    /// the ledger insert all run inside the section's locked critical
    /// section; the read-modify-write is never split across lock
    /// boundaries.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::SectionNotFound`]
    /// - [`EnrollError::DuplicateRegistration`] for an existing active entry.
    /// - [`EnrollError::CapacityExceeded`] when the section is full.
    /// - [`EnrollError::LockTimeout`] / [`EnrollError::Cancelled`] on contention.
    pub fn register(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<RegistrationId, EnrollError> {
        if !self.sections.contains_key(&section_id) {
            return Err(EnrollError::SectionNotFound);
        }

        let key = section_key(section_id);
        self.locks.with_lock(&key, &self.policy, || {
            // Pure read over other sections; computed before taking the
            // section reference so no two references into the section map
            // are ever held at once.
            let conflict = self.has_schedule_conflict(student_id, section_id);

            let section = self
                .sections
                .get(&section_id)
                .ok_or(EnrollError::SectionNotFound)?;

            if self.active.contains_key(&(student_id, section_id)) {
                return Err(EnrollError::DuplicateRegistration);
            }

            section.claim_seat()?;

            let id = RegistrationId(self.next_registration_id.fetch_add(1, Ordering::Relaxed));
            self.registrations
                .insert(id, Registration::new(id, student_id, section_id, conflict));
            self.active.insert((student_id, section_id), id);

            tracing::debug!(%student_id, %section_id, %id, "registered");
            Ok(id)
        })?
    }

    /// Cancels a registration and returns its seat.
    ///
    /// The ledger entry stays behind in `Cancelled` status as the audit
    /// trail. A registration that is already `Paid`, `Cancelled`, or
    /// `Completed` is rejected with [`EnrollError::InvalidTransition`].
    pub fn cancel(&self, registration_id: RegistrationId) -> Result<(), EnrollError> {
        // A concurrent transfer can move the entry to another section
        // between reading the section id and acquiring that section's
        // lock; re-read and retry until the two agree.
        for _ in 0..SECTION_MOVE_RETRIES {
            let section_id = self
                .registrations
                .get(&registration_id)
                .ok_or(EnrollError::RegistrationNotFound)?
                .section_id();

            let key = section_key(section_id);
            let done = self.locks.with_lock(&key, &self.policy, || -> Result<bool, EnrollError> {
                let reg = self
                    .registrations
                    .get(&registration_id)
                    .ok_or(EnrollError::RegistrationNotFound)?;
                if reg.section_id() != section_id {
                    return Ok(false); // moved underneath us, retry
                }

                reg.transition(RegistrationStatus::Cancelled)?;

                let section = self
                    .sections
                    .get(&section_id)
                    .ok_or(EnrollError::SectionNotFound)?;
                section.release_seat()?;
                self.active.remove(&(reg.student_id(), section_id));

                tracing::debug!(%registration_id, %section_id, "cancelled");
                Ok(true)
            })??;

            if done {
                return Ok(());
            }
        }
        Err(EnrollError::LockTimeout)
    }

    /// Moves a registration to another section, atomically across both.
    ///
    /// Both section locks are taken in ascending section-id order before
    /// either counter changes; a full destination fails the whole
    /// operation with no counter movement on either side.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::RegistrationNotFound`] / [`EnrollError::SectionNotFound`]
    /// - [`EnrollError::RegistrationNotActive`] for terminal entries.
    /// - [`EnrollError::DuplicateRegistration`] if the student is already
    ///   in the destination.
    /// - [`EnrollError::CapacityExceeded`] when the destination is full.
    /// - [`EnrollError::LockTimeout`] / [`EnrollError::Cancelled`] on contention.
    pub fn transfer(
        &self,
        registration_id: RegistrationId,
        new_section_id: SectionId,
    ) -> Result<(), EnrollError> {
        if !self.sections.contains_key(&new_section_id) {
            return Err(EnrollError::SectionNotFound);
        }

        for _ in 0..SECTION_MOVE_RETRIES {
            let old_section_id = self
                .registrations
                .get(&registration_id)
                .ok_or(EnrollError::RegistrationNotFound)?
                .section_id();

            if old_section_id == new_section_id {
                return Err(EnrollError::DuplicateRegistration);
            }

            // Canonical order prevents deadlock between two transfers
            // moving in opposite directions.
            let (first, second) = if old_section_id < new_section_id {
                (old_section_id, new_section_id)
            } else {
                (new_section_id, old_section_id)
            };
            let (first_key, second_key) = (section_key(first), section_key(second));

            let outcome = self.locks.with_lock(&first_key, &self.policy, || {
                self.locks.with_lock(&second_key, &self.policy, || {
                    self.transfer_locked(registration_id, old_section_id, new_section_id)
                })
            })?;

            // Unwrap the inner lock layer, then the operation result.
            if outcome?? {
                return Ok(());
            }
        }
        Err(EnrollError::LockTimeout)
    }

    /// Transfer body; runs with both section locks held.
    ///
    /// Returns `Ok(false)` when the registration moved sections between
    /// the caller's read and the lock acquisition.
    fn transfer_locked(
        &self,
        registration_id: RegistrationId,
        old_section_id: SectionId,
        new_section_id: SectionId,
    ) -> Result<bool, EnrollError> {
        let reg = self
            .registrations
            .get(&registration_id)
            .ok_or(EnrollError::RegistrationNotFound)?;
        if reg.section_id() != old_section_id {
            return Ok(false);
        }

        let status = reg.status();
        if status.is_terminal() || !status.is_active() {
            return Err(EnrollError::RegistrationNotActive);
        }

        let student_id = reg.student_id();
        if self.active.contains_key(&(student_id, new_section_id)) {
            return Err(EnrollError::DuplicateRegistration);
        }

        let old_section = self
            .sections
            .get(&old_section_id)
            .ok_or(EnrollError::SectionNotFound)?;
        let new_section = self
            .sections
            .get(&new_section_id)
            .ok_or(EnrollError::SectionNotFound)?;

        // Claim the destination seat first; this is the only check that
        // can fail for business reasons, and failing here leaves both
        // counters untouched.
        new_section.claim_seat()?;

        if let Err(err) = old_section.release_seat() {
            // Underflow on the origin is an internal bug; undo the claim
            // so the failed operation stays side-effect free.
            let _ = new_section.release_seat();
            return Err(err);
        }

        reg.move_to_section(new_section_id);
        self.active.remove(&(student_id, old_section_id));
        self.active.insert((student_id, new_section_id), registration_id);

        tracing::debug!(
            %registration_id,
            from = %old_section_id,
            to = %new_section_id,
            "transferred"
        );
        Ok(true)
    }

    /// Opens a pending payment transaction and bills the student's
    /// eligible registrations for the term.
    ///
    /// Registrations currently `Registered` or `Approved` in sections of
    /// `term_id` move to `PendingPayment`; entries already awaiting
    /// payment are left as they are. Returns the billed registration ids.
    ///
    /// # Errors
    ///
    /// - [`EnrollError::UnknownProvider`] for an unregistered provider id.
    /// - [`EnrollError::DuplicateOrder`] if the order id already exists.
    pub fn initiate_payment(
        &self,
        student_id: StudentId,
        term_id: TermId,
        amount: Decimal,
        provider: &str,
        order_id: OrderId,
    ) -> Result<Vec<RegistrationId>, EnrollError> {
        if self.gateways.profile(provider).is_none() {
            return Err(EnrollError::UnknownProvider(provider.to_string()));
        }

        match self.payments.entry(order_id.clone()) {
            Entry::Occupied(_) => return Err(EnrollError::DuplicateOrder),
            Entry::Vacant(entry) => {
                entry.insert(PaymentTransaction::new(
                    order_id.clone(),
                    student_id,
                    term_id,
                    amount,
                    provider,
                ));
            }
        }

        let mut billed = Vec::new();
        for entry in self.registrations.iter() {
            let reg = entry.value();
            if reg.student_id() != student_id {
                continue;
            }
            if self.section_term(reg.section_id()) != Some(term_id) {
                continue;
            }
            if reg.transition(RegistrationStatus::PendingPayment).is_ok() {
                billed.push(reg.id());
            }
        }

        tracing::debug!(%student_id, %term_id, %order_id, count = billed.len(), "payment initiated");
        Ok(billed)
    }

    /// Advances a registration through the externally managed approval
    /// chain (`Registered -> PendingApproval -> Approved`).
    ///
    /// Only approval statuses are reachable here: cancellation goes
    /// through [`Registrar::cancel`] (it returns the seat) and payment
    /// statuses through initiation/reconciliation.
    pub fn advance_approval(
        &self,
        registration_id: RegistrationId,
        to: RegistrationStatus,
    ) -> Result<(), EnrollError> {
        let reg = self
            .registrations
            .get(&registration_id)
            .ok_or(EnrollError::RegistrationNotFound)?;
        if !matches!(
            to,
            RegistrationStatus::PendingApproval | RegistrationStatus::Approved
        ) {
            return Err(EnrollError::InvalidTransition {
                from: reg.status(),
                to,
            });
        }
        reg.transition(to)
    }

    /// Batch `Paid -> Completed` at term close. Returns the completed ids.
    pub fn complete_term(&self, term_id: TermId) -> Vec<RegistrationId> {
        let mut completed = Vec::new();
        for entry in self.registrations.iter() {
            let reg = entry.value();
            if reg.status() != RegistrationStatus::Paid {
                continue;
            }
            if self.section_term(reg.section_id()) != Some(term_id) {
                continue;
            }
            if reg.transition(RegistrationStatus::Completed).is_ok() {
                completed.push(reg.id());
            }
        }
        completed
    }

    /// True when another active registration of the student shares the
    /// section's schedule code. Informational only; never blocks.
    fn has_schedule_conflict(&self, student_id: StudentId, section_id: SectionId) -> bool {
        let Some(code) = self
            .sections
            .get(&section_id)
            .and_then(|s| s.schedule_code())
        else {
            return false;
        };

        self.active.iter().any(|entry| {
            let (student, other_section) = *entry.key();
            student == student_id
                && other_section != section_id
                && self
                    .sections
                    .get(&other_section)
                    .and_then(|s| s.schedule_code())
                    == Some(code)
        })
    }

    pub(crate) fn section_term(&self, section_id: SectionId) -> Option<TermId> {
        self.sections.get(&section_id).map(|s| s.term_id())
    }

    // === Read side ===

    /// Returns an iterator over all sections, for reports.
    pub fn sections(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, SectionId, Section>> {
        self.sections.iter()
    }

    pub fn section(&self, section_id: SectionId) -> Option<SectionSnapshot> {
        self.sections.get(&section_id).map(|s| s.snapshot())
    }

    pub fn registration(&self, registration_id: RegistrationId) -> Option<RegistrationSnapshot> {
        self.registrations.get(&registration_id).map(|r| r.snapshot())
    }

    /// All ledger entries of a student, cancelled ones included.
    pub fn registrations_for_student(&self, student_id: StudentId) -> Vec<RegistrationSnapshot> {
        let mut result: Vec<_> = self
            .registrations
            .iter()
            .filter(|entry| entry.value().student_id() == student_id)
            .map(|entry| entry.value().snapshot())
            .collect();
        result.sort_by_key(|snap| snap.id.0);
        result
    }

    pub fn payment(&self, order_id: &OrderId) -> Option<PaymentSnapshot> {
        self.payments.get(order_id).map(|p| p.snapshot())
    }

    pub(crate) fn payment_entry(
        &self,
        order_id: &OrderId,
    ) -> Option<dashmap::mapref::one::Ref<'_, OrderId, PaymentTransaction>> {
        self.payments.get(order_id)
    }

    pub(crate) fn registrations_iter(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, RegistrationId, Registration>>
    {
        self.registrations.iter()
    }

    /// Provider registry; hosts register their gateway profiles here.
    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Outbound billing events for the (external) billing aggregate.
    pub fn billing(&self) -> &BillingQueue {
        &self.billing
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}
