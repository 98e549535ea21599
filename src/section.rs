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

//! Class sections and their seat counters.
//!
//! The counter invariant `0 <= current_count <= max_capacity` holds at all
//! times. Counters are only mutated by the registrar while it holds the
//! section's named lock; the per-section mutex here keeps reads coherent
//! but is not the serialization point for enrollment.

use crate::base::{CourseId, SectionId, TermId};
use crate::error::EnrollError;
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Immutable description used to create a section.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct SectionSpec {
    pub section_id: SectionId,
    pub course_id: CourseId,
    pub term_id: TermId,
    pub max_capacity: u32,
    /// Sections sharing a schedule code meet at the same time; used only
    /// to flag (not reject) overlapping registrations.
    pub schedule_code: Option<u16>,
}

#[derive(Debug)]
struct SectionData {
    section_id: SectionId,
    course_id: CourseId,
    term_id: TermId,
    max_capacity: u32,
    current_count: u32,
    schedule_code: Option<u16>,
}

impl SectionData {
    fn assert_invariants(&self) {
        debug_assert!(
            self.current_count <= self.max_capacity,
            "Invariant violated: section {} count {} exceeds capacity {}",
            self.section_id,
            self.current_count,
            self.max_capacity
        );
    }

    /// Claims one seat, failing when the section is full.
    fn claim_seat(&mut self) -> Result<(), EnrollError> {
        if self.current_count >= self.max_capacity {
            return Err(EnrollError::CapacityExceeded);
        }
        self.current_count += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Returns one seat. An underflow here means a cancel ran without a
    /// matching claim, which is a bug, not a business outcome.
    fn release_seat(&mut self) -> Result<(), EnrollError> {
        if self.current_count == 0 {
            tracing::error!(
                section = %self.section_id,
                "seat counter underflow: release without matching claim"
            );
            return Err(EnrollError::SeatCountUnderflow);
        }
        self.current_count -= 1;
        self.assert_invariants();
        Ok(())
    }
}

/// A capacity-bounded course offering.
#[derive(Debug)]
pub struct Section {
    inner: Mutex<SectionData>,
}

impl Section {
    /// # Errors
    ///
    /// Returns [`EnrollError::InvalidCapacity`] for a zero capacity.
    pub fn new(spec: SectionSpec) -> Result<Self, EnrollError> {
        if spec.max_capacity == 0 {
            return Err(EnrollError::InvalidCapacity);
        }
        Ok(Self {
            inner: Mutex::new(SectionData {
                section_id: spec.section_id,
                course_id: spec.course_id,
                term_id: spec.term_id,
                max_capacity: spec.max_capacity,
                current_count: 0,
                schedule_code: spec.schedule_code,
            }),
        })
    }

    pub fn section_id(&self) -> SectionId {
        self.inner.lock().section_id
    }

    pub fn course_id(&self) -> CourseId {
        self.inner.lock().course_id
    }

    pub fn term_id(&self) -> TermId {
        self.inner.lock().term_id
    }

    pub fn max_capacity(&self) -> u32 {
        self.inner.lock().max_capacity
    }

    pub fn current_count(&self) -> u32 {
        self.inner.lock().current_count
    }

    pub fn schedule_code(&self) -> Option<u16> {
        self.inner.lock().schedule_code
    }

    pub fn is_full(&self) -> bool {
        let data = self.inner.lock();
        data.current_count >= data.max_capacity
    }

    pub(crate) fn claim_seat(&self) -> Result<(), EnrollError> {
        self.inner.lock().claim_seat()
    }

    pub(crate) fn release_seat(&self) -> Result<(), EnrollError> {
        self.inner.lock().release_seat()
    }

    /// Point-in-time copy for read paths and reports.
    pub fn snapshot(&self) -> SectionSnapshot {
        let data = self.inner.lock();
        SectionSnapshot {
            section: data.section_id,
            course: data.course_id,
            term: data.term_id,
            capacity: data.max_capacity,
            enrolled: data.current_count,
        }
    }
}

/// Serializable view of a section's enrollment state.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct SectionSnapshot {
    pub section: SectionId,
    pub course: CourseId,
    pub term: TermId,
    pub capacity: u32,
    pub enrolled: u32,
}

impl Serialize for Section {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Section", 5)?;
        state.serialize_field("section", &data.section_id)?;
        state.serialize_field("course", &data.course_id)?;
        state.serialize_field("term", &data.term_id)?;
        state.serialize_field("capacity", &data.max_capacity)?;
        state.serialize_field("enrolled", &data.current_count)?;
        state.end()
    }
}
