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

//! Property-based tests for the registration engine.
//!
//! These verify invariants that should hold for any sequence of valid
//! enrollment operations.

use proptest::prelude::*;
use registrar_rs::{
    CourseId, Registrar, RegistrationId, RegistrationStatus, SectionId, SectionSpec, StudentId,
    TermId,
};

const SECTIONS: u32 = 4;

fn build_registrar(capacity: u32) -> Registrar {
    let registrar = Registrar::new();
    for section in 1..=SECTIONS {
        registrar
            .add_section(SectionSpec {
                section_id: SectionId(section),
                course_id: CourseId(1),
                term_id: TermId(20251),
                max_capacity: capacity,
                schedule_code: None,
            })
            .unwrap();
    }
    registrar
}

/// One enrollment operation drawn by proptest.
#[derive(Debug, Clone)]
enum Op {
    Register { student: u32, section: u32 },
    /// Cancels the n-th previously issued registration (modulo).
    Cancel { pick: usize },
    /// Transfers the n-th previously issued registration (modulo).
    Transfer { pick: usize, section: u32 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..=16, 1u32..=SECTIONS).prop_map(|(student, section)| Op::Register { student, section }),
        (0usize..64).prop_map(|pick| Op::Cancel { pick }),
        (0usize..64, 1u32..=SECTIONS)
            .prop_map(|(pick, section)| Op::Transfer { pick, section }),
    ]
}

/// Counts active ledger entries per section, straight from the ledger.
fn ledger_counts(registrar: &Registrar) -> Vec<u32> {
    (1..=SECTIONS)
        .map(|section| {
            (1..=16u32)
                .flat_map(|s| registrar.registrations_for_student(StudentId(s)))
                .filter(|r| r.section == SectionId(section) && r.status.is_active())
                .count() as u32
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// No operation sequence can push a counter past capacity or below
    /// zero, and the counter always matches the ledger.
    #[test]
    fn counters_match_ledger_after_any_op_sequence(
        capacity in 1u32..=6,
        ops in prop::collection::vec(arb_op(), 1..80),
    ) {
        let registrar = build_registrar(capacity);
        let mut issued: Vec<RegistrationId> = Vec::new();

        for op in ops {
            match op {
                Op::Register { student, section } => {
                    if let Ok(id) = registrar.register(StudentId(student), SectionId(section)) {
                        issued.push(id);
                    }
                }
                Op::Cancel { pick } => {
                    if !issued.is_empty() {
                        let id = issued[pick % issued.len()];
                        let _ = registrar.cancel(id);
                    }
                }
                Op::Transfer { pick, section } => {
                    if !issued.is_empty() {
                        let id = issued[pick % issued.len()];
                        let _ = registrar.transfer(id, SectionId(section));
                    }
                }
            }
        }

        let counts = ledger_counts(&registrar);
        for section in 1..=SECTIONS {
            let snap = registrar.section(SectionId(section)).unwrap();
            prop_assert!(snap.enrolled <= snap.capacity);
            prop_assert_eq!(snap.enrolled, counts[(section - 1) as usize]);
        }
    }

    /// Successful registrations against one section never outnumber its
    /// capacity, whatever the arrival order.
    #[test]
    fn successes_bounded_by_capacity(
        capacity in 1u32..=8,
        students in prop::collection::vec(1u32..=32, 1..64),
    ) {
        let registrar = build_registrar(capacity);

        let mut successes = 0u32;
        for student in students {
            if registrar.register(StudentId(student), SectionId(1)).is_ok() {
                successes += 1;
            }
        }

        prop_assert!(successes <= capacity);
        prop_assert_eq!(registrar.section(SectionId(1)).unwrap().enrolled, successes);
    }

    /// A failed transfer moves nothing; a successful one moves exactly
    /// one seat. Total enrollment is conserved either way.
    #[test]
    fn transfer_conserves_total_enrollment(
        capacity in 1u32..=4,
        seed_students in prop::collection::vec(1u32..=16, 1..24),
        picks in prop::collection::vec((0usize..32, 1u32..=SECTIONS), 0..24),
    ) {
        let registrar = build_registrar(capacity);
        let mut issued = Vec::new();
        for (i, student) in seed_students.iter().enumerate() {
            let section = (i as u32 % SECTIONS) + 1;
            if let Ok(id) = registrar.register(StudentId(*student), SectionId(section)) {
                issued.push(id);
            }
        }

        let before: u32 = (1..=SECTIONS)
            .map(|s| registrar.section(SectionId(s)).unwrap().enrolled)
            .sum();

        for (pick, section) in picks {
            if !issued.is_empty() {
                let id = issued[pick % issued.len()];
                let _ = registrar.transfer(id, SectionId(section));
            }
        }

        let after: u32 = (1..=SECTIONS)
            .map(|s| registrar.section(SectionId(s)).unwrap().enrolled)
            .sum();
        prop_assert_eq!(before, after);
    }

    /// Whatever transition targets are thrown at an entry, its status
    /// only ever moves along permitted edges, and terminal means terminal.
    #[test]
    fn status_never_escapes_the_transition_table(
        targets in prop::collection::vec(0usize..7, 1..30),
    ) {
        use RegistrationStatus::*;
        const STATUSES: [RegistrationStatus; 7] =
            [Registered, PendingApproval, Approved, PendingPayment, Paid, Cancelled, Completed];

        let reg = registrar_rs::Registration::new(
            RegistrationId(1),
            StudentId(1),
            SectionId(1),
            false,
        );

        let mut current = Registered;
        let mut terminal_since: Option<usize> = None;

        for (step, target) in targets.iter().enumerate() {
            let to = STATUSES[*target];
            let permitted = current.can_transition_to(to);
            match reg.transition(to) {
                Ok(()) => {
                    prop_assert!(permitted, "{current:?} -> {to:?} applied but not permitted");
                    current = to;
                    if current.is_terminal() && terminal_since.is_none() {
                        terminal_since = Some(step);
                    }
                }
                Err(_) => {
                    prop_assert!(!permitted, "{current:?} -> {to:?} permitted but rejected");
                    prop_assert_eq!(reg.status(), current);
                }
            }

            if terminal_since.is_some() {
                prop_assert!(reg.status().is_terminal());
            }
        }
    }
}
