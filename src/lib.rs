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

//! # Registrar
//!
//! This library provides a course registration engine for seat-limited
//! class sections: students race to register, cancel, and transfer, and an
//! external payment gateway later (and possibly repeatedly) reports the
//! tuition outcome, which deterministically finalizes registration state.
//!
//! ## Core Components
//!
//! - [`Registrar`]: Central engine orchestrating register / cancel / transfer
//! - [`LockManager`]: Named TTL locks serializing capacity mutations
//! - [`RegistrationStatus`]: Registration state machine
//! - [`GatewayRegistry`]: Per-provider payment callback profiles
//! - [`EnrollError`] / [`CallbackError`]: Typed failure reasons
//!
//! ## Example
//!
//! ```
//! use registrar_rs::{CourseId, Registrar, SectionId, SectionSpec, StudentId, TermId};
//!
//! let registrar = Registrar::new();
//! registrar
//!     .add_section(SectionSpec {
//!         section_id: SectionId(101),
//!         course_id: CourseId(1),
//!         term_id: TermId(20251),
//!         max_capacity: 2,
//!         schedule_code: None,
//!     })
//!     .unwrap();
//!
//! // Register a student
//! registrar.register(StudentId(1), SectionId(101)).unwrap();
//!
//! // Check the seat counter
//! let section = registrar.section(SectionId(101)).unwrap();
//! assert_eq!(section.enrolled, 1);
//! ```
//!
//! ## Concurrency
//!
//! All capacity-mutating operations on one section are serialized through
//! that section's named lock, so concurrent registrations against a full
//! section fail deterministically instead of overselling seats. Payment
//! reconciliation runs lock-free against the ledger and stays correct
//! under gateway replays through conditional updates and an idempotency
//! guard.

mod base;
pub mod billing;
pub mod error;
mod gateway;
mod lock;
mod payment;
mod reconcile;
mod registrar;
pub mod registration;
mod section;

pub use base::{CourseId, OrderId, RegistrationId, SectionId, StudentId, TermId};
pub use billing::{BillingEvent, BillingQueue};
pub use error::{CallbackError, EnrollError, LockError};
pub use gateway::{GatewayRegistry, ParsedCallback, ProviderProfile};
pub use lock::{LockManager, OwnerToken, RetryPolicy, section_key};
pub use payment::{PaymentSnapshot, PaymentStatus, PaymentTransaction};
pub use reconcile::{CallbackAck, ReconcileReport};
pub use registrar::Registrar;
pub use registration::{Registration, RegistrationSnapshot, RegistrationStatus};
pub use section::{Section, SectionSnapshot, SectionSpec};
