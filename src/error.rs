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

//! Error types for enrollment and payment-callback processing.
//!
//! Three families, kept as separate enums so callers can tell them apart
//! at the type level:
//!
//! - [`LockError`]: contention outcomes from the lock manager.
//! - [`EnrollError`]: enrollment operation outcomes. Business-rule
//!   violations are permanent for the given input; contention errors are
//!   safe to retry; invariant violations indicate a bug and are never
//!   silently ignored.
//! - [`CallbackError`]: payment-callback rejections. All recoverable from
//!   the gateway's point of view; it is expected to retry.

use crate::base::OrderId;
use crate::registration::RegistrationStatus;
use thiserror::Error;

/// Lock manager outcomes for a bounded acquisition attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// All retry attempts were exhausted without acquiring the lock.
    #[error("lock acquisition retries exhausted")]
    Timeout,

    /// The caller's deadline fired while waiting for the lock.
    #[error("lock acquisition cancelled by deadline")]
    Cancelled,
}

/// Enrollment operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrollError {
    /// Section has no free seats
    #[error("section is full")]
    CapacityExceeded,

    /// Student already holds an active registration in this section
    #[error("student already registered in this section")]
    DuplicateRegistration,

    /// Section lock could not be acquired within the retry bound
    #[error("section is busy, try again")]
    LockTimeout,

    /// Caller deadline fired while waiting for the section lock
    #[error("operation cancelled before the section lock was acquired")]
    Cancelled,

    /// Requested status change is not in the permitted transition table
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: RegistrationStatus,
        to: RegistrationStatus,
    },

    /// Referenced section does not exist
    #[error("section not found")]
    SectionNotFound,

    /// Referenced registration does not exist
    #[error("registration not found")]
    RegistrationNotFound,

    /// Section was created with a non-positive capacity
    #[error("section capacity must be positive")]
    InvalidCapacity,

    /// Section id already exists in the registry
    #[error("duplicate section ID")]
    DuplicateSection,

    /// Registration is cancelled or completed and cannot be moved
    #[error("registration is not active")]
    RegistrationNotActive,

    /// Payment order id already exists
    #[error("duplicate payment order ID")]
    DuplicateOrder,

    /// Payment initiated against a provider with no gateway profile
    #[error("unknown payment provider '{0}'")]
    UnknownProvider(String),

    /// Seat counter would go negative. Internal consistency bug, not a
    /// user-facing outcome.
    #[error("internal error: seat counter underflow")]
    SeatCountUnderflow,
}

impl From<LockError> for EnrollError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout => EnrollError::LockTimeout,
            LockError::Cancelled => EnrollError::Cancelled,
        }
    }
}

/// Payment-callback rejection reasons.
///
/// Each of these is reported back to the gateway as a rejection so it can
/// retry; none of them crash the handler or mutate any state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// Provider id has no registered gateway profile
    #[error("unknown payment provider '{0}'")]
    UnknownProvider(String),

    /// Payload is not valid JSON or is missing a required field
    #[error("malformed callback payload: {0}")]
    MalformedPayload(String),

    /// Payload signature does not match the provider secret
    #[error("callback signature mismatch")]
    SignatureMismatch,

    /// No payment transaction exists for the order id
    #[error("no payment transaction for order '{0}'")]
    UnknownTransaction(OrderId),
}
