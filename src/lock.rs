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

//! Named, TTL-bounded mutual exclusion for request handlers.
//!
//! [`LockManager`] backs every capacity-mutating enrollment operation.
//! Locks are non-blocking at the primitive level: [`LockManager::acquire`]
//! either takes ownership immediately or reports the key as held.
//! [`LockManager::with_lock`] layers a bounded fixed-interval retry loop on
//! top, so contention surfaces as a fast [`LockError::Timeout`] instead of
//! unbounded queuing.
//!
//! Ownership is token-checked: [`LockManager::release`] only clears the
//! entry if the caller still owns it. A holder that outlives its TTL loses
//! the lock to the next acquirer, and its own late release becomes a no-op.
//! Crash recovery is TTL expiry, never unconditional release by key.

use crate::base::SectionId;
use crate::error::LockError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Canonical lock key for a class section.
///
/// All callers must derive keys through this function so contention on the
/// same section is visible to every handler.
pub fn section_key(section_id: SectionId) -> String {
    format!("lock:section:{section_id}")
}

/// Opaque ownership token returned by a successful acquisition.
///
/// Presenting the token is the only way to release the lock early;
/// a token from a previous (expired) hold no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerToken(u64);

#[derive(Debug)]
struct LockEntry {
    owner: OwnerToken,
    expires_at: Instant,
}

/// Retry parameters for [`LockManager::with_lock`].
///
/// Fixed-interval, not exponential: the total wait is bounded by
/// `max_retries * retry_delay`. An optional `deadline` lets an upstream
/// request timeout abort the wait early with [`LockError::Cancelled`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How long an acquired lock is owned before TTL expiry.
    pub ttl: Duration,
    /// Total acquisition attempts before giving up.
    pub max_retries: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
    /// Abort retrying once this instant passes.
    pub deadline: Option<Instant>,
}

impl Default for RetryPolicy {
    /// 50 attempts at 100ms, 5s TTL: a full contention stall resolves as
    /// a timeout in roughly five seconds.
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_retries: 50,
            retry_delay: Duration::from_millis(100),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Shared lock table keyed by resource name.
///
/// One instance is shared by all request handlers; the [`DashMap`] plays
/// the role of the external store reachable by every worker.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    next_token: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Attempts to take exclusive ownership of `key` for at most `ttl`.
    ///
    /// Returns the ownership token on success, `None` if the key is held
    /// by a live owner. Never blocks or retries. An entry whose TTL has
    /// expired counts as free and is taken over atomically.
    pub fn acquire(&self, key: &str, ttl: Duration) -> Option<OwnerToken> {
        let now = Instant::now();
        let token = OwnerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let entry = LockEntry {
            owner: token,
            expires_at: now + ttl,
        };

        // Entry API keeps check-and-claim atomic under concurrent acquirers.
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(entry);
                    Some(token)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Some(token)
            }
        }
    }

    /// Releases `key` if `token` still owns it.
    ///
    /// A no-op (not an error) when the lock expired, was taken over by a
    /// new owner, or never existed. A slow holder can therefore never free
    /// a lock that someone else re-acquired after its TTL ran out.
    pub fn release(&self, key: &str, token: OwnerToken) {
        if let Entry::Occupied(occupied) = self.locks.entry(key.to_string()) {
            if occupied.get().owner == token {
                occupied.remove();
            }
        }
    }

    /// True if `key` is currently held by a live (unexpired) owner.
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Runs `f` while holding `key`, retrying acquisition per `policy`.
    ///
    /// Release is guaranteed on every exit path: normal return, early
    /// return, and unwinding panic all go through the drop guard. On
    /// exhausting retries no side effect has occurred and the caller gets
    /// [`LockError::Timeout`]; if the policy deadline fires first, the
    /// outcome is [`LockError::Cancelled`] instead.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] after `policy.max_retries` failed attempts.
    /// - [`LockError::Cancelled`] when `policy.deadline` passes while waiting.
    pub fn with_lock<R>(
        &self,
        key: &str,
        policy: &RetryPolicy,
        f: impl FnOnce() -> R,
    ) -> Result<R, LockError> {
        let mut attempt = 0u32;
        loop {
            if let Some(deadline) = policy.deadline {
                if Instant::now() >= deadline {
                    return Err(LockError::Cancelled);
                }
            }

            if let Some(token) = self.acquire(key, policy.ttl) {
                let _guard = ReleaseGuard {
                    manager: self,
                    key,
                    token,
                };
                return Ok(f());
            }

            attempt += 1;
            if attempt >= policy.max_retries {
                tracing::debug!(key, attempts = attempt, "lock retries exhausted");
                return Err(LockError::Timeout);
            }
            std::thread::sleep(policy.retry_delay);
        }
    }
}

/// Releases the lock on drop, including during panic unwinding.
struct ReleaseGuard<'a> {
    manager: &'a LockManager,
    key: &'a str,
    token: OwnerToken,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.key, self.token);
    }
}
