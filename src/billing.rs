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

//! Outbound billing events with exactly-once emission.
//!
//! The billing aggregate itself lives outside this crate; reconciliation
//! only enqueues a `TuitionPaid` event per successfully settled order.
//! A [`DashMap`] keyed by order id deduplicates emissions while a
//! [`SegQueue`] preserves FIFO order for the consumer, so gateway replays
//! can never credit tuition twice.

use crate::base::{OrderId, StudentId, TermId};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// "Mark tuition paid" notification for the billing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub order: OrderId,
    pub student: StudentId,
    pub term: TermId,
    pub amount: Decimal,
    pub emitted_at: DateTime<Utc>,
}

/// FIFO queue of billing events, one per order at most.
#[derive(Debug, Default)]
pub struct BillingQueue {
    /// Orders that already produced an event, for O(1) duplicate checks.
    emitted: DashMap<OrderId, ()>,
    /// Events awaiting the billing consumer, in emission order.
    events: SegQueue<BillingEvent>,
}

impl BillingQueue {
    pub fn new() -> Self {
        Self {
            emitted: DashMap::new(),
            events: SegQueue::new(),
        }
    }

    /// Enqueues the event unless one was already emitted for its order.
    ///
    /// Returns `true` when the event was enqueued. The entry API keeps
    /// check-and-insert atomic under concurrent replayed callbacks.
    pub fn emit_once(&self, event: BillingEvent) -> bool {
        match self.emitted.entry(event.order.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(());
                self.events.push(event);
                true
            }
        }
    }

    /// Removes and returns all queued events in FIFO order.
    pub fn drain(&self) -> Vec<BillingEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.events.pop() {
            drained.push(event);
        }
        drained
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(order: &str) -> BillingEvent {
        BillingEvent {
            order: order.into(),
            student: StudentId(1),
            term: TermId(20251),
            amount: dec!(1500.00),
            emitted_at: Utc::now(),
        }
    }

    #[test]
    fn first_emission_enqueues() {
        let queue = BillingQueue::new();
        assert!(queue.emit_once(event("ORD-1")));
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn duplicate_order_is_dropped() {
        let queue = BillingQueue::new();
        assert!(queue.emit_once(event("ORD-1")));
        assert!(!queue.emit_once(event("ORD-1")));
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = BillingQueue::new();
        queue.emit_once(event("ORD-1"));
        queue.emit_once(event("ORD-2"));
        queue.emit_once(event("ORD-3"));

        let orders: Vec<_> = queue.drain().into_iter().map(|e| e.order).collect();
        assert_eq!(
            orders,
            vec![
                OrderId::from("ORD-1"),
                OrderId::from("ORD-2"),
                OrderId::from("ORD-3")
            ]
        );
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn dedup_survives_drain() {
        // Draining delivers events; it does not reopen the order for
        // re-emission.
        let queue = BillingQueue::new();
        queue.emit_once(event("ORD-1"));
        queue.drain();
        assert!(!queue.emit_once(event("ORD-1")));
    }
}
