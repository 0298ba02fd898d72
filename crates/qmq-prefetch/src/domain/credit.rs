//! # Credit Controller
//!
//! Tracks each consumer's prefetch limit and the number of deliveries it
//! holds unacknowledged, and decides whether it may receive another.
//!
//! ## Invariant
//!
//! For every consumer: `limit == 0 || outstanding <= limit`. The dispatcher
//! only charges after [`CreditController::has_credit`] returned true, and
//! both calls happen under the same channel lock.
//!
//! ## Wakeups
//!
//! [`CreditController::release`] reports [`CreditTransition::Replenished`]
//! when a consumer goes from "no credit" to "has credit". That edge is the
//! only signal the dispatcher needs to retry a parked queue.

use super::entities::ConsumerTag;
use super::value_objects::Prefetch;
use std::collections::HashMap;

/// Credit bookkeeping for one consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditState {
    limit: Prefetch,
    outstanding: u32,
    auto_ack: bool,
}

impl CreditState {
    pub fn new(limit: Prefetch, auto_ack: bool) -> Self {
        Self {
            limit,
            outstanding: 0,
            auto_ack,
        }
    }

    /// True iff the limit is 0 or `outstanding < limit`. Auto-ack consumers
    /// always have credit.
    pub fn has_credit(&self) -> bool {
        self.auto_ack || self.limit.is_unlimited() || self.outstanding < self.limit.limit()
    }

    pub fn limit(&self) -> Prefetch {
        self.limit
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }
}

/// Result of a credit change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditTransition {
    /// `has_credit` did not flip.
    Unchanged,
    /// `has_credit` went false → true; the consumer's queue should dispatch.
    Replenished,
}

/// Per-channel credit states, keyed by consumer tag.
#[derive(Debug, Default)]
pub struct CreditController {
    states: HashMap<ConsumerTag, CreditState>,
}

impl CreditController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a consumer. Replaces any previous state for the tag.
    pub fn register(&mut self, tag: ConsumerTag, limit: Prefetch, auto_ack: bool) {
        self.states.insert(tag, CreditState::new(limit, auto_ack));
    }

    /// Change a consumer's limit. `None` if the consumer is unknown.
    ///
    /// Raising the limit of a blocked consumer is a replenish edge.
    pub fn set_limit(&mut self, tag: &ConsumerTag, limit: Prefetch) -> Option<CreditTransition> {
        let state = self.states.get_mut(tag)?;
        let before = state.has_credit();
        state.limit = limit;
        Some(transition(before, state.has_credit()))
    }

    /// Unknown consumers have no credit.
    pub fn has_credit(&self, tag: &ConsumerTag) -> bool {
        self.states.get(tag).is_some_and(CreditState::has_credit)
    }

    /// Count one more outstanding delivery. No-op for auto-ack consumers.
    ///
    /// Returns false if the consumer is unknown.
    pub fn charge(&mut self, tag: &ConsumerTag) -> bool {
        let Some(state) = self.states.get_mut(tag) else {
            return false;
        };
        if state.auto_ack {
            return true;
        }
        debug_assert!(state.has_credit(), "charged consumer '{tag}' without credit");
        state.outstanding = state.outstanding.saturating_add(1);
        true
    }

    /// Return `n` credits after ack, nack or requeue.
    pub fn release(&mut self, tag: &ConsumerTag, n: u32) -> CreditTransition {
        let Some(state) = self.states.get_mut(tag) else {
            return CreditTransition::Unchanged;
        };
        debug_assert!(
            n <= state.outstanding,
            "released {n} credits but consumer '{tag}' only holds {}",
            state.outstanding
        );
        let before = state.has_credit();
        state.outstanding = state.outstanding.saturating_sub(n);
        transition(before, state.has_credit())
    }

    /// Stop tracking a consumer.
    pub fn remove(&mut self, tag: &ConsumerTag) -> Option<CreditState> {
        self.states.remove(tag)
    }

    pub fn state(&self, tag: &ConsumerTag) -> Option<&CreditState> {
        self.states.get(tag)
    }

    pub fn contains(&self, tag: &ConsumerTag) -> bool {
        self.states.contains_key(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConsumerTag, &CreditState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

fn transition(before: bool, after: bool) -> CreditTransition {
    if !before && after {
        CreditTransition::Replenished
    } else {
        CreditTransition::Unchanged
    }
}
