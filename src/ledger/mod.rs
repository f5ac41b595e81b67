//! Ledger collaborators — the read and write interfaces the core consumes
//!
//! The core never talks to a ledger directly; it goes through these traits.
//! `MemoryLedger` is a complete local implementation used by tests and the
//! CLI, and `Throttled` paces any reader with a fixed inter-request delay.

mod memory;
mod throttle;

pub use memory::MemoryLedger;
pub use throttle::Throttled;

use crate::transition::{Identity, Transition, TransitionId, Utxo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Finality information for a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

/// A transition as the ledger reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition: Transition,
    /// `None` while unconfirmed
    pub confirmation: Option<Confirmation>,
}

/// Ledger-side failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Transition rejected: {0}")]
    Rejected(String),

    #[error("Ledger backend unavailable: {0}")]
    Unavailable(String),
}

/// Read access to transitions, spends and unspent outputs
pub trait LedgerReader {
    /// `Ok(None)` when the ledger does not know the transition
    fn fetch_transition(&self, id: &TransitionId) -> Result<Option<TransitionRecord>, LedgerError>;

    /// Id of the transition spending `id:index`, `Ok(None)` while unspent
    fn fetch_output_spend(
        &self,
        id: &TransitionId,
        index: u32,
    ) -> Result<Option<TransitionId>, LedgerError>;

    fn fetch_unspent_outputs(&self, owner: &Identity) -> Result<Vec<Utxo>, LedgerError>;
}

/// Write access: hand over a finalized transition
pub trait LedgerWriter {
    fn submit(&self, transition: &Transition) -> Result<TransitionId, LedgerError>;
}

impl<L: LedgerReader + ?Sized> LedgerReader for Arc<L> {
    fn fetch_transition(&self, id: &TransitionId) -> Result<Option<TransitionRecord>, LedgerError> {
        (**self).fetch_transition(id)
    }

    fn fetch_output_spend(
        &self,
        id: &TransitionId,
        index: u32,
    ) -> Result<Option<TransitionId>, LedgerError> {
        (**self).fetch_output_spend(id, index)
    }

    fn fetch_unspent_outputs(&self, owner: &Identity) -> Result<Vec<Utxo>, LedgerError> {
        (**self).fetch_unspent_outputs(owner)
    }
}

impl<W: LedgerWriter + ?Sized> LedgerWriter for Arc<W> {
    fn submit(&self, transition: &Transition) -> Result<TransitionId, LedgerError> {
        (**self).submit(transition)
    }
}
