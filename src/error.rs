//! Error taxonomy for the organism protocol
//!
//! Every failure carries enough context (generation, field, amounts) for the
//! caller to decide whether to retry, abort or investigate. Nothing in the
//! core retries on its own.

use crate::ledger::LedgerError;
use crate::storage::StorageError;
use crate::transition::{Identity, TransitionId};

/// Errors raised by the codec, the covenant state machine, the builder and
/// the lineage walker.
#[derive(Debug, thiserror::Error)]
pub enum OrganismError {
    #[error("Malformed annotation at byte {offset}: {reason}")]
    MalformedAnnotation { offset: usize, reason: String },

    #[error("Push of {0} bytes exceeds the single-byte length prefix")]
    PushTooLong(usize),

    #[error(
        "Covenant violation at generation {generation}: {field} expected {expected}, observed {observed}"
    )]
    CovenantViolation {
        generation: u64,
        field: String,
        expected: String,
        observed: String,
    },

    #[error("Insufficient balance: {balance} cannot cover {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: u64, reason: String },

    #[error("Fee mismatch: consumed {consumed}, produced {produced}, expected fee {expected}")]
    FeeMismatch {
        consumed: u64,
        produced: u64,
        expected: u64,
    },

    #[error("Identity of {len} bytes exceeds the {max}-byte pay script limit")]
    IdentityTooLong { len: usize, max: usize },

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Lineage is dead since generation {generation}; no further transitions are legal")]
    TerminalLineage { generation: u64 },

    #[error("Generation {generation} cannot be advanced within the 4-byte wire field")]
    GenerationOverflow { generation: u64 },

    #[error("Ledger could not resolve transition {0}")]
    UnresolvedReference(TransitionId),

    #[error("Transition {transition} is not an organism: {reason}")]
    NotAnOrganism {
        transition: TransitionId,
        reason: String,
    },

    #[error("Input {index} belongs to {owner} and the signer holds no key for it")]
    MissingAuthority { index: usize, owner: Identity },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task interrupted: {0}")]
    Interrupted(String),
}

impl OrganismError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        OrganismError::MalformedAnnotation {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn violation(
        generation: u64,
        field: impl Into<String>,
        expected: impl ToString,
        observed: impl ToString,
    ) -> Self {
        OrganismError::CovenantViolation {
            generation,
            field: field.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// True for the builder-side precondition failures that are reported
    /// before any submission attempt.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            OrganismError::InsufficientBalance { .. }
                | OrganismError::InvalidAmount { .. }
                | OrganismError::FeeMismatch { .. }
                | OrganismError::IdentityTooLong { .. }
                | OrganismError::InsufficientFunds { .. }
                | OrganismError::TerminalLineage { .. }
                | OrganismError::GenerationOverflow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrganismError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_message_names_field() {
        let err = OrganismError::violation(7, "output[0]", "96000", "95000");
        let msg = err.to_string();
        assert!(msg.contains("generation 7"));
        assert!(msg.contains("output[0]"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_precondition_classification() {
        let err = OrganismError::InsufficientBalance {
            balance: 10,
            required: 4000,
        };
        assert!(err.is_precondition());
        assert!(!OrganismError::UnresolvedReference(TransitionId::ZERO).is_precondition());
    }
}
