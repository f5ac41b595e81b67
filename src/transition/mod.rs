//! Transitions — the ledger-facing side of the protocol
//!
//! Data model for transitions and their records, the builder that shapes
//! spawn/reproduce/feed transitions, and the signing and submission
//! hand-off.

mod builder;
mod signer;
mod types;

pub use builder::{TransitionBuilder, UnsignedTransition};
pub use signer::{finalize, submit, KeySigner, Signer};
pub use types::{
    Authorization, Identity, OutPoint, Script, Transition, TransitionId, TxInput, TxOutput, Utxo,
    COVENANT_OPCODE, DATA_CARRIER_OPCODE, MAX_IDENTITY_LEN, PAY_OPCODE,
};
