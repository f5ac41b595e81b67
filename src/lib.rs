//! organism-core — self-propagating ledger outputs
//!
//! An organism is a covenant-bound output that carries a balance and can
//! only be spent by a transition that reproduces it under fixed terms: pay
//! the claimer a reward, leave a fee, and carry the rest forward one
//! generation later, until the balance drops below the dust floor. Every
//! transition carries a discoverable annotation so independent observers
//! can find and verify whole lineages.

pub mod annotation;
pub mod config;
pub mod covenant;
pub mod error;
pub mod ledger;
pub mod lineage;
pub mod storage;
pub mod transition;

pub use annotation::{AnnotationRecord, Payload, SpeciesPayload, DEFAULT_PROTOCOL_TAG};
pub use config::{Config, ProtocolConfig, ScanConfig};
pub use covenant::{CovenantMachine, Lifecycle, Organism, OrganismState, SpawnParams};
pub use error::{OrganismError, Result};
pub use ledger::{LedgerReader, LedgerWriter, MemoryLedger};
pub use lineage::{LineageTrace, LineageWalker, TraceHalted};
pub use storage::TraceStore;
pub use transition::{Transition, TransitionBuilder, TransitionId};
