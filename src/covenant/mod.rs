//! Covenant — the rules an organism output imposes on whoever spends it
//!
//! An organism can only be spent by recreating itself with a smaller budget
//! and a higher generation (reproduce), by being topped up (feed), or by
//! dying once its budget falls under the dust floor.

mod machine;
mod state;

pub use machine::{
    check_conservation, CovenantMachine, ExpectedTransition, Operation, OperationKind,
    SpawnParams, VerifiedTransition,
};
pub use state::{Lifecycle, Organism, OrganismState};
