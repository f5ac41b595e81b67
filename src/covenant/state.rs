//! Organism state — the covenant parameters carried by one unspent record

use crate::annotation::{AnnotationRecord, Payload, ProtocolTag};
use crate::error::{OrganismError, Result};
use crate::transition::{OutPoint, Transition, TransitionId};
use serde::{Deserialize, Serialize};

/// Persistent covenant state. Everything except `generation` (and the
/// generation-0 origin sentinel) is fixed at spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganismState {
    /// Caller-assigned type tag, opaque to the core
    pub species: u8,
    /// Paid to whoever triggers a reproduce
    pub reward_per_generation: u64,
    /// Left to the ledger on every reproduce
    pub fee_per_generation: u64,
    /// Balance below which no continuation is produced
    pub dust_floor: u64,
    /// Spawn transition id; all-zero at generation 0
    pub lineage_origin: TransitionId,
    pub generation: u64,
}

impl OrganismState {
    /// Generation-0 state, before the spawn transition's id is knowable
    pub fn genesis(species: u8, reward: u64, fee: u64, dust_floor: u64) -> Self {
        Self {
            species,
            reward_per_generation: reward,
            fee_per_generation: fee,
            dust_floor,
            lineage_origin: TransitionId::ZERO,
            generation: 0,
        }
    }

    /// Balance consumed by one reproduce, `None` on overflow
    pub fn cost_per_generation(&self) -> Option<u64> {
        self.reward_per_generation
            .checked_add(self.fee_per_generation)
    }

    /// Origin to carry forward when spending a record created by `consumed`:
    /// the sentinel resolves to the spawn transition's own id.
    pub fn resolved_origin(&self, consumed: &TransitionId) -> TransitionId {
        if self.lineage_origin.is_zero() {
            *consumed
        } else {
            self.lineage_origin
        }
    }

    /// True when `other` keeps every immutable field of `self`
    pub fn same_terms(&self, other: &OrganismState) -> bool {
        self.species == other.species
            && self.reward_per_generation == other.reward_per_generation
            && self.fee_per_generation == other.fee_per_generation
            && self.dust_floor == other.dust_floor
    }

    /// Annotation describing this state
    pub fn annotation(&self, tag: ProtocolTag, payload: Payload) -> Result<AnnotationRecord> {
        let generation = u32::try_from(self.generation).map_err(|_| {
            OrganismError::GenerationOverflow {
                generation: self.generation,
            }
        })?;
        Ok(AnnotationRecord::new(tag, self.species, generation, self.lineage_origin)
            .with_payload(payload))
    }
}

/// A live organism: its state, the value it carries, and where it sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organism {
    pub state: OrganismState,
    pub value: u64,
    pub outpoint: OutPoint,
}

impl Organism {
    /// Read the organism held at output 0 of `transition`
    pub fn from_transition(txid: TransitionId, transition: &Transition) -> Result<Self> {
        let first = transition.outputs.first().ok_or_else(|| OrganismError::NotAnOrganism {
            transition: txid,
            reason: "transition has no outputs".to_string(),
        })?;
        let state = first.covenant_state().ok_or_else(|| OrganismError::NotAnOrganism {
            transition: txid,
            reason: "output 0 is not a covenant".to_string(),
        })?;
        Ok(Self {
            state: *state,
            value: first.value,
            outpoint: OutPoint::new(txid, 0),
        })
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn summary(&self) -> String {
        format!(
            "Organism {} | species={} | gen={} | balance={} | reward={} fee={} dust={}",
            self.outpoint,
            self.state.species,
            self.state.generation,
            self.value,
            self.state.reward_per_generation,
            self.state.fee_per_generation,
            self.state.dust_floor
        )
    }
}

/// Per-lineage state machine position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Alive(Organism),
    /// Terminal: no operation is legal
    Dead { generation: u64 },
}

impl Lifecycle {
    pub fn is_alive(&self) -> bool {
        matches!(self, Lifecycle::Alive(_))
    }

    pub fn generation(&self) -> u64 {
        match self {
            Lifecycle::Alive(organism) => organism.generation(),
            Lifecycle::Dead { generation } => *generation,
        }
    }

    pub fn organism(&self) -> Option<&Organism> {
        match self {
            Lifecycle::Alive(organism) => Some(organism),
            Lifecycle::Dead { .. } => None,
        }
    }
}
