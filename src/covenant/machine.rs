//! Covenant state machine
//!
//! A pure function of (state, balance, operation) to the exact list of
//! records a legal transition must produce. Verification of an observed
//! transition recomputes that list from the consumed record and demands
//! byte-for-byte equality; a transition that does not reproduce exactly this
//! way is not a continuation of the lineage.

use super::state::{Lifecycle, Organism, OrganismState};
use crate::annotation::{self, AnnotationRecord, Payload, ProtocolTag};
use crate::error::{OrganismError, Result};
use crate::transition::{Identity, OutPoint, Script, TransitionId, TxOutput};
use serde::{Deserialize, Serialize};

/// Which protocol operation a transition performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Spawn,
    Reproduce,
    Feed,
}

/// An operation applied to a live organism
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Reproduce { claimer: Identity, payload: Payload },
    Feed { amount: u64, payload: Payload },
}

/// Parameters of a new lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnParams {
    pub species: u8,
    pub reward_per_generation: u64,
    pub fee_per_generation: u64,
    pub dust_floor: u64,
    pub initial_balance: u64,
    #[serde(default)]
    pub payload: Payload,
}

/// Fully specified result of a legal operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTransition {
    pub kind: OperationKind,
    /// Resulting records in positional order
    pub outputs: Vec<TxOutput>,
    /// Organism value consumed (0 for spawn)
    pub consumed: u64,
    /// Value taken from the organism's balance and left to the ledger
    pub fee: u64,
    pub reward: u64,
    /// State after the operation; on the death path it records the final
    /// generation even though no record carries it
    pub next_state: OrganismState,
    /// Balance after the operation, 0 when dead
    pub next_balance: u64,
    pub alive: bool,
}

impl ExpectedTransition {
    pub fn continuation(&self) -> Option<&TxOutput> {
        if self.alive {
            self.outputs.first()
        } else {
            None
        }
    }

    /// Position of the annotation record
    pub fn annotation_index(&self) -> usize {
        usize::from(self.alive)
    }

    /// Lineage position once this transition is finalized as `txid`
    pub fn lifecycle_after(&self, txid: TransitionId) -> Lifecycle {
        if self.alive {
            Lifecycle::Alive(Organism {
                state: self.next_state,
                value: self.next_balance,
                outpoint: OutPoint::new(txid, 0),
            })
        } else {
            Lifecycle::Dead {
                generation: self.next_state.generation,
            }
        }
    }
}

/// An observed transition that honoured the covenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTransition {
    pub expected: ExpectedTransition,
    pub annotation: AnnotationRecord,
    /// Party credited with the reward (reproduce only)
    pub claimer: Option<Identity>,
    /// Value added by a feed
    pub fed: u64,
    /// Feeder's change record, if any
    pub change: Option<TxOutput>,
}

/// Require `consumed − Σ outputs == fee` exactly
pub fn check_conservation(consumed: u64, outputs: &[TxOutput], fee: u64) -> Result<()> {
    let produced = outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value));
    match produced {
        Some(produced) if consumed.checked_sub(produced) == Some(fee) => Ok(()),
        produced => Err(OrganismError::FeeMismatch {
            consumed,
            produced: produced.unwrap_or(u64::MAX),
            expected: fee,
        }),
    }
}

/// The covenant, parameterised by the protocol tag its annotations carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CovenantMachine {
    tag: ProtocolTag,
}

impl CovenantMachine {
    pub fn new(tag: ProtocolTag) -> Self {
        Self { tag }
    }

    pub fn tag(&self) -> ProtocolTag {
        self.tag
    }

    /// Genesis: one continuation holding the initial balance and a
    /// generation-0 annotation with the all-zero origin.
    pub fn spawn(&self, params: &SpawnParams) -> Result<ExpectedTransition> {
        let state = OrganismState::genesis(
            params.species,
            params.reward_per_generation,
            params.fee_per_generation,
            params.dust_floor,
        );
        match state.cost_per_generation() {
            Some(0) => {
                return Err(OrganismError::InvalidAmount {
                    amount: 0,
                    reason: "reward and fee are both zero, the lineage could never end".into(),
                })
            }
            None => {
                return Err(OrganismError::InvalidAmount {
                    amount: params.reward_per_generation,
                    reason: "reward plus fee overflows".into(),
                })
            }
            Some(_) => {}
        }
        if params.initial_balance == 0 || params.initial_balance < params.dust_floor {
            return Err(OrganismError::InvalidAmount {
                amount: params.initial_balance,
                reason: format!("initial balance below dust floor {}", params.dust_floor),
            });
        }

        let annotation = state.annotation(self.tag, params.payload.clone())?;
        Ok(ExpectedTransition {
            kind: OperationKind::Spawn,
            outputs: vec![
                TxOutput::covenant(params.initial_balance, state),
                TxOutput::data(annotation.encode()),
            ],
            consumed: 0,
            fee: 0,
            reward: 0,
            next_state: state,
            next_balance: params.initial_balance,
            alive: true,
        })
    }

    /// Reproduce: pay `reward` to the claimer, leave `fee`, carry the rest
    /// forward at `generation + 1` if it stays at or above the dust floor.
    ///
    /// On the death path a sub-dust residual cannot be carried by any record
    /// and is surrendered together with the fee.
    pub fn reproduce(
        &self,
        organism: &Organism,
        claimer: &Identity,
        payload: Payload,
    ) -> Result<ExpectedTransition> {
        let state = &organism.state;
        let balance = organism.value;
        let required = state.cost_per_generation().unwrap_or(u64::MAX);
        let next_balance = balance
            .checked_sub(required)
            .ok_or(OrganismError::InsufficientBalance { balance, required })?;

        let generation = state
            .generation
            .checked_add(1)
            .filter(|g| *g <= u64::from(u32::MAX))
            .ok_or(OrganismError::GenerationOverflow {
                generation: state.generation,
            })?;

        let next_state = OrganismState {
            lineage_origin: state.resolved_origin(&organism.outpoint.txid),
            generation,
            ..*state
        };
        let alive = next_balance >= state.dust_floor;
        let annotation = next_state.annotation(self.tag, payload)?;

        let mut outputs = Vec::with_capacity(3);
        if alive {
            outputs.push(TxOutput::covenant(next_balance, next_state));
        }
        outputs.push(TxOutput::data(annotation.encode()));
        outputs.push(TxOutput::pay(state.reward_per_generation, claimer.clone()));

        let fee = if alive {
            state.fee_per_generation
        } else {
            state.fee_per_generation + next_balance
        };
        check_conservation(balance, &outputs, fee)?;

        Ok(ExpectedTransition {
            kind: OperationKind::Reproduce,
            outputs,
            consumed: balance,
            fee,
            reward: state.reward_per_generation,
            next_state,
            next_balance: if alive { next_balance } else { 0 },
            alive,
        })
    }

    /// Feed: grow the balance by `amount`, generation unchanged. Feeding the
    /// spawn record resolves the origin sentinel just as a reproduce would.
    pub fn feed(
        &self,
        organism: &Organism,
        amount: u64,
        payload: Payload,
    ) -> Result<ExpectedTransition> {
        if amount == 0 {
            return Err(OrganismError::InvalidAmount {
                amount,
                reason: "feed amount must be positive".into(),
            });
        }
        let next_balance =
            organism
                .value
                .checked_add(amount)
                .ok_or_else(|| OrganismError::InvalidAmount {
                    amount,
                    reason: "balance would overflow".into(),
                })?;

        let state = OrganismState {
            lineage_origin: organism.state.resolved_origin(&organism.outpoint.txid),
            ..organism.state
        };
        let annotation = state.annotation(self.tag, payload)?;
        Ok(ExpectedTransition {
            kind: OperationKind::Feed,
            outputs: vec![
                TxOutput::covenant(next_balance, state),
                TxOutput::data(annotation.encode()),
            ],
            consumed: organism.value,
            fee: 0,
            reward: 0,
            next_state: state,
            next_balance,
            alive: true,
        })
    }

    /// Apply an operation to a lineage position. `Dead` accepts nothing.
    pub fn step(&self, lifecycle: &Lifecycle, operation: &Operation) -> Result<ExpectedTransition> {
        let organism = match lifecycle {
            Lifecycle::Alive(organism) => organism,
            Lifecycle::Dead { generation } => {
                return Err(OrganismError::TerminalLineage {
                    generation: *generation,
                })
            }
        };
        match operation {
            Operation::Reproduce { claimer, payload } => {
                self.reproduce(organism, claimer, payload.clone())
            }
            Operation::Feed { amount, payload } => self.feed(organism, *amount, payload.clone()),
        }
    }

    /// Check an observed spend of `organism` against the covenant.
    ///
    /// Free parameters (claimer, fed amount, payload) are read from the
    /// observed records; everything else is recomputed and compared byte for
    /// byte.
    pub fn verify(&self, organism: &Organism, observed: &[TxOutput]) -> Result<VerifiedTransition> {
        let state = &organism.state;
        let next_generation = state.generation.saturating_add(1);

        let annotation_index = usize::from(
            observed
                .first()
                .is_some_and(|o| o.covenant_state().is_some()),
        );
        let annotation = match observed.get(annotation_index).and_then(|o| o.data_bytes()) {
            Some(data) => annotation::decode(data, &self.tag)?,
            None => None,
        }
        .ok_or_else(|| {
            OrganismError::violation(
                next_generation,
                format!("output[{}]", annotation_index),
                "annotation record",
                describe(observed.get(annotation_index)),
            )
        })?;

        let observed_generation = u64::from(annotation.generation);
        if observed_generation == next_generation {
            let reward_index = annotation_index + 1;
            let claimer = observed
                .get(reward_index)
                .and_then(|o| o.payee())
                .cloned()
                .ok_or_else(|| {
                    OrganismError::violation(
                        next_generation,
                        format!("output[{}]", reward_index),
                        "reward record",
                        describe(observed.get(reward_index)),
                    )
                })?;
            let expected = self
                .reproduce(organism, &claimer, annotation.payload.clone())
                .map_err(|e| {
                    OrganismError::violation(next_generation, "reproduce", "legal reproduce", e)
                })?;
            compare(next_generation, &expected.outputs, observed)?;
            if observed.len() != expected.outputs.len() {
                return Err(OrganismError::violation(
                    next_generation,
                    "output count",
                    expected.outputs.len(),
                    observed.len(),
                ));
            }
            Ok(VerifiedTransition {
                expected,
                annotation,
                claimer: Some(claimer),
                fed: 0,
                change: None,
            })
        } else if observed_generation == state.generation {
            let generation = state.generation;
            let continuation = observed
                .first()
                .filter(|o| o.covenant_state().is_some())
                .ok_or_else(|| {
                    OrganismError::violation(
                        generation,
                        "output[0]",
                        "continuation record",
                        describe(observed.first()),
                    )
                })?;
            let fed = continuation
                .value
                .checked_sub(organism.value)
                .filter(|amount| *amount > 0)
                .ok_or_else(|| {
                    OrganismError::violation(
                        generation,
                        "output[0].value",
                        format!("more than {}", organism.value),
                        continuation.value,
                    )
                })?;
            let expected = self.feed(organism, fed, annotation.payload.clone())?;
            compare(generation, &expected.outputs, observed)?;

            let change = match &observed[expected.outputs.len()..] {
                [] => None,
                [change] if matches!(change.script, Script::PayTo(_)) => Some(change.clone()),
                extra => {
                    return Err(OrganismError::violation(
                        generation,
                        "output count",
                        "at most one change record",
                        extra.len(),
                    ))
                }
            };
            Ok(VerifiedTransition {
                expected,
                annotation,
                claimer: None,
                fed,
                change,
            })
        } else {
            Err(OrganismError::violation(
                next_generation,
                "annotation generation",
                format!("{} or {}", state.generation, next_generation),
                observed_generation,
            ))
        }
    }
}

fn compare(generation: u64, expected: &[TxOutput], observed: &[TxOutput]) -> Result<()> {
    for (index, want) in expected.iter().enumerate() {
        let got = observed.get(index);
        if got.map(TxOutput::to_bytes) != Some(want.to_bytes()) {
            return Err(OrganismError::violation(
                generation,
                format!("output[{}]", index),
                describe(Some(want)),
                describe(got),
            ));
        }
    }
    Ok(())
}

fn describe(output: Option<&TxOutput>) -> String {
    match output {
        None => "nothing".to_string(),
        Some(o) => match &o.script {
            Script::Covenant(state) => format!(
                "covenant {} units gen {} origin {}",
                o.value,
                state.generation,
                state.lineage_origin.short()
            ),
            Script::DataCarrier(data) => format!("data {}", hex::encode(data)),
            Script::PayTo(to) => format!("{} units to {}", o.value, to),
        },
    }
}
