//! In-memory ledger
//!
//! Enforces what the protocol relies on a real ledger for: single spend,
//! value conservation, authorization presence, and the covenant itself on
//! every organism input. Persistable as JSON so the CLI can keep a local
//! ledger between runs.

use super::{Confirmation, LedgerError, LedgerReader, LedgerWriter, TransitionRecord};
use crate::annotation::ProtocolTag;
use crate::covenant::{CovenantMachine, Organism};
use crate::storage::StorageError;
use crate::transition::{Identity, OutPoint, Script, Transition, TransitionId, TxOutput, Utxo};
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    transitions: HashMap<TransitionId, TransitionRecord>,
    /// Spent outpoint (`txid:index`) to the spending transition
    spends: HashMap<String, TransitionId>,
    pending: Vec<TransitionId>,
    height: u64,
    mints: u64,
}

pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    machine: CovenantMachine,
}

impl MemoryLedger {
    pub fn new(tag: ProtocolTag) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            machine: CovenantMachine::new(tag),
        }
    }

    /// Load a ledger saved with [`MemoryLedger::save`], or start empty
    pub fn open(path: impl AsRef<Path>, tag: ProtocolTag) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(tag));
        }
        let json = std::fs::read_to_string(path)?;
        let state: LedgerState = serde_json::from_str(&json)?;
        info!(
            "Loaded ledger with {} transitions at height {} from {}",
            state.transitions.len(),
            state.height,
            path.display()
        );
        Ok(Self {
            state: RwLock::new(state),
            machine: CovenantMachine::new(tag),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let state = self.state.read().map_err(|_| StorageError::Poisoned)?;
        let json = serde_json::to_string_pretty(&*state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Create new funds for `owner` out of nothing, confirmed immediately
    pub fn mint(&self, owner: &Identity, value: u64) -> Result<Utxo, LedgerError> {
        let mut state = self.write()?;
        state.mints += 1;
        let mut marker = b"mint".to_vec();
        marker.extend_from_slice(&state.mints.to_le_bytes());
        let transition = Transition {
            inputs: Vec::new(),
            outputs: vec![TxOutput::pay(value, owner.clone()), TxOutput::data(marker)],
        };
        let id = transition.id();
        state.height += 1;
        let confirmation = Confirmation {
            height: state.height,
            timestamp: Utc::now(),
        };
        state.transitions.insert(
            id,
            TransitionRecord {
                transition,
                confirmation: Some(confirmation),
            },
        );
        debug!("Minted {} units to {}", value, owner);
        Ok(Utxo {
            outpoint: OutPoint::new(id, 0),
            value,
            owner: owner.clone(),
        })
    }

    /// Confirm every pending transition at a new height. Returns that height.
    pub fn confirm_pending(&self) -> Result<u64, LedgerError> {
        let mut state = self.write()?;
        if state.pending.is_empty() {
            return Ok(state.height);
        }
        state.height += 1;
        let confirmation = Confirmation {
            height: state.height,
            timestamp: Utc::now(),
        };
        let pending = std::mem::take(&mut state.pending);
        for id in &pending {
            if let Some(record) = state.transitions.get_mut(id) {
                record.confirmation = Some(confirmation.clone());
            }
        }
        info!("Confirmed {} transitions at height {}", pending.len(), state.height);
        Ok(state.height)
    }

    pub fn transition_count(&self) -> usize {
        self.read().map(|s| s.transitions.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))
    }

    fn validate(&self, state: &LedgerState, transition: &Transition) -> Result<(), LedgerError> {
        let reject = |reason: String| Err(LedgerError::Rejected(reason));

        if transition.inputs.is_empty() {
            return reject("transition has no inputs".into());
        }
        if state.transitions.contains_key(&transition.id()) {
            return reject("duplicate transition".into());
        }
        for (index, output) in transition.outputs.iter().enumerate() {
            if output.payee().is_some_and(|p| !p.is_encodable()) {
                return reject(format!("output {} pays an identity too long to encode", index));
            }
        }

        let mut seen = HashSet::new();
        for (index, input) in transition.inputs.iter().enumerate() {
            if !seen.insert(input.prevout) {
                return reject(format!("input {} spends {} twice", index, input.prevout));
            }
            let Some(prev) = state
                .transitions
                .get(&input.prevout.txid)
                .and_then(|r| r.transition.outputs.get(input.prevout.index as usize))
            else {
                return reject(format!("input {} references unknown output {}", index, input.prevout));
            };
            if state.spends.contains_key(&input.prevout.to_string()) {
                return reject(format!("output {} already spent", input.prevout));
            }
            if prev.value != input.value {
                return reject(format!(
                    "input {} claims {} units, output holds {}",
                    index, input.value, prev.value
                ));
            }
            match &prev.script {
                Script::DataCarrier(_) => {
                    return reject(format!("output {} is unspendable", input.prevout));
                }
                Script::PayTo(owner) => {
                    if input.owner.as_ref() != Some(owner) || input.authorization.is_none() {
                        return reject(format!("input {} lacks authorization from {}", index, owner));
                    }
                }
                Script::Covenant(organism_state) => {
                    if index != 0 {
                        return reject("an organism may only be spent as input 0".into());
                    }
                    let organism = Organism {
                        state: *organism_state,
                        value: prev.value,
                        outpoint: input.prevout,
                    };
                    if let Err(e) = self.machine.verify(&organism, &transition.outputs) {
                        return reject(format!("covenant: {}", e));
                    }
                }
            }
        }

        if transition.total_input().is_none() {
            return reject("input values overflow".into());
        }
        if transition.total_output().is_none() {
            return reject("output values overflow".into());
        }
        if transition.implied_fee().is_none() {
            return reject("outputs exceed inputs".into());
        }
        Ok(())
    }
}

impl LedgerReader for MemoryLedger {
    fn fetch_transition(&self, id: &TransitionId) -> Result<Option<TransitionRecord>, LedgerError> {
        Ok(self.read()?.transitions.get(id).cloned())
    }

    fn fetch_output_spend(
        &self,
        id: &TransitionId,
        index: u32,
    ) -> Result<Option<TransitionId>, LedgerError> {
        let key = OutPoint::new(*id, index).to_string();
        Ok(self.read()?.spends.get(&key).copied())
    }

    fn fetch_unspent_outputs(&self, owner: &Identity) -> Result<Vec<Utxo>, LedgerError> {
        let state = self.read()?;
        let mut utxos: Vec<Utxo> = state
            .transitions
            .iter()
            .flat_map(|(txid, record)| {
                record
                    .transition
                    .outputs
                    .iter()
                    .enumerate()
                    .map(move |(index, output)| (OutPoint::new(*txid, index as u32), output))
            })
            .filter(|(outpoint, output)| {
                output.payee() == Some(owner) && !state.spends.contains_key(&outpoint.to_string())
            })
            .map(|(outpoint, output)| Utxo {
                outpoint,
                value: output.value,
                owner: owner.clone(),
            })
            .collect();
        utxos.sort_by(|a, b| b.value.cmp(&a.value).then(a.outpoint.txid.cmp(&b.outpoint.txid)));
        Ok(utxos)
    }
}

impl LedgerWriter for MemoryLedger {
    fn submit(&self, transition: &Transition) -> Result<TransitionId, LedgerError> {
        let mut state = self.write()?;
        self.validate(&state, transition)?;

        let id = transition.id();
        for input in &transition.inputs {
            state.spends.insert(input.prevout.to_string(), id);
        }
        state.transitions.insert(
            id,
            TransitionRecord {
                transition: transition.clone(),
                confirmation: None,
            },
        );
        state.pending.push(id);
        debug!("Accepted {} into the pending set", id.short());
        Ok(id)
    }
}
