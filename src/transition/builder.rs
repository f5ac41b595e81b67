//! Transition builder — concrete spawn, reproduce and feed transitions
//!
//! Output order is fixed: continuation (if alive), annotation, reward
//! (reproduce), change (spawn/feed, only at or above the change dust limit).
//! The records come straight from the covenant machine, and every built
//! reproduce or feed is run through the verifier before it is returned.

use crate::annotation::Payload;
use crate::config::ProtocolConfig;
use crate::covenant::{CovenantMachine, ExpectedTransition, Organism, SpawnParams};
use crate::error::{OrganismError, Result};
use crate::transition::{Identity, Transition, TransitionId, TxInput, TxOutput, Utxo, MAX_IDENTITY_LEN};
use log::debug;

/// A fully specified, not yet authorized transition
#[derive(Debug, Clone)]
pub struct UnsignedTransition {
    pub transition: Transition,
    pub expected: ExpectedTransition,
}

impl UnsignedTransition {
    pub fn id(&self) -> TransitionId {
        self.transition.id()
    }
}

pub struct TransitionBuilder {
    machine: CovenantMachine,
    config: ProtocolConfig,
}

impl TransitionBuilder {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            machine: CovenantMachine::new(config.protocol_tag),
            config,
        }
    }

    pub fn machine(&self) -> &CovenantMachine {
        &self.machine
    }

    /// Genesis transition funded from `funding`
    pub fn spawn(
        &self,
        params: &SpawnParams,
        funding: &[Utxo],
        change_to: &Identity,
    ) -> Result<UnsignedTransition> {
        require_encodable(change_to)?;
        let expected = self.machine.spawn(params)?;
        let needed = self.with_processing_fee(params.initial_balance)?;
        let (inputs, total) = select_funding(funding, needed)?;

        let mut outputs = expected.outputs.clone();
        outputs.extend(self.change_output(total - needed, change_to));

        let transition = Transition { inputs, outputs };
        debug!(
            "Built spawn {} | balance={} species={}",
            transition.id().short(),
            params.initial_balance,
            params.species
        );
        Ok(UnsignedTransition {
            transition,
            expected,
        })
    }

    /// Reproduce transition. Spends only the organism; the claimer receives
    /// the reward and needs no key.
    pub fn reproduce(
        &self,
        organism: &Organism,
        claimer: &Identity,
        payload: Payload,
    ) -> Result<UnsignedTransition> {
        require_encodable(claimer)?;
        let expected = self.machine.reproduce(organism, claimer, payload)?;
        let outputs = expected.outputs.clone();
        self.machine.verify(organism, &outputs)?;

        let transition = Transition {
            inputs: vec![TxInput::covenant(organism.outpoint, organism.value)],
            outputs,
        };
        debug!(
            "Built reproduce {} | gen {} -> {} | alive={}",
            transition.id().short(),
            organism.generation(),
            expected.next_state.generation,
            expected.alive
        );
        Ok(UnsignedTransition {
            transition,
            expected,
        })
    }

    /// Feed transition. The feeder supplies `amount` plus the processing
    /// cost from `funding`; the organism's own balance only grows.
    pub fn feed(
        &self,
        organism: &Organism,
        amount: u64,
        funding: &[Utxo],
        change_to: &Identity,
        payload: Payload,
    ) -> Result<UnsignedTransition> {
        require_encodable(change_to)?;
        let expected = self.machine.feed(organism, amount, payload)?;
        let needed = self.with_processing_fee(amount)?;
        let (funding_inputs, total) = select_funding(funding, needed)?;

        let mut outputs = expected.outputs.clone();
        outputs.extend(self.change_output(total - needed, change_to));
        self.machine.verify(organism, &outputs)?;

        let mut inputs = vec![TxInput::covenant(organism.outpoint, organism.value)];
        inputs.extend(funding_inputs);

        let transition = Transition { inputs, outputs };
        debug!(
            "Built feed {} | {} + {} at gen {}",
            transition.id().short(),
            organism.value,
            amount,
            organism.generation()
        );
        Ok(UnsignedTransition {
            transition,
            expected,
        })
    }

    fn with_processing_fee(&self, amount: u64) -> Result<u64> {
        amount
            .checked_add(self.config.processing_fee)
            .ok_or_else(|| OrganismError::InvalidAmount {
                amount,
                reason: "amount plus processing fee overflows".into(),
            })
    }

    fn change_output(&self, change: u64, change_to: &Identity) -> Option<TxOutput> {
        (change >= self.config.change_dust_limit).then(|| TxOutput::pay(change, change_to.clone()))
    }
}

fn require_encodable(identity: &Identity) -> Result<()> {
    if identity.is_encodable() {
        Ok(())
    } else {
        Err(OrganismError::IdentityTooLong {
            len: identity.as_str().len(),
            max: MAX_IDENTITY_LEN,
        })
    }
}

/// Take funding outputs in order until they cover `needed`
fn select_funding(funding: &[Utxo], needed: u64) -> Result<(Vec<TxInput>, u64)> {
    let mut inputs = Vec::new();
    let mut total = 0u64;
    for utxo in funding {
        if total >= needed {
            break;
        }
        total = total.saturating_add(utxo.value);
        inputs.push(TxInput::funding(utxo));
    }
    if total < needed {
        return Err(OrganismError::InsufficientFunds {
            needed,
            available: total,
        });
    }
    Ok((inputs, total))
}
