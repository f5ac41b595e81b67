//! Lineage walker — follows the chain of spends from a spawn transition
//!
//! Each step fetches one transition, verifies it against the previous
//! entry's continuation with the covenant machine, appends the entry and
//! persists, then asks the ledger whether the new continuation has been
//! spent. The walk stops at the unspent (or dead) tip.

use super::entry::{GenerationEntry, LineageTrace};
use crate::annotation::{self, AnnotationRecord, ProtocolTag};
use crate::covenant::{CovenantMachine, OperationKind, Organism};
use crate::error::{OrganismError, Result};
use crate::ledger::{LedgerReader, TransitionRecord};
use crate::storage::TraceStore;
use crate::transition::TransitionId;
use log::{debug, info, warn};

/// A walk that stopped before reaching the tip
#[derive(Debug, thiserror::Error)]
#[error(
    "Trace of {} halted after generation {}: {cause}",
    .partial.origin.short(),
    .last_resolved_generation.map(|g| g.to_string()).unwrap_or_else(|| "-".into())
)]
pub struct TraceHalted {
    #[source]
    pub cause: OrganismError,
    /// Everything resolved before the failure, already persisted
    pub partial: LineageTrace,
    pub last_resolved_generation: Option<u64>,
}

impl TraceHalted {
    fn new(cause: OrganismError, partial: LineageTrace) -> Self {
        Self {
            last_resolved_generation: partial.last_resolved_generation(),
            cause,
            partial,
        }
    }
}

pub struct LineageWalker<'a, L: LedgerReader + ?Sized> {
    ledger: &'a L,
    machine: CovenantMachine,
    store: Option<&'a TraceStore>,
}

impl<'a, L: LedgerReader + ?Sized> LineageWalker<'a, L> {
    pub fn new(ledger: &'a L, tag: ProtocolTag) -> Self {
        Self {
            ledger,
            machine: CovenantMachine::new(tag),
            store: None,
        }
    }

    /// Load cached traces from, and persist every step to, `store`
    pub fn with_store(mut self, store: &'a TraceStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Trace the lineage spawned by `origin`, resuming a cached trace if the
    /// store holds one.
    pub fn trace(&self, origin: TransitionId) -> std::result::Result<LineageTrace, TraceHalted> {
        let cached = match self.store {
            Some(store) => store
                .load(&origin)
                .map_err(|e| TraceHalted::new(e.into(), LineageTrace::new(origin)))?,
            None => None,
        };
        self.resume(cached.unwrap_or_else(|| LineageTrace::new(origin)))
    }

    /// Continue a trace from where it stopped
    pub fn resume(&self, mut trace: LineageTrace) -> std::result::Result<LineageTrace, TraceHalted> {
        if trace.is_terminal() {
            debug!("Lineage {} is dead, nothing to resume", trace.origin.short());
            return Ok(trace);
        }
        if let Some(open) = trace.pop_open_tip() {
            debug!(
                "Re-deriving open tip {} at generation {}",
                open.transition_id.short(),
                open.generation
            );
        }

        let mut next = match trace.tip() {
            None => Some(trace.origin),
            Some(tip) => tip.successor,
        };
        while let Some(id) = next {
            next = match self.step(&mut trace, id) {
                Ok(successor) => successor,
                Err(cause) => return Err(self.halt(cause, trace)),
            };
        }

        info!("{}", trace.summary());
        Ok(trace)
    }

    /// Resolve one transition into an entry. Returns the spender of the new
    /// continuation, if any.
    fn step(&self, trace: &mut LineageTrace, id: TransitionId) -> Result<Option<TransitionId>> {
        let record = self
            .ledger
            .fetch_transition(&id)?
            .ok_or(OrganismError::UnresolvedReference(id))?;

        let entry = match trace.tip() {
            None => self.genesis_entry(id, record)?,
            Some(prev) => self.successor_entry(prev, id, record)?,
        };
        let alive = entry.alive;
        debug!(
            "Lineage {} gen {} {:?} balance={} reward={} fee={}",
            trace.origin.short(),
            entry.generation,
            entry.kind,
            entry.balance,
            entry.reward,
            entry.fee
        );
        trace.append(entry)?;
        self.persist(trace)?;

        if !alive {
            return Ok(None);
        }
        let spend = self.ledger.fetch_output_spend(&id, 0)?;
        if let Some(successor) = spend {
            if !trace.set_successor(successor) {
                return Err(OrganismError::violation(
                    trace.last_resolved_generation().unwrap_or(0),
                    "successor",
                    "a single spend",
                    successor,
                ));
            }
            self.persist(trace)?;
        }
        Ok(spend)
    }

    fn genesis_entry(&self, id: TransitionId, record: TransitionRecord) -> Result<GenerationEntry> {
        let organism = Organism::from_transition(id, &record.transition)?;
        let state = organism.state;
        if state.generation != 0 || !state.lineage_origin.is_zero() {
            return Err(OrganismError::NotAnOrganism {
                transition: id,
                reason: format!("not a spawn: continuation at generation {}", state.generation),
            });
        }
        let annotation =
            annotation::find_in_outputs(&record.transition.outputs, &self.machine.tag())?
                .map(|(_, a)| a);
        match &annotation {
            None => warn!("Spawn {} carries no annotation", id.short()),
            Some(found) => {
                let expected = state.annotation(self.machine.tag(), found.payload.clone())?;
                if *found != expected {
                    return Err(OrganismError::violation(
                        0,
                        "spawn annotation",
                        describe(&expected),
                        describe(found),
                    ));
                }
            }
        }

        Ok(GenerationEntry {
            generation: 0,
            transition_id: id,
            kind: OperationKind::Spawn,
            balance: organism.value,
            claimer: None,
            reward: 0,
            fee: 0,
            fed: 0,
            confirmation: record.confirmation,
            alive: true,
            terms: Some(state),
            annotation,
            successor: None,
        })
    }

    fn successor_entry(
        &self,
        prev: &GenerationEntry,
        id: TransitionId,
        record: TransitionRecord,
    ) -> Result<GenerationEntry> {
        let organism = prev.organism().ok_or(OrganismError::TerminalLineage {
            generation: prev.generation,
        })?;
        if !record.transition.spends(&organism.outpoint) {
            return Err(OrganismError::violation(
                prev.generation + 1,
                "input",
                organism.outpoint,
                format!("{} does not spend it", id.short()),
            ));
        }

        let verified = self.machine.verify(&organism, &record.transition.outputs)?;
        let expected = verified.expected;
        let fee = match expected.kind {
            OperationKind::Reproduce => prev
                .balance
                .saturating_sub(expected.next_balance)
                .saturating_sub(expected.reward),
            _ => 0,
        };

        Ok(GenerationEntry {
            generation: expected.next_state.generation,
            transition_id: id,
            kind: expected.kind,
            balance: expected.next_balance,
            claimer: verified.claimer,
            reward: expected.reward,
            fee,
            fed: verified.fed,
            confirmation: record.confirmation,
            alive: expected.alive,
            terms: expected.alive.then_some(expected.next_state),
            annotation: Some(verified.annotation),
            successor: None,
        })
    }

    fn persist(&self, trace: &LineageTrace) -> Result<()> {
        if let Some(store) = self.store {
            store.save(trace)?;
        }
        Ok(())
    }

    fn halt(&self, cause: OrganismError, trace: LineageTrace) -> TraceHalted {
        warn!(
            "Lineage {} halted after {} entries: {}",
            trace.origin.short(),
            trace.entries().len(),
            cause
        );
        if !trace.entries().is_empty() {
            if let Err(e) = self.persist(&trace) {
                warn!("Could not persist partial trace {}: {}", trace.origin.short(), e);
            }
        }
        TraceHalted::new(cause, trace)
    }
}

fn describe(annotation: &AnnotationRecord) -> String {
    format!(
        "species {} gen {} origin {}",
        annotation.species,
        annotation.generation,
        annotation.lineage_origin.short()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Payload, DEFAULT_PROTOCOL_TAG};
    use crate::config::ProtocolConfig;
    use crate::covenant::SpawnParams;
    use crate::ledger::{LedgerError, LedgerWriter, MemoryLedger};
    use crate::transition::{
        finalize, Identity, KeySigner, OutPoint, Signer, Transition, TransitionBuilder, TxInput,
        TxOutput, Utxo,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed transitions without validating them
    #[derive(Default)]
    struct FixedLedger {
        transitions: HashMap<TransitionId, TransitionRecord>,
        spends: HashMap<TransitionId, TransitionId>,
        fetches: AtomicUsize,
    }

    impl FixedLedger {
        fn add(&mut self, tx: &Transition) -> TransitionId {
            let id = tx.id();
            for input in &tx.inputs {
                if input.prevout.index == 0 {
                    self.spends.insert(input.prevout.txid, id);
                }
            }
            self.transitions.insert(
                id,
                TransitionRecord {
                    transition: tx.clone(),
                    confirmation: None,
                },
            );
            id
        }
    }

    impl LedgerReader for FixedLedger {
        fn fetch_transition(
            &self,
            id: &TransitionId,
        ) -> std::result::Result<Option<TransitionRecord>, LedgerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.transitions.get(id).cloned())
        }

        fn fetch_output_spend(
            &self,
            id: &TransitionId,
            index: u32,
        ) -> std::result::Result<Option<TransitionId>, LedgerError> {
            Ok(if index == 0 { self.spends.get(id).copied() } else { None })
        }

        fn fetch_unspent_outputs(
            &self,
            _owner: &Identity,
        ) -> std::result::Result<Vec<Utxo>, LedgerError> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        ledger: MemoryLedger,
        builder: TransitionBuilder,
        signer: KeySigner,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ledger: MemoryLedger::new(DEFAULT_PROTOCOL_TAG),
                builder: TransitionBuilder::new(ProtocolConfig::default()),
                signer: KeySigner::from_secret("walker-tests"),
            }
        }

        fn spawn(&self, initial_balance: u64) -> Organism {
            self.ledger.mint(self.signer.identity(), initial_balance + 10_000).unwrap();
            let funding = self.ledger.fetch_unspent_outputs(self.signer.identity()).unwrap();
            let params = SpawnParams {
                species: 1,
                reward_per_generation: 1_000,
                fee_per_generation: 3_000,
                dust_floor: 546,
                initial_balance,
                payload: Payload::empty(),
            };
            let built = self
                .builder
                .spawn(&params, &funding, self.signer.identity())
                .unwrap();
            let tx = finalize(built.transition, &self.signer).unwrap();
            let id = self.ledger.submit(&tx).unwrap();
            Organism::from_transition(id, &tx).unwrap()
        }

        fn reproduce(&self, organism: &Organism) -> Option<Organism> {
            let built = self
                .builder
                .reproduce(organism, &"claimer".into(), Payload::empty())
                .unwrap();
            let id = self.ledger.submit(&built.transition).unwrap();
            built.expected.lifecycle_after(id).organism().cloned()
        }

        fn feed(&self, organism: &Organism, amount: u64) -> Organism {
            self.ledger.mint(self.signer.identity(), amount + 5_000).unwrap();
            let funding = self.ledger.fetch_unspent_outputs(self.signer.identity()).unwrap();
            let built = self
                .builder
                .feed(organism, amount, &funding, self.signer.identity(), Payload::empty())
                .unwrap();
            let tx = finalize(built.transition, &self.signer).unwrap();
            let id = self.ledger.submit(&tx).unwrap();
            Organism::from_transition(id, &tx).unwrap()
        }
    }

    fn scratch_store() -> TraceStore {
        let dir = std::env::temp_dir().join(format!("organism-walker-{}", uuid::Uuid::new_v4()));
        TraceStore::open(dir).unwrap()
    }

    #[test]
    fn test_trace_to_death() {
        let h = Harness::new();
        let mut organism = h.spawn(12_000);
        let origin = organism.outpoint.txid;
        while let Some(next) = h.reproduce(&organism) {
            organism = next;
        }

        let walker = LineageWalker::new(&h.ledger, DEFAULT_PROTOCOL_TAG);
        let trace = walker.trace(origin).unwrap();
        let generations: Vec<u64> = trace.entries().iter().map(|e| e.generation).collect();
        assert_eq!(generations, vec![0, 1, 2, 3]);
        assert_eq!(
            trace.entries().iter().map(|e| e.balance).collect::<Vec<_>>(),
            vec![12_000, 8_000, 4_000, 0]
        );
        assert!(trace.is_terminal());
        assert_eq!(trace.total_rewards(), 3_000);
        assert_eq!(trace.total_fees(), 9_000);
        assert_eq!(trace.entries()[1].claimer, Some(Identity::from("claimer")));
        trace.check_invariants().unwrap();
    }

    #[test]
    fn test_trace_with_feed() {
        let h = Harness::new();
        let spawned = h.spawn(50_000);
        let origin = spawned.outpoint.txid;
        let fed = h.feed(&spawned, 20_000);
        h.reproduce(&fed).unwrap();

        let trace = LineageWalker::new(&h.ledger, DEFAULT_PROTOCOL_TAG)
            .trace(origin)
            .unwrap();
        let kinds: Vec<OperationKind> = trace.entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::Spawn, OperationKind::Feed, OperationKind::Reproduce]
        );
        assert_eq!(trace.entries()[1].generation, 0);
        assert_eq!(trace.entries()[1].fed, 20_000);
        assert_eq!(trace.entries()[1].fee, 0);
        assert_eq!(trace.entries()[2].balance, 66_000);
        assert!(trace.tip().unwrap().alive);
        trace.check_invariants().unwrap();
    }

    #[test]
    fn test_skimmed_continuation_halts_trace() {
        let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
        let params = SpawnParams {
            species: 1,
            reward_per_generation: 1_000,
            fee_per_generation: 3_000,
            dust_floor: 546,
            initial_balance: 100_000,
            payload: Payload::empty(),
        };
        let mut ledger = FixedLedger::default();
        let spawn_tx = Transition {
            inputs: vec![TxInput::covenant(OutPoint::new(TransitionId::digest(b"fund"), 1), 101_000)],
            outputs: machine.spawn(&params).unwrap().outputs,
        };
        let spawn_id = ledger.add(&spawn_tx);
        let organism = Organism::from_transition(spawn_id, &spawn_tx).unwrap();

        let mut outputs = machine
            .reproduce(&organism, &"claimer".into(), Payload::empty())
            .unwrap()
            .outputs;
        outputs[0].value = 95_000;
        let bad = Transition {
            inputs: vec![TxInput::covenant(organism.outpoint, organism.value)],
            outputs,
        };
        ledger.add(&bad);

        let store = scratch_store();
        let err = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .with_store(&store)
            .trace(spawn_id)
            .unwrap_err();
        match &err.cause {
            OrganismError::CovenantViolation { generation, field, .. } => {
                assert_eq!(*generation, 1);
                assert_eq!(field, "output[0]");
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert_eq!(err.last_resolved_generation, Some(0));
        assert_eq!(err.partial.entries().len(), 1);

        let persisted = store.load(&spawn_id).unwrap().unwrap();
        assert_eq!(persisted.entries().len(), 1);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_unresolved_successor() {
        let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
        let params = SpawnParams {
            species: 3,
            reward_per_generation: 10,
            fee_per_generation: 10,
            dust_floor: 1,
            initial_balance: 1_000,
            payload: Payload::empty(),
        };
        let mut ledger = FixedLedger::default();
        let spawn_tx = Transition {
            inputs: Vec::new(),
            outputs: machine.spawn(&params).unwrap().outputs,
        };
        let spawn_id = ledger.add(&spawn_tx);
        let ghost = TransitionId::digest(b"ghost");
        ledger.spends.insert(spawn_id, ghost);

        let err = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .trace(spawn_id)
            .unwrap_err();
        assert!(matches!(err.cause, OrganismError::UnresolvedReference(id) if id == ghost));
        assert_eq!(err.partial.entries().len(), 1);
        assert_eq!(err.partial.tip().unwrap().successor, Some(ghost));
    }

    #[test]
    fn test_unknown_origin() {
        let ledger = FixedLedger::default();
        let origin = TransitionId::digest(b"nowhere");
        let err = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .trace(origin)
            .unwrap_err();
        assert!(matches!(err.cause, OrganismError::UnresolvedReference(_)));
        assert_eq!(err.last_resolved_generation, None);
    }

    #[test]
    fn test_resume_refetches_only_the_open_tip() {
        let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
        let params = SpawnParams {
            species: 1,
            reward_per_generation: 1_000,
            fee_per_generation: 3_000,
            dust_floor: 546,
            initial_balance: 100_000,
            payload: Payload::empty(),
        };
        let mut ledger = FixedLedger::default();
        let spawn_tx = Transition {
            inputs: Vec::new(),
            outputs: machine.spawn(&params).unwrap().outputs,
        };
        let spawn_id = ledger.add(&spawn_tx);
        let mut organism = Organism::from_transition(spawn_id, &spawn_tx).unwrap();

        let advance = |ledger: &mut FixedLedger, organism: &Organism| {
            let tx = Transition {
                inputs: vec![TxInput::covenant(organism.outpoint, organism.value)],
                outputs: machine
                    .reproduce(organism, &"claimer".into(), Payload::empty())
                    .unwrap()
                    .outputs,
            };
            let id = ledger.add(&tx);
            Organism::from_transition(id, &tx).unwrap()
        };
        organism = advance(&mut ledger, &organism);

        let store = scratch_store();
        let first = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .with_store(&store)
            .trace(spawn_id)
            .unwrap();
        assert_eq!(first.entries().len(), 2);
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 2);

        advance(&mut ledger, &organism);
        ledger.fetches.store(0, Ordering::SeqCst);
        let second = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .with_store(&store)
            .trace(spawn_id)
            .unwrap();
        assert_eq!(second.entries().len(), 3);
        assert_eq!(second.last_resolved_generation(), Some(2));
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(&second.entries()[..1], &first.entries()[..1]);
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_resume_from_known_successor() {
        let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
        let params = SpawnParams {
            species: 1,
            reward_per_generation: 1_000,
            fee_per_generation: 3_000,
            dust_floor: 546,
            initial_balance: 100_000,
            payload: Payload::empty(),
        };
        let mut ledger = FixedLedger::default();
        let spawn_tx = Transition {
            inputs: Vec::new(),
            outputs: machine.spawn(&params).unwrap().outputs,
        };
        let spawn_id = ledger.add(&spawn_tx);
        let mut organism = Organism::from_transition(spawn_id, &spawn_tx).unwrap();
        for _ in 0..3 {
            let tx = Transition {
                inputs: vec![TxInput::covenant(organism.outpoint, organism.value)],
                outputs: machine
                    .reproduce(&organism, &"claimer".into(), Payload::empty())
                    .unwrap()
                    .outputs,
            };
            let id = ledger.add(&tx);
            organism = Organism::from_transition(id, &tx).unwrap();
        }

        let walker = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG);
        let full = walker.trace(spawn_id).unwrap();
        assert_eq!(full.entries().len(), 4);

        // cached trace stops at generation 2, whose spender is already known
        let mut cached = LineageTrace::new(spawn_id);
        for entry in &full.entries()[..3] {
            cached.append(entry.clone()).unwrap();
        }
        let known = cached.tip().unwrap().successor;
        assert_eq!(known, Some(full.entries()[3].transition_id));

        ledger.fetches.store(0, Ordering::SeqCst);
        let resumed = walker.resume(cached).unwrap();
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(resumed.entries().len(), 4);
        assert_eq!(resumed.entries(), full.entries());
    }

    #[test]
    fn test_spawn_annotation_must_match_covenant() {
        let machine = CovenantMachine::new(DEFAULT_PROTOCOL_TAG);
        let params = SpawnParams {
            species: 1,
            reward_per_generation: 1_000,
            fee_per_generation: 3_000,
            dust_floor: 546,
            initial_balance: 100_000,
            payload: Payload::empty(),
        };
        let mut outputs = machine.spawn(&params).unwrap().outputs;
        outputs[1] = TxOutput::data(
            AnnotationRecord::new(DEFAULT_PROTOCOL_TAG, 9, 0, TransitionId::ZERO).encode(),
        );
        let mut ledger = FixedLedger::default();
        let spawn_id = ledger.add(&Transition {
            inputs: Vec::new(),
            outputs,
        });

        let store = scratch_store();
        let err = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .with_store(&store)
            .trace(spawn_id)
            .unwrap_err();
        match &err.cause {
            OrganismError::CovenantViolation {
                generation,
                field,
                observed,
                ..
            } => {
                assert_eq!(*generation, 0);
                assert_eq!(field, "spawn annotation");
                assert!(observed.contains("species 9"));
            }
            other => panic!("expected violation, got {:?}", other),
        }
        assert!(err.partial.entries().is_empty());
        assert!(store.load(&spawn_id).unwrap().is_none());
        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_dead_trace_is_returned_unchanged() {
        let h = Harness::new();
        let mut organism = h.spawn(8_000);
        let origin = organism.outpoint.txid;
        while let Some(next) = h.reproduce(&organism) {
            organism = next;
        }

        let walker = LineageWalker::new(&h.ledger, DEFAULT_PROTOCOL_TAG);
        let trace = walker.trace(origin).unwrap();
        assert!(trace.is_terminal());
        let again = walker.resume(trace.clone()).unwrap();
        assert_eq!(again, trace);
    }

    #[test]
    fn test_rejects_non_spawn_origin() {
        let h = Harness::new();
        let organism = h.spawn(100_000);
        let child = h.reproduce(&organism).unwrap();
        let err = LineageWalker::new(&h.ledger, DEFAULT_PROTOCOL_TAG)
            .trace(child.outpoint.txid)
            .unwrap_err();
        assert!(matches!(err.cause, OrganismError::NotAnOrganism { .. }));
    }

    #[test]
    fn test_data_only_transition_is_not_an_organism() {
        let mut ledger = FixedLedger::default();
        let tx = Transition {
            inputs: Vec::new(),
            outputs: vec![TxOutput::data(b"hello".to_vec())],
        };
        let id = ledger.add(&tx);
        let err = LineageWalker::new(&ledger, DEFAULT_PROTOCOL_TAG)
            .trace(id)
            .unwrap_err();
        assert!(matches!(err.cause, OrganismError::NotAnOrganism { .. }));
    }
}
