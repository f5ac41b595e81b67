//! Lineage trace — the reconstructed history of one organism
//!
//! A trace is an append-only list of generation entries, one per observed
//! transition. Only the walker appends; the final entry's successor is the
//! only field that may change afterwards, and only from unknown to known.

use crate::annotation::AnnotationRecord;
use crate::covenant::{Lifecycle, OperationKind, Organism, OrganismState};
use crate::error::{OrganismError, Result};
use crate::ledger::Confirmation;
use crate::transition::{Identity, OutPoint, TransitionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed transition of a lineage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationEntry {
    pub generation: u64,
    pub transition_id: TransitionId,
    pub kind: OperationKind,
    /// Organism balance after the transition, 0 once dead
    pub balance: u64,
    /// Party credited with the reward (reproduce only)
    pub claimer: Option<Identity>,
    pub reward: u64,
    pub fee: u64,
    /// Balance increase (feed only)
    pub fed: u64,
    /// `None` while unconfirmed
    pub confirmation: Option<Confirmation>,
    pub alive: bool,
    /// Terms carried by the continuation; absent once dead
    pub terms: Option<OrganismState>,
    /// Absent only on a spawn that carried no annotation
    pub annotation: Option<AnnotationRecord>,
    /// Transition spending this entry's continuation, once known
    pub successor: Option<TransitionId>,
}

impl GenerationEntry {
    /// The live organism this entry leaves behind
    pub fn organism(&self) -> Option<Organism> {
        let state = self.terms.filter(|_| self.alive)?;
        Some(Organism {
            state,
            value: self.balance,
            outpoint: OutPoint::new(self.transition_id, 0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageTrace {
    /// Spawn transition id
    pub origin: TransitionId,
    entries: Vec<GenerationEntry>,
    pub updated_at: DateTime<Utc>,
}

impl LineageTrace {
    pub fn new(origin: TransitionId) -> Self {
        Self {
            origin,
            entries: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn entries(&self) -> &[GenerationEntry] {
        &self.entries
    }

    pub fn tip(&self) -> Option<&GenerationEntry> {
        self.entries.last()
    }

    /// True once the lineage has died
    pub fn is_terminal(&self) -> bool {
        self.tip().is_some_and(|tip| !tip.alive)
    }

    pub fn last_resolved_generation(&self) -> Option<u64> {
        self.tip().map(|tip| tip.generation)
    }

    /// Lineage position at the tip, `None` before the spawn is resolved
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        let tip = self.tip()?;
        Some(match tip.organism() {
            Some(organism) => Lifecycle::Alive(organism),
            None => Lifecycle::Dead {
                generation: tip.generation,
            },
        })
    }

    pub(crate) fn append(&mut self, entry: GenerationEntry) -> Result<()> {
        match self.tip() {
            None => {
                if entry.kind != OperationKind::Spawn || entry.generation != 0 {
                    return Err(OrganismError::violation(
                        entry.generation,
                        "first entry",
                        "spawn at generation 0",
                        format!("{:?} at generation {}", entry.kind, entry.generation),
                    ));
                }
            }
            Some(tip) => {
                if !tip.alive {
                    return Err(OrganismError::TerminalLineage {
                        generation: tip.generation,
                    });
                }
                if tip.successor.is_some_and(|s| s != entry.transition_id) {
                    return Err(OrganismError::violation(
                        entry.generation,
                        "successor",
                        tip.successor.map(|s| s.to_string()).unwrap_or_default(),
                        entry.transition_id,
                    ));
                }
                let expected = match entry.kind {
                    OperationKind::Reproduce => tip.generation + 1,
                    OperationKind::Feed => tip.generation,
                    OperationKind::Spawn => {
                        return Err(OrganismError::violation(
                            entry.generation,
                            "entry kind",
                            "reproduce or feed",
                            "spawn",
                        ))
                    }
                };
                if entry.generation != expected {
                    return Err(OrganismError::violation(
                        entry.generation,
                        "generation",
                        expected,
                        entry.generation,
                    ));
                }
            }
        }
        self.entries.push(entry);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the spend of the tip's continuation. Returns false if the tip
    /// already names a different successor.
    pub(crate) fn set_successor(&mut self, successor: TransitionId) -> bool {
        let Some(tip) = self.entries.last_mut() else {
            return false;
        };
        match tip.successor {
            Some(known) => known == successor,
            None => {
                tip.successor = Some(successor);
                self.updated_at = Utc::now();
                true
            }
        }
    }

    /// Drop a live tip with no known successor so it can be re-derived
    pub(crate) fn pop_open_tip(&mut self) -> Option<GenerationEntry> {
        if self.tip().is_some_and(|tip| tip.alive && tip.successor.is_none()) {
            self.updated_at = Utc::now();
            self.entries.pop()
        } else {
            None
        }
    }

    /// Check the lineage-wide properties over the recorded entries: reproduce
    /// generations step by one, feeds keep the generation, nothing follows a
    /// death, the fixed terms never change, and every entry past the spawn
    /// names this trace's origin.
    pub fn check_invariants(&self) -> Result<()> {
        let Some(first) = self.entries.first() else {
            return Ok(());
        };
        let terms = first.terms.ok_or_else(|| {
            OrganismError::violation(0, "spawn terms", "covenant terms", "none")
        })?;

        for pair in self.entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if !prev.alive {
                return Err(OrganismError::TerminalLineage {
                    generation: prev.generation,
                });
            }
            if prev.successor != Some(next.transition_id) {
                return Err(OrganismError::violation(
                    next.generation,
                    "successor link",
                    next.transition_id,
                    prev.successor.map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
                ));
            }
            let step = match next.kind {
                OperationKind::Reproduce => 1,
                _ => 0,
            };
            if next.generation != prev.generation + step {
                return Err(OrganismError::violation(
                    next.generation,
                    "generation",
                    prev.generation + step,
                    next.generation,
                ));
            }
        }

        for entry in &self.entries[1..] {
            if let Some(state) = &entry.terms {
                if !terms.same_terms(state) {
                    return Err(OrganismError::violation(
                        entry.generation,
                        "covenant terms",
                        format!("{:?}", terms),
                        format!("{:?}", state),
                    ));
                }
            }
            let origin = entry.annotation.as_ref().map(|a| a.lineage_origin);
            if entry.generation >= 1 && origin != Some(self.origin) {
                return Err(OrganismError::violation(
                    entry.generation,
                    "lineage origin",
                    self.origin,
                    origin.map(|o| o.to_string()).unwrap_or_else(|| "none".into()),
                ));
            }
        }
        Ok(())
    }

    pub fn total_rewards(&self) -> u64 {
        self.entries.iter().map(|e| e.reward).sum()
    }

    pub fn total_fees(&self) -> u64 {
        self.entries.iter().map(|e| e.fee).sum()
    }

    pub fn total_fed(&self) -> u64 {
        self.entries.iter().map(|e| e.fed).sum()
    }

    pub fn summary(&self) -> String {
        let status = match self.tip() {
            None => "unresolved".to_string(),
            Some(tip) if tip.alive => format!("alive, balance {}", tip.balance),
            Some(_) => "dead".to_string(),
        };
        format!(
            "Lineage {} | {} entries | gen {} | {} | rewards={} fees={} fed={}",
            self.origin.short(),
            self.entries.len(),
            self.last_resolved_generation()
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".into()),
            status,
            self.total_rewards(),
            self.total_fees(),
            self.total_fed()
        )
    }
}
