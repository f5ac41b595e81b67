//! Request pacing for rate-limited ledger backends
//!
//! Serializes requests with a fixed pause between them. This is a
//! caller-side policy wrapped around a collaborator, not part of the
//! protocol.

use super::{LedgerError, LedgerReader, LedgerWriter, TransitionRecord};
use crate::transition::{Identity, Transition, TransitionId, Utxo};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct Throttled<L> {
    inner: L,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<L> Throttled<L> {
    pub fn new(inner: L, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last_request: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Block until `delay` has passed since the previous request. The lock is
    /// held while sleeping so concurrent callers queue up behind each other.
    fn pace(&self) -> Result<(), LedgerError> {
        let mut last = self
            .last_request
            .lock()
            .map_err(|_| LedgerError::Unavailable("throttle lock poisoned".into()))?;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

impl<L: LedgerReader> LedgerReader for Throttled<L> {
    fn fetch_transition(&self, id: &TransitionId) -> Result<Option<TransitionRecord>, LedgerError> {
        self.pace()?;
        self.inner.fetch_transition(id)
    }

    fn fetch_output_spend(
        &self,
        id: &TransitionId,
        index: u32,
    ) -> Result<Option<TransitionId>, LedgerError> {
        self.pace()?;
        self.inner.fetch_output_spend(id, index)
    }

    fn fetch_unspent_outputs(&self, owner: &Identity) -> Result<Vec<Utxo>, LedgerError> {
        self.pace()?;
        self.inner.fetch_unspent_outputs(owner)
    }
}

impl<L: LedgerWriter> LedgerWriter for Throttled<L> {
    fn submit(&self, transition: &Transition) -> Result<TransitionId, LedgerError> {
        self.pace()?;
        self.inner.submit(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::DEFAULT_PROTOCOL_TAG;
    use crate::ledger::MemoryLedger;

    #[test]
    fn test_requests_are_spaced() {
        let ledger = Throttled::new(
            MemoryLedger::new(DEFAULT_PROTOCOL_TAG),
            Duration::from_millis(20),
        );
        let id = TransitionId::digest(b"missing");
        let start = Instant::now();
        for _ in 0..3 {
            assert!(ledger.fetch_transition(&id).unwrap().is_none());
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_first_request_is_immediate() {
        let ledger = Throttled::new(
            MemoryLedger::new(DEFAULT_PROTOCOL_TAG),
            Duration::from_secs(5),
        );
        let start = Instant::now();
        ledger.fetch_output_spend(&TransitionId::ZERO, 0).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
