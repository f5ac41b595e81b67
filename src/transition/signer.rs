//! Signing and submission — the hand-off to external collaborators
//!
//! The core only needs an authorization to exist for every key-held input;
//! how it is produced belongs to the signer. Submission happens once: a
//! rejected transition is reported unchanged and never resubmitted.

use crate::error::{OrganismError, Result};
use crate::ledger::LedgerWriter;
use crate::transition::{Authorization, Identity, Transition, TransitionId};
use log::{info, warn};
use sha2::{Digest, Sha256};

/// Produces spending authorizations for inputs held by one identity
pub trait Signer {
    fn identity(&self) -> &Identity;

    fn authorize(&self, digest: &TransitionId, input_index: usize) -> Result<Authorization>;
}

/// Deterministic local signer for the in-memory ledger and the CLI.
///
/// Identity and authorizations are SHA-256 derivations of a secret; this is
/// a stand-in for a real wallet, not a signature scheme.
pub struct KeySigner {
    secret: Vec<u8>,
    identity: Identity,
}

impl KeySigner {
    pub fn from_secret(secret: &str) -> Self {
        let digest = hex::encode(Sha256::digest(secret.as_bytes()));
        Self {
            secret: secret.as_bytes().to_vec(),
            identity: Identity(format!("org1{}", &digest[..38])),
        }
    }
}

impl Signer for KeySigner {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn authorize(&self, digest: &TransitionId, input_index: usize) -> Result<Authorization> {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(digest.as_bytes());
        hasher.update((input_index as u32).to_le_bytes());
        Ok(Authorization(hasher.finalize().to_vec()))
    }
}

/// Attach authorizations to every key-held input of `transition`.
/// Covenant inputs carry no owner and are left alone.
pub fn finalize(mut transition: Transition, signer: &dyn Signer) -> Result<Transition> {
    let digest = transition.id();
    for (index, input) in transition.inputs.iter_mut().enumerate() {
        let Some(owner) = &input.owner else {
            continue;
        };
        if owner != signer.identity() {
            return Err(OrganismError::MissingAuthority {
                index,
                owner: owner.clone(),
            });
        }
        input.authorization = Some(signer.authorize(&digest, index)?);
    }
    Ok(transition)
}

/// Submit a finalized transition exactly once
pub fn submit<W: LedgerWriter + ?Sized>(writer: &W, transition: &Transition) -> Result<TransitionId> {
    if let Some((index, input)) = transition
        .inputs
        .iter()
        .enumerate()
        .find(|(_, i)| i.owner.is_some() && i.authorization.is_none())
    {
        return Err(OrganismError::MissingAuthority {
            index,
            owner: input.owner.clone().unwrap_or_else(|| Identity::from("")),
        });
    }

    match writer.submit(transition) {
        Ok(id) => {
            info!("Submitted {}", transition.summary());
            Ok(id)
        }
        Err(e) => {
            warn!("Ledger rejected {}: {}", transition.id().short(), e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::{OutPoint, TxInput, TxOutput, Utxo};

    fn funded(owner: &Identity) -> Transition {
        let utxo = Utxo {
            outpoint: OutPoint::new(TransitionId::digest(b"mint"), 0),
            value: 10_000,
            owner: owner.clone(),
        };
        Transition {
            inputs: vec![
                TxInput::covenant(OutPoint::new(TransitionId::digest(b"organism"), 0), 5_000),
                TxInput::funding(&utxo),
            ],
            outputs: vec![TxOutput::pay(9_000, owner.clone())],
        }
    }

    #[test]
    fn test_identity_is_stable() {
        let a = KeySigner::from_secret("alice");
        let b = KeySigner::from_secret("alice");
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), KeySigner::from_secret("bob").identity());
        assert!(a.identity().as_str().starts_with("org1"));
    }

    #[test]
    fn test_finalize_signs_owned_inputs_only() {
        let signer = KeySigner::from_secret("alice");
        let tx = finalize(funded(signer.identity()), &signer).unwrap();
        assert!(tx.inputs[0].authorization.is_none());
        assert!(tx.inputs[1].authorization.is_some());
    }

    #[test]
    fn test_finalize_refuses_foreign_inputs() {
        let signer = KeySigner::from_secret("alice");
        let other = KeySigner::from_secret("mallory");
        let err = finalize(funded(signer.identity()), &other).unwrap_err();
        assert!(matches!(err, OrganismError::MissingAuthority { index: 1, .. }));
    }
}
