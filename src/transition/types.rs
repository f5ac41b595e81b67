//! Ledger data model — transitions, outputs, scripts and identifiers
//!
//! A transition consumes outputs of earlier transitions and produces an
//! ordered list of new outputs. Its identifier is the double SHA-256 of the
//! canonical encoding, with authorizations left out so that signing does not
//! change the identifier being signed.

use crate::covenant::OrganismState;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Leading byte of a covenant (organism) script.
pub const COVENANT_OPCODE: u8 = 0xc0;
/// Leading byte of a provably unspendable data-carrier script.
pub const DATA_CARRIER_OPCODE: u8 = 0x6a;
/// Leading byte of a pay-to-identity script.
pub const PAY_OPCODE: u8 = 0x76;
/// Longest identity the two-byte pay-script length prefix can describe.
pub const MAX_IDENTITY_LEN: usize = u16::MAX as usize;

/// 32-byte transition identifier. Also used as a lineage origin, where the
/// all-zero value is the "not yet knowable" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransitionId(pub [u8; 32]);

impl TransitionId {
    pub const ZERO: TransitionId = TransitionId([0u8; 32]);

    /// Double SHA-256 of arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Self(second.into())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransitionId({})", self)
    }
}

impl FromStr for TransitionId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for TransitionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransitionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A party able to receive value (an address, in ledger terms)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identity fits a pay script's length prefix
    pub fn is_encodable(&self) -> bool {
        self.0.len() <= MAX_IDENTITY_LEN
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to one output of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TransitionId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TransitionId, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Spending authorization produced by the signing collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization(#[serde(with = "hex::serde")] pub Vec<u8>);

/// Locking condition of an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Script {
    /// Organism covenant carrying its full state
    Covenant(OrganismState),
    /// Unspendable data carrier (holds the annotation)
    DataCarrier(#[serde(with = "hex::serde")] Vec<u8>),
    /// Spendable by the holder of an identity's key
    PayTo(Identity),
}

impl Script {
    /// Canonical byte form, integers little-endian:
    /// - covenant: `c0 species reward:8 fee:8 dust:8 origin:32 generation:8`
    /// - data carrier: `6a <bytes>`
    /// - pay-to-identity: `76 len:2 <utf8 identity>`
    ///
    /// The pay prefix saturates at `MAX_IDENTITY_LEN`; the builder and the
    /// ledger refuse longer identities, so no accepted script carries a
    /// saturated prefix.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Script::Covenant(state) => {
                let mut out = Vec::with_capacity(66);
                out.push(COVENANT_OPCODE);
                out.push(state.species);
                out.extend_from_slice(&state.reward_per_generation.to_le_bytes());
                out.extend_from_slice(&state.fee_per_generation.to_le_bytes());
                out.extend_from_slice(&state.dust_floor.to_le_bytes());
                out.extend_from_slice(state.lineage_origin.as_bytes());
                out.extend_from_slice(&state.generation.to_le_bytes());
                out
            }
            Script::DataCarrier(data) => {
                let mut out = Vec::with_capacity(1 + data.len());
                out.push(DATA_CARRIER_OPCODE);
                out.extend_from_slice(data);
                out
            }
            Script::PayTo(identity) => {
                let bytes = identity.as_str().as_bytes();
                let mut out = Vec::with_capacity(3 + bytes.len());
                out.push(PAY_OPCODE);
                let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

/// One resulting record of a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script: Script,
}

impl TxOutput {
    pub fn covenant(value: u64, state: OrganismState) -> Self {
        Self {
            value,
            script: Script::Covenant(state),
        }
    }

    pub fn data(bytes: Vec<u8>) -> Self {
        Self {
            value: 0,
            script: Script::DataCarrier(bytes),
        }
    }

    pub fn pay(value: u64, to: Identity) -> Self {
        Self {
            value,
            script: Script::PayTo(to),
        }
    }

    pub fn covenant_state(&self) -> Option<&OrganismState> {
        match &self.script {
            Script::Covenant(state) => Some(state),
            _ => None,
        }
    }

    pub fn data_bytes(&self) -> Option<&[u8]> {
        match &self.script {
            Script::DataCarrier(data) => Some(data),
            _ => None,
        }
    }

    pub fn payee(&self) -> Option<&Identity> {
        match &self.script {
            Script::PayTo(identity) => Some(identity),
            _ => None,
        }
    }

    /// `value:8 LE ‖ script-length:4 LE ‖ script`
    pub fn to_bytes(&self) -> Vec<u8> {
        let script = self.script.to_bytes();
        let mut out = Vec::with_capacity(12 + script.len());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&(script.len() as u32).to_le_bytes());
        out.extend_from_slice(&script);
        out
    }
}

/// One consumed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prevout: OutPoint,
    pub value: u64,
    /// Key holder that must authorize the spend; `None` for covenant inputs,
    /// which are spendable by anyone who satisfies the covenant.
    pub owner: Option<Identity>,
    pub authorization: Option<Authorization>,
}

impl TxInput {
    pub fn covenant(prevout: OutPoint, value: u64) -> Self {
        Self {
            prevout,
            value,
            owner: None,
            authorization: None,
        }
    }

    pub fn funding(utxo: &Utxo) -> Self {
        Self {
            prevout: utxo.outpoint,
            value: utxo.value,
            owner: Some(utxo.owner.clone()),
            authorization: None,
        }
    }
}

/// A spendable output held by some identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub owner: Identity,
}

/// A state transition: consumed records in, resulting records out
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transition {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transition {
    /// Canonical encoding hashed into the identifier
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(input.prevout.txid.as_bytes());
            out.extend_from_slice(&input.prevout.index.to_le_bytes());
            out.extend_from_slice(&input.value.to_le_bytes());
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.to_bytes());
        }
        out
    }

    pub fn id(&self) -> TransitionId {
        TransitionId::digest(&self.canonical_bytes())
    }

    /// Sum of consumed values, `None` on overflow
    pub fn total_input(&self) -> Option<u64> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.value))
    }

    /// Sum of produced values, `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Value left to the ledger, `None` if outputs exceed inputs or either
    /// side overflows
    pub fn implied_fee(&self) -> Option<u64> {
        self.total_input()?.checked_sub(self.total_output()?)
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| &i.prevout == outpoint)
    }

    pub fn summary(&self) -> String {
        format!(
            "Transition {} | {} in ({} units) | {} out ({} units)",
            self.id().short(),
            self.inputs.len(),
            units(self.total_input()),
            self.outputs.len(),
            units(self.total_output())
        )
    }
}

fn units(total: Option<u64>) -> String {
    total.map_or_else(|| "overflowing".into(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transition {
        let prev = TransitionId::digest(b"prev");
        Transition {
            inputs: vec![TxInput::covenant(OutPoint::new(prev, 0), 10_000)],
            outputs: vec![
                TxOutput::covenant(6_000, OrganismState::genesis(1, 1_000, 3_000, 546)),
                TxOutput::data(b"ORGN".to_vec()),
                TxOutput::pay(1_000, Identity::from("alice")),
            ],
        }
    }

    #[test]
    fn test_id_hex_roundtrip() {
        let id = TransitionId::digest(b"hello");
        let parsed: TransitionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 64);
        assert!("zz".parse::<TransitionId>().is_err());
    }

    #[test]
    fn test_id_ignores_authorization() {
        let tx = sample();
        let mut signed = tx.clone();
        signed.inputs[0].authorization = Some(Authorization(vec![1, 2, 3]));
        assert_eq!(tx.id(), signed.id());
    }

    #[test]
    fn test_id_changes_with_outputs() {
        let tx = sample();
        let mut other = tx.clone();
        other.outputs[2].value = 999;
        assert_ne!(tx.id(), other.id());
    }

    #[test]
    fn test_covenant_script_layout() {
        let state = OrganismState::genesis(9, 1_000, 3_000, 546);
        let bytes = Script::Covenant(state).to_bytes();
        assert_eq!(bytes.len(), 66);
        assert_eq!(bytes[0], COVENANT_OPCODE);
        assert_eq!(bytes[1], 9);
        assert_eq!(&bytes[2..10], &1_000u64.to_le_bytes());
    }

    #[test]
    fn test_identity_length_limit() {
        let fits = Identity::new("a".repeat(MAX_IDENTITY_LEN));
        let too_long = Identity::new("a".repeat(MAX_IDENTITY_LEN + 1));
        assert!(fits.is_encodable());
        assert!(!too_long.is_encodable());

        let bytes = Script::PayTo(fits).to_bytes();
        assert_eq!(&bytes[1..3], &u16::MAX.to_le_bytes());
        assert_eq!(bytes.len(), 3 + MAX_IDENTITY_LEN);
    }

    #[test]
    fn test_implied_fee() {
        let tx = sample();
        assert_eq!(tx.total_output(), Some(7_000));
        assert_eq!(tx.implied_fee(), Some(3_000));
    }

    #[test]
    fn test_overflowing_outputs_have_no_fee() {
        let mut tx = sample();
        tx.outputs[0].value = u64::MAX;
        assert_eq!(tx.total_output(), None);
        assert_eq!(tx.implied_fee(), None);
        assert!(tx.summary().contains("overflowing"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let tx = sample();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }
}
