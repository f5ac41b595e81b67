//! Annotation codec — the discoverable binary record on every organism transition
//!
//! Wire layout:
//!
//! ```text
//! <protocol-tag:4>
//! <len:1><species:1>
//! <len:1><generation:4, little-endian>
//! <len:1><lineage-origin:32>
//! [<len:1><payload segment>]...
//! ```

use super::payload::Payload;
use crate::error::{OrganismError, Result};
use crate::transition::{TransitionId, TxOutput};
use serde::{Deserialize, Serialize};

pub type ProtocolTag = [u8; 4];

/// Default protocol identifier, ASCII `ORGN`
pub const DEFAULT_PROTOCOL_TAG: ProtocolTag = *b"ORGN";

const SPECIES_WIDTH: usize = 1;
const GENERATION_WIDTH: usize = 4;
const ORIGIN_WIDTH: usize = 32;

/// Decoded form of an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    #[serde(with = "hex::serde")]
    pub protocol_tag: ProtocolTag,
    pub species: u8,
    pub generation: u32,
    pub lineage_origin: TransitionId,
    pub payload: Payload,
}

impl AnnotationRecord {
    pub fn new(
        protocol_tag: ProtocolTag,
        species: u8,
        generation: u32,
        lineage_origin: TransitionId,
    ) -> Self {
        Self {
            protocol_tag,
            species,
            generation,
            lineage_origin,
            payload: Payload::empty(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    /// Interpret the payload as species `P`, or `None` for another species
    pub fn species_payload<P: super::SpeciesPayload>(&self) -> Result<Option<P>> {
        if self.species != P::SPECIES {
            return Ok(None);
        }
        P::from_payload(&self.payload).map(Some)
    }
}

/// Encode a record. Total: every field fits a single-byte push.
pub fn encode(record: &AnnotationRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 + 5 + 33 + record.payload.len());
    out.extend_from_slice(&record.protocol_tag);
    out.push(SPECIES_WIDTH as u8);
    out.push(record.species);
    out.push(GENERATION_WIDTH as u8);
    out.extend_from_slice(&record.generation.to_le_bytes());
    out.push(ORIGIN_WIDTH as u8);
    out.extend_from_slice(record.lineage_origin.as_bytes());
    out.extend_from_slice(record.payload.as_bytes());
    out
}

/// Decode the first annotation carrying `tag` found in `bytes`.
///
/// `Ok(None)` means the tag is absent, i.e. not an organism transition.
pub fn decode(bytes: &[u8], tag: &ProtocolTag) -> Result<Option<AnnotationRecord>> {
    let start = match bytes.windows(tag.len()).position(|w| w == tag) {
        Some(pos) => pos + tag.len(),
        None => return Ok(None),
    };

    let mut reader = PushReader { buf: bytes, pos: start };
    let species = reader.fixed("species", SPECIES_WIDTH)?[0];

    let mut generation = [0u8; GENERATION_WIDTH];
    generation.copy_from_slice(reader.fixed("generation", GENERATION_WIDTH)?);

    let mut origin = [0u8; ORIGIN_WIDTH];
    origin.copy_from_slice(reader.fixed("lineage origin", ORIGIN_WIDTH)?);

    Ok(Some(AnnotationRecord {
        protocol_tag: *tag,
        species,
        generation: u32::from_le_bytes(generation),
        lineage_origin: TransitionId(origin),
        payload: Payload::from_raw(bytes[reader.pos..].to_vec()),
    }))
}

/// Locate the first data-carrier output holding an annotation
pub fn find_in_outputs(
    outputs: &[TxOutput],
    tag: &ProtocolTag,
) -> Result<Option<(usize, AnnotationRecord)>> {
    for (index, output) in outputs.iter().enumerate() {
        if let Some(data) = output.data_bytes() {
            if let Some(record) = decode(data, tag)? {
                return Ok(Some((index, record)));
            }
        }
    }
    Ok(None)
}

struct PushReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PushReader<'a> {
    fn fixed(&mut self, field: &str, width: usize) -> Result<&'a [u8]> {
        let Some(&len) = self.buf.get(self.pos) else {
            return Err(OrganismError::malformed(
                self.pos,
                format!("missing {} push", field),
            ));
        };
        let len = len as usize;
        let start = self.pos + 1;
        let end = start + len;
        if end > self.buf.len() {
            return Err(OrganismError::malformed(
                self.pos,
                format!(
                    "{} push declares {} bytes, {} remain",
                    field,
                    len,
                    self.buf.len() - start
                ),
            ));
        }
        if len != width {
            return Err(OrganismError::malformed(
                self.pos,
                format!("{} push is {} bytes, expected {}", field, len, width),
            ));
        }
        self.pos = end;
        Ok(&self.buf[start..end])
    }
}
