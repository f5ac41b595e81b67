//! Annotation — the binary tag identifying a transition as part of the protocol
//!
//! Every organism transition carries one annotation in a data-carrier output:
//! protocol tag, species, generation, lineage origin, and an opaque
//! species payload. Independent observers discover and verify lineages by
//! decoding it.

mod codec;
mod payload;

pub use codec::{
    decode, encode, find_in_outputs, AnnotationRecord, ProtocolTag, DEFAULT_PROTOCOL_TAG,
};
pub use payload::{Payload, SpeciesPayload, MAX_PUSH_LEN};
