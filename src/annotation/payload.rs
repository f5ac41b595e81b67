//! Species payload — the opaque tail of an annotation
//!
//! The core never looks inside a payload. It is stored verbatim (already
//! framed as length-prefixed pushes) and handed to per-species extensions
//! through [`SpeciesPayload`].

use crate::error::{OrganismError, Result};
use serde::{Deserialize, Serialize};

/// Largest push representable with a single length byte
pub const MAX_PUSH_LEN: usize = 252;

/// Raw payload bytes following the three fixed annotation fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(#[serde(with = "hex::serde")] Vec<u8>);

impl Payload {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap bytes that are already framed as pushes
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Frame each segment as one length-prefixed push
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.len() > MAX_PUSH_LEN {
                return Err(OrganismError::PushTooLong(segment.len()));
            }
            out.push(segment.len() as u8);
            out.extend_from_slice(segment);
        }
        Ok(Self(out))
    }

    /// Split the payload back into its pushes
    pub fn segments(&self) -> Result<Vec<&[u8]>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.0.len() {
            let len = self.0[pos] as usize;
            let end = pos + 1 + len;
            if end > self.0.len() {
                return Err(OrganismError::malformed(
                    pos,
                    format!("payload push of {} bytes runs past the end", len),
                ));
            }
            out.push(&self.0[pos + 1..end]);
            pos = end;
        }
        Ok(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Interpretation of the payload for one species.
///
/// Species are open-ended: each extension claims a species tag and owns the
/// layout of its payload pushes.
pub trait SpeciesPayload: Sized {
    const SPECIES: u8;

    fn to_payload(&self) -> Result<Payload>;

    fn from_payload(payload: &Payload) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_roundtrip() {
        let payload = Payload::from_segments([&b"abc"[..], &b""[..], &[7u8; 40][..]]).unwrap();
        let segments = payload.segments().unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], b"abc");
        assert!(segments[1].is_empty());
        assert_eq!(segments[2], &[7u8; 40][..]);
    }

    #[test]
    fn test_oversized_segment_rejected() {
        let big = vec![0u8; MAX_PUSH_LEN + 1];
        assert!(matches!(
            Payload::from_segments([big]),
            Err(OrganismError::PushTooLong(253))
        ));
    }

    #[test]
    fn test_broken_push_is_malformed() {
        let payload = Payload::from_raw(vec![5, 1, 2]);
        assert!(matches!(
            payload.segments(),
            Err(OrganismError::MalformedAnnotation { offset: 0, .. })
        ));
    }
}
