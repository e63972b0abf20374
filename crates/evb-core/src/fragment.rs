//! Event builder fragments and their wire layout.
//!
//! A fragment is one timestamped unit of data from a single source. On the
//! wire (both toward the orderer and in the ordered stream that comes back)
//! each fragment is a fixed 20-byte [`FragmentHeader`] immediately followed
//! by `size` body bytes, with no padding between consecutive fragments.
//!
//! ```text
//! u64 timestamp | u32 source_id | u32 size | u32 barrier | body[size]
//! ```
//!
//! All integers are in native byte order; peers on the same host type share
//! the layout.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// Size in bytes of an encoded [`FragmentHeader`].
pub const FRAGMENT_HEADER_SIZE: usize = 20;

/// Fixed-layout header preceding every fragment body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    /// Timestamp in clock ticks.
    pub timestamp: u64,
    /// Id of the source that produced the fragment.
    pub source_id: u32,
    /// Body size in bytes.
    pub size: u32,
    /// Barrier type, 0 for ordinary data.
    pub barrier: u32,
}

impl FragmentHeader {
    /// Append the encoded header to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_ne(self.timestamp);
        buf.put_u32_ne(self.source_id);
        buf.put_u32_ne(self.size);
        buf.put_u32_ne(self.barrier);
    }

    /// Encode into a fixed array.
    pub fn to_bytes(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut out = [0u8; FRAGMENT_HEADER_SIZE];
        let mut cursor = &mut out[..];
        self.encode(&mut cursor);
        out
    }

    /// Decode a header from the start of `data`.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < FRAGMENT_HEADER_SIZE {
            return Err(CodecError::Truncated {
                what: "fragment header",
                needed: FRAGMENT_HEADER_SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            timestamp: data.get_u64_ne(),
            source_id: data.get_u32_ne(),
            size: data.get_u32_ne(),
            barrier: data.get_u32_ne(),
        })
    }
}

/// A single timestamped data unit from one source.
///
/// Fragments are immutable once built. The body is a [`Bytes`] handle, so
/// cloning a fragment does not copy the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Timestamp in clock ticks.
    pub timestamp: u64,
    /// Id of the producing source.
    pub source_id: u32,
    /// Barrier type, 0 for ordinary data.
    pub barrier: u32,
    /// Opaque payload.
    pub body: Bytes,
}

impl Fragment {
    /// Create an ordinary (non-barrier) fragment.
    pub fn new(timestamp: u64, source_id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            source_id,
            barrier: 0,
            body: body.into(),
        }
    }

    /// Create a barrier fragment of the given kind.
    pub fn barrier(timestamp: u64, source_id: u32, barrier: u32, body: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            source_id,
            barrier,
            body: body.into(),
        }
    }

    /// Rebuild a fragment from a decoded header and its body.
    pub fn from_parts(header: FragmentHeader, body: Bytes) -> Self {
        Self {
            timestamp: header.timestamp,
            source_id: header.source_id,
            barrier: header.barrier,
            body,
        }
    }

    /// Whether this fragment marks a run-state transition.
    pub fn is_barrier(&self) -> bool {
        self.barrier != 0
    }

    /// Body size in bytes.
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Number of bytes this fragment occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAGMENT_HEADER_SIZE + self.body.len()
    }

    /// Header describing this fragment.
    ///
    /// Fails if the body is too large for the 32-bit size field.
    pub fn header(&self) -> Result<FragmentHeader> {
        let size =
            u32::try_from(self.body.len()).map_err(|_| CodecError::BodyTooLarge(self.body.len()))?;
        Ok(FragmentHeader {
            timestamp: self.timestamp,
            source_id: self.source_id,
            size,
            barrier: self.barrier,
        })
    }

    /// Append header and body to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        self.header()?.encode(buf);
        buf.put_slice(&self.body);
        Ok(())
    }
}

/// Ordered batch of borrowed fragments making up one submission.
///
/// The chain never owns fragment bodies; it is built by the submitter over
/// fragments it already holds and dropped as soon as the call completes.
#[derive(Debug, Clone, Default)]
pub struct FragmentChain<'a> {
    fragments: Vec<&'a Fragment>,
}

impl<'a> FragmentChain<'a> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    /// Create an empty chain with room for `capacity` fragments.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fragments: Vec::with_capacity(capacity),
        }
    }

    /// Append a fragment reference.
    pub fn push(&mut self, fragment: &'a Fragment) {
        self.fragments.push(fragment);
    }

    /// Number of fragments in the chain.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether the chain holds no fragments.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragment at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&'a Fragment> {
        self.fragments.get(index).copied()
    }

    /// Iterate the chain in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &'a Fragment> + '_ {
        self.fragments.iter().copied()
    }

    /// Total encoded size of the chain.
    pub fn encoded_len(&self) -> usize {
        self.fragments.iter().map(|f| f.encoded_len()).sum()
    }

    /// Marshal the chain into adjacent `(header, body)` pairs.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        for fragment in &self.fragments {
            fragment.encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}

impl<'a> FromIterator<&'a Fragment> for FragmentChain<'a> {
    fn from_iter<I: IntoIterator<Item = &'a Fragment>>(iter: I) -> Self {
        Self {
            fragments: iter.into_iter().collect(),
        }
    }
}

impl<'a> From<&'a [Fragment]> for FragmentChain<'a> {
    fn from(fragments: &'a [Fragment]) -> Self {
        fragments.iter().collect()
    }
}

/// Split a buffer of adjacent `(header, body)` pairs back into fragments.
///
/// Bodies are zero-copy slices of `data`.
pub fn decode_fragments(data: &Bytes) -> Result<Vec<Fragment>> {
    let mut fragments = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let header = FragmentHeader::decode(&data[offset..])?;
        let body_start = offset + FRAGMENT_HEADER_SIZE;
        let body_end = body_start + header.size as usize;
        if body_end > data.len() {
            return Err(CodecError::Truncated {
                what: "fragment body",
                needed: header.size as usize,
                available: data.len() - body_start,
            });
        }

        fragments.push(Fragment::from_parts(header, data.slice(body_start..body_end)));
        offset = body_end;
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_packed() {
        let header = FragmentHeader {
            timestamp: 0x0102_0304_0506_0708,
            source_id: 7,
            size: 3,
            barrier: 1,
        };
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), FRAGMENT_HEADER_SIZE);
        assert_eq!(&bytes[0..8], &header.timestamp.to_ne_bytes());
        assert_eq!(&bytes[8..12], &7u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &3u32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_ne_bytes());
        assert_eq!(FragmentHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn chain_round_trip_preserves_fragments() {
        let fragments = vec![
            Fragment::new(10, 1, vec![1u8, 2, 3]),
            Fragment::barrier(11, 2, 1, Vec::<u8>::new()),
            Fragment::new(12, 3, vec![9u8; 100]),
        ];
        let chain = FragmentChain::from(fragments.as_slice());

        let encoded = chain.encode().unwrap();
        assert_eq!(encoded.len(), 3 * FRAGMENT_HEADER_SIZE + 103);

        let decoded = decode_fragments(&encoded).unwrap();
        assert_eq!(decoded, fragments);
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let fragment = Fragment::new(1, 1, vec![0u8; 16]);
        let mut buf = BytesMut::new();
        fragment.encode(&mut buf).unwrap();
        let short = buf.freeze().slice(..FRAGMENT_HEADER_SIZE + 8);

        let err = decode_fragments(&short).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { what: "fragment body", .. }));
    }

    #[test]
    fn empty_chain_encodes_to_nothing() {
        let chain = FragmentChain::new();
        assert!(chain.is_empty());
        assert!(chain.encode().unwrap().is_empty());
    }
}
