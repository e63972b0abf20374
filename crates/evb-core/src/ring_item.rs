//! Self-describing ring items, the unit of the built event stream.
//!
//! # Layout
//! ```text
//! u32 size            (inclusive of this header)
//! u32 type
//! u32 body_header_size  (0: no body header, 20: body header follows)
//! [u64 timestamp, u32 source_id, u32 barrier_type]
//! payload...
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

use crate::error::{CodecError, Result};

/// Size of the `size` + `type` prefix.
pub const RING_ITEM_HEADER_SIZE: usize = 8;

/// Size of a present body header, including its own length word.
pub const BODY_HEADER_SIZE: usize = 20;

/// Timestamp used when an item has no meaningful time.
pub const NULL_TIMESTAMP: u64 = u64::MAX;

/// Ring format version emitted in [`RingItemType::RingFormat`] items.
pub const FORMAT_MAJOR: u16 = 11;
/// Minor ring format version.
pub const FORMAT_MINOR: u16 = 0;

/// Known ring item types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RingItemType {
    /// Run start.
    BeginRun = 1,
    /// Run end.
    EndRun = 2,
    /// Run paused.
    PauseRun = 3,
    /// Run resumed.
    ResumeRun = 4,
    /// Run abandoned without a clean end.
    AbnormalEndRun = 5,
    /// Packet type documentation.
    PacketTypes = 10,
    /// Monitored variable values.
    MonitoredVariables = 11,
    /// Ring format version descriptor.
    RingFormat = 12,
    /// Periodic scaler readout.
    PeriodicScalers = 20,
    /// Built or passthrough physics event.
    PhysicsEvent = 30,
    /// Accepted trigger count.
    PhysicsEventCount = 31,
    /// Single event builder fragment.
    EvbFragment = 40,
    /// Barrier whose payload is not a ring item.
    EvbUnknownPayload = 41,
    /// Event building parameters.
    EvbGlomInfo = 42,
}

impl RingItemType {
    /// Map a wire type code, `None` for unknown codes.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(RingItemType::BeginRun),
            2 => Some(RingItemType::EndRun),
            3 => Some(RingItemType::PauseRun),
            4 => Some(RingItemType::ResumeRun),
            5 => Some(RingItemType::AbnormalEndRun),
            10 => Some(RingItemType::PacketTypes),
            11 => Some(RingItemType::MonitoredVariables),
            12 => Some(RingItemType::RingFormat),
            20 => Some(RingItemType::PeriodicScalers),
            30 => Some(RingItemType::PhysicsEvent),
            31 => Some(RingItemType::PhysicsEventCount),
            40 => Some(RingItemType::EvbFragment),
            41 => Some(RingItemType::EvbUnknownPayload),
            42 => Some(RingItemType::EvbGlomInfo),
            _ => None,
        }
    }

    /// Wire type code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Run-state effect of a barrier type on the nesting counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    /// Opens a run.
    Begin,
    /// Closes a run.
    End,
    /// Abandons whatever is open.
    AbnormalEnd,
    /// Pause, resume or anything else with no nesting effect.
    Other,
}

impl BarrierKind {
    /// Classify a fragment's barrier type.
    pub fn from_barrier_type(barrier: u32) -> Self {
        match RingItemType::from_u32(barrier) {
            Some(RingItemType::BeginRun) => BarrierKind::Begin,
            Some(RingItemType::EndRun) => BarrierKind::End,
            Some(RingItemType::AbnormalEndRun) => BarrierKind::AbnormalEnd,
            _ => BarrierKind::Other,
        }
    }
}

/// Optional per-item timing and provenance header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyHeader {
    /// Timestamp in clock ticks.
    pub timestamp: u64,
    /// Producing source.
    pub source_id: u32,
    /// Barrier type, 0 for ordinary data.
    pub barrier: u32,
}

/// A decoded or to-be-written ring item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingItem {
    /// Raw type code; see [`RingItemType`].
    pub item_type: u32,
    /// Timing and provenance, absent for bookkeeping items.
    pub body_header: Option<BodyHeader>,
    /// Everything after the body header.
    pub payload: Bytes,
}

impl RingItem {
    /// Item of a known type.
    pub fn new(item_type: RingItemType, body_header: Option<BodyHeader>, payload: Bytes) -> Self {
        Self {
            item_type: item_type.as_u32(),
            body_header,
            payload,
        }
    }

    /// Format descriptor announcing the stream's ring format version.
    pub fn format() -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16_ne(FORMAT_MAJOR);
        payload.put_u16_ne(FORMAT_MINOR);
        Self::new(RingItemType::RingFormat, None, payload.freeze())
    }

    /// Abnormal end of run record, used to close a run that never ended.
    pub fn abnormal_end(source_id: u32) -> Self {
        Self::new(
            RingItemType::AbnormalEndRun,
            Some(BodyHeader {
                timestamp: NULL_TIMESTAMP,
                source_id,
                barrier: RingItemType::AbnormalEndRun.as_u32(),
            }),
            Bytes::new(),
        )
    }

    /// Known type of this item, if any.
    pub fn kind(&self) -> Option<RingItemType> {
        RingItemType::from_u32(self.item_type)
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        let body_header = if self.body_header.is_some() {
            BODY_HEADER_SIZE
        } else {
            4
        };
        RING_ITEM_HEADER_SIZE + body_header + self.payload.len()
    }

    /// Encode the full item, size word included.
    pub fn encode(&self) -> Result<Bytes> {
        let len = self.encoded_len();
        let size = u32::try_from(len).map_err(|_| CodecError::BodyTooLarge(len))?;

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u32_ne(size);
        buf.put_u32_ne(self.item_type);
        match &self.body_header {
            Some(bh) => {
                buf.put_u32_ne(BODY_HEADER_SIZE as u32);
                buf.put_u64_ne(bh.timestamp);
                buf.put_u32_ne(bh.source_id);
                buf.put_u32_ne(bh.barrier);
            }
            None => buf.put_u32_ne(0),
        }
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Encode and write the item.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let encoded = self
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        out.write_all(&encoded)
    }

    /// Decode one complete item occupying all of `data`.
    pub fn decode(data: Bytes) -> Result<Self> {
        let minimum = RING_ITEM_HEADER_SIZE + 4;
        if data.len() < minimum {
            return Err(CodecError::Truncated {
                what: "ring item",
                needed: minimum,
                available: data.len(),
            });
        }

        let mut cursor = &data[..];
        let size = cursor.get_u32_ne();
        let item_type = cursor.get_u32_ne();
        if (size as usize) < minimum {
            return Err(CodecError::BadItemSize { size, minimum });
        }
        if size as usize > data.len() {
            return Err(CodecError::Truncated {
                what: "ring item",
                needed: size as usize,
                available: data.len(),
            });
        }

        let body_header_size = cursor.get_u32_ne();
        let (body_header, payload_start) = match body_header_size {
            0 | 4 => (None, minimum),
            20 => {
                if (size as usize) < RING_ITEM_HEADER_SIZE + BODY_HEADER_SIZE {
                    return Err(CodecError::BadItemSize {
                        size,
                        minimum: RING_ITEM_HEADER_SIZE + BODY_HEADER_SIZE,
                    });
                }
                let bh = BodyHeader {
                    timestamp: cursor.get_u64_ne(),
                    source_id: cursor.get_u32_ne(),
                    barrier: cursor.get_u32_ne(),
                };
                (Some(bh), RING_ITEM_HEADER_SIZE + BODY_HEADER_SIZE)
            }
            other => return Err(CodecError::BadBodyHeader(other)),
        };

        Ok(Self {
            item_type,
            body_header,
            payload: data.slice(payload_start..size as usize),
        })
    }
}

/// Whether `payload` is itself a complete ring item of a known type.
///
/// Barrier fragments carrying such payloads are forwarded verbatim.
pub fn is_recognized_ring_item(payload: &[u8]) -> bool {
    if payload.len() < RING_ITEM_HEADER_SIZE {
        return false;
    }
    let mut cursor = payload;
    let size = cursor.get_u32_ne() as usize;
    let item_type = cursor.get_u32_ne();
    size == payload.len() && RingItemType::from_u32(item_type).is_some()
}

/// Sequential reader of ring items from a byte stream.
pub struct RingItemReader<R> {
    inner: R,
}

impl<R: Read> RingItemReader<R> {
    /// Read items from `inner`.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next item, `Ok(None)` on clean end of stream.
    pub fn next_item(&mut self) -> io::Result<Option<RingItem>> {
        let mut size_word = [0u8; 4];
        if crate::stream::read_full(&mut self.inner, &mut size_word)? == 0 {
            return Ok(None);
        }
        let size = u32::from_ne_bytes(size_word) as usize;
        if size < RING_ITEM_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("ring item size {} too small", size),
            ));
        }

        let mut buf = vec![0u8; size];
        buf[..4].copy_from_slice(&size_word);
        self.inner.read_exact(&mut buf[4..])?;

        RingItem::decode(Bytes::from(buf))
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<R: Read> Iterator for RingItemReader<R> {
    type Item = io::Result<RingItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}
