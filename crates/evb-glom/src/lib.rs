//! Coincidence-window event builder.
//!
//! [`Glom`] consumes a time-ordered fragment stream and writes ring items:
//! fragments whose timestamps fall within `dt` ticks of the first fragment
//! of the current event are merged into one `PHYSICS_EVENT`; barrier
//! fragments flush the event in progress and are relayed downstream.
//!
//! ```text
//!  fragments (ts order)         ring items
//!  ─────────────────────▶ Glom ─────────────▶ RING_FORMAT
//!                                             PHYSICS_EVENT ...
//!                                             BEGIN_RUN, EVB_GLOM_INFO
//!                                             PHYSICS_EVENT ...
//!                                             END_RUN
//! ```
//!
//! The builder is single-threaded and generic over its output writer; the
//! `glom` binary wires it to stdin and stdout.

pub mod cli;

use bytes::{BufMut, BytesMut};
use evb_core::ring_item::is_recognized_ring_item;
use evb_core::{
    BarrierKind, BodyHeader, CodecError, Fragment, FragmentReader, GlomParameters, RingItem,
    RingItemType, TimestampPolicy,
};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Errors raised while building events.
#[derive(Error, Debug)]
pub enum GlomError {
    #[error("Output error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("A coincidence window (--dt) is required unless --nobuild is given")]
    MissingWindow,

    #[error("Coincidence window must not be negative, got {0}")]
    InvalidWindow(i64),
}

/// Event building settings, fixed for the lifetime of a [`Glom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlomSettings {
    /// Coincidence window in ticks.
    pub dt: u64,
    /// When false every fragment becomes its own event.
    pub building: bool,
    pub policy: TimestampPolicy,
    /// Source id stamped on built events.
    pub source_id: u32,
}

impl GlomSettings {
    pub fn building(dt: u64, policy: TimestampPolicy, source_id: u32) -> Self {
        Self {
            dt,
            building: true,
            policy,
            source_id,
        }
    }

    pub fn passthrough(source_id: u32) -> Self {
        Self {
            dt: 0,
            building: false,
            policy: TimestampPolicy::default(),
            source_id,
        }
    }

    pub fn parameters(&self) -> GlomParameters {
        GlomParameters {
            coincidence_ticks: self.dt,
            building: self.building,
            policy: self.policy,
        }
    }
}

/// Counters reported when the builder finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlomStats {
    /// Non-barrier fragments consumed.
    pub fragments: u64,
    /// Physics events written.
    pub events: u64,
    /// Barrier fragments relayed.
    pub barriers: u64,
    /// Barriers wrapped as `EVB_UNKNOWN_PAYLOAD`.
    pub unknown_payloads: u64,
    pub synthesized_abnormal_ends: u64,
}

/// Event under construction.
struct AccumulatedEvent {
    /// Size placeholder followed by `(header, body)` pairs.
    buffer: BytesMut,
    first_timestamp: u64,
    last_timestamp: u64,
    timestamp_sum: u128,
    fragment_count: u64,
}

impl AccumulatedEvent {
    fn start(first_timestamp: u64) -> Self {
        let mut buffer = BytesMut::with_capacity(4096);
        buffer.put_u32_ne(0);
        Self {
            buffer,
            first_timestamp,
            last_timestamp: first_timestamp,
            timestamp_sum: 0,
            fragment_count: 0,
        }
    }

    fn add(&mut self, fragment: &Fragment) -> Result<(), CodecError> {
        self.last_timestamp = fragment.timestamp;
        self.fragment_count += 1;
        self.timestamp_sum += u128::from(fragment.timestamp);
        fragment.encode(&mut self.buffer)
    }

    fn timestamp(&self, policy: TimestampPolicy) -> u64 {
        match policy {
            TimestampPolicy::Earliest => self.first_timestamp,
            TimestampPolicy::Latest => self.last_timestamp,
            TimestampPolicy::Average => {
                (self.timestamp_sum / u128::from(self.fragment_count.max(1))) as u64
            }
        }
    }

    fn into_ring_item(mut self, policy: TimestampPolicy, source_id: u32) -> Result<RingItem, CodecError> {
        let len = self.buffer.len();
        let size = u32::try_from(len).map_err(|_| CodecError::BodyTooLarge(len))?;
        self.buffer[..4].copy_from_slice(&size.to_ne_bytes());

        let header = BodyHeader {
            timestamp: self.timestamp(policy),
            source_id,
            barrier: 0,
        };
        Ok(RingItem::new(
            RingItemType::PhysicsEvent,
            Some(header),
            self.buffer.freeze(),
        ))
    }
}

/// Open-run depth seen across barriers.
#[derive(Debug, Default, Clone, Copy)]
struct BarrierNesting(i64);

impl BarrierNesting {
    fn apply(&mut self, kind: BarrierKind) {
        match kind {
            BarrierKind::Begin => self.0 += 1,
            BarrierKind::End => self.0 -= 1,
            BarrierKind::AbnormalEnd => self.0 = 0,
            BarrierKind::Other => {}
        }
    }

    fn is_open(self) -> bool {
        self.0 != 0
    }
}

/// Streaming event builder writing ring items to `W`.
pub struct Glom<W: Write> {
    out: W,
    settings: GlomSettings,
    event: Option<AccumulatedEvent>,
    nesting: BarrierNesting,
    parameters_sent: bool,
    stats: GlomStats,
}

impl<W: Write> Glom<W> {
    pub fn new(out: W, settings: GlomSettings) -> Self {
        Self {
            out,
            settings,
            event: None,
            nesting: BarrierNesting::default(),
            parameters_sent: false,
            stats: GlomStats::default(),
        }
    }

    pub fn settings(&self) -> &GlomSettings {
        &self.settings
    }

    pub fn stats(&self) -> GlomStats {
        self.stats
    }

    /// Write the ring format descriptor that opens every output stream.
    pub fn begin(&mut self) -> Result<(), GlomError> {
        RingItem::format().write_to(&mut self.out)?;
        Ok(())
    }

    /// Consume one fragment from the ordered stream.
    ///
    /// A fragment joins the event in progress while its timestamp is no more
    /// than `dt` ticks after the event's first timestamp. A fragment stamped
    /// earlier than the first timestamp counts as a difference of zero and
    /// joins the event; the unsigned wrap a raw subtraction would produce is
    /// not treated as a window break.
    pub fn process(&mut self, fragment: &Fragment) -> Result<(), GlomError> {
        if fragment.is_barrier() {
            self.flush()?;
            return self.forward_barrier(fragment);
        }

        let outside_window = self
            .event
            .as_ref()
            .is_some_and(|e| fragment.timestamp.saturating_sub(e.first_timestamp) > self.settings.dt);
        if !self.settings.building || outside_window {
            self.flush()?;
        }

        let event = self
            .event
            .get_or_insert_with(|| AccumulatedEvent::start(fragment.timestamp));
        event.add(fragment)?;
        self.stats.fragments += 1;
        Ok(())
    }

    /// Emit the event in progress, if any.
    pub fn flush(&mut self) -> Result<(), GlomError> {
        let Some(event) = self.event.take() else {
            return Ok(());
        };

        let fragments = event.fragment_count;
        let item = event.into_ring_item(self.settings.policy, self.settings.source_id)?;
        trace!(
            fragments,
            timestamp = item.body_header.map_or(0, |h| h.timestamp),
            bytes = item.payload.len(),
            "Built event"
        );
        item.write_to(&mut self.out)?;
        self.stats.events += 1;
        Ok(())
    }

    fn forward_barrier(&mut self, fragment: &Fragment) -> Result<(), GlomError> {
        if is_recognized_ring_item(&fragment.body) {
            self.out.write_all(&fragment.body)?;
        } else {
            let mut payload = BytesMut::with_capacity(fragment.encoded_len());
            fragment.encode(&mut payload)?;
            RingItem::new(RingItemType::EvbUnknownPayload, None, payload.freeze())
                .write_to(&mut self.out)?;
            self.stats.unknown_payloads += 1;
        }
        self.stats.barriers += 1;

        let kind = BarrierKind::from_barrier_type(fragment.barrier);
        self.nesting.apply(kind);
        info!(
            barrier = fragment.barrier,
            source_id = fragment.source_id,
            timestamp = fragment.timestamp,
            ?kind,
            "Relayed barrier"
        );

        if !self.parameters_sent {
            self.settings.parameters().to_ring_item().write_to(&mut self.out)?;
            self.parameters_sent = true;
            debug!(
                dt = self.settings.dt,
                building = self.settings.building,
                policy = %self.settings.policy,
                "Emitted glom parameters"
            );
        }
        Ok(())
    }

    /// Flush the last event, close any run left open and return the writer.
    pub fn finish(mut self) -> Result<(GlomStats, W), GlomError> {
        self.flush()?;

        if self.nesting.is_open() {
            warn!(depth = self.nesting.0, "Stream ended inside a run, closing it");
            RingItem::abnormal_end(self.settings.source_id).write_to(&mut self.out)?;
            self.stats.synthesized_abnormal_ends += 1;
        }

        self.out.flush()?;
        Ok((self.stats, self.out))
    }
}

/// Build events from `input` to `output` until the input ends.
///
/// A read error on the input is logged and treated as end of stream.
/// Output errors abort the run.
pub fn run<R: Read, W: Write>(
    input: R,
    output: W,
    settings: GlomSettings,
) -> Result<GlomStats, GlomError> {
    let mut glom = Glom::new(output, settings);
    glom.begin()?;

    let mut reader = FragmentReader::new(input);
    loop {
        match reader.next_fragment() {
            Ok(Some(fragment)) => glom.process(&fragment)?,
            Ok(None) => break,
            Err(e) => {
                warn!(
                    error = %e,
                    fragments = reader.fragments_read(),
                    "Input read failed, ending stream"
                );
                break;
            }
        }
    }

    let (stats, _) = glom.finish()?;
    Ok(stats)
}
