//! Core types for the event builder.
//!
//! This crate holds the data model shared by the submission side
//! (`rust_evb`) and the event assembler (`evb-glom`):
//!
//! - **`fragment`**: [`Fragment`], its fixed-layout [`FragmentHeader`] and the
//!   borrowed [`FragmentChain`] used to batch one submission.
//! - **`ring_item`**: self-describing output records and their reader.
//! - **`params`**: [`GlomParameters`] and the [`TimestampPolicy`] choices.
//! - **`stream`**: reading and writing the ordered fragment stream.
//! - **`error`**: [`CodecError`] for everything above.

pub mod error;
pub mod fragment;
pub mod params;
pub mod ring_item;
pub mod stream;

pub use error::CodecError;
pub use fragment::{decode_fragments, Fragment, FragmentChain, FragmentHeader, FRAGMENT_HEADER_SIZE};
pub use params::{GlomParameters, TimestampPolicy};
pub use ring_item::{BarrierKind, BodyHeader, RingItem, RingItemReader, RingItemType};
pub use stream::{write_fragment, FragmentReader};
