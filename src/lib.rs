//! # Rust Event Builder
//!
//! Submission side of the event builder: everything a readout process needs
//! to get its fragments to the orderer.
//!
//! ## Crate Structure
//!
//! - **`source`**: [`FragmentSource`] and the [`FragmentProvider`] trait a
//!   data channel implements.
//! - **`pipeline`**: moving fragments from sources onto a queue and from the
//!   queue to the orderer ([`Submitter`]).
//! - **`network`**: the orderer wire protocol, service discovery and the
//!   synchronous [`OrdererClient`].
//! - **`config`**: Figment-based configuration loading (`evb.toml` plus
//!   `RUST_EVB_*` environment overrides).
//! - **`logging`**: `tracing-subscriber` setup shared by the binaries.
//! - **`error`**: the consolidated [`EvbError`] type.
//!
//! The fragment data model lives in `evb-core` and the queue in
//! `evb-queue`; both are re-exported here. Event building proper is the
//! `evb-glom` crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod pipeline;
pub mod source;

pub use evb_core::{
    Fragment, FragmentChain, FragmentHeader, GlomParameters, TimestampPolicy, FRAGMENT_HEADER_SIZE,
};
pub use evb_queue::BlockingQueue;

pub use config::EvbConfig;
pub use error::{AppResult, EvbError};
pub use network::{OrdererClient, OrdererError};
pub use pipeline::{Submitter, SubmitSnapshot};
pub use source::{FragmentProvider, FragmentSource, SourceGuard};
