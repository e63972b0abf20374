//! Submission side of the fragment ordering service.
//!
//! - [`protocol`]: message framing and body layouts.
//! - [`discovery`]: locating the orderer's port through a service directory.
//! - [`client`]: the synchronous [`OrdererClient`].

pub mod client;
pub mod discovery;
pub mod error;
pub mod protocol;

pub use client::OrdererClient;
pub use discovery::{PortManagerDirectory, ServiceAdvert, ServiceDirectory, StaticDirectory};
pub use error::OrdererError;
pub use protocol::{ConnectBody, Message, Request};
