// hcx-common - Shared types and HTTP/1.1 framing for HyperCourier
//
// This crate defines the request/response values exchanged by the client
// transport, the transport error taxonomy, and the wire codec.

pub mod codec;
pub mod error;
pub mod types;

// Re-export for convenience
pub use codec::*;
pub use error::*;
pub use types::*;
