//! Transport plumbing for store-to-store and client-to-store messages.
//!
//! Length-prefixed protobuf over TCP. The store's contract is defined
//! over messages, not bytes; everything here is replaceable framing.

pub mod error;
pub mod framing;
pub mod transport;

pub use error::NetError;
pub use framing::{MessageSink, MessageStream};
pub use transport::{connect, request, Connection};
