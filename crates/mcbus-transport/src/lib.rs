//! Datagram transport abstraction for mcbus.
//!
//! Every bus participant owns one endpoint that both sends to and receives from a
//! shared broadcast medium:
//! - UDP multicast groups (IPv4 or IPv6)
//! - An in-process hub, for tests and single-process deployments
//!
//! This is the lowest layer of mcbus. Everything else builds on top of
//! the [`DatagramTransport`] trait provided here. Both endpoints support a receive
//! wait that [`DatagramTransport::close`] interrupts immediately from another thread.

pub mod error;
pub mod memory;
pub mod multicast;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryEndpoint, MemoryHub};
pub use multicast::{MulticastConfig, MulticastSocket, DEFAULT_GROUP, DEFAULT_PORT};
pub use traits::DatagramTransport;
