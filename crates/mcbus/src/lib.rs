//! Brokerless publish/subscribe and request/reply over UDP multicast.
//!
//! Every participant joins one multicast group and is both sender and receiver;
//! there is no broker process.
//!
//! # Crate Structure
//!
//! - [`transport`]: datagram endpoints (multicast sockets, in-process hub)
//! - [`frame`]: comma-delimited wire framing, chunking and reassembly
//! - [`client`]: sessions with subscriptions, bus interfaces and requests (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use mcbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mcbus_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use mcbus_client::*;
}

#[cfg(feature = "client")]
pub use mcbus_client::{Client, ClientConfig, ClientError, Delivery, Handler, RequestOptions};
