//! Datagram framing for the mcbus multicast bus.
//!
//! Every datagram is UTF-8 text of the form:
//! ```text
//! <senderId>,<channel>,<correlationId>,<body>
//! ```
//! The decoder splits on the first three commas only, so bodies may contain
//! commas freely. Messages too large for one datagram are split into chunks that
//! share the same header and are reassembled by the receiver.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::Channel;
pub use codec::{
    decode_frame, encode_message, ChunkMode, ChunkTag, Frame, FrameConfig, Header, Message,
    DEFAULT_DUPLICATE_WINDOW, DEFAULT_MAX_CHUNKS, DEFAULT_MAX_DATAGRAM, DEFAULT_REASSEMBLY_GRACE,
    DELIMITER,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
