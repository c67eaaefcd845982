use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Field delimiter. Only the first three occurrences in a datagram are significant.
pub const DELIMITER: u8 = b',';

/// Separates the correlation id from a chunk tag (`<cid>#<index>/<count>`).
pub const CHUNK_MARKER: char = '#';

/// Default maximum datagram size: 32 KiB.
pub const DEFAULT_MAX_DATAGRAM: usize = mcbus_transport::multicast::DEFAULT_MAX_DATAGRAM;

/// Default time allowed for the remaining chunks of a message to arrive.
pub const DEFAULT_REASSEMBLY_GRACE: Duration = Duration::from_secs(10);

/// Default upper bound on the chunks of one message (128 MiB at 32 KiB datagrams).
pub const DEFAULT_MAX_CHUNKS: usize = 4096;

/// Default time a completed multi-chunk message is remembered, so that stray
/// duplicates of its chunks are dropped instead of starting a new reassembly.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(2);

/// How messages larger than one datagram are split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkMode {
    /// Every chunk carries `#<index>/<count>` after the correlation id, so chunks
    /// reassemble in any arrival order. Single-datagram messages are untagged.
    #[default]
    Indexed,
    /// Untagged chunks with identical headers. A chunk that fills the datagram means
    /// more follow; an empty terminating chunk is appended when the last one would
    /// otherwise fill the datagram exactly.
    Legacy,
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum datagram size in bytes, header included. Default: 32 KiB.
    pub max_datagram_size: usize,
    /// How long a partially received message is kept before it is abandoned.
    pub reassembly_grace: Duration,
    /// Chunking scheme used when sending.
    pub chunk_mode: ChunkMode,
    /// Largest chunk count accepted on receive or produced on send.
    pub max_chunks: usize,
    /// How long a completed multi-chunk message suppresses duplicates of its chunks.
    pub duplicate_window: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM,
            reassembly_grace: DEFAULT_REASSEMBLY_GRACE,
            chunk_mode: ChunkMode::default(),
            max_chunks: DEFAULT_MAX_CHUNKS,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

/// The routing header shared by every chunk of one logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    /// Identity of the sending client.
    pub sender_id: String,
    /// `/`-delimited routing path, e.g. `pub/<topic>`.
    pub channel: String,
    /// Opaque token binding chunks together and requests to replies.
    pub correlation_id: String,
}

impl Header {
    /// Create a new header.
    pub fn new(
        sender_id: impl Into<String>,
        channel: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            channel: channel.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Encoded size of the untagged header, trailing delimiter included.
    pub fn encoded_len(&self) -> usize {
        self.sender_id.len() + self.channel.len() + self.correlation_id.len() + 3
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sender id", &self.sender_id),
            ("channel", &self.channel),
            ("correlation id", &self.correlation_id),
        ] {
            if value.as_bytes().contains(&DELIMITER) {
                return Err(FrameError::Serialization(format!(
                    "{name} {value:?} contains the ',' delimiter"
                )));
            }
        }
        if self.correlation_id.contains(CHUNK_MARKER) {
            return Err(FrameError::Serialization(format!(
                "correlation id {:?} contains the '#' chunk marker",
                self.correlation_id
            )));
        }
        Ok(())
    }

    fn write(&self, tag: Option<ChunkTag>, dst: &mut BytesMut) {
        dst.put_slice(self.sender_id.as_bytes());
        dst.put_u8(DELIMITER);
        dst.put_slice(self.channel.as_bytes());
        dst.put_u8(DELIMITER);
        dst.put_slice(self.correlation_id.as_bytes());
        if let Some(tag) = tag {
            dst.put_slice(format!("{CHUNK_MARKER}{tag}").as_bytes());
        }
        dst.put_u8(DELIMITER);
    }
}

/// Position of one chunk within a multi-datagram message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTag {
    /// Zero-based chunk index.
    pub index: usize,
    /// Total number of chunks, always at least two.
    pub count: usize,
}

impl ChunkTag {
    /// Parse `<index>/<count>`. Returns `None` unless `index < count` and `count >= 2`.
    pub fn parse(text: &str) -> Option<Self> {
        let (index, count) = text.split_once('/')?;
        let index = parse_digits(index)?;
        let count = parse_digits(count)?;
        (count >= 2 && index < count).then_some(Self { index, count })
    }

    // Upper bound on the encoded `#<index>/<count>` length for any index below `count`.
    fn encoded_len_bound(count: usize) -> usize {
        2 + 2 * decimal_digits(count)
    }
}

impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.count)
    }
}

fn parse_digits(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn decimal_digits(mut value: usize) -> usize {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

/// One decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Routing header, with any chunk tag stripped from the correlation id.
    pub header: Header,
    /// Chunk position, present only on tagged chunks.
    pub chunk: Option<ChunkTag>,
    /// This datagram's share of the message body.
    pub body: Bytes,
    /// Size of the datagram on the wire.
    pub wire_len: usize,
}

impl Frame {
    /// Whether this datagram is one part of a multi-datagram message.
    ///
    /// Tagged chunks say so explicitly; an untagged datagram that fills the maximum
    /// size is taken to be a legacy chunk with more to follow.
    pub fn is_fragment(&self, max_datagram_size: usize) -> bool {
        self.chunk.is_some() || self.wire_len == max_datagram_size
    }
}

/// A fully reassembled logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: String,
    pub channel: String,
    pub correlation_id: String,
    pub body: String,
}

impl Message {
    /// Build a message from a header and complete body bytes.
    pub fn from_parts(header: Header, body: &[u8]) -> Result<Self> {
        let body = std::str::from_utf8(body)
            .map_err(|err| FrameError::Malformed(format!("body is not UTF-8: {err}")))?;
        Ok(Self {
            sender_id: header.sender_id,
            channel: header.channel,
            correlation_id: header.correlation_id,
            body: body.to_string(),
        })
    }
}

/// Encode one logical message into the datagrams that carry it.
///
/// Wire format:
/// ```text
/// <senderId>,<channel>,<correlationId>,<body>
/// ```
/// Messages whose header plus body exceed `config.max_datagram_size` are split
/// into several datagrams per `config.chunk_mode`.
pub fn encode_message(header: &Header, body: &[u8], config: &FrameConfig) -> Result<Vec<Bytes>> {
    header.validate()?;

    let max = config.max_datagram_size;
    let header_len = header.encoded_len();
    if header_len > max {
        return Err(FrameError::FrameTooLarge { header_len, max });
    }
    // A lone datagram that fills `max` would read as the first legacy chunk.
    if header_len + body.len() < max {
        return Ok(vec![build_datagram(header, None, body)]);
    }

    match config.chunk_mode {
        ChunkMode::Legacy => {
            let room = max - header_len;
            if room == 0 {
                return Err(FrameError::FrameTooLarge { header_len, max });
            }
            let chunks = body.len() / room + 1;
            if chunks > config.max_chunks {
                return Err(FrameError::MessageTooLarge {
                    chunks,
                    max: config.max_chunks,
                });
            }
            let mut frames: Vec<Bytes> = body
                .chunks(room)
                .map(|chunk| build_datagram(header, None, chunk))
                .collect();
            if body.len() % room == 0 {
                frames.push(build_datagram(header, None, &[]));
            }
            Ok(frames)
        }
        ChunkMode::Indexed => {
            let mut count = 2usize;
            loop {
                let overhead = header_len + ChunkTag::encoded_len_bound(count);
                let room = max.saturating_sub(overhead);
                if room == 0 {
                    return Err(FrameError::FrameTooLarge {
                        header_len: overhead,
                        max,
                    });
                }
                let needed = body.len().div_ceil(room);
                if needed > config.max_chunks {
                    return Err(FrameError::MessageTooLarge {
                        chunks: needed,
                        max: config.max_chunks,
                    });
                }
                if needed <= count {
                    return Ok(body
                        .chunks(room)
                        .enumerate()
                        .map(|(index, chunk)| {
                            let tag = ChunkTag {
                                index,
                                count: needed,
                            };
                            build_datagram(header, Some(tag), chunk)
                        })
                        .collect());
                }
                count = needed;
            }
        }
    }
}

fn build_datagram(header: &Header, tag: Option<ChunkTag>, body: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(header.encoded_len() + 16 + body.len());
    header.write(tag, &mut dst);
    dst.put_slice(body);
    dst.freeze()
}

/// Decode one datagram.
///
/// Splits on the first three delimiters only; the remainder is the body,
/// commas and all.
pub fn decode_frame(raw: Bytes) -> Result<Frame> {
    let mut fields: [&[u8]; 3] = [&[]; 3];
    let mut rest: &[u8] = &raw;
    for field in &mut fields {
        let pos = rest
            .iter()
            .position(|b| *b == DELIMITER)
            .ok_or_else(|| FrameError::Malformed("expected four comma-delimited fields".into()))?;
        *field = &rest[..pos];
        rest = &rest[pos + 1..];
    }

    let text = |bytes: &[u8], name: &str| {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| FrameError::Malformed(format!("{name} is not UTF-8")))
    };
    let sender_id = text(fields[0], "sender id")?;
    let channel = text(fields[1], "channel")?;
    let tagged_id = text(fields[2], "correlation id")?;

    let (correlation_id, chunk) = match tagged_id.rsplit_once(CHUNK_MARKER) {
        Some((base, tag)) => match ChunkTag::parse(tag) {
            Some(tag) => (base.to_string(), Some(tag)),
            None => (tagged_id.clone(), None),
        },
        None => (tagged_id.clone(), None),
    };

    let body_start = raw.len() - rest.len();
    Ok(Frame {
        header: Header {
            sender_id,
            channel,
            correlation_id,
        },
        chunk,
        body: raw.slice(body_start..),
        wire_len: raw.len(),
    })
}
