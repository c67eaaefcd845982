use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mcbus_transport::DatagramTransport;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::{decode_frame, Frame, FrameConfig, Header, Message};
use crate::error::Result;

/// Reads complete logical messages from a datagram transport.
///
/// Chunks of a multi-datagram message are gathered until the message is whole.
/// Unrelated datagrams that arrive meanwhile are parked in an inbox and handed
/// out by later reads, so interleaved senders never lose traffic. Parked chunks
/// and incomplete messages are abandoned after `reassembly_grace`; parked
/// single-datagram messages are kept until read.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
    local_id: Option<String>,
    inbox: Mutex<VecDeque<Parked>>,
    completed: Mutex<HashMap<Header, Instant>>,
}

struct Parked {
    frame: Frame,
    parked_at: Instant,
}

impl<T: DatagramTransport> FrameReader<T> {
    /// Create a new frame reader sized to the transport's datagram limit.
    pub fn new(inner: T) -> Self {
        let config = FrameConfig {
            max_datagram_size: inner.max_datagram_size(),
            ..FrameConfig::default()
        };
        Self::with_config(inner, config)
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            local_id: None,
            inbox: Mutex::new(VecDeque::new()),
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Silently discard every datagram whose sender id is `id`.
    pub fn ignore_sender(mut self, id: impl Into<String>) -> Self {
        self.local_id = Some(id.into());
        self
    }

    /// Read the next complete message.
    ///
    /// Waits up to `wait` for a first datagram. Once a chunk arrives the read
    /// continues until the message completes or the reassembly grace runs out.
    /// Returns `Ok(None)` when nothing deliverable turned up: a timeout, a
    /// dropped datagram, or an abandoned message.
    pub fn read_message(&self, wait: Duration) -> Result<Option<Message>> {
        let frame = match self.take_parked(|_| true) {
            Some(frame) => frame,
            None => match self.recv_frame(wait)? {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };

        if !frame.is_fragment(self.config.max_datagram_size) {
            return Ok(complete(frame.header, &frame.body));
        }
        if self.recently_completed(&frame.header) {
            debug!(
                sender = %frame.header.sender_id,
                correlation_id = %frame.header.correlation_id,
                "dropping chunk of an already delivered message"
            );
            return Ok(None);
        }
        self.reassemble(Assembly::start(frame))
    }

    fn reassemble(&self, mut assembly: Assembly) -> Result<Option<Message>> {
        let max = self.config.max_datagram_size;
        let deadline = Instant::now() + self.config.reassembly_grace;

        loop {
            let frame = match self.take_parked(|frame| assembly.accepts(frame)) {
                Some(frame) => frame,
                None => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        let header = assembly.header();
                        warn!(
                            sender = %header.sender_id,
                            channel = %header.channel,
                            correlation_id = %header.correlation_id,
                            "abandoning incomplete message"
                        );
                        return Ok(None);
                    }
                    match self.recv_frame(remaining)? {
                        Some(frame) if assembly.accepts(&frame) => frame,
                        Some(frame) => {
                            self.park(frame);
                            continue;
                        }
                        None => continue,
                    }
                }
            };

            if assembly.push(frame, max) {
                let (header, body) = assembly.finish();
                self.remember(header.clone());
                return Ok(complete(header, &body));
            }
        }
    }

    fn recv_frame(&self, wait: Duration) -> Result<Option<Frame>> {
        let Some(raw) = self.inner.recv_timeout(wait)? else {
            return Ok(None);
        };
        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "dropping malformed datagram");
                return Ok(None);
            }
        };
        if self.local_id.as_deref() == Some(frame.header.sender_id.as_str()) {
            trace!(channel = %frame.header.channel, "dropping self-originated datagram");
            return Ok(None);
        }
        if let Some(tag) = frame.chunk.filter(|tag| tag.count > self.config.max_chunks) {
            debug!(
                count = tag.count,
                max = self.config.max_chunks,
                "dropping chunk of oversized message"
            );
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn park(&self, frame: Frame) {
        if frame.is_fragment(self.config.max_datagram_size)
            && self.recently_completed(&frame.header)
        {
            debug!(
                correlation_id = %frame.header.correlation_id,
                "dropping chunk of an already delivered message"
            );
            return;
        }
        self.inbox.lock().push_back(Parked {
            frame,
            parked_at: Instant::now(),
        });
    }

    fn take_parked(&self, accept: impl Fn(&Frame) -> bool) -> Option<Frame> {
        let grace = self.config.reassembly_grace;
        let max = self.config.max_datagram_size;
        let mut inbox = self.inbox.lock();

        // Only chunks go stale; a parked whole message stays deliverable.
        let before = inbox.len();
        inbox.retain(|parked| !parked.frame.is_fragment(max) || parked.parked_at.elapsed() < grace);
        let expired = before - inbox.len();
        if expired > 0 {
            warn!(expired, "discarding stale parked chunks");
        }

        let pos = inbox.iter().position(|parked| accept(&parked.frame))?;
        inbox.remove(pos).map(|parked| parked.frame)
    }

    fn remember(&self, header: Header) {
        let window = self.config.duplicate_window;
        let mut completed = self.completed.lock();
        completed.retain(|_, at| at.elapsed() < window);
        completed.insert(header, Instant::now());
    }

    fn recently_completed(&self, header: &Header) -> bool {
        let window = self.config.duplicate_window;
        let mut completed = self.completed.lock();
        completed.retain(|_, at| at.elapsed() < window);
        completed.contains_key(header)
    }

    /// Number of datagrams currently parked.
    pub fn inbox_len(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn complete(header: Header, body: &[u8]) -> Option<Message> {
    match Message::from_parts(header, body) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(error = %err, "dropping undecodable message");
            None
        }
    }
}

enum Assembly {
    /// Untagged chunks in arrival order; a short chunk ends the message.
    Sequential { header: Header, body: BytesMut },
    /// Tagged chunks slotted by index.
    Indexed {
        header: Header,
        count: usize,
        parts: BTreeMap<usize, Bytes>,
    },
}

impl Assembly {
    fn start(frame: Frame) -> Self {
        match frame.chunk {
            Some(tag) => Assembly::Indexed {
                header: frame.header,
                count: tag.count,
                parts: BTreeMap::from([(tag.index, frame.body)]),
            },
            None => Assembly::Sequential {
                header: frame.header,
                body: BytesMut::from(&frame.body[..]),
            },
        }
    }

    fn header(&self) -> &Header {
        match self {
            Assembly::Sequential { header, .. } | Assembly::Indexed { header, .. } => header,
        }
    }

    fn accepts(&self, frame: &Frame) -> bool {
        if frame.header != *self.header() {
            return false;
        }
        match self {
            Assembly::Sequential { .. } => frame.chunk.is_none(),
            Assembly::Indexed { count, .. } => frame.chunk.is_some_and(|tag| tag.count == *count),
        }
    }

    // Returns true once the message is whole.
    fn push(&mut self, frame: Frame, max_datagram_size: usize) -> bool {
        match self {
            Assembly::Sequential { body, .. } => {
                body.extend_from_slice(&frame.body);
                frame.wire_len != max_datagram_size
            }
            Assembly::Indexed { count, parts, .. } => {
                let Some(tag) = frame.chunk else {
                    return false;
                };
                if parts.contains_key(&tag.index) {
                    debug!(index = tag.index, "ignoring duplicate chunk");
                } else {
                    parts.insert(tag.index, frame.body);
                }
                parts.len() == *count
            }
        }
    }

    fn finish(self) -> (Header, Vec<u8>) {
        match self {
            Assembly::Sequential { header, body } => (header, body.to_vec()),
            Assembly::Indexed { header, parts, .. } => {
                let mut body = Vec::new();
                for part in parts.into_values() {
                    body.extend_from_slice(&part);
                }
                (header, body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mcbus_transport::{MemoryEndpoint, MemoryHub};

    use super::*;
    use crate::codec::{encode_message, ChunkMode};

    const MAX: usize = 64;

    fn config(chunk_mode: ChunkMode) -> FrameConfig {
        FrameConfig {
            max_datagram_size: MAX,
            reassembly_grace: Duration::from_secs(2),
            chunk_mode,
            ..FrameConfig::default()
        }
    }

    fn setup(chunk_mode: ChunkMode) -> (FrameReader<MemoryEndpoint>, MemoryEndpoint) {
        let hub = MemoryHub::with_max_datagram_size(MAX);
        let reader = FrameReader::with_config(hub.endpoint(), config(chunk_mode));
        (reader, hub.endpoint())
    }

    fn chunks(sender: &str, cid: &str, body: &[u8], chunk_mode: ChunkMode) -> Vec<Bytes> {
        let header = Header::new(sender, "pub/bulk", cid);
        encode_message(&header, body, &config(chunk_mode)).unwrap()
    }

    fn body(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| b'a' + ((i + usize::from(seed)) % 26) as u8)
            .collect()
    }

    fn read(reader: &FrameReader<MemoryEndpoint>) -> Message {
        reader
            .read_message(Duration::from_secs(1))
            .unwrap()
            .expect("message")
    }

    #[test]
    fn reads_single_datagram_message() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        tx.send(b"bob,pub/news,1,hi, there").unwrap();

        let message = read(&reader);
        assert_eq!(message.sender_id, "bob");
        assert_eq!(message.channel, "pub/news");
        assert_eq!(message.correlation_id, "1");
        assert_eq!(message.body, "hi, there");
    }

    #[test]
    fn reassembles_chunks_in_any_order() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        let payload = body(300, 0);
        let mut frames = chunks("bob", "c1", &payload, ChunkMode::Indexed);
        assert!(frames.len() > 3);

        frames.reverse();
        frames.swap(1, 2);
        for frame in &frames {
            tx.send(frame).unwrap();
        }

        let message = read(&reader);
        assert_eq!(message.correlation_id, "c1");
        assert_eq!(message.body.as_bytes(), payload.as_slice());
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn interleaved_messages_are_parked_not_lost() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        let first = body(80, 1);
        let second = body(90, 2);
        let a = chunks("alice", "a", &first, ChunkMode::Indexed);
        let b = chunks("bob", "b", &second, ChunkMode::Indexed);
        assert_eq!((a.len(), b.len()), (2, 2));

        tx.send(&a[0]).unwrap();
        tx.send(&b[0]).unwrap();
        tx.send(b"carol,pub/t,c,short").unwrap();
        tx.send(&a[1]).unwrap();
        tx.send(&b[1]).unwrap();

        let m1 = read(&reader);
        assert_eq!(m1.body.as_bytes(), first.as_slice());
        assert_eq!(reader.inbox_len(), 2);

        let m2 = read(&reader);
        assert_eq!(m2.body.as_bytes(), second.as_slice());

        let m3 = read(&reader);
        assert_eq!(m3.body, "short");
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn incomplete_message_is_abandoned_after_grace() {
        let hub = MemoryHub::with_max_datagram_size(MAX);
        let grace = Duration::from_millis(150);
        let reader = FrameReader::with_config(
            hub.endpoint(),
            FrameConfig {
                reassembly_grace: grace,
                ..config(ChunkMode::Indexed)
            },
        );
        let tx = hub.endpoint();

        let frames = chunks("bob", "lost", &body(200, 0), ChunkMode::Indexed);
        tx.send(&frames[0]).unwrap();

        let start = Instant::now();
        let result = reader.read_message(Duration::from_secs(1)).unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= grace);
    }

    #[test]
    fn self_originated_datagrams_are_ignored() {
        let hub = MemoryHub::with_max_datagram_size(MAX);
        let reader =
            FrameReader::with_config(hub.endpoint(), config(ChunkMode::Indexed)).ignore_sender("me");
        let tx = hub.endpoint();

        tx.send(b"me,pub/t,1,mine").unwrap();
        tx.send(b"you,pub/t,2,yours").unwrap();

        assert!(reader
            .read_message(Duration::from_secs(1))
            .unwrap()
            .is_none());
        assert_eq!(read(&reader).body, "yours");
    }

    #[test]
    fn malformed_and_non_utf8_datagrams_are_dropped() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        tx.send(b"no delimiters here").unwrap();
        tx.send(b"bob,pub/t,1,\xff\xfe").unwrap();
        tx.send(b"bob,pub/t,2,fine").unwrap();

        let wait = Duration::from_secs(1);
        assert!(reader.read_message(wait).unwrap().is_none());
        assert!(reader.read_message(wait).unwrap().is_none());
        assert_eq!(read(&reader).body, "fine");
    }

    #[test]
    fn legacy_chunks_reassemble_in_order() {
        let (reader, tx) = setup(ChunkMode::Legacy);
        let payload = body(150, 3);
        for frame in chunks("bob", "leg", &payload, ChunkMode::Legacy) {
            tx.send(&frame).unwrap();
        }

        let message = read(&reader);
        assert_eq!(message.body.as_bytes(), payload.as_slice());
    }

    #[test]
    fn legacy_terminator_closes_exact_fill() {
        let (reader, tx) = setup(ChunkMode::Legacy);
        let room = MAX - Header::new("bob", "pub/bulk", "t").encoded_len();
        let payload = body(room * 2, 4);
        let frames = chunks("bob", "t", &payload, ChunkMode::Legacy);
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            tx.send(frame).unwrap();
        }
        tx.send(b"bob,pub/next,u,after").unwrap();

        assert_eq!(read(&reader).body.as_bytes(), payload.as_slice());
        assert_eq!(read(&reader).body, "after");
    }

    #[test]
    fn timeout_without_traffic() {
        let (reader, _tx) = setup(ChunkMode::Indexed);
        assert!(reader
            .read_message(Duration::from_millis(20))
            .unwrap()
            .is_none());
    }

    fn with_grace(grace: Duration) -> (FrameReader<MemoryEndpoint>, MemoryEndpoint) {
        let hub = MemoryHub::with_max_datagram_size(MAX);
        let reader = FrameReader::with_config(
            hub.endpoint(),
            FrameConfig {
                reassembly_grace: grace,
                ..config(ChunkMode::Indexed)
            },
        );
        (reader, hub.endpoint())
    }

    #[test]
    fn whole_messages_survive_an_abandoned_reassembly() {
        let (reader, tx) = with_grace(Duration::from_millis(300));
        let frames = chunks("bob", "lost", &body(80, 0), ChunkMode::Indexed);
        assert_eq!(frames.len(), 2);

        tx.send(&frames[0]).unwrap();
        tx.send(b"carol,pub/t,1,m1").unwrap();
        tx.send(b"carol,pub/t,2,m2").unwrap();

        assert!(reader
            .read_message(Duration::from_secs(1))
            .unwrap()
            .is_none());
        assert_eq!(read(&reader).body, "m1");
        assert_eq!(read(&reader).body, "m2");
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn stale_parked_chunks_are_discarded() {
        let (reader, tx) = with_grace(Duration::from_millis(200));
        let lost = chunks("bob", "lost", &body(80, 0), ChunkMode::Indexed);
        let orphan = chunks("dave", "orphan", &body(80, 1), ChunkMode::Indexed);

        tx.send(&lost[0]).unwrap();
        tx.send(&orphan[0]).unwrap();
        tx.send(b"carol,pub/t,1,kept").unwrap();

        assert!(reader
            .read_message(Duration::from_secs(1))
            .unwrap()
            .is_none());
        assert_eq!(reader.inbox_len(), 2);

        // Let the orphan chunk outlive the grace; the whole message must not expire.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(read(&reader).body, "kept");
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn duplicate_chunk_after_completion_does_not_stall() {
        let (reader, tx) = with_grace(Duration::from_secs(1));
        let payload = body(80, 5);
        let frames = chunks("bob", "dup", &payload, ChunkMode::Indexed);

        tx.send(&frames[0]).unwrap();
        tx.send(&frames[1]).unwrap();
        tx.send(&frames[0]).unwrap();
        tx.send(b"carol,pub/t,1,next").unwrap();

        let start = Instant::now();
        assert_eq!(read(&reader).body.as_bytes(), payload.as_slice());
        assert!(reader
            .read_message(Duration::from_secs(1))
            .unwrap()
            .is_none());
        assert_eq!(read(&reader).body, "next");
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn duplicate_chunk_is_not_parked_during_another_reassembly() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        let first = chunks("bob", "one", &body(80, 1), ChunkMode::Indexed);
        let second = chunks("alice", "two", &body(80, 2), ChunkMode::Indexed);

        tx.send(&first[0]).unwrap();
        tx.send(&first[1]).unwrap();
        tx.send(&second[0]).unwrap();
        tx.send(&first[1]).unwrap();
        tx.send(&second[1]).unwrap();

        assert_eq!(read(&reader).correlation_id, "one");
        assert_eq!(read(&reader).correlation_id, "two");
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn absurd_chunk_counts_are_dropped() {
        let (reader, tx) = setup(ChunkMode::Indexed);
        tx.send(b"x,pub/a,c#0/18446744073709551615,b").unwrap();
        tx.send(b"x,pub/a,d#0/100000000000,b").unwrap();
        tx.send(b"x,pub/a,e,fine").unwrap();

        let wait = Duration::from_millis(200);
        assert!(reader.read_message(wait).unwrap().is_none());
        assert!(reader.read_message(wait).unwrap().is_none());
        assert_eq!(read(&reader).body, "fine");
        assert_eq!(reader.inbox_len(), 0);
    }

    #[test]
    fn every_body_length_reassembles() {
        const SMALL: usize = 40;
        for chunk_mode in [ChunkMode::Indexed, ChunkMode::Legacy] {
            let hub = MemoryHub::with_max_datagram_size(SMALL);
            let cfg = FrameConfig {
                max_datagram_size: SMALL,
                chunk_mode,
                ..FrameConfig::default()
            };
            let reader = FrameReader::with_config(hub.endpoint(), cfg.clone());
            let tx = hub.endpoint();

            for len in 0..400 {
                let payload = body(len, (len % 26) as u8);
                let header = Header::new("bob", "pub/bulk", format!("s{len}"));
                let mut frames = encode_message(&header, &payload, &cfg).unwrap();
                assert!(frames.iter().all(|raw| raw.len() <= SMALL));
                if chunk_mode == ChunkMode::Indexed {
                    frames.reverse();
                }
                for frame in &frames {
                    tx.send(frame).unwrap();
                }

                let message = read(&reader);
                assert_eq!(message.correlation_id, format!("s{len}"), "{chunk_mode:?} len {len}");
                assert_eq!(message.body.as_bytes(), payload.as_slice(), "{chunk_mode:?} len {len}");
            }
            assert_eq!(reader.inbox_len(), 0);
        }
    }
}
