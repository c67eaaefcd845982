//! Channel namespace.
//!
//! Channels are `/`-delimited routing paths:
//! - `pub/<topic>`: a publication on `topic`
//! - `req/<targetId>/<signal>`: a request for `targetId`'s handler named `signal`
//! - `rep/<targetId>/<signal>`: a reply routed back to `targetId`

use std::fmt;

/// Prefix of publication channels.
pub const PUBLICATION_PREFIX: &str = "pub/";

/// Prefix of request channels.
pub const REQUEST_PREFIX: &str = "req/";

/// Prefix of reply channels.
pub const REPLY_PREFIX: &str = "rep/";

/// A parsed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Publication { topic: String },
    Request { target: String, signal: String },
    Reply { target: String, signal: String },
    /// Anything outside the namespace. Never dispatched.
    Unknown(String),
}

impl Channel {
    /// Build a publication channel.
    pub fn publication(topic: impl Into<String>) -> Self {
        Channel::Publication {
            topic: topic.into(),
        }
    }

    /// Build a request channel.
    pub fn request(target: impl Into<String>, signal: impl Into<String>) -> Self {
        Channel::Request {
            target: target.into(),
            signal: signal.into(),
        }
    }

    /// Build a reply channel.
    pub fn reply(target: impl Into<String>, signal: impl Into<String>) -> Self {
        Channel::Reply {
            target: target.into(),
            signal: signal.into(),
        }
    }

    /// Parse a channel string.
    ///
    /// The target id ends at the first `/` after the prefix; the signal is
    /// everything after it and may itself contain `/`.
    pub fn parse(channel: &str) -> Self {
        if let Some(topic) = channel.strip_prefix(PUBLICATION_PREFIX) {
            return Channel::publication(topic);
        }
        if let Some((target, signal)) = channel
            .strip_prefix(REQUEST_PREFIX)
            .and_then(|rest| rest.split_once('/'))
        {
            return Channel::request(target, signal);
        }
        if let Some((target, signal)) = channel
            .strip_prefix(REPLY_PREFIX)
            .and_then(|rest| rest.split_once('/'))
        {
            return Channel::reply(target, signal);
        }
        Channel::Unknown(channel.to_string())
    }

    /// Returns the target client id for requests and replies.
    pub fn target(&self) -> Option<&str> {
        match self {
            Channel::Request { target, .. } | Channel::Reply { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Publication { topic } => write!(f, "{PUBLICATION_PREFIX}{topic}"),
            Channel::Request { target, signal } => write!(f, "{REQUEST_PREFIX}{target}/{signal}"),
            Channel::Reply { target, signal } => write!(f, "{REPLY_PREFIX}{target}/{signal}"),
            Channel::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespace() {
        assert_eq!(Channel::parse("pub/a/b"), Channel::publication("a/b"));
        assert_eq!(Channel::parse("req/c1/print"), Channel::request("c1", "print"));
        assert_eq!(Channel::parse("rep/c1/x/y"), Channel::reply("c1", "x/y"));
        assert_eq!(Channel::parse("req/c1"), Channel::Unknown("req/c1".into()));
        assert_eq!(Channel::parse("other"), Channel::Unknown("other".into()));
    }

    #[test]
    fn display_roundtrips() {
        for raw in ["pub/topic", "req/c1/echo", "rep/c2/echo", "misc"] {
            assert_eq!(Channel::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn target_only_for_addressed_channels() {
        assert_eq!(Channel::request("c1", "s").target(), Some("c1"));
        assert_eq!(Channel::reply("c2", "s").target(), Some("c2"));
        assert_eq!(Channel::publication("t").target(), None);
    }

    #[test]
    fn empty_topic_is_still_a_publication() {
        assert_eq!(Channel::parse("pub/"), Channel::publication(""));
    }
}
