use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use regex::Regex;

use crate::dispatch::Handler;
use crate::error::{ClientError, Result};

struct Subscription {
    matcher: Regex,
    handler: Handler,
}

/// Topic pattern → handler bindings.
///
/// Patterns are regular expressions matched against the whole topic. Entries are
/// keyed by the literal pattern string; subscribing the same pattern again replaces
/// its handler.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<BTreeMap<String, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern` and bind it to `handler`.
    pub fn subscribe(&self, pattern: &str, handler: Handler) -> Result<()> {
        let matcher =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ClientError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        self.entries
            .lock()
            .insert(pattern.to_string(), Subscription { matcher, handler });
        Ok(())
    }

    /// Remove the binding for the literal `pattern`.
    pub fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.entries
            .lock()
            .remove(pattern)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotSubscribed(pattern.to_string()))
    }

    /// Snapshot every handler whose pattern matches `topic`, ordered by pattern.
    ///
    /// The lock is released before returning, so handlers may subscribe or
    /// unsubscribe while being invoked.
    pub fn match_all(&self, topic: &str) -> Vec<Handler> {
        self.entries
            .lock()
            .values()
            .filter(|sub| sub.matcher.is_match(topic))
            .map(|sub| sub.handler.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Signal → request handler bindings. One handler per signal.
#[derive(Default)]
pub struct InterfaceTable {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `signal` to `handler`, returning the handler it replaced.
    pub fn register(&self, signal: &str, handler: Handler) -> Option<Handler> {
        self.handlers.lock().insert(signal.to_string(), handler)
    }

    pub fn unregister(&self, signal: &str) -> Result<()> {
        self.handlers
            .lock()
            .remove(signal)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotRegistered(signal.to_string()))
    }

    pub fn get(&self, signal: &str) -> Option<Handler> {
        self.handlers.lock().get(signal).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Callback, Execution};

    fn tagged(tag: &'static str) -> Handler {
        Handler::simple(move |_| Some(tag.to_string()))
    }

    fn tag_of(handler: &Handler) -> Option<String> {
        match handler.callback() {
            Callback::Body(f) => f(""),
            _ => None,
        }
    }

    #[test]
    fn patterns_match_whole_topic() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("a.*", tagged("prefix")).unwrap();
        registry.subscribe("abc", tagged("exact")).unwrap();
        registry.subscribe("b", tagged("b")).unwrap();

        let matched: Vec<_> = registry.match_all("abc").iter().map(tag_of).collect();
        assert_eq!(
            matched,
            vec![Some("prefix".to_string()), Some("exact".to_string())]
        );

        // "b" is a substring of "abc" but not a full match.
        assert!(registry.match_all("xbx").is_empty());
        assert_eq!(registry.match_all("b").len(), 1);
    }

    #[test]
    fn alternation_is_anchored_as_a_group() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("foo|bar", tagged("either")).unwrap();
        assert_eq!(registry.match_all("bar").len(), 1);
        assert!(registry.match_all("barn").is_empty());
        assert!(registry.match_all("xfoo").is_empty());
    }

    #[test]
    fn resubscribe_replaces() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("t", tagged("old")).unwrap();
        registry.subscribe("t", tagged("new")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            tag_of(&registry.match_all("t")[0]),
            Some("new".to_string())
        );
    }

    #[test]
    fn unsubscribe_unknown_pattern_fails() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("t", tagged("x")).unwrap();
        registry.unsubscribe("t").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unsubscribe("t"),
            Err(ClientError::NotSubscribed(p)) if p == "t"
        ));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let registry = SubscriptionRegistry::new();
        let err = registry.subscribe("(", tagged("x")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidPattern { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn interface_table_overwrites_and_unregisters() {
        let table = InterfaceTable::new();
        assert!(table.register("echo", tagged("one")).is_none());
        let previous = table.register("echo", Handler::threaded_simple(|_| None));
        assert!(previous.is_some());
        assert_eq!(table.get("echo").unwrap().execution(), Execution::Pooled);

        table.register("alpha", tagged("a"));
        table.unregister("echo").unwrap();
        assert!(table.get("echo").is_none());
        assert!(table.get("alpha").is_some());
        assert!(matches!(
            table.unregister("echo"),
            Err(ClientError::NotRegistered(_))
        ));
    }
}
