//! Composite subscription keys.
//!
//! A subscription is identified server-side by its topic plus the serialized
//! options it was created with. Options are folded into the registry key as
//! `topic?options=<urlencoded json>`, so the same topic subscribed with two
//! different non-empty option sets yields two independent subscriptions.

use serde::Serialize;
use std::collections::BTreeMap;

/// Separator between the topic portion and the serialized options of a key.
pub(crate) const OPTIONS_SEPARATOR: &str = "?options=";

/// Optional parameters attached to a subscribe call.
///
/// Both maps are ordered so the serialized form (and therefore the composite
/// key) is deterministic for a given set of options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubscribeOptions {
    /// Extra query parameters forwarded to the server with the subscription.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Extra headers forwarded to the server with the subscription.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl SubscribeOptions {
    /// Whether no query parameters and no headers are set.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.headers.is_empty()
    }
}

/// Builds the registry key for `topic` subscribed with `options`.
///
/// Empty options collapse to the bare topic.
pub(crate) fn composite_key(topic: &str, options: &SubscribeOptions) -> String {
    if options.is_empty() {
        return topic.to_string();
    }
    let mut fields = serde_json::Map::new();
    if !options.query.is_empty() {
        fields.insert(
            "query".to_string(),
            serde_json::to_value(&options.query).unwrap_or_default(),
        );
    }
    if !options.headers.is_empty() {
        fields.insert(
            "headers".to_string(),
            serde_json::to_value(&options.headers).unwrap_or_default(),
        );
    }
    let encoded: String =
        url::form_urlencoded::byte_serialize(serde_json::Value::Object(fields).to_string().as_bytes())
            .collect();
    format!("{topic}{OPTIONS_SEPARATOR}{encoded}")
}

/// Returns the topic portion of a composite key.
pub(crate) fn topic_of(key: &str) -> &str {
    match key.split_once(OPTIONS_SEPARATOR) {
        Some((topic, _)) => topic,
        None => key,
    }
}

/// Whether `key` belongs to `topic`, i.e. it is the bare topic or the topic
/// plus serialized options.
pub(crate) fn key_matches_topic(key: &str, topic: &str) -> bool {
    key == topic
        || (key.len() > topic.len()
            && key.starts_with(topic)
            && key[topic.len()..].starts_with(OPTIONS_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(query: &[(&str, &str)], headers: &[(&str, &str)]) -> SubscribeOptions {
        SubscribeOptions {
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn empty_options_collapse_to_topic() {
        let key = composite_key("posts/*", &SubscribeOptions::default());
        assert_eq!(key, "posts/*");
    }

    #[test]
    fn key_round_trips_topic() {
        let key = composite_key(
            "posts/*",
            &options(&[("filter", "status='open'")], &[("X-Trace", "1")]),
        );
        assert_ne!(key, "posts/*");
        assert_eq!(topic_of(&key), "posts/*");
    }

    #[test]
    fn distinct_options_yield_distinct_keys() {
        let a = composite_key("posts/*", &options(&[("filter", "a=1")], &[]));
        let b = composite_key("posts/*", &options(&[("filter", "a=2")], &[]));
        assert_ne!(a, b);
        assert_eq!(topic_of(&a), topic_of(&b));
    }

    #[test]
    fn key_is_deterministic() {
        let opts = options(&[("b", "2"), ("a", "1")], &[]);
        assert_eq!(
            composite_key("topic", &opts),
            composite_key("topic", &opts.clone())
        );
    }

    #[test]
    fn topic_matching_requires_separator() {
        let key = composite_key("posts/*", &options(&[("a", "1")], &[]));
        assert!(key_matches_topic(&key, "posts/*"));
        assert!(key_matches_topic("posts/*", "posts/*"));
        assert!(!key_matches_topic("posts/*extra", "posts/*"));
        assert!(!key_matches_topic("posts", "posts/*"));
    }
}
