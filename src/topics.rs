//! Feed-to-topic mapping for Adafruit IO
//!
//! Adafruit IO exposes every feed of a user as the MQTT topic
//! `{username}/feeds/{feed_key}`. The mapping is a plain string join:
//! feed keys are neither escaped nor validated, so a key containing `/`
//! produces a nested topic.

/// Path segment between the username and the feed key
pub const FEEDS_SEGMENT: &str = "feeds";

/// Feed topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build feed topic: `{username}/feeds/{feed_key}`
    pub fn build_feed_topic(username: &str, feed_key: &str) -> String {
        format!("{username}/{FEEDS_SEGMENT}/{feed_key}")
    }

    /// Build one topic per feed key, preserving order and duplicates
    pub fn build_feed_topics<S: AsRef<str>>(username: &str, feed_keys: &[S]) -> Vec<String> {
        feed_keys
            .iter()
            .map(|key| Self::build_feed_topic(username, key.as_ref()))
            .collect()
    }

    /// Recover the feed key from a topic owned by `username`
    ///
    /// Returns `None` when the topic is not under `{username}/feeds/`.
    pub fn feed_key_from_topic<'a>(username: &str, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(username)?
            .strip_prefix('/')?
            .strip_prefix(FEEDS_SEGMENT)?
            .strip_prefix('/')
    }
}
