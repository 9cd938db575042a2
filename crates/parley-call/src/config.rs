//! Call configuration.

/// Call configuration.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Prefix prepended to a room key to form the channel topic.
    pub topic_prefix: String,
    /// Presence payload announced with `track`.
    pub presence_data: Option<serde_json::Value>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "video-".to_string(),
            presence_data: None,
        }
    }
}

impl CallConfig {
    /// Channel topic for a room key, e.g. `room-1` → `video-room-1`.
    #[must_use]
    pub fn topic_for(&self, room_key: &str) -> String {
        format!("{}{}", self.topic_prefix, room_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_for() {
        let config = CallConfig::default();
        assert_eq!(config.topic_for("room-1"), "video-room-1");

        let config = CallConfig {
            topic_prefix: "audio:".to_string(),
            ..Default::default()
        };
        assert_eq!(config.topic_for("lobby"), "audio:lobby");
    }
}
