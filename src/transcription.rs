//! # Transcription Messages
//!
//! The only payload this worker puts on the room's data channel. Every committed
//! utterance, from the user or from the assistant, becomes one JSON object:
//!
//! ```json
//! {"type":"transcription","text":"hello","sender":"user","timestamp":1718000000000}
//! ```
//!
//! Messages are built, encoded and published inside a single callback and then
//! dropped; nothing here is stored.

use crate::error::AgentResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Who produced a committed utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// Messages published to room participants over the data channel.
///
/// Internally tagged on `type`, so the tag is always the first key in the
/// encoded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomMessage {
    #[serde(rename = "transcription")]
    Transcription {
        text: String,
        sender: Speaker,
        timestamp: u64,
    },
}

impl RoomMessage {
    pub fn transcription(text: impl Into<String>, sender: Speaker, timestamp: u64) -> Self {
        RoomMessage::Transcription {
            text: text.into(),
            sender,
            timestamp,
        }
    }

    /// UTF-8 JSON bytes ready for a data publish.
    pub fn encode(&self) -> AgentResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Milliseconds since the Unix epoch, read from the system clock.
pub fn time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Millisecond clock for one session.
///
/// Reads the system clock but never hands out a value smaller than one it has
/// already returned, so timestamps stay non-decreasing even if the wall clock
/// is stepped backwards mid-session.
#[derive(Debug, Default)]
pub struct SessionClock {
    last_ms: AtomicU64,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.observe(time_ms())
    }

    /// Clamp a raw reading against the last value handed out.
    fn observe(&self, reading_ms: u64) -> u64 {
        let previous = self.last_ms.fetch_max(reading_ms, Ordering::SeqCst);
        previous.max(reading_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_user_scenario_encoding() {
        let message = RoomMessage::transcription("hello", Speaker::User, 1_718_000_000_000);
        let bytes = message.encode().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"type":"transcription","text":"hello","sender":"user","timestamp":1718000000000}"#
        );
    }

    #[test]
    fn test_assistant_scenario_encoding() {
        let message = RoomMessage::transcription("Hi, how can I help?", Speaker::Assistant, 42);
        let value: Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "transcription");
        assert_eq!(value["text"], "Hi, how can I help?");
        assert_eq!(value["sender"], "assistant");
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn test_text_is_escaped_not_mangled() {
        let text = "she said \"hi\" \u{1F44B}\nthen left";
        let message = RoomMessage::transcription(text, Speaker::User, 1);
        let decoded: RoomMessage = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_session_clock_is_non_decreasing() {
        let clock = SessionClock::new();
        assert_eq!(clock.observe(1_000), 1_000);
        // Wall clock stepped backwards
        assert_eq!(clock.observe(900), 1_000);
        assert_eq!(clock.observe(1_500), 1_500);

        let mut last = 0;
        for _ in 0..100 {
            let now = clock.now_ms();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_time_ms_is_after_2020() {
        assert!(time_ms() > 1_577_836_800_000);
    }
}
