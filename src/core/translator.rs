//! Topic/payload to register command translation.
use serde::{Deserialize, Serialize};

/// Only this many leading payload bytes take part in decoding.
pub const DECODE_WINDOW: usize = 3;

/// One row of the topic to register table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMapping {
    /// Full topic, compared by exact equality (no wildcards).
    pub topic: String,
    /// Holding register driven by messages on `topic`.
    pub register: u16,
}

impl TopicMapping {
    pub fn new(topic: impl Into<String>, register: u16) -> Self {
        Self {
            topic: topic.into(),
            register,
        }
    }
}

/// Register write derived from a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub register: u16,
    pub value: u16,
}

/// `1` if a case-insensitive "on" appears within the first three payload bytes, else `0`.
pub fn decode_payload(payload: &[u8]) -> u16 {
    let window = &payload[..payload.len().min(DECODE_WINDOW)];
    let is_on = window
        .windows(2)
        .any(|pair| pair.eq_ignore_ascii_case(b"on"));
    u16::from(is_on)
}

/// Immutable mapping table plus the decoding rule.
#[derive(Debug, Clone, Default)]
pub struct CommandTranslator {
    mappings: Vec<TopicMapping>,
}

impl CommandTranslator {
    pub fn new(mappings: Vec<TopicMapping>) -> Self {
        Self { mappings }
    }

    pub fn mappings(&self) -> &[TopicMapping] {
        &self.mappings
    }

    pub fn translate(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        let mapping = self.mappings.iter().find(|m| m.topic == topic)?;
        Some(Command {
            register: mapping.register,
            value: decode_payload(payload),
        })
    }
}
