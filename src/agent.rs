//! Agent persona: the system instructions the realtime model runs with.

use crate::config::AgentConfig;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful voice AI assistant.";

pub const GREETING_INSTRUCTIONS: &str = "Greet the user and offer your assistance.";

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub instructions: String,
}

impl Agent {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// The assistant persona, taking its instructions from configuration.
    pub fn assistant(config: &AgentConfig) -> Self {
        Self::new(config.instructions.clone())
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS)
    }
}
