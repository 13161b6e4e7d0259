//! Per-agent message memory.

use std::collections::{HashMap, VecDeque};

use crate::agent::message::Message;

/// Maximum number of messages kept in short-term memory.
pub const SHORT_TERM_CAPACITY: usize = 50;

/// Number of recent messages rendered into prompt context.
const PROJECTION_WINDOW: usize = 10;

/// Maximum characters of each message rendered into prompt context.
const PROJECTION_CONTENT_CHARS: usize = 100;

/// Memory owned by a single agent.
///
/// Short-term memory is a FIFO window over received messages. Long-term
/// memory and context are free-form and never evicted.
#[derive(Debug, Default, Clone)]
pub struct AgentMemory {
    short_term: VecDeque<Message>,
    /// Long-term facts; unbounded.
    pub long_term: HashMap<String, serde_json::Value>,
    /// Values used when building prompts.
    pub context: HashMap<String, serde_json::Value>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message, evicting the oldest past capacity.
    pub fn add_message(&mut self, message: Message) {
        self.short_term.push_back(message);
        while self.short_term.len() > SHORT_TERM_CAPACITY {
            self.short_term.pop_front();
        }
    }

    /// Messages in arrival order.
    pub fn short_term(&self) -> impl DoubleEndedIterator<Item = &Message> + ExactSizeIterator {
        self.short_term.iter()
    }

    pub fn len(&self) -> usize {
        self.short_term.len()
    }

    pub fn is_empty(&self) -> bool {
        self.short_term.is_empty()
    }

    /// Contents of the last `n` messages, oldest first.
    pub fn last_contents(&self, n: usize) -> Vec<String> {
        let skip = self.short_term.len().saturating_sub(n);
        self.short_term
            .iter()
            .skip(skip)
            .map(|m| m.content().to_string())
            .collect()
    }

    /// Render the recent conversation as a bounded summary for prompts.
    pub fn context_projection(&self) -> String {
        let skip = self.short_term.len().saturating_sub(PROJECTION_WINDOW);
        let mut out = String::from("Recent conversation:\n");
        for msg in self.short_term.iter().skip(skip) {
            let snippet: String = msg.content().chars().take(PROJECTION_CONTENT_CHARS).collect();
            out.push_str(&format!(
                "{} -> {}: {}...\n",
                msg.from_agent(),
                msg.to_agent(),
                snippet
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::MessageType;

    fn msg(n: usize) -> Message {
        Message::new("a", "b", MessageType::Data, format!("message {n}")).unwrap()
    }

    #[test]
    fn test_short_term_evicts_oldest() {
        let mut memory = AgentMemory::new();
        let inserted: Vec<Message> = (0..60).map(msg).collect();
        for m in &inserted {
            memory.add_message(m.clone());
        }

        assert_eq!(memory.len(), SHORT_TERM_CAPACITY);
        let kept: Vec<&Message> = memory.short_term().collect();
        let expected: Vec<&Message> = inserted[10..].iter().collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_long_term_not_evicted() {
        let mut memory = AgentMemory::new();
        for i in 0..200 {
            memory
                .long_term
                .insert(format!("fact-{i}"), serde_json::json!(i));
            memory.add_message(msg(i));
        }
        assert_eq!(memory.long_term.len(), 200);
    }

    #[test]
    fn test_context_projection_is_bounded() {
        let mut memory = AgentMemory::new();
        memory.add_message(Message::new("x", "y", MessageType::Task, "z".repeat(500)).unwrap());
        for i in 0..15 {
            memory.add_message(msg(i));
        }

        let projection = memory.context_projection();
        assert!(projection.starts_with("Recent conversation:\n"));
        assert_eq!(projection.lines().count(), 1 + 10);
        assert!(projection.contains("message 14"));
        assert!(projection.contains("message 5..."));
        assert!(!projection.contains("message 4..."));
        assert!(!projection.contains(&"z".repeat(101)));
    }

    #[test]
    fn test_projection_truncates_content() {
        let mut memory = AgentMemory::new();
        memory.add_message(Message::new("x", "y", MessageType::Task, "q".repeat(300)).unwrap());
        let projection = memory.context_projection();
        assert!(projection.contains(&format!("x -> y: {}...", "q".repeat(100))));
    }

    #[test]
    fn test_last_contents() {
        let mut memory = AgentMemory::new();
        for i in 0..8 {
            memory.add_message(msg(i));
        }
        assert_eq!(
            memory.last_contents(3),
            vec!["message 5", "message 6", "message 7"]
        );
        assert_eq!(memory.last_contents(100).len(), 8);
    }
}
