//! Message envelope exchanged between agents.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MessageError;

/// Free-form message metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Kind of a message; selects the handler an agent dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Data,
    Request,
    Response,
    Error,
    Status,
    Review,
}

impl MessageType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Task => "task",
            MessageType::Data => "data",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
            MessageType::Status => "status",
            MessageType::Review => "review",
        }
    }
}

impl FromStr for MessageType {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "task" => Ok(MessageType::Task),
            "data" => Ok(MessageType::Data),
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "error" => Ok(MessageType::Error),
            "status" => Ok(MessageType::Status),
            "review" => Ok(MessageType::Review),
            _ => Err(MessageError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable message between two agents.
///
/// Fields are only reachable through accessors; a message never changes
/// after construction. Retries produce a new message via [`Message::retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    from_agent: String,
    to_agent: String,
    message_type: MessageType,
    content: String,
    metadata: Metadata,
    timestamp: DateTime<Utc>,
    retry_count: u32,
    parent_message_id: Option<String>,
}

impl Message {
    /// Create a new message with a generated id.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Result<Self, MessageError> {
        let from_agent = from_agent.into();
        let id = format!("{}_{}", from_agent, Uuid::new_v4().simple());
        Self::with_id(id, from_agent, to_agent, message_type, content)
    }

    /// Create a new message with an explicit id.
    pub fn with_id(
        id: impl Into<String>,
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Result<Self, MessageError> {
        let message = Self {
            id: id.into(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type,
            content: content.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            retry_count: 0,
            parent_message_id: None,
        };
        message.validate()?;
        Ok(message)
    }

    /// Create a message from a textual type tag.
    pub fn parse_type(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: &str,
        content: impl Into<String>,
    ) -> Result<Self, MessageError> {
        let kind = message_type.parse::<MessageType>()?;
        Self::new(from_agent, to_agent, kind, content)
    }

    /// Build an ERROR message without failing.
    ///
    /// Blank fields are substituted so the envelope stays valid.
    pub(crate) fn error_reply(from_agent: &str, to_agent: &str, error: &str) -> Self {
        let from = non_blank(from_agent, "unknown");
        Self {
            id: format!("{}_{}", from, Uuid::new_v4().simple()),
            from_agent: from.to_string(),
            to_agent: non_blank(to_agent, "system").to_string(),
            message_type: MessageType::Error,
            content: non_blank(error, "unhandled agent failure").to_string(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
            retry_count: 0,
            parent_message_id: None,
        }
    }

    /// Attach metadata. Consumes the message under construction.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Derive a retry of this message.
    ///
    /// The retry copies every field except its id, retry count, and parent
    /// link: the id is deterministic and the parent points back at this message.
    pub fn retry(&self) -> Self {
        let retry_count = self.retry_count + 1;
        Self {
            id: format!("{}_retry_{}", self.id, retry_count),
            from_agent: self.from_agent.clone(),
            to_agent: self.to_agent.clone(),
            message_type: self.message_type,
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            timestamp: self.timestamp,
            retry_count,
            parent_message_id: Some(self.id.clone()),
        }
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.id.trim().is_empty() {
            return Err(MessageError::EmptyField { field: "id" });
        }
        if self.from_agent.trim().is_empty() {
            return Err(MessageError::EmptyField { field: "from_agent" });
        }
        if self.to_agent.trim().is_empty() {
            return Err(MessageError::EmptyField { field: "to_agent" });
        }
        if self.content.is_empty() {
            return Err(MessageError::EmptyField { field: "content" });
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from_agent(&self) -> &str {
        &self.from_agent
    }

    pub fn to_agent(&self) -> &str {
        &self.to_agent
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn parent_message_id(&self) -> Option<&str> {
        self.parent_message_id.as_deref()
    }

    /// Get a string metadata value, treating empty strings as absent.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

fn non_blank<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_substitutes_blanks() {
        let msg = Message::error_reply("runner", " ", "");
        assert_eq!(msg.message_type(), MessageType::Error);
        assert_eq!(msg.to_agent(), "system");
        assert_eq!(msg.content(), "unhandled agent failure");
        assert!(msg.id().starts_with("runner_"));
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::new("coordinator", "coder", MessageType::Task, "write add").unwrap();

        assert_eq!(msg.from_agent(), "coordinator");
        assert_eq!(msg.to_agent(), "coder");
        assert_eq!(msg.message_type(), MessageType::Task);
        assert_eq!(msg.retry_count(), 0);
        assert!(msg.parent_message_id().is_none());
        assert!(msg.id().starts_with("coordinator_"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::new("a", "b", MessageType::Data, "x").unwrap();
        let b = Message::new("a", "b", MessageType::Data, "x").unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(matches!(
            Message::new("", "coder", MessageType::Task, "x"),
            Err(MessageError::EmptyField { field: "from_agent" })
        ));
        assert!(matches!(
            Message::new("a", " ", MessageType::Task, "x"),
            Err(MessageError::EmptyField { field: "to_agent" })
        ));
        assert!(matches!(
            Message::new("a", "b", MessageType::Task, ""),
            Err(MessageError::EmptyField { field: "content" })
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = Message::parse_type("a", "b", "broadcast", "hello").unwrap_err();
        assert!(matches!(err, MessageError::UnknownType(ref t) if t == "broadcast"));

        let ok = Message::parse_type("a", "b", "REVIEW", "hello").unwrap();
        assert_eq!(ok.message_type(), MessageType::Review);
    }

    #[test]
    fn test_retry_derivation() {
        let mut metadata = Metadata::new();
        metadata.insert("priority".into(), serde_json::json!(2));
        let original = Message::with_id("m1", "coder", "tester", MessageType::Data, "code")
            .unwrap()
            .with_metadata(metadata);

        let first = original.retry();
        assert_eq!(first.parent_message_id(), Some("m1"));
        assert_eq!(first.retry_count(), 1);
        assert_eq!(first.id(), "m1_retry_1");
        assert_eq!(first.from_agent(), original.from_agent());
        assert_eq!(first.to_agent(), original.to_agent());
        assert_eq!(first.content(), original.content());
        assert_eq!(first.metadata(), original.metadata());
        assert_eq!(first.message_type(), original.message_type());
        assert_eq!(first.timestamp(), original.timestamp());

        let second = first.retry();
        assert_eq!(second.parent_message_id(), Some("m1_retry_1"));
        assert_eq!(second.retry_count(), 2);
        assert_eq!(second.timestamp(), original.timestamp());
        assert_eq!(second.id(), "m1_retry_1_retry_2");
    }

    #[test]
    fn test_metadata_str_skips_empty() {
        let mut metadata = Metadata::new();
        metadata.insert("code".into(), serde_json::json!(""));
        metadata.insert("filename".into(), serde_json::json!("code_1.py"));
        let msg = Message::new("a", "b", MessageType::Data, "x")
            .unwrap()
            .with_metadata(metadata);

        assert!(msg.metadata_str("code").is_none());
        assert_eq!(msg.metadata_str("filename"), Some("code_1.py"));
        assert!(msg.metadata_str("missing").is_none());
    }
}
