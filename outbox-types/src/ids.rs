//! Identity types for the outbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Client-generated identifier for a queued message.
///
/// Stable across retries. The remote side deduplicates on it, so it doubles
/// as the idempotency key for every delivery attempt.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Maximum accepted length in characters.
    pub const MAX_LENGTH: usize = 128;

    /// Validate and wrap an id. Surrounding whitespace is trimmed.
    pub fn new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into().trim().to_string();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), TypesError> {
        if id.is_empty() {
            return Err(TypesError::InvalidId("id cannot be empty".into()));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(TypesError::InvalidId(format!(
                "id exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TypesError::InvalidId(
                "id contains invalid characters (allowed: a-z, A-Z, 0-9, -, _)".into(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<String> for MessageId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl FromStr for MessageId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Identifies one engine context (one tab, one process).
///
/// Used as the lease holder and as the origin of storage-change
/// notifications so a context can ignore its own writes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(uuid::Uuid);

impl ContextId {
    /// Create a new random ContextId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a ContextId from its hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", &self.0.to_string()[..8])
    }
}
