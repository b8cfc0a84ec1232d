//! Identifier types for sessions, messages and tool calls.
//!
//! Session ids are client-visible path segments, so they are validated
//! strings rather than UUIDs: web clients usually mint random UUIDs but may
//! pick their own names. Message ids are generated server-side.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatError;

/// Maximum accepted length of a session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(uuid_time_ordered())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a message in a session history.
    MessageId
);

/// Identifier of a conversation session ("mission").
///
/// Used as the sole partition key: it addresses both the directory entry and
/// the agent owning the chat state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate and wrap a client-supplied identifier.
    ///
    /// # Errors
    /// Returns [`ChatError::InvalidSessionId`] if the value is blank, too long,
    /// or contains characters that cannot appear in a single path segment.
    pub fn parse(value: &str) -> Result<Self, ChatError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidSessionId("empty".to_string()));
        }
        if trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(ChatError::InvalidSessionId(format!(
                "longer than {MAX_SESSION_ID_LEN} bytes"
            )));
        }
        if let Some(ch) = trimmed
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
        {
            return Err(ChatError::InvalidSessionId(format!(
                "invalid character {ch:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accepts_uuid_and_slug() {
        let generated = SessionId::generate();
        assert!(SessionId::parse(generated.as_str()).is_ok());
        assert_eq!(
            SessionId::parse("  audit-2024_q1.v2 ").map(|id| id.to_string()).ok(),
            Some("audit-2024_q1.v2".to_string())
        );
    }

    #[test]
    fn session_id_rejects_path_breaking_values() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("   ").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse("a b").is_err());
        assert!(SessionId::parse(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn session_id_deserialization_validates() {
        let ok: Result<SessionId, _> = serde_json::from_str("\"mission-1\"");
        assert!(ok.is_ok());
        let bad: Result<SessionId, _> = serde_json::from_str("\"../etc\"");
        assert!(bad.is_err());
    }

    #[test]
    fn message_ids_are_unique_and_parse_back() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<MessageId>().ok(), Some(a));
    }
}
