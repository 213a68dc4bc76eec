use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DIRECT_CHAT_PREFIX, MAX_ID_LEN};
use crate::error::IdError;

// User identity as issued by the identity provider. Opaque to this core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() > MAX_ID_LEN {
            return Err(IdError::TooLong(s.len()));
        }
        if s.contains(':') || s.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidCharacter(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::str::FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat identifier.
///
/// Direct chats derive theirs from the sorted participant pair so either
/// side resolves to the same record. Job and group chats carry an id minted
/// by the owning module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ChatId(String);

impl ChatId {
    /// Canonical id for the two-party chat between `a` and `b`.
    ///
    /// Order-independent: `direct(a, b) == direct(b, a)`.
    pub fn direct(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_CHAT_PREFIX}{lo}:{hi}"))
    }

    /// Accept an id minted by the job/guild module.
    pub fn scoped(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() > MAX_ID_LEN * 2 {
            return Err(IdError::TooLong(s.len()));
        }
        if s.starts_with(DIRECT_CHAT_PREFIX) {
            return Err(IdError::ReservedPrefix(s.to_string()));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidCharacter(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        match s.strip_prefix(DIRECT_CHAT_PREFIX) {
            Some(rest) => {
                let (lo, hi) = rest
                    .split_once(':')
                    .ok_or_else(|| IdError::InvalidCharacter(s.to_string()))?;
                let lo = UserId::parse(lo)?;
                let hi = UserId::parse(hi)?;
                if lo >= hi {
                    return Err(IdError::NonCanonical(s.to_string()));
                }
                Ok(Self(s.to_string()))
            }
            None => Self::scoped(s),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.0.starts_with(DIRECT_CHAT_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChatId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ChatId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
