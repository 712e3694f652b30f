//! Typed identifiers shared by every Lumen crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when parsing an identifier from text fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_int_id {
    ($name:ident, $label:expr) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_int_id!(FileId, "file ID");
define_int_id!(StorageId, "storage ID");
define_int_id!(DetectionId, "detection ID");
define_int_id!(ClusterId, "cluster ID");

/// Account name of a user of the file store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdParseError::new("Invalid user ID: empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_id_parse() {
        let id: FileId = " 42 ".parse().unwrap();
        assert_eq!(id, FileId::new(42));
        assert_eq!(id.to_string(), "42");

        let err = "abc".parse::<StorageId>().unwrap_err();
        assert!(err.to_string().contains("storage ID"));
    }

    #[test]
    fn test_user_id_rejects_empty() {
        assert!("  ".parse::<UserId>().is_err());
        assert_eq!("alice".parse::<UserId>().unwrap(), UserId::new("alice"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ClusterId::new(7)).unwrap();
        assert_eq!(json, "7");
        let user: UserId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(user.as_str(), "bob");
    }
}
