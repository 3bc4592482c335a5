//! Identifiers for kiln entities.
//!
//! Identifiers end up in filesystem paths (snapshot keys, checkout
//! directories, execution log files), so they are restricted to a fixed
//! alphabet at construction time. A value of these types can always be
//! joined onto a storage root without escaping it.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Maximum identifier length in bytes
pub const MAX_ID_LEN: usize = 128;

/// Check that `raw` is a safe identifier token.
///
/// Accepts `[A-Za-z0-9_-]{1,128}`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] describing the first violation found
pub fn validate_token(raw: &str) -> CoreResult<()> {
    if raw.is_empty() {
        return Err(CoreError::InvalidId {
            reason: "identifier is empty".to_string(),
        });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(CoreError::InvalidId {
            reason: format!("identifier longer than {} bytes", MAX_ID_LEN),
        });
    }
    if let Some(c) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(CoreError::InvalidId {
            reason: format!("identifier contains {:?}", c),
        });
    }
    Ok(())
}

macro_rules! token_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Parse an externally supplied identifier
            ///
            /// # Errors
            ///
            /// Returns error if the identifier is empty, too long, or contains
            /// characters outside `[A-Za-z0-9_-]`
            pub fn parse(raw: &str) -> CoreResult<Self> {
                validate_token(raw)?;
                Ok(Self(raw.to_string()))
            }

            /// Get as string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate_token(&value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

token_id!(
    /// Artifact identifier - identifies a registered build target
    ArtifactId
);

token_id!(
    /// Execution identifier - identifies a single run, independent of the artifact
    ExecutionId
);
