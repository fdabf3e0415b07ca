//! Run Identifier
//!
//! Every analysis invocation is keyed by a random UUID v4. The identifier is
//! the directory name of the run's artifact set, so any externally supplied
//! value must pass [`RunId::parse`] before it is allowed near a filesystem path.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Group lengths of the canonical `8-4-4-4-12` hyphenated form.
const GROUP_LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];

/// Total length of a well-formed identifier (32 hex digits + 4 hyphens).
pub const RUN_ID_LEN: usize = 36;

/// Unique identifier for an analysis run.
///
/// Always lowercase hexadecimal in `8-4-4-4-12` groups. Construct with
/// [`RunId::generate`] for new runs or [`RunId::parse`] for caller input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Validate an externally supplied identifier.
    ///
    /// Rejects anything that is not exactly `8-4-4-4-12` hex groups, and
    /// separately rejects traversal/separator characters even though the
    /// shape check already excludes them.
    pub fn parse(raw: &str) -> Result<Self, RunIdError> {
        if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
            return Err(RunIdError::PathTraversal);
        }
        if raw.len() != RUN_ID_LEN {
            return Err(RunIdError::InvalidFormat);
        }

        let groups: Vec<&str> = raw.split('-').collect();
        if groups.len() != GROUP_LENGTHS.len() {
            return Err(RunIdError::InvalidFormat);
        }
        for (group, expected) in groups.iter().zip(GROUP_LENGTHS) {
            if group.len() != expected || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(RunIdError::InvalidFormat);
            }
        }

        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Get the raw string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = RunIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl std::str::FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Why a caller-supplied identifier was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunIdError {
    InvalidFormat,
    PathTraversal,
}

impl std::fmt::Display for RunIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "Invalid run_id format. Must be a valid UUID."),
            Self::PathTraversal => write!(f, "Invalid run_id: path traversal not allowed"),
        }
    }
}

impl std::error::Error for RunIdError {}
