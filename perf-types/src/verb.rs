//! API request verbs.

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// API request verb a worker issues, plus the aggregate `all` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Create a resource.
    Create,
    /// Get a resource by name.
    Get,
    /// Replace a resource.
    Update,
    /// JSON-patch a resource.
    Patch,
    /// List resources by label selector.
    List,
    /// Delete a resource by name.
    Delete,
    /// Aggregate of every other verb.
    All,
}

impl Verb {
    /// The verbs of one worker cycle, in execution order.
    pub const OPERATIONS: [Verb; 6] = [
        Verb::Create,
        Verb::Get,
        Verb::Update,
        Verb::Patch,
        Verb::List,
        Verb::Delete,
    ];

    /// Every verb that appears in a report, `all` last.
    pub const REPORTED: [Verb; 7] = [
        Verb::Create,
        Verb::Get,
        Verb::Update,
        Verb::Patch,
        Verb::List,
        Verb::Delete,
        Verb::All,
    ];

    /// Lowercase label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Get => "get",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::List => "list",
            Verb::Delete => "delete",
            Verb::All => "all",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::REPORTED
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypesError::UnknownVerb(s.to_string()))
    }
}
