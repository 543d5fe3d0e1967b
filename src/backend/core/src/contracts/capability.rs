//! Adapter capability flags.
//!
//! Each database adapter declares which remediation operations the underlying
//! engine supports; `Action::validate` refuses to run against an adapter
//! missing a required capability.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remediation capability a database adapter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    SupportsIndexes,
    SupportsConcurrentIndexes,
    SupportsUniqueIndex,
    SupportsMultiColumnIndex,
    SupportsConfigTuning,
    SupportsRuntimeConfigChanges,
    SupportsVacuum,
    SupportsQueryTermination,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupportsIndexes => "SupportsIndexes",
            Self::SupportsConcurrentIndexes => "SupportsConcurrentIndexes",
            Self::SupportsUniqueIndex => "SupportsUniqueIndex",
            Self::SupportsMultiColumnIndex => "SupportsMultiColumnIndex",
            Self::SupportsConfigTuning => "SupportsConfigTuning",
            Self::SupportsRuntimeConfigChanges => "SupportsRuntimeConfigChanges",
            Self::SupportsVacuum => "SupportsVacuum",
            Self::SupportsQueryTermination => "SupportsQueryTermination",
        }
    }

    /// Every capability a fully featured adapter can declare.
    pub fn all() -> &'static [Capability] {
        &[
            Self::SupportsIndexes,
            Self::SupportsConcurrentIndexes,
            Self::SupportsUniqueIndex,
            Self::SupportsMultiColumnIndex,
            Self::SupportsConfigTuning,
            Self::SupportsRuntimeConfigChanges,
            Self::SupportsVacuum,
            Self::SupportsQueryTermination,
        ]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
