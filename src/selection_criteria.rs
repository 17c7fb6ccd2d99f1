use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Specifies how a read operation is routed among the members of a replica set.
///
/// Standalone topologies ignore the read preference: every operation goes to the single node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only route reads to the primary.
    Primary,

    /// Route reads to the primary. Accepted for compatibility with connection strings written
    /// for other drivers; it never falls back to a secondary.
    PrimaryPreferred,

    /// Only route reads to a randomly chosen secondary, failing when there is none.
    Secondary,

    /// Route reads to a randomly chosen secondary if one is connected, otherwise to the primary.
    #[default]
    SecondaryPreferred,

    /// Treated exactly like `SecondaryPreferred`; no latency is measured.
    Nearest,
}

impl ReadPreference {
    /// Whether reads under this preference may be served by a secondary.
    pub(crate) fn allows_secondary(&self) -> bool {
        matches!(
            self,
            Self::Secondary | Self::SecondaryPreferred | Self::Nearest
        )
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" | "secondaryonly" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            other => Err(Error::invalid_argument(format!(
                "'{other}' is not a valid read preference"
            ))),
        }
    }
}

/// Whether an operation only reads data or may modify it. Writes always go to the primary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// The operation only reads.
    Read,

    /// The operation may write.
    Write,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}
