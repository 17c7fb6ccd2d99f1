use std::fmt;

use serde::Deserialize;

use crate::{cmap::Connection, hello::MemberStatus, options::ServerAddress};

/// The role a replica-set member plays, as reported by `replSetGetStatus` or by the member's own
/// `isMaster` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "i32")]
#[non_exhaustive]
pub enum MemberState {
    /// The member accepts writes.
    Primary,

    /// The member replicates from the primary and may serve reads.
    Secondary,

    /// Any other replica-set state code (recovering, arbiter, down...). Such members are never
    /// used.
    Other(i32),

    /// The role has not been learned. Standalone nodes stay in this state.
    Unknown,
}

impl From<i32> for MemberState {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Primary,
            2 => Self::Secondary,
            other => Self::Other(other),
        }
    }
}

impl MemberState {
    /// Whether a replica-set member in this state may be connected to and selected.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Primary | Self::Secondary)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("PRIMARY"),
            Self::Secondary => f.write_str("SECONDARY"),
            Self::Other(code) => write!(f, "OTHER({code})"),
            Self::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A point-in-time view of one member of a [`Topology`](crate::Topology).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberDescription {
    address: ServerAddress,
    state: MemberState,
    connection_id: u32,
}

impl MemberDescription {
    /// The address the member is known by.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The member's cached role.
    pub fn state(&self) -> MemberState {
        self.state
    }

    /// The id of the connection open to the member.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }
}

/// A connection attached to a topology together with what is known about the node behind it.
#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub(crate) connection: Connection,
    pub(crate) state: MemberState,

    /// The last `replSetGetStatus` entry seen for the member. Standalone members have none.
    pub(crate) status: Option<MemberStatus>,
}

impl Member {
    pub(crate) fn description(&self, address: &ServerAddress) -> MemberDescription {
        MemberDescription {
            address: address.clone(),
            state: self.state,
            connection_id: self.connection.id(),
        }
    }
}
