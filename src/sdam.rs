mod discovery;
mod member;
mod monitor;
mod reconnect;
mod server_selection;
mod topology;

pub use self::{
    member::{MemberDescription, MemberState},
    topology::{Topology, TopologyType},
};
pub(crate) use self::topology::WeakTopologyUpdater;
