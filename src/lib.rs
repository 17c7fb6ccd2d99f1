#![doc = include_str!("../README.md")]
#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#![allow(
    clippy::unreadable_literal,
    clippy::cognitive_complexity,
    clippy::float_cmp,
    clippy::match_like_matches_macro,
    clippy::derive_partial_eq_without_eq
)]

pub mod options;

mod cmap;
pub mod error;
mod hello;
mod pool;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
#[cfg(test)]
mod test;
mod trace;
mod wire;

pub use ::bson;

pub use crate::{
    cmap::{Command, Connection},
    pool::ConnectionPool,
    sdam::{MemberDescription, MemberState, Topology, TopologyType},
    selection_criteria::{OperationKind, ReadPreference},
    wire::Reply,
};
