mod flags;
mod header;
mod query;
mod reply;
#[cfg(test)]
mod test;
mod util;

pub(crate) use self::{flags::QueryFlags, query::Query};
pub use self::reply::Reply;
