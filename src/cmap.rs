pub(crate) mod conn;

pub use self::conn::{command::Command, Connection};
pub(crate) use self::conn::ConnectionOptions;
