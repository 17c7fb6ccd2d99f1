//! Contains the types needed to configure a [`ConnectionPool`](crate::ConnectionPool).
//!
//! [`ClientOptions`] uses the [`typed-builder`](https://crates.io/crates/typed-builder) crate to
//! derive a type-safe builder API, and can also be parsed from a connection string:
//!
//! ```rust
//! # use std::time::Duration;
//! # use mongodb_topology::options::{ClientOptions, ServerAddress};
//! #
//! let options = ClientOptions::builder()
//!     .hosts(vec![ServerAddress::new("db1.example.com", Some(27017))])
//!     .pool_size(3u32)
//!     .heartbeat_freq(Duration::from_millis(500))
//!     .build();
//!
//! let parsed = ClientOptions::parse("db1.example.com:27017/?poolSize=3&heartbeatFrequencyMS=500")
//!     .unwrap();
//! assert_eq!(options, parsed);
//! ```

mod parse;
#[cfg(test)]
mod test;

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Deserializer};
use typed_builder::TypedBuilder;

pub use crate::selection_criteria::{OperationKind, ReadPreference};
use crate::error::{Error, Result};

/// The port a node listens on when the address does not name one.
pub const DEFAULT_PORT: u16 = 27017;

pub(crate) const DEFAULT_POOL_SIZE: u32 = 1;
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(400);
pub(crate) const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_RECONNECT_ATTEMPTS: u32 = 4;

/// An enum representing the address of a node.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the node can be found.
        host: String,

        /// The TCP port that the node is listening on.
        ///
        /// The default is 27017.
        port: Option<u16>,
    },
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| <D::Error as serde::de::Error>::custom(format!("{e}")))
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Tcp { host, port },
                Self::Tcp {
                    host: other_host,
                    port: other_port,
                },
            ) => {
                host == other_host
                    && port.unwrap_or(DEFAULT_PORT) == other_port.unwrap_or(DEFAULT_PORT)
            }
        }
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        match self {
            Self::Tcp { host, port } => {
                host.hash(state);
                port.unwrap_or(DEFAULT_PORT).hash(state);
            }
        }
    }
}

impl FromStr for ServerAddress {
    type Err = Error;
    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl ServerAddress {
    /// Creates a TCP address, lower-casing the hostname.
    pub fn new(host: impl AsRef<str>, port: Option<u16>) -> Self {
        Self::Tcp {
            host: host.as_ref().to_lowercase(),
            port,
        }
    }

    /// Parses an address string into a `ServerAddress`, e.g. `"db1.example.com:27017"` or
    /// `"[::1]:27017"`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();

        let (hostname, port) = match address.strip_prefix('[') {
            Some(rest) => {
                let (hostname, rest) = rest.split_once(']').ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "invalid server address \"{address}\": missing closing ']'"
                    ))
                })?;
                let port = match rest {
                    "" => None,
                    rest => Some(rest.strip_prefix(':').ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "invalid server address \"{address}\": expected ':' after ']'"
                        ))
                    })?),
                };
                (hostname, port)
            }
            None => {
                let mut parts = address.split(':');
                let hostname = parts.next().unwrap_or_default();
                let port = parts.next();
                if parts.next().is_some() {
                    return Err(Error::invalid_argument(format!(
                        "address \"{address}\" contains more than one unescaped ':'"
                    )));
                }
                (hostname, port)
            }
        };

        if hostname.is_empty() {
            return Err(Error::invalid_argument(format!(
                "invalid server address: \"{address}\"; hostname cannot be empty"
            )));
        }

        let port = match port {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| {
                    Error::invalid_argument(format!(
                        "port must be valid 16-bit unsigned integer, instead got: {part}"
                    ))
                })?;
                if port == 0 {
                    return Err(Error::invalid_argument(format!(
                        "invalid server address: \"{address}\"; port must be non-zero"
                    )));
                }
                Some(port)
            }
            None => None,
        };

        Ok(Self::new(hostname, port))
    }

    /// The hostname or IP address of the node.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of the node, defaulting to 27017.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(fmt, "[{}]:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
            Self::Tcp { host, port } => write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT)),
        }
    }
}

/// Contains the options that can be used to create a [`ConnectionPool`](crate::ConnectionPool)
/// or a single [`Topology`](crate::Topology).
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that discovery starts from.
    ///
    /// The default value is a single seed at `localhost:27017`.
    #[builder(default = vec![ServerAddress::default()])]
    pub hosts: Vec<ServerAddress>,

    /// The database named in the path of the connection string, if any.
    pub default_database: Option<String>,

    /// The number of independent topologies a pool keeps.
    ///
    /// The default value is 1.
    pub pool_size: Option<u32>,

    /// Which members reads may be routed to.
    ///
    /// The default value is `SecondaryPreferred`.
    pub read_preference: Option<ReadPreference>,

    /// How long to wait for a TCP connection to be established before failing. A zero duration
    /// disables the timeout.
    ///
    /// The default value is 10 seconds.
    pub connect_timeout: Option<Duration>,

    /// How long a single command may wait for its reply. Unset means no limit.
    pub socket_timeout: Option<Duration>,

    /// The interval between two reconciliation cycles of a replica set's monitor.
    ///
    /// The default value is 400 milliseconds.
    pub heartbeat_freq: Option<Duration>,

    /// How long to wait before each attempt to reconnect to a lost replica-set member.
    ///
    /// The default value is 1 second.
    pub reconnect_delay: Option<Duration>,

    /// How many times to try reconnecting to a lost replica-set member before leaving it to the
    /// monitor.
    ///
    /// The default value is 4.
    pub reconnect_attempts: Option<u32>,

    /// Connect to the first reachable seed only, without discovering a replica set.
    pub direct_connection: Option<bool>,

    /// The name of the replica set to discover. When set, discovery requires every seed to be a
    /// member of this set.
    pub repl_set_name: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// How a topology learns what the seed list points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DiscoveryMode {
    /// Probe the first reachable seed and choose one of the others.
    Automatic,
    Standalone,
    ReplicaSet,
}

impl ClientOptions {
    /// Parses a connection string of the form
    /// `mongodb://[host[:port]][,host2[:port2]...][/[database][?options]]` into a
    /// `ClientOptions`. Strings without a scheme are treated as if they started with
    /// `mongodb://`.
    ///
    /// The supported options are `poolSize` (alias `maxPoolSize`), `readPreference`,
    /// `connectTimeoutMS`, `socketTimeoutMS`, `heartbeatFrequencyMS`, `reconnectDelayMS`,
    /// `reconnectRetries`, `directConnection` and `replicaSet`. Keys are case-insensitive; other
    /// keys are ignored with a warning.
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        let options = parse::parse_connection_string(s.as_ref())?;
        options.validate()?;
        Ok(options)
    }

    /// Checks that the options describe a deployment that can be connected to.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::invalid_argument("at least one host must be specified"));
        }
        if self.pool_size == Some(0) {
            return Err(Error::invalid_argument("poolSize must be at least 1"));
        }
        if self.direct_connection == Some(true) && self.repl_set_name.is_some() {
            return Err(Error::invalid_argument(
                "cannot specify both directConnection=true and replicaSet",
            ));
        }
        Ok(())
    }

    pub(crate) fn discovery_mode(&self) -> DiscoveryMode {
        if self.direct_connection == Some(true) {
            DiscoveryMode::Standalone
        } else if self.repl_set_name.is_some() {
            DiscoveryMode::ReplicaSet
        } else {
            DiscoveryMode::Automatic
        }
    }

    pub(crate) fn read_preference_or_default(&self) -> ReadPreference {
        self.read_preference.unwrap_or_default()
    }
}
