
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use futures_util::future::join_all;
use tracing::{debug, info};

use crate::{
    cmap::{Command, Connection},
    error::{Error, ErrorKind, Result},
    options::{ClientOptions, ServerAddress, DEFAULT_POOL_SIZE},
    sdam::Topology,
    selection_criteria::{OperationKind, ReadPreference},
    trace::{SERVER_SELECTION_TRACING_EVENT_TARGET, TOPOLOGY_TRACING_EVENT_TARGET},
    wire::Reply,
};

/// A fixed number of independent [`Topology`] instances connected to the same deployment, used
/// in rotation.
///
/// Every topology discovers the deployment on its own and holds its own connections, so a pool
/// of size `N` keeps `N` connections open to each usable member. Operations are spread across
/// the topologies round-robin.
///
/// ```rust,no_run
/// # use mongodb_topology::{bson::doc, error::Result, Command, ConnectionPool, OperationKind};
/// # async fn run() -> Result<()> {
/// let pool = ConnectionPool::with_uri("mongodb://db1.example.com,db2.example.com/?poolSize=4")
///     .await?;
///
/// let connection = pool.acquire(OperationKind::Write)?;
/// connection
///     .send_command(Command::new("app", doc! { "insert": "items", "documents": [{ "x": 1 }] }))
///     .await?;
///
/// pool.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConnectionPool {
    topologies: Vec<Topology>,
    index: AtomicUsize,
    disconnected: AtomicBool,
    options: Arc<ClientOptions>,
}

impl ConnectionPool {
    /// Connects `pool_size` topologies in parallel. If any of them fails to discover the
    /// deployment, the others are disconnected again and the first error is returned.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let size = options.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        let results = join_all((0..size).map(|_| Topology::connect(options.clone()))).await;

        let mut topologies = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(topology) => topologies.push(topology),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Some(error) = first_error {
            join_all(topologies.iter().map(Topology::disconnect)).await;
            return Err(error);
        }

        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            pool_size = size,
            "connection pool connected"
        );

        Ok(Self {
            topologies,
            index: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
            options: Arc::new(options),
        })
    }

    /// Parses `uri` and connects a pool with the resulting options.
    pub async fn with_uri(uri: impl AsRef<str>) -> Result<Self> {
        Self::connect(ClientOptions::parse(uri)?).await
    }

    /// Connects a pool of `pool_size` topologies to a single seed.
    pub async fn with_host(host: impl AsRef<str>, port: u16, pool_size: u32) -> Result<Self> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::new(host, Some(port))])
            .pool_size(pool_size)
            .build();
        Self::connect(options).await
    }

    /// The number of topologies in the pool.
    pub fn size(&self) -> usize {
        self.topologies.len()
    }

    /// The topologies in rotation order.
    pub fn topologies(&self) -> &[Topology] {
        &self.topologies
    }

    /// The options the pool was connected with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Acquires a connection suitable for `kind` using the configured read preference.
    pub fn acquire(&self, kind: OperationKind) -> Result<Connection> {
        self.acquire_with(kind, self.options.read_preference_or_default())
    }

    /// Acquires a connection suitable for `kind` using `read_preference`.
    ///
    /// Topologies are tried in rotation, skipping those without any open connection; selection
    /// then happens within the first topology that has one. Never blocks.
    pub fn acquire_with(
        &self,
        kind: OperationKind,
        read_preference: ReadPreference,
    ) -> Result<Connection> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ErrorKind::Shutdown.into());
        }

        let size = self.topologies.len();
        for _ in 0..size {
            let index = self.index.fetch_add(1, Ordering::SeqCst) % size;
            let topology = &self.topologies[index];
            if topology.connection_count() == 0 {
                debug!(
                    target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                    index,
                    "skipping topology without connections"
                );
                continue;
            }
            return topology.select_connection_with(kind, read_preference);
        }

        Err(Error::operation_failure(
            "no topology in the pool has an open connection",
        ))
    }

    /// Acquires a connection for `kind` and sends `command` over it. Commands routed under a
    /// read preference that allows secondaries are flagged as such.
    pub async fn execute(&self, kind: OperationKind, mut command: Command) -> Result<Reply> {
        let read_preference = self.options.read_preference_or_default();
        let connection = self.acquire_with(kind, read_preference)?;

        if kind == OperationKind::Read && read_preference.allows_secondary() {
            command.set_secondary_ok(true);
        }

        connection.send_command(command).await
    }

    /// Disconnects every topology. Calling this more than once has no further effect.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        join_all(self.topologies.iter().map(Topology::disconnect)).await;
        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            "connection pool disconnected"
        );
    }
}
