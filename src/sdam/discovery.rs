use std::collections::HashSet;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{
    member::MemberState,
    monitor,
    topology::{Topology, TopologyType},
};
use crate::{
    cmap::Connection,
    error::{Error, Result},
    hello::{run_hello, run_repl_set_get_status, IsMasterReply, MemberStatus},
    options::{DiscoveryMode, ServerAddress},
    trace::TOPOLOGY_TRACING_EVENT_TARGET,
};

/// A cursor over a seed list. Each call to `connect_next` consumes seeds until one accepts a
/// connection.
struct SeedList<'a> {
    seeds: &'a [ServerAddress],
    next: usize,
}

impl<'a> SeedList<'a> {
    fn new(seeds: &'a [ServerAddress]) -> Self {
        Self { seeds, next: 0 }
    }

    async fn connect_next(&mut self, topology: &Topology) -> Result<Connection> {
        let mut last_error = None;

        while let Some(address) = self.seeds.get(self.next) {
            self.next += 1;
            match topology.open_connection(address).await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    debug!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        address = %address,
                        error = %error,
                        "seed is unreachable"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(Error::no_nodes_available(match last_error {
            Some(error) => format!("none of the seeds could be reached, last error: {error}"),
            None => "no seeds left to connect to".to_string(),
        }))
    }
}

/// Runs the discovery protocol selected by the topology's options.
pub(super) async fn discover(topology: &Topology) -> Result<()> {
    let seeds = topology.options().hosts.clone();

    match topology.options().discovery_mode() {
        DiscoveryMode::Standalone => {
            let connection = SeedList::new(&seeds).connect_next(topology).await?;
            attach_standalone(topology, connection).await
        }
        DiscoveryMode::ReplicaSet => discover_replica_set(topology, &seeds).await,
        DiscoveryMode::Automatic => auto_detect(topology, &seeds).await,
    }
}

/// Probes the first reachable seed. A replica-set member hands over to replica-set discovery
/// starting from the address it reports for itself; anything else is used as a standalone.
async fn auto_detect(topology: &Topology, seeds: &[ServerAddress]) -> Result<()> {
    let probe = SeedList::new(seeds).connect_next(topology).await?;

    let hello = match run_hello(&probe).await {
        Ok(hello) => hello,
        Err(error) => {
            probe.close();
            return Err(error);
        }
    };

    if !hello.is_replica_set_member() {
        return attach_standalone(topology, probe).await;
    }

    probe.close();

    let mut replica_set_seeds = Vec::with_capacity(2);
    if let Some(me) = hello.me() {
        replica_set_seeds.push(me);
    }
    if !replica_set_seeds.contains(probe.address()) {
        replica_set_seeds.push(probe.address().clone());
    }

    debug!(
        target: TOPOLOGY_TRACING_EVENT_TARGET,
        address = %probe.address(),
        set_name = ?hello.set_name(),
        "seed is a replica set member"
    );

    discover_replica_set(topology, &replica_set_seeds).await
}

async fn attach_standalone(topology: &Topology, connection: Connection) -> Result<()> {
    let address = connection.address().clone();

    topology
        .updater()
        .set_type(TopologyType::Standalone, None)
        .await;

    if !topology
        .updater()
        .attach(address.clone(), connection, MemberState::Unknown, None)
        .await
    {
        return Err(Error::connection_lost(&address));
    }

    Ok(())
}

async fn discover_replica_set(topology: &Topology, seeds: &[ServerAddress]) -> Result<()> {
    let probe = SeedList::new(seeds).connect_next(topology).await?;

    let polled = async {
        let hello = run_hello(&probe).await?;
        let hosts = replica_set_hosts(&hello, topology.options().repl_set_name.as_deref())?;
        let members = run_repl_set_get_status(&probe).await?;
        Ok::<_, Error>((hello, hosts, members))
    }
    .await;

    let (hello, hosts, members) = match polled {
        Ok(polled) => polled,
        Err(error) => {
            probe.close();
            return Err(error);
        }
    };

    let updater = topology.updater();
    updater
        .set_type(
            TopologyType::ReplicaSet,
            hello.set_name().map(ToString::to_string),
        )
        .await;
    let outcome = updater.reconcile(hosts, members).await;

    // the probe is only reused for the member it is actually connected to, whatever the status
    // entries claim about `self`.
    let probe_addresses: Vec<ServerAddress> =
        std::iter::once(probe.address().clone()).chain(hello.me()).collect();
    let mut probe = Some(probe);
    let establishing: Vec<_> = outcome
        .to_connect
        .into_iter()
        .map(|(address, status)| {
            let connection = if probe_addresses.contains(&address) {
                probe.take().map(|probe| (probe, hello.clone()))
            } else {
                None
            };
            async move {
                let result = match connection {
                    Some((probe, hello)) => {
                        let result =
                            attach_member(topology, address.clone(), probe, &hello, status).await;
                        if result.is_err() {
                            topology.updater().release(address.clone()).await;
                        }
                        result
                    }
                    None => establish_member(topology, address.clone(), status).await,
                };
                if let Err(ref error) = result {
                    warn!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        address = %address,
                        error = %error,
                        "failed to connect to replica set member"
                    );
                }
                result
            }
        })
        .collect();
    join_all(establishing).await;

    if let Some(probe) = probe {
        probe.close();
    }

    let connected = topology.connection_count();
    if connected == 0 {
        warn!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            set_name = ?hello.set_name(),
            "replica set discovered without any usable member"
        );
    }

    monitor::start(topology.downgrade());

    Ok(())
}

/// Validates a replica-set member's `isMaster` reply and returns its `hosts`.
pub(super) fn replica_set_hosts(
    hello: &IsMasterReply,
    expected_set_name: Option<&str>,
) -> Result<HashSet<ServerAddress>> {
    let hosts: HashSet<_> = hello.host_addresses().into_iter().collect();
    if hosts.is_empty() {
        return Err(Error::configuration(
            "the node did not report any replica set hosts",
        )
        .with_server_response(hello.raw_command_response.clone()));
    }

    check_set_name(hello, expected_set_name)?;

    Ok(hosts)
}

fn check_set_name(hello: &IsMasterReply, expected_set_name: Option<&str>) -> Result<()> {
    match (expected_set_name, hello.set_name()) {
        (Some(expected), Some(actual)) if expected != actual => Err(Error::configuration(format!(
            "the node belongs to replica set \"{actual}\" instead of \"{expected}\""
        ))
        .with_server_response(hello.raw_command_response.clone())),
        _ => Ok(()),
    }
}

/// Connects to a replica-set member and attaches it. The address must have been claimed by the
/// caller; the claim is released on failure.
pub(super) async fn establish_member(
    topology: &Topology,
    address: ServerAddress,
    status: MemberStatus,
) -> Result<bool> {
    let result = async {
        let connection = topology.open_connection(&address).await?;
        let hello = match run_hello(&connection).await {
            Ok(hello) => hello,
            Err(error) => {
                connection.close();
                return Err(error);
            }
        };
        attach_member(topology, address.clone(), connection, &hello, status).await
    }
    .await;

    if result.is_err() {
        topology.updater().release(address).await;
    }
    result
}

async fn attach_member(
    topology: &Topology,
    address: ServerAddress,
    connection: Connection,
    hello: &IsMasterReply,
    status: MemberStatus,
) -> Result<bool> {
    if let Err(error) = check_set_name(hello, topology.set_name().as_deref()) {
        connection.close();
        return Err(error);
    }

    // the member's own view of its role is fresher than the status entry.
    let state = match hello.member_state() {
        MemberState::Unknown => status.state,
        state => state,
    };

    let attached = topology
        .updater()
        .attach(address.clone(), connection, state, Some(status))
        .await;

    if attached {
        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            address = %address,
            state = %state,
            "connected to replica set member"
        );
    }

    Ok(attached)
}
