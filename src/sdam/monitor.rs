use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{
    discovery::{establish_member, replica_set_hosts},
    topology::{Topology, WeakTopology},
};
use crate::{
    error::Result,
    hello::{run_hello, run_repl_set_get_status},
    options::DEFAULT_HEARTBEAT_FREQUENCY,
    runtime,
    trace::MONITOR_TRACING_EVENT_TARGET,
};

/// Starts the reconciliation monitor of a replica-set topology in the background.
pub(super) fn start(topology: WeakTopology) {
    let monitor = Monitor {
        heartbeat_freq: topology
            .options()
            .heartbeat_freq
            .unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY),
        topology,
    };
    runtime::execute(monitor.execute());
}

/// Periodically re-polls a replica set and brings the topology's members in line with the
/// membership and roles it reports.
///
/// The monitor only holds a weak handle to its topology and exits once the topology is
/// disconnected or dropped.
struct Monitor {
    topology: WeakTopology,
    heartbeat_freq: Duration,
}

impl Monitor {
    async fn execute(self) {
        debug!(
            target: MONITOR_TRACING_EVENT_TARGET,
            heartbeat_freq = ?self.heartbeat_freq,
            "monitor started"
        );

        loop {
            runtime::delay_for(self.heartbeat_freq).await;

            let Some(topology) = self.topology.upgrade() else {
                break;
            };
            if !topology.is_alive() {
                break;
            }

            if let Err(error) = reconcile_once(&topology).await {
                warn!(
                    target: MONITOR_TRACING_EVENT_TARGET,
                    set_name = ?topology.set_name(),
                    error = %error,
                    "replica set reconciliation failed"
                );
            }
        }

        debug!(target: MONITOR_TRACING_EVENT_TARGET, "monitor stopped");
    }
}

/// Runs a single reconciliation cycle against `topology`.
pub(super) async fn reconcile_once(topology: &Topology) -> Result<()> {
    let Some(connection) = topology.watcher().borrow_latest().poll_target() else {
        debug!(
            target: MONITOR_TRACING_EVENT_TARGET,
            "no connected member to poll"
        );
        return Ok(());
    };

    let hello = run_hello(&connection).await?;
    let hosts = replica_set_hosts(&hello, topology.set_name().as_deref())?;
    let members = run_repl_set_get_status(&connection).await?;

    let outcome = topology.updater().reconcile(hosts, members).await;
    if outcome.changed {
        debug!(
            target: MONITOR_TRACING_EVENT_TARGET,
            polled = %connection.address(),
            members = topology.connection_count(),
            "replica set membership updated"
        );
    }

    let establishing = outcome.to_connect.into_iter().map(|(address, status)| async move {
        match establish_member(topology, address.clone(), status).await {
            Ok(true) => info!(
                target: MONITOR_TRACING_EVENT_TARGET,
                address = %address,
                "added replica set member"
            ),
            Ok(false) => {}
            Err(error) => warn!(
                target: MONITOR_TRACING_EVENT_TARGET,
                address = %address,
                error = %error,
                "failed to connect to replica set member"
            ),
        }
    });
    join_all(establishing).await;

    Ok(())
}
