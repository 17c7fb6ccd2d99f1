use std::time::Duration;

use tracing::{debug, info, warn};

use super::{discovery::establish_member, topology::WeakTopology};
use crate::{
    hello::MemberStatus,
    options::{ClientOptions, ServerAddress, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY},
    runtime,
    trace::TOPOLOGY_TRACING_EVENT_TARGET,
};

/// Bounded reconnection to a replica-set member whose connection closed unexpectedly.
///
/// Each attempt waits `delay` first. After `max_attempts` failures the member is left to the
/// monitor, which reconnects it once the replica set still reports it as usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ReconnectPolicy {
    pub(crate) delay: Duration,
    pub(crate) max_attempts: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(options: &ClientOptions) -> Self {
        Self {
            delay: options.reconnect_delay.unwrap_or(DEFAULT_RECONNECT_DELAY),
            max_attempts: options
                .reconnect_attempts
                .unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
        }
    }

    /// Starts reconnecting to `address` in the background.
    pub(crate) fn spawn(
        self,
        topology: WeakTopology,
        address: ServerAddress,
        status: MemberStatus,
    ) {
        runtime::execute(self.reconnect(topology, address, status));
    }

    async fn reconnect(self, topology: WeakTopology, address: ServerAddress, status: MemberStatus) {
        for attempt in 1..=self.max_attempts {
            runtime::delay_for(self.delay).await;

            let Some(topology) = topology.upgrade() else {
                return;
            };
            if !topology.is_alive() {
                return;
            }

            // the monitor may have reconnected the member already.
            if !topology.updater().claim(address.clone()).await {
                debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    address = %address,
                    "member is already connected or being connected to"
                );
                return;
            }

            match establish_member(&topology, address.clone(), status.clone()).await {
                Ok(true) => {
                    info!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        address = %address,
                        attempt,
                        "reconnected to replica set member"
                    );
                    return;
                }
                Ok(false) => return,
                Err(error) => debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    address = %address,
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %error,
                    "reconnect attempt failed"
                ),
            }
        }

        warn!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            address = %address,
            attempts = self.max_attempts,
            "giving up reconnecting to replica set member"
        );
    }
}
