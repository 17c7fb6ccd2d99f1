use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
    watch::{self, Ref},
};
use tracing::{debug, info};

use super::{
    discovery,
    member::{Member, MemberDescription, MemberState},
    reconnect::ReconnectPolicy,
    server_selection,
};
use crate::{
    cmap::{Connection, ConnectionOptions},
    error::Result,
    hello::MemberStatus,
    options::{ClientOptions, ServerAddress},
    runtime::{self, AcknowledgedMessage},
    selection_criteria::{OperationKind, ReadPreference},
    trace::{SERVER_SELECTION_TRACING_EVENT_TARGET, TOPOLOGY_TRACING_EVENT_TARGET},
};

/// The kind of deployment a [`Topology`] is connected to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single node. Every operation is sent to it regardless of read preference.
    #[default]
    Standalone,

    /// A replica set. Members are kept current by a background monitor.
    ReplicaSet,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => f.write_str("Standalone"),
            Self::ReplicaSet => f.write_str("ReplicaSet"),
        }
    }
}

/// A set of connections to one logical deployment: a single standalone node, or every usable
/// member of a replica set.
///
/// The connections are owned by a worker task; a `Topology` is a cheap handle to it that reads
/// the most recently published snapshot. Clones share the same worker.
#[derive(Clone, Debug)]
pub struct Topology {
    watcher: TopologyWatcher,
    updater: TopologyUpdater,
    options: Arc<ClientOptions>,
}

impl Topology {
    /// Discovers the deployment described by `options` and connects to it.
    ///
    /// A replica set is only returned once every usable member has either been connected to or
    /// failed to connect, and its reconciliation monitor has been started.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let topology = Self::new(options);
        if let Err(error) = discovery::discover(&topology).await {
            topology.disconnect().await;
            return Err(error);
        }

        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            topology_type = %topology.topology_type(),
            set_name = ?topology.set_name(),
            members = topology.connection_count(),
            "topology discovered"
        );

        Ok(topology)
    }

    /// Creates an empty topology and starts its worker without running discovery.
    pub(crate) fn new(options: ClientOptions) -> Self {
        let options = Arc::new(options);
        let (updater, update_receiver) = TopologyUpdater::channel();
        let (watcher, broadcaster) = TopologyWatcher::channel(TopologyState::default());

        let topology = Self {
            watcher,
            updater,
            options,
        };

        TopologyWorker {
            update_receiver,
            broadcaster,
            state: TopologyState::default(),
            claimed: HashSet::new(),
            reconnect_policy: ReconnectPolicy::new(&topology.options),
            topology: topology.downgrade(),
        }
        .start();

        topology
    }

    /// The kind of deployment discovered.
    pub fn topology_type(&self) -> TopologyType {
        self.watcher.borrow_latest().topology_type
    }

    /// The replica set's name, if the topology is a replica set.
    pub fn set_name(&self) -> Option<String> {
        self.watcher.borrow_latest().set_name.clone()
    }

    /// A snapshot of the members with an open connection, ordered by address.
    pub fn members(&self) -> Vec<MemberDescription> {
        let mut members: Vec<_> = self
            .watcher
            .borrow_latest()
            .open_members()
            .map(|(address, member)| member.description(address))
            .collect();
        members.sort_by_key(|member| member.address().to_string());
        members
    }

    /// The number of members with an open connection.
    pub fn connection_count(&self) -> usize {
        self.watcher.borrow_latest().open_members().count()
    }

    /// Whether the topology has not been disconnected yet.
    pub fn is_alive(&self) -> bool {
        self.watcher.is_alive()
    }

    /// Selects a connection for an operation of the given kind using the configured read
    /// preference.
    pub fn select_connection(&self, kind: OperationKind) -> Result<Connection> {
        self.select_connection_with(kind, self.options.read_preference_or_default())
    }

    /// Selects a connection for an operation of the given kind using `read_preference`.
    ///
    /// Writes always go to the primary. Fails with an `OperationFailure` when no connected
    /// member satisfies the request.
    pub fn select_connection_with(
        &self,
        kind: OperationKind,
        read_preference: ReadPreference,
    ) -> Result<Connection> {
        let (topology_type, candidates) = {
            let state = self.watcher.borrow_latest();
            let candidates: Vec<_> = state
                .open_members()
                .map(|(_, member)| (member.connection.clone(), member.state))
                .collect();
            (state.topology_type, candidates)
        };

        let result =
            server_selection::select_by_state(&candidates, topology_type, kind, read_preference);

        match result {
            Ok(ref connection) => debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                operation = %kind,
                read_preference = %read_preference,
                address = %connection.address(),
                connection_id = connection.id(),
                "connection selected"
            ),
            Err(ref error) => debug!(
                target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                operation = %kind,
                read_preference = %read_preference,
                candidates = candidates.len(),
                error = %error,
                "connection selection failed"
            ),
        }

        result
    }

    /// Closes every connection and stops the worker, which in turn stops the monitor and any
    /// pending reconnects. Calling this more than once has no further effect.
    pub async fn disconnect(&self) {
        if self.updater.shutdown().await {
            info!(
                target: TOPOLOGY_TRACING_EVENT_TARGET,
                topology_type = %self.topology_type(),
                "topology disconnected"
            );
        }
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn updater(&self) -> &TopologyUpdater {
        &self.updater
    }

    pub(crate) fn watcher(&self) -> &TopologyWatcher {
        &self.watcher
    }

    /// Opens a connection whose loss is reported to this topology.
    pub(crate) async fn open_connection(&self, address: &ServerAddress) -> Result<Connection> {
        Connection::connect(
            address.clone(),
            &ConnectionOptions::from(self.options.as_ref()),
            Some(self.updater.downgrade()),
        )
        .await
    }

    pub(crate) fn downgrade(&self) -> WeakTopology {
        WeakTopology {
            watcher: self.watcher.clone(),
            updater: self.updater.downgrade(),
            options: self.options.clone(),
        }
    }
}

/// A handle to a topology that does not keep its worker running.
#[derive(Clone, Debug)]
pub(crate) struct WeakTopology {
    watcher: TopologyWatcher,
    updater: WeakTopologyUpdater,
    options: Arc<ClientOptions>,
}

impl WeakTopology {
    pub(crate) fn upgrade(&self) -> Option<Topology> {
        Some(Topology {
            watcher: self.watcher.clone(),
            updater: self.updater.upgrade()?,
            options: self.options.clone(),
        })
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TopologyState {
    pub(crate) topology_type: TopologyType,
    pub(crate) set_name: Option<String>,

    /// The `hosts` reported by the most recent successful poll of a replica set.
    pub(crate) known_hosts: HashSet<ServerAddress>,

    pub(crate) members: HashMap<ServerAddress, Member>,
}

impl TopologyState {
    pub(crate) fn open_members(&self) -> impl Iterator<Item = (&ServerAddress, &Member)> {
        self.members
            .iter()
            .filter(|(_, member)| !member.connection.is_closed())
    }

    /// The connection the monitor polls: the primary's if one is known, otherwise any member's.
    pub(crate) fn poll_target(&self) -> Option<Connection> {
        self.open_members()
            .find(|(_, member)| member.state == MemberState::Primary)
            .or_else(|| self.open_members().next())
            .map(|(_, member)| member.connection.clone())
    }
}

#[derive(Debug)]
pub(crate) enum UpdateMessage {
    SetType {
        topology_type: TopologyType,
        set_name: Option<String>,
    },
    Attach {
        address: ServerAddress,
        connection: Connection,
        state: MemberState,
        status: Option<MemberStatus>,
    },
    ConnectionLost {
        connection_id: u32,
    },
    Reconcile {
        hosts: HashSet<ServerAddress>,
        members: Vec<MemberStatus>,
    },
    Claim {
        address: ServerAddress,
    },
    Release {
        address: ServerAddress,
    },
    Shutdown,
}

/// What the worker did with an update.
#[derive(Debug, Default)]
pub(crate) struct UpdateOutcome {
    /// Whether the update was accepted and had an effect.
    pub(crate) changed: bool,

    /// Members that were claimed by a reconciliation and still need to be connected to.
    pub(crate) to_connect: Vec<(ServerAddress, MemberStatus)>,
}

impl From<bool> for UpdateOutcome {
    fn from(changed: bool) -> Self {
        Self {
            changed,
            to_connect: Vec::new(),
        }
    }
}

struct TopologyWorker {
    update_receiver: TopologyUpdateReceiver,
    broadcaster: TopologyBroadcaster,
    state: TopologyState,

    /// Addresses a connection is currently being opened to. At most one task connects to an
    /// address at a time.
    claimed: HashSet<ServerAddress>,

    reconnect_policy: ReconnectPolicy,
    topology: WeakTopology,
}

impl TopologyWorker {
    fn start(mut self) {
        runtime::execute(async move {
            let mut shutdown_ack = None;

            while let Some(update) = self.update_receiver.recv().await {
                let (update, ack) = update.into_parts();
                let outcome = match update {
                    UpdateMessage::SetType {
                        topology_type,
                        set_name,
                    } => {
                        self.state.topology_type = topology_type;
                        self.state.set_name = set_name;
                        UpdateOutcome::from(true)
                    }
                    UpdateMessage::Attach {
                        address,
                        connection,
                        state,
                        status,
                    } => self.attach(address, connection, state, status).into(),
                    UpdateMessage::ConnectionLost { connection_id } => {
                        self.handle_connection_lost(connection_id).into()
                    }
                    UpdateMessage::Reconcile { hosts, members } => self.reconcile(hosts, members),
                    UpdateMessage::Claim { address } => self.claim(address).into(),
                    UpdateMessage::Release { address } => self.claimed.remove(&address).into(),
                    UpdateMessage::Shutdown => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                };
                self.publish();
                ack.acknowledge(outcome);
            }

            self.close_all();
            // watchers must observe the topology as dead before the shutdown is acknowledged.
            drop(self);
            if let Some(ack) = shutdown_ack {
                ack.acknowledge(true);
            }
            debug!(target: TOPOLOGY_TRACING_EVENT_TARGET, "topology worker stopped");
        });
    }

    fn publish(&self) {
        self.broadcaster.publish_new_state(self.state.clone());
    }

    fn attach(
        &mut self,
        address: ServerAddress,
        connection: Connection,
        state: MemberState,
        status: Option<MemberStatus>,
    ) -> bool {
        self.claimed.remove(&address);

        if connection.is_closed() {
            return false;
        }

        if !self.state.known_hosts.is_empty() && !self.state.known_hosts.contains(&address) {
            debug!(
                target: TOPOLOGY_TRACING_EVENT_TARGET,
                address = %address,
                "not attaching a connection to a host outside the replica set"
            );
            connection.close();
            return false;
        }

        if let Some(existing) = self.state.members.get(&address) {
            if existing.connection.id() == connection.id() {
                return false;
            }
            if !existing.connection.is_closed() {
                debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    address = %address,
                    connection_id = connection.id(),
                    "closing duplicate connection to an attached member"
                );
                connection.close();
                return false;
            }
            existing.connection.close();
        }

        if state == MemberState::Primary {
            self.demote_other_primaries(&address);
        }

        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            address = %address,
            connection_id = connection.id(),
            state = %state,
            "member attached"
        );

        self.state.members.insert(
            address,
            Member {
                connection,
                state,
                status,
            },
        );
        true
    }

    fn claim(&mut self, address: ServerAddress) -> bool {
        let connected = self
            .state
            .members
            .get(&address)
            .is_some_and(|member| !member.connection.is_closed());
        if connected {
            return false;
        }
        if !self.state.known_hosts.is_empty() && !self.state.known_hosts.contains(&address) {
            return false;
        }
        self.claimed.insert(address)
    }

    fn handle_connection_lost(&mut self, connection_id: u32) -> bool {
        let Some(address) = self
            .state
            .members
            .iter()
            .find(|(_, member)| member.connection.id() == connection_id)
            .map(|(address, _)| address.clone())
        else {
            return false;
        };
        let Some(member) = self.state.members.remove(&address) else {
            return false;
        };
        member.connection.close();

        info!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            address = %address,
            connection_id,
            "lost connection to member"
        );

        if self.state.topology_type == TopologyType::ReplicaSet {
            if let Some(status) = member.status {
                self.reconnect_policy
                    .spawn(self.topology.clone(), address, status);
            }
        }

        true
    }

    fn reconcile(
        &mut self,
        hosts: HashSet<ServerAddress>,
        statuses: Vec<MemberStatus>,
    ) -> UpdateOutcome {
        let mut changed = self.state.known_hosts != hosts;
        self.state.known_hosts = hosts;

        let departed: Vec<_> = self
            .state
            .members
            .keys()
            .filter(|address| !self.state.known_hosts.contains(*address))
            .cloned()
            .collect();
        for address in departed {
            changed |= self.remove_member(&address, "member is no longer in the replica set");
        }

        let mut to_connect = Vec::new();
        for status in statuses {
            let address = match status.address() {
                Ok(address) => address,
                Err(error) => {
                    debug!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        name = %status.name,
                        error = %error,
                        "skipping member with an invalid name"
                    );
                    continue;
                }
            };
            if !self.state.known_hosts.contains(&address) {
                continue;
            }

            let usable = status.state.is_usable();
            match self.state.members.get(&address).map(|member| member.state) {
                Some(_) if !usable => {
                    changed |= self.remove_member(&address, "member is no longer usable");
                }
                Some(current) => {
                    if current != status.state {
                        info!(
                            target: TOPOLOGY_TRACING_EVENT_TARGET,
                            address = %address,
                            from = %current,
                            to = %status.state,
                            "member changed state"
                        );
                        if status.state == MemberState::Primary {
                            self.demote_other_primaries(&address);
                        }
                        changed = true;
                    }
                    if let Some(member) = self.state.members.get_mut(&address) {
                        member.state = status.state;
                        member.status = Some(status);
                    }
                }
                None if usable && self.claimed.insert(address.clone()) => {
                    to_connect.push((address, status));
                }
                None => {}
            }
        }

        UpdateOutcome {
            changed,
            to_connect,
        }
    }

    fn remove_member(&mut self, address: &ServerAddress, reason: &'static str) -> bool {
        match self.state.members.remove(address) {
            Some(member) => {
                member.connection.close();
                info!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    address = %address,
                    connection_id = member.connection.id(),
                    reason,
                    "member removed"
                );
                true
            }
            None => false,
        }
    }

    /// Keeps at most one cached primary: any other member recorded as primary is marked unknown
    /// until the next reconciliation.
    fn demote_other_primaries(&mut self, primary: &ServerAddress) {
        for (address, member) in self.state.members.iter_mut() {
            if address != primary && member.state == MemberState::Primary {
                debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    address = %address,
                    new_primary = %primary,
                    "demoting previous primary"
                );
                member.state = MemberState::Unknown;
            }
        }
    }

    fn close_all(&mut self) {
        for (_, member) in self.state.members.drain() {
            member.connection.close();
        }
        self.state.known_hosts.clear();
        self.claimed.clear();
        self.publish();
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TopologyUpdater {
    sender: UnboundedSender<AcknowledgedMessage<UpdateMessage, UpdateOutcome>>,
}

impl TopologyUpdater {
    pub(crate) fn channel() -> (TopologyUpdater, TopologyUpdateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();

        let updater = TopologyUpdater { sender: tx };

        let update_receiver = TopologyUpdateReceiver {
            update_receiver: rx,
        };

        (updater, update_receiver)
    }

    pub(crate) fn downgrade(&self) -> WeakTopologyUpdater {
        WeakTopologyUpdater {
            sender: self.sender.downgrade(),
        }
    }

    /// Sends an update to the worker and waits until it has been handled. Once the worker has
    /// stopped every update is a no-op.
    async fn send_message(&self, update: UpdateMessage) -> UpdateOutcome {
        let (message, receiver) = AcknowledgedMessage::package(update);

        match self.sender.send(message) {
            Ok(_) => receiver.wait_for_acknowledgment().await.unwrap_or_default(),
            _ => UpdateOutcome::default(),
        }
    }

    pub(crate) async fn set_type(&self, topology_type: TopologyType, set_name: Option<String>) {
        self.send_message(UpdateMessage::SetType {
            topology_type,
            set_name,
        })
        .await;
    }

    /// Hands `connection` to the topology as the member at `address`. Returns whether it was
    /// attached; a rejected connection is closed.
    pub(crate) async fn attach(
        &self,
        address: ServerAddress,
        connection: Connection,
        state: MemberState,
        status: Option<MemberStatus>,
    ) -> bool {
        self.send_message(UpdateMessage::Attach {
            address,
            connection,
            state,
            status,
        })
        .await
        .changed
    }

    pub(crate) async fn handle_connection_lost(&self, connection_id: u32) -> bool {
        self.send_message(UpdateMessage::ConnectionLost { connection_id })
            .await
            .changed
    }

    /// Applies a fresh `hosts` list and member statuses, returning the members that must be
    /// connected to. Those addresses are claimed on behalf of the caller.
    pub(crate) async fn reconcile(
        &self,
        hosts: HashSet<ServerAddress>,
        members: Vec<MemberStatus>,
    ) -> UpdateOutcome {
        self.send_message(UpdateMessage::Reconcile { hosts, members })
            .await
    }

    /// Reserves `address` for a connection attempt. Fails if the member is already connected or
    /// another task holds the claim.
    pub(crate) async fn claim(&self, address: ServerAddress) -> bool {
        self.send_message(UpdateMessage::Claim { address })
            .await
            .changed
    }

    pub(crate) async fn release(&self, address: ServerAddress) {
        self.send_message(UpdateMessage::Release { address }).await;
    }

    pub(crate) async fn shutdown(&self) -> bool {
        self.send_message(UpdateMessage::Shutdown).await.changed
    }
}

/// An updater that does not keep the topology's worker running.
#[derive(Debug, Clone)]
pub(crate) struct WeakTopologyUpdater {
    sender: WeakUnboundedSender<AcknowledgedMessage<UpdateMessage, UpdateOutcome>>,
}

impl WeakTopologyUpdater {
    pub(crate) fn upgrade(&self) -> Option<TopologyUpdater> {
        self.sender
            .upgrade()
            .map(|sender| TopologyUpdater { sender })
    }
}

pub(crate) struct TopologyUpdateReceiver {
    update_receiver: UnboundedReceiver<AcknowledgedMessage<UpdateMessage, UpdateOutcome>>,
}

impl TopologyUpdateReceiver {
    pub(crate) async fn recv(
        &mut self,
    ) -> Option<AcknowledgedMessage<UpdateMessage, UpdateOutcome>> {
        self.update_receiver.recv().await
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TopologyWatcher {
    receiver: watch::Receiver<TopologyState>,
}

impl TopologyWatcher {
    fn channel(initial_state: TopologyState) -> (TopologyWatcher, TopologyBroadcaster) {
        let (tx, rx) = watch::channel(initial_state);
        let watcher = TopologyWatcher { receiver: rx };
        let broadcaster = TopologyBroadcaster { state_sender: tx };
        (watcher, broadcaster)
    }

    /// Whether the worker is still running.
    pub(crate) fn is_alive(&self) -> bool {
        self.receiver.has_changed().is_ok()
    }

    pub(crate) fn borrow_latest(&self) -> Ref<'_, TopologyState> {
        self.receiver.borrow()
    }
}

struct TopologyBroadcaster {
    state_sender: watch::Sender<TopologyState>,
}

impl TopologyBroadcaster {
    fn publish_new_state(&self, state: TopologyState) {
        self.state_sender.send_replace(state);
    }
}
