//! In-process nodes speaking OP_QUERY/OP_REPLY over real TCP sockets.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};

use crate::{
    bson::{doc, Bson, Document},
    options::ServerAddress,
    wire::{Query, QueryFlags, Reply},
};

/// What a replica set's members report about it. Shared by every node of a [`MockReplicaSet`]
/// and changeable while the nodes run.
#[derive(Clone, Debug)]
pub(crate) struct ReplicaSetView {
    pub(crate) set_name: String,

    /// The `hosts` list every member returns from `isMaster`.
    pub(crate) hosts: Vec<ServerAddress>,

    /// The `(name, state)` entries returned from `replSetGetStatus`.
    pub(crate) members: Vec<(ServerAddress, i32)>,

    /// When set, every node marks this member as `self` instead of itself.
    pub(crate) reported_self: Option<ServerAddress>,

    /// When false, `replSetGetStatus` fails with `ok: 0`.
    pub(crate) status_ok: bool,
}

impl ReplicaSetView {
    pub(crate) fn set_state(&mut self, address: &ServerAddress, state: i32) {
        match self.members.iter_mut().find(|(name, _)| name == address) {
            Some((_, current)) => *current = state,
            None => self.members.push((address.clone(), state)),
        }
    }

    /// Lists `address` in both `hosts` and the member statuses.
    pub(crate) fn add(&mut self, address: &ServerAddress, state: i32) {
        if !self.hosts.contains(address) {
            self.hosts.push(address.clone());
        }
        self.set_state(address, state);
    }

    /// Removes `address` from both `hosts` and the member statuses.
    pub(crate) fn remove(&mut self, address: &ServerAddress) {
        self.hosts.retain(|host| host != address);
        self.members.retain(|(name, _)| name != address);
    }

    fn state_of(&self, address: &ServerAddress) -> Option<i32> {
        self.members
            .iter()
            .find(|(name, _)| name == address)
            .map(|(_, state)| *state)
    }
}

#[derive(Clone, Debug)]
enum Role {
    Standalone,
    Member(Arc<Mutex<ReplicaSetView>>),
}

#[derive(Clone, Copy, Debug, Default)]
struct Control {
    /// Bumped to make every open connection close.
    generation: u64,
    shut_down: bool,
}

/// A command a node received.
#[derive(Clone, Debug)]
pub(crate) struct ReceivedCommand {
    pub(crate) name: String,
    pub(crate) secondary_ok: bool,
}

struct NodeState {
    address: ServerAddress,
    role: Role,
    received: Mutex<Vec<ReceivedCommand>>,
    control: watch::Sender<Control>,
}

/// A single mock node. It stops listening when dropped.
pub(crate) struct MockNode {
    state: Arc<NodeState>,
}

impl MockNode {
    /// Starts a node that reports itself as a standalone server.
    pub(crate) async fn standalone() -> Self {
        let (listener, address) = bind().await;
        Self::serve(listener, address, Role::Standalone)
    }

    fn serve(listener: TcpListener, address: ServerAddress, role: Role) -> Self {
        let (control, _) = watch::channel(Control::default());
        let state = Arc::new(NodeState {
            address,
            role,
            received: Mutex::new(Vec::new()),
            control,
        });
        tokio::spawn(accept_connections(listener, state.clone()));
        Self { state }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.state.address
    }

    /// Closes every connection currently open to the node. The node keeps accepting new ones.
    pub(crate) fn drop_connections(&self) {
        self.state
            .control
            .send_modify(|control| control.generation += 1);
    }

    /// Closes every connection and stops listening.
    pub(crate) fn shutdown(&self) {
        self.state.control.send_modify(|control| {
            control.generation += 1;
            control.shut_down = true;
        });
    }

    pub(crate) fn received(&self) -> Vec<ReceivedCommand> {
        self.state.received.lock().unwrap().clone()
    }

    /// How many commands named `name` the node received, compared case-insensitively.
    pub(crate) fn count_received(&self, name: &str) -> usize {
        self.received()
            .iter()
            .filter(|command| command.name.eq_ignore_ascii_case(name))
            .count()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A replica set of mock nodes sharing one [`ReplicaSetView`].
pub(crate) struct MockReplicaSet {
    view: Arc<Mutex<ReplicaSetView>>,
    nodes: Vec<MockNode>,
}

impl MockReplicaSet {
    /// Starts one node per entry of `states`, all listed in `hosts` with the given state codes.
    pub(crate) async fn start(set_name: &str, states: &[i32]) -> Self {
        let mut listeners = Vec::with_capacity(states.len());
        for _ in states {
            listeners.push(bind().await);
        }

        let view = Arc::new(Mutex::new(ReplicaSetView {
            set_name: set_name.to_string(),
            hosts: listeners.iter().map(|(_, address)| address.clone()).collect(),
            members: listeners
                .iter()
                .zip(states)
                .map(|((_, address), state)| (address.clone(), *state))
                .collect(),
            reported_self: None,
            status_ok: true,
        }));

        let nodes = listeners
            .into_iter()
            .map(|(listener, address)| {
                MockNode::serve(listener, address, Role::Member(view.clone()))
            })
            .collect();

        Self { view, nodes }
    }

    pub(crate) fn node(&self, index: usize) -> &MockNode {
        &self.nodes[index]
    }

    pub(crate) fn address(&self, index: usize) -> ServerAddress {
        self.nodes[index].address().clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ReplicaSetView)) {
        f(&mut self.view.lock().unwrap());
    }
}

/// An address nothing listens on.
pub(crate) async fn unreachable_address() -> ServerAddress {
    let (listener, address) = bind().await;
    drop(listener);
    address
}

async fn bind() -> (TcpListener, ServerAddress) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ServerAddress::new("127.0.0.1", Some(port)))
}

async fn accept_connections(listener: TcpListener, state: Arc<NodeState>) {
    let mut control = state.control.subscribe();
    loop {
        tokio::select! {
            changed = control.changed() => {
                if changed.is_err() || control.borrow_and_update().shut_down {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, state.clone()));
                }
                Err(_) => break,
            },
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<NodeState>) {
    let mut control = state.control.subscribe();
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let query = tokio::select! {
            _ = control.changed() => break,
            query = Query::read_from(&mut reader) => match query {
                Ok(query) => query,
                Err(_) => break,
            },
        };

        let name = query.query.keys().next().cloned().unwrap_or_default();
        state.received.lock().unwrap().push(ReceivedCommand {
            name: name.clone(),
            secondary_ok: query.flags.contains(QueryFlags::SECONDARY_OK),
        });

        if name == "sleep" {
            let millis = query.query.get_i64("sleep").unwrap_or_default();
            tokio::select! {
                _ = control.changed() => break,
                _ = tokio::time::sleep(Duration::from_millis(millis.unsigned_abs())) => {}
            }
        }

        let response = respond(&state, &name, query.flags);
        let bytes = Reply::new(query.request_id, vec![response])
            .to_bytes()
            .unwrap();
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

fn respond(state: &NodeState, name: &str, flags: QueryFlags) -> Document {
    match (&state.role, name.to_lowercase().as_str()) {
        (Role::Standalone, "ismaster") => doc! { "ismaster": true, "ok": 1.0 },
        (Role::Standalone, "replsetgetstatus") => doc! {
            "ok": 0.0,
            "errmsg": "not running with --replSet",
            "code": 76,
        },
        (Role::Member(view), "ismaster") => {
            let view = view.lock().unwrap();
            let member_state = view.state_of(&state.address);
            let hosts: Vec<Bson> = view
                .hosts
                .iter()
                .map(|host| Bson::String(host.to_string()))
                .collect();
            doc! {
                "ismaster": member_state == Some(1),
                "secondary": member_state == Some(2),
                "setName": view.set_name.clone(),
                "hosts": hosts,
                "me": state.address.to_string(),
                "ok": 1.0,
            }
        }
        (Role::Member(view), "replsetgetstatus") => {
            let view = view.lock().unwrap();
            if !view.status_ok {
                return doc! {
                    "ok": 0.0,
                    "errmsg": "Our replica set config is invalid or we are not a member of it",
                    "code": 93,
                };
            }
            let self_address = view.reported_self.as_ref().unwrap_or(&state.address);
            let members: Vec<Bson> = view
                .members
                .iter()
                .map(|(name, member_state)| {
                    Bson::Document(doc! {
                        "name": name.to_string(),
                        "state": *member_state,
                        "stateStr": state_str(*member_state),
                        "self": name == self_address,
                    })
                })
                .collect();
            doc! { "set": view.set_name.clone(), "members": members, "ok": 1.0 }
        }
        _ => doc! {
            "ok": 1.0,
            "servedBy": state.address.to_string(),
            "secondaryOk": flags.contains(QueryFlags::SECONDARY_OK),
        },
    }
}

fn state_str(state: i32) -> &'static str {
    match state {
        1 => "PRIMARY",
        2 => "SECONDARY",
        3 => "RECOVERING",
        7 => "ARBITER",
        0 => "STARTUP",
        8 => "DOWN",
        _ => "UNKNOWN",
    }
}
