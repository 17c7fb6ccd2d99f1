use serde::Deserialize;

use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, Connection},
    error::{Error, Result},
    options::ServerAddress,
    sdam::MemberState,
};

/// The name of the legacy handshake command, which every node version understands.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "ismaster";

pub(crate) const REPL_SET_GET_STATUS_COMMAND_NAME: &str = "replSetGetStatus";

/// Construct the legacy hello command.
pub(crate) fn hello_command() -> Command {
    Command::new("admin", doc! { LEGACY_HELLO_COMMAND_NAME: 1 })
}

pub(crate) fn repl_set_get_status_command() -> Command {
    Command::new("admin", doc! { REPL_SET_GET_STATUS_COMMAND_NAME: 1 })
}

/// Execute a legacy hello command.
pub(crate) async fn run_hello(conn: &Connection) -> Result<IsMasterReply> {
    let reply = conn.send_command(hello_command()).await?;
    let raw_command_response = reply.into_single_document()?;
    let command_response: IsMasterCommandResponse =
        bson::from_document(raw_command_response.clone())?;

    Ok(IsMasterReply {
        command_response,
        raw_command_response,
    })
}

/// Execute `replSetGetStatus`, failing unless the node reports `ok: 1`.
pub(crate) async fn run_repl_set_get_status(conn: &Connection) -> Result<Vec<MemberStatus>> {
    let reply = conn.send_command(repl_set_get_status_command()).await?;
    let raw_response = reply.into_single_document()?;

    if !is_ok(&raw_response) {
        let message = raw_response
            .get_str("errmsg")
            .unwrap_or("replSetGetStatus did not return ok: 1")
            .to_string();
        return Err(Error::operation_failure(message).with_server_response(raw_response));
    }

    let response: ReplSetStatusResponse = bson::from_document(raw_response)?;
    Ok(response.members)
}

fn is_ok(response: &Document) -> bool {
    match response.get("ok") {
        Some(Bson::Double(ok)) => *ok == 1.0,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IsMasterReply {
    pub(crate) command_response: IsMasterCommandResponse,
    pub(crate) raw_command_response: Document,
}

impl IsMasterReply {
    /// Whether the node reported both a host list and a set name.
    pub(crate) fn is_replica_set_member(&self) -> bool {
        self.command_response.hosts.is_some() && self.command_response.set_name.is_some()
    }

    /// The role the node claims for itself.
    pub(crate) fn member_state(&self) -> MemberState {
        if self.command_response.is_master {
            MemberState::Primary
        } else if self.command_response.secondary {
            MemberState::Secondary
        } else {
            MemberState::Unknown
        }
    }

    pub(crate) fn set_name(&self) -> Option<&str> {
        self.command_response.set_name.as_deref()
    }

    /// The `hosts` list parsed into addresses. Entries that cannot be parsed are skipped.
    pub(crate) fn host_addresses(&self) -> Vec<ServerAddress> {
        self.command_response
            .hosts
            .iter()
            .flatten()
            .filter_map(|host| ServerAddress::parse(host).ok())
            .collect()
    }

    /// The address the node knows itself by, if it reported one.
    pub(crate) fn me(&self) -> Option<ServerAddress> {
        self.command_response
            .me
            .as_deref()
            .and_then(|me| ServerAddress::parse(me).ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IsMasterCommandResponse {
    /// Whether the server is writable.
    #[serde(rename = "ismaster", default)]
    pub(crate) is_master: bool,

    /// Whether the server is a secondary of a replica set.
    #[serde(default)]
    pub(crate) secondary: bool,

    /// The list of all hosts, present only when the node is a replica-set member.
    pub(crate) hosts: Option<Vec<String>>,

    /// The name of the replica set, if any.
    pub(crate) set_name: Option<String>,

    /// The address of the server that returned this response.
    pub(crate) me: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplSetStatusResponse {
    #[serde(default)]
    members: Vec<MemberStatus>,
}

/// One entry of the `members` array of a `replSetGetStatus` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberStatus {
    pub(crate) name: String,
    pub(crate) state: MemberState,
    #[serde(default)]
    pub(crate) state_str: Option<String>,
    #[serde(rename = "self", default)]
    pub(crate) is_self: bool,
}

impl MemberStatus {
    pub(crate) fn address(&self) -> Result<ServerAddress> {
        ServerAddress::parse(&self.name)
    }
}
