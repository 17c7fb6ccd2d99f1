use crate::{
    bson::Document,
    wire::{Query, QueryFlags},
};

/// A command (or raw query document) addressed to a namespace, ready to be sent over a
/// [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) body: Document,
    pub(crate) secondary_ok: bool,
}

impl Command {
    /// Constructs a command to run against `target_db`, i.e. a query on `<target_db>.$cmd`.
    pub fn new(target_db: impl AsRef<str>, body: Document) -> Self {
        Self::with_namespace(format!("{}.$cmd", target_db.as_ref()), body)
    }

    /// Constructs a query against an arbitrary `<db>.<collection>` namespace.
    pub fn with_namespace(namespace: impl Into<String>, body: Document) -> Self {
        let name = body.keys().next().cloned().unwrap_or_default();
        Self {
            name,
            namespace: namespace.into(),
            body,
            secondary_ok: false,
        }
    }

    /// Marks the command as allowed to run on a secondary.
    pub fn set_secondary_ok(&mut self, secondary_ok: bool) {
        self.secondary_ok = secondary_ok;
    }

    /// The name of the command, i.e. the first key of its body.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full namespace the command is sent to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn into_query(self) -> Query {
        let flags = if self.secondary_ok {
            QueryFlags::SECONDARY_OK
        } else {
            QueryFlags::empty()
        };
        Query::new(self.namespace, self.body, flags)
    }
}
