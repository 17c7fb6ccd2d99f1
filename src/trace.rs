pub(crate) const TOPOLOGY_TRACING_EVENT_TARGET: &str = "mongodb_topology::topology";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "mongodb_topology::connection";
pub(crate) const MONITOR_TRACING_EVENT_TARGET: &str = "mongodb_topology::monitor";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str = "mongodb_topology::server_selection";
