use bitflags::bitflags;

bitflags! {
    /// Represents the bitwise flags for an OP_QUERY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct QueryFlags: u32 {
        const TAILABLE_CURSOR   = 0b_0000_0010;
        const SECONDARY_OK      = 0b_0000_0100;
        const OPLOG_REPLAY      = 0b_0000_1000;
        const NO_CURSOR_TIMEOUT = 0b_0001_0000;
        const AWAIT_DATA        = 0b_0010_0000;
        const EXHAUST           = 0b_0100_0000;
        const PARTIAL           = 0b_1000_0000;
    }
}

bitflags! {
    /// Represents the bitwise flags for an OP_REPLY.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct ResponseFlags: u32 {
        const CURSOR_NOT_FOUND = 0b_0000_0001;
        const QUERY_FAILURE    = 0b_0000_0010;
        const SHARD_CONFIG_STALE = 0b_0000_0100;
        const AWAIT_CAPABLE    = 0b_0000_1000;
    }
}
