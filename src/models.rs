use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A mail folder (IMAP mailbox).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    pub path: String,
    pub unread_count: u32,
    pub total_count: u32,
}

/// UID and received date of one message, as reported by a metadata fetch.
///
/// The uid is stable within the transport for the lifetime of a run; under
/// the melib transport it is the envelope hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    pub uid: u64,
    /// Received date as unix seconds.
    pub received: i64,
}

/// Set of unique message UIDs, iterated in ascending order.
///
/// Bulk flag and delete calls take one of these. The empty set is a valid,
/// cheap value; callers short-circuit on it without touching the network.
pub type MessageSet = BTreeSet<u64>;
