use futures::future::BoxFuture;

use crate::models::{Folder, MessageMeta};

/// Result future of a single transport operation.
///
/// Operations are single-shot and single-completion; nothing here supports
/// cancellation, so a caller that stops waiting must be able to ignore the
/// completion safely.
pub type TransportFuture<T> = BoxFuture<'static, Result<T, TransportError>>;

/// A message flag the housekeeping workflows care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFlag {
    Seen,
    Flagged,
    Deleted,
}

/// Errors returned by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IMAP error: {0}")]
    Imap(String),
    #[error("folder not found: {0}")]
    UnknownFolder(String),
    #[error("transport connection failed: {0}")]
    Connect(String),
}

/// Asynchronous mail store operations for one account.
///
/// The session layer issues these one at a time per account and treats every
/// failure as "log it, use the default". Implementations must be safe to
/// drive from a spawned worker task, hence the `'static` boxed futures.
pub trait MailTransport: Send + Sync {
    fn list_folders(&self) -> TransportFuture<Vec<Folder>>;

    fn count_messages(&self, folder: &str) -> TransportFuture<u32>;

    /// Fetch uid + received-date metadata for every message in the folder.
    ///
    /// Age filtering is the caller's job; servers are only asked for the
    /// metadata listing.
    fn fetch_messages(&self, folder: &str) -> TransportFuture<Vec<MessageMeta>>;

    /// Set or clear one flag on a batch of messages in one call.
    fn set_flags(
        &self,
        folder: &str,
        uids: &[u64],
        flag: MessageFlag,
        set: bool,
    ) -> TransportFuture<()>;

    /// Permanently remove all deleted-flagged messages from the folder.
    fn expunge(&self, folder: &str) -> TransportFuture<()>;

    /// Fetch the full RFC 2822 bytes of one message.
    fn fetch_full_message(&self, folder: &str, uid: u64) -> TransportFuture<Vec<u8>>;

    /// Append a full message to the folder, optionally pre-flagged.
    fn append_message(
        &self,
        folder: &str,
        bytes: Vec<u8>,
        flag: Option<MessageFlag>,
    ) -> TransportFuture<()>;
}
