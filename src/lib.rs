pub mod archive;
pub mod config;
pub mod imap;
pub mod keyring;
pub mod latch;
pub mod models;
pub mod orchestrator;
pub mod retention;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the types consumers drive a run with
pub use archive::{AbortFlag, FolderOutcome, FolderState, WorkflowResult};
pub use config::{AccountConfig, ArchivePolicy, ConfigError, RetentionPolicy};
pub use latch::CountdownLatch;
pub use models::{Folder, MessageMeta, MessageSet};
pub use orchestrator::{run, run_from_config, run_sessions, RunOptions, RunOutcome};
pub use session::AccountSession;
pub use transport::{MailTransport, MessageFlag, TransportError};
