use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ArchivePolicy;
use crate::session::AccountSession;

// ---------------------------------------------------------------------------
// Run-wide abort flag
// ---------------------------------------------------------------------------

/// Raised by any archive task on a consistency or integrity failure; every
/// archive task checks it before touching the next folder or message.
/// Shared across all accounts in one run.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Per-folder outcome
// ---------------------------------------------------------------------------

/// Where a folder's archive pass ended up.
///
/// `Committed` means the copy was verified and the source expunge issued;
/// `Aborted` means the run-wide abort flag was raised (or observed raised)
/// and the source was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderState {
    Idle,
    Found,
    Copying,
    Verifying,
    Committed,
    Aborted,
}

/// Count bookkeeping from one folder's copy-and-verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowResult {
    pub count_before: u32,
    pub count_after: u32,
    pub committed: bool,
}

#[derive(Debug, Clone)]
pub struct FolderOutcome {
    pub folder: String,
    pub state: FolderState,
    pub result: Option<WorkflowResult>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Archive one account's aged messages into the destination account.
///
/// Source folders are processed in the order the policy lists them. Source
/// messages are deleted only after the destination's message count proves
/// the copy landed; any integrity or consistency failure raises the
/// run-wide abort flag and stops everything that has not yet run.
pub async fn run(
    source: &AccountSession,
    dest: &AccountSession,
    policy: &ArchivePolicy,
    abort: &AbortFlag,
) -> Vec<FolderOutcome> {
    if !policy.enabled() {
        log::debug!("{}: archive disabled", source.name());
        return Vec::new();
    }
    log::info!(
        "{} archive older than {} days from {} to {}/{}",
        source.name(),
        policy.days,
        policy.from_folders,
        dest.name(),
        policy.to_folder
    );
    let mut outcomes = Vec::new();
    for folder in policy.source_folders() {
        if abort.raised() {
            log::error!(
                "{}: archive run aborted, skipping remaining folders",
                source.name()
            );
            break;
        }
        outcomes.push(archive_folder(source, dest, &folder, policy, abort).await);
    }
    outcomes
}

async fn archive_folder(
    source: &AccountSession,
    dest: &AccountSession,
    folder: &str,
    policy: &ArchivePolicy,
    abort: &AbortFlag,
) -> FolderOutcome {
    let mut state = FolderState::Idle;

    let old = source.find_old_messages(folder, policy.days).await;
    if old.is_empty() {
        log::info!(
            "{} {folder}: no messages older than {} days",
            source.name(),
            policy.days
        );
        return FolderOutcome {
            folder: folder.to_string(),
            state,
            result: None,
        };
    }
    state = FolderState::Found;
    log::info!(
        "{} {folder}: {} messages to archive ({state:?})",
        source.name(),
        old.len()
    );

    let count_before = dest.count_messages(&policy.to_folder).await;

    state = FolderState::Copying;
    log::debug!("{} {folder}: {state:?}", source.name());
    for uid in &old {
        if abort.raised() {
            log::error!(
                "{} {folder}: archive run aborted elsewhere, stopping copy",
                source.name()
            );
            return FolderOutcome {
                folder: folder.to_string(),
                state: FolderState::Aborted,
                result: None,
            };
        }
        let bytes = source.read_message(folder, *uid).await;
        if bytes.is_empty() {
            // An unverifiable copy risks silent data loss; stop the world.
            log::error!(
                "{} {folder}: message {uid} read back empty, aborting the archive run",
                source.name()
            );
            abort.raise();
            return FolderOutcome {
                folder: folder.to_string(),
                state: FolderState::Aborted,
                result: None,
            };
        }
        if !dest.append_message(&policy.to_folder, bytes).await {
            // The count verification below is the arbiter of whether this
            // actually landed.
            log::error!(
                "{} {folder}: append of message {uid} to {}/{} failed",
                source.name(),
                dest.name(),
                policy.to_folder
            );
        }
    }

    state = FolderState::Verifying;
    log::debug!("{} {folder}: {state:?}", source.name());
    let count_after = dest.count_messages(&policy.to_folder).await;
    let expected = count_before + old.len() as u32;
    if count_after < expected {
        log::error!(
            "{}/{}: copy verification failed, count {count_after} < expected {expected} \
             (was {count_before}); aborting the archive run, source untouched",
            dest.name(),
            policy.to_folder
        );
        abort.raise();
        return FolderOutcome {
            folder: folder.to_string(),
            state: FolderState::Aborted,
            result: Some(WorkflowResult {
                count_before,
                count_after,
                committed: false,
            }),
        };
    }

    log::info!(
        "{} {folder}: copy verified ({count_before} -> {count_after}), deleting source messages",
        source.name()
    );
    // The copies are durable; a cleanup failure here leaves duplicates in
    // the source, not data loss.
    if source.mark_deleted(folder, &old).await {
        if !source.expunge(folder).await {
            log::error!(
                "{} {folder}: expunge failed after archive, source copies remain",
                source.name()
            );
        }
    } else {
        log::error!(
            "{} {folder}: could not flag archived messages deleted, source copies remain",
            source.name()
        );
    }

    FolderOutcome {
        folder: folder.to_string(),
        state: FolderState::Committed,
        result: Some(WorkflowResult {
            count_before,
            count_after,
            committed: true,
        }),
    }
}
