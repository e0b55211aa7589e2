use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::archive::{self, AbortFlag};
use crate::config::{self, AccountConfig};
use crate::imap::ImapTransport;
use crate::latch::CountdownLatch;
use crate::retention;
use crate::session::{AccountSession, DEFAULT_CALL_TIMEOUT};

/// Default bound on one whole housekeeping run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Bound on any single transport operation.
    pub call_timeout: Duration,
    /// Process-wide deadline for the whole run.
    pub run_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// What the embedding process needs to know when the run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub accounts: usize,
    pub archive_aborted: bool,
    pub timed_out: bool,
}

impl RunOutcome {
    /// Process exit convention: non-zero when any archive run aborted or the
    /// global deadline elapsed.
    pub fn exit_code(&self) -> i32 {
        if self.archive_aborted || self.timed_out {
            1
        } else {
            0
        }
    }
}

/// Load accounts from a config file and run housekeeping over all of them.
pub async fn run_from_config(path: &Path, options: RunOptions) -> RunOutcome {
    let accounts = config::resolve_accounts(path);
    run(accounts, options).await
}

/// Connect every account and run housekeeping. A connect failure drops that
/// account from the run with an error log; it never stops the others.
pub async fn run(accounts: Vec<AccountConfig>, options: RunOptions) -> RunOutcome {
    let mut sessions = Vec::new();
    for account in accounts {
        match ImapTransport::connect(&account).await {
            Ok(transport) => {
                let session = AccountSession::new(
                    account.name.clone(),
                    Arc::new(transport),
                    options.call_timeout,
                );
                sessions.push((account, session));
            }
            Err(e) => log::error!("{}: connect failed: {e}", account.name),
        }
    }
    run_sessions(sessions, options).await
}

/// Run housekeeping over already-connected sessions.
///
/// Three ordered phases: a connectivity check, retention, then archive.
/// Each phase fans out one task per account on a fresh latch and waits for
/// it with whatever time is left before the run deadline; accounts proceed
/// in parallel within a phase, and one account's slow transport never blocks
/// another's.
pub async fn run_sessions(
    sessions: Vec<(AccountConfig, AccountSession)>,
    options: RunOptions,
) -> RunOutcome {
    log::info!("housekeeping run over {} accounts", sessions.len());
    let deadline = Instant::now() + options.run_timeout;
    let mut outcome = RunOutcome {
        accounts: sessions.len(),
        archive_aborted: false,
        timed_out: false,
    };

    // Connectivity check: list folders everywhere and log what we see.
    // Failures and overruns are non-gating.
    let latch = Arc::new(CountdownLatch::new());
    for (_, session) in &sessions {
        latch.add();
        let session = session.clone();
        let latch = latch.clone();
        tokio::spawn(async move {
            let folders = session.list_folders().await;
            log::info!("found {} folders in {}", folders.len(), session.name());
            for folder in &folders {
                log::debug!("  {}", folder.path);
            }
            latch.remove();
        });
    }
    if !latch.wait(remaining(deadline)).await {
        log::error!("folder listing did not complete in time");
    }

    // Retention across all accounts in parallel.
    let latch = Arc::new(CountdownLatch::new());
    for (account, session) in &sessions {
        latch.add();
        let session = session.clone();
        let policy = account.retention.clone();
        let latch = latch.clone();
        tokio::spawn(async move {
            retention::run(&session, &policy).await;
            latch.remove();
        });
    }
    if !latch.wait(remaining(deadline)).await {
        // Archive submissions would queue behind wedged workers and burn
        // what is left of the deadline; stop the run here.
        log::error!("ERROR retention operations did not complete");
        outcome.timed_out = true;
        return outcome;
    }

    // Archive across all accounts in parallel, sharing one abort flag.
    let by_name: HashMap<String, AccountSession> = sessions
        .iter()
        .map(|(account, session)| (account.name.clone(), session.clone()))
        .collect();
    let abort = AbortFlag::new();
    let latch = Arc::new(CountdownLatch::new());
    for (account, session) in &sessions {
        if !account.archive.enabled() {
            continue;
        }
        let Some(dest) = by_name.get(&account.archive.to_account) else {
            log::error!(
                "{}: archive destination account {:?} is not configured",
                account.name,
                account.archive.to_account
            );
            continue;
        };
        latch.add();
        let source = session.clone();
        let dest = dest.clone();
        let policy = account.archive.clone();
        let abort = abort.clone();
        let latch = latch.clone();
        tokio::spawn(async move {
            archive::run(&source, &dest, &policy, &abort).await;
            latch.remove();
        });
    }
    if !latch.wait(remaining(deadline)).await {
        log::error!("ERROR archive operations did not complete");
        outcome.timed_out = true;
    }
    outcome.archive_aborted = abort.raised();

    if outcome.archive_aborted || outcome.timed_out {
        log::error!("ERROR operations did not complete");
    } else {
        log::info!("all operations complete");
    }
    outcome
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
