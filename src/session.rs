use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, LocalResult, NaiveDate, TimeZone};
use tokio::sync::{mpsc, Mutex};

use crate::latch::CountdownLatch;
use crate::models::{Folder, MessageMeta, MessageSet};
use crate::transport::{MailTransport, MessageFlag};

/// Default bound on any single transport operation.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

type Slot<T> = Arc<Mutex<T>>;

// ---------------------------------------------------------------------------
// AccountSession — Clone + Send + Sync facade over one account's transport
// ---------------------------------------------------------------------------

/// One account's mail store, behind a serial command queue.
///
/// A single worker task owns the transport and executes commands strictly in
/// submission order, so two operations against the same account can never
/// overlap. Different accounts have different workers and proceed in
/// parallel.
///
/// Every public operation follows one protocol: allocate a fresh call-local
/// latch and a result slot holding the operation's default value, enqueue the
/// command, then block on the latch with a timeout. The worker fills the slot
/// on success, logs on failure, and always decrements the latch exactly once.
/// A timed-out call returns the default; the in-flight operation is not
/// cancelled, and its late completion only touches the call-local slot and
/// latch, so it is inert. Sharing a latch across calls would break both the
/// independent timeouts and the late-completion safety.
#[derive(Clone)]
pub struct AccountSession {
    name: String,
    tx: mpsc::UnboundedSender<SessionCmd>,
    timeout: Duration,
}

enum SessionCmd {
    ListFolders {
        slot: Slot<Vec<Folder>>,
        done: Arc<CountdownLatch>,
    },
    CountMessages {
        folder: String,
        slot: Slot<u32>,
        done: Arc<CountdownLatch>,
    },
    FetchMessages {
        folder: String,
        slot: Slot<Vec<MessageMeta>>,
        done: Arc<CountdownLatch>,
    },
    SetDeleted {
        folder: String,
        uids: Vec<u64>,
        slot: Slot<bool>,
        done: Arc<CountdownLatch>,
    },
    Expunge {
        folder: String,
        slot: Slot<bool>,
        done: Arc<CountdownLatch>,
    },
    ReadMessage {
        folder: String,
        uid: u64,
        slot: Slot<Vec<u8>>,
        done: Arc<CountdownLatch>,
    },
    AppendMessage {
        folder: String,
        bytes: Vec<u8>,
        slot: Slot<bool>,
        done: Arc<CountdownLatch>,
    },
}

impl AccountSession {
    /// Spawn the worker for one account's transport. Must be called from
    /// within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn MailTransport>,
        timeout: Duration,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(name.clone(), transport, rx));
        AccountSession { name, tx, timeout }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue one command and wait for its completion under the call
    /// timeout. Returns the slot contents, which is the documented default
    /// whenever the call failed or timed out.
    async fn dispatch<T, F>(&self, op: &str, build: F) -> T
    where
        T: Clone + Default,
        F: FnOnce(Slot<T>, Arc<CountdownLatch>) -> SessionCmd,
    {
        let latch = Arc::new(CountdownLatch::new());
        let slot: Slot<T> = Arc::new(Mutex::new(T::default()));
        latch.add();
        if self.tx.send(build(slot.clone(), latch.clone())).is_err() {
            log::error!("{}: {op}: transport worker is gone", self.name);
            latch.remove();
            return T::default();
        }
        if !latch.wait(self.timeout).await {
            log::error!(
                "{}: {op} did not complete within {:?}, discarding result",
                self.name,
                self.timeout
            );
            return T::default();
        }
        let value = slot.lock().await.clone();
        value
    }

    // -- operations ----------------------------------------------------------

    /// List all folders in the account. Empty on failure.
    pub async fn list_folders(&self) -> Vec<Folder> {
        self.dispatch("list folders", |slot, done| SessionCmd::ListFolders {
            slot,
            done,
        })
        .await
    }

    /// Total message count of a folder. Zero on failure.
    pub async fn count_messages(&self, folder: &str) -> u32 {
        let folder = folder.to_string();
        self.dispatch("count messages", move |slot, done| {
            SessionCmd::CountMessages { folder, slot, done }
        })
        .await
    }

    /// UIDs of messages in `folder` at least `older_than_days` calendar days
    /// old.
    ///
    /// A non-positive threshold returns the empty set without touching the
    /// network. Ages are whole calendar days between the received date and
    /// today, not elapsed hours, and the boundary is inclusive: a message
    /// received exactly N days ago qualifies at a threshold of N.
    pub async fn find_old_messages(&self, folder: &str, older_than_days: i64) -> MessageSet {
        if older_than_days <= 0 {
            return MessageSet::new();
        }
        let folder_owned = folder.to_string();
        let metas: Vec<MessageMeta> = self
            .dispatch("fetch messages", move |slot, done| {
                SessionCmd::FetchMessages {
                    folder: folder_owned,
                    slot,
                    done,
                }
            })
            .await;
        let today = Local::now().date_naive();
        let old: MessageSet = metas
            .iter()
            .filter(|meta| calendar_age_days(meta.received, today) >= older_than_days)
            .map(|meta| meta.uid)
            .collect();
        log::debug!(
            "{} {folder}: {} of {} messages at least {older_than_days} days old",
            self.name,
            old.len(),
            metas.len()
        );
        old
    }

    /// Flag every UID in `set` as deleted, in one bulk call.
    ///
    /// The empty set is a no-op and reports success without a network call.
    /// Returns false when the flag call failed or timed out.
    pub async fn mark_deleted(&self, folder: &str, set: &MessageSet) -> bool {
        if set.is_empty() {
            return true;
        }
        let folder = folder.to_string();
        let uids: Vec<u64> = set.iter().copied().collect();
        self.dispatch("mark deleted", move |slot, done| SessionCmd::SetDeleted {
            folder,
            uids,
            slot,
            done,
        })
        .await
    }

    /// Permanently remove all deleted-flagged messages from the folder.
    pub async fn expunge(&self, folder: &str) -> bool {
        let folder = folder.to_string();
        self.dispatch("expunge", move |slot, done| SessionCmd::Expunge {
            folder,
            slot,
            done,
        })
        .await
    }

    /// Full message bytes for one UID. Empty on failure; an empty result is
    /// never a legitimately empty message.
    pub async fn read_message(&self, folder: &str, uid: u64) -> Vec<u8> {
        let folder = folder.to_string();
        self.dispatch("read message", move |slot, done| SessionCmd::ReadMessage {
            folder,
            uid,
            slot,
            done,
        })
        .await
    }

    /// Append a full message to the folder. False on failure.
    pub async fn append_message(&self, folder: &str, bytes: Vec<u8>) -> bool {
        let folder = folder.to_string();
        self.dispatch("append message", move |slot, done| {
            SessionCmd::AppendMessage {
                folder,
                bytes,
                slot,
                done,
            }
        })
        .await
    }
}

// -- worker task ---------------------------------------------------------

async fn run_worker(
    name: String,
    transport: Arc<dyn MailTransport>,
    mut rx: mpsc::UnboundedReceiver<SessionCmd>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SessionCmd::ListFolders { slot, done } => {
                match transport.list_folders().await {
                    Ok(folders) => *slot.lock().await = folders,
                    Err(e) => log::error!("{name}: folder list error: {e}"),
                }
                done.remove();
            }
            SessionCmd::CountMessages { folder, slot, done } => {
                match transport.count_messages(&folder).await {
                    Ok(count) => *slot.lock().await = count,
                    Err(e) => log::error!("{name} {folder}: count messages error: {e}"),
                }
                done.remove();
            }
            SessionCmd::FetchMessages { folder, slot, done } => {
                match transport.fetch_messages(&folder).await {
                    Ok(metas) => *slot.lock().await = metas,
                    Err(e) => log::error!("{name} {folder}: fetch messages error: {e}"),
                }
                done.remove();
            }
            SessionCmd::SetDeleted {
                folder,
                uids,
                slot,
                done,
            } => {
                match transport
                    .set_flags(&folder, &uids, MessageFlag::Deleted, true)
                    .await
                {
                    Ok(()) => *slot.lock().await = true,
                    Err(e) => log::error!("{name} {folder}: mark deleted error: {e}"),
                }
                done.remove();
            }
            SessionCmd::Expunge { folder, slot, done } => {
                match transport.expunge(&folder).await {
                    Ok(()) => *slot.lock().await = true,
                    Err(e) => log::error!("{name} {folder}: expunge error: {e}"),
                }
                done.remove();
            }
            SessionCmd::ReadMessage {
                folder,
                uid,
                slot,
                done,
            } => {
                match transport.fetch_full_message(&folder, uid).await {
                    Ok(bytes) => *slot.lock().await = bytes,
                    Err(e) => log::error!("{name} {folder}: read message {uid} error: {e}"),
                }
                done.remove();
            }
            SessionCmd::AppendMessage {
                folder,
                bytes,
                slot,
                done,
            } => {
                match transport.append_message(&folder, bytes, None).await {
                    Ok(()) => *slot.lock().await = true,
                    Err(e) => log::error!("{name} {folder}: append message error: {e}"),
                }
                done.remove();
            }
        }
    }
    log::debug!("{name}: transport worker exiting");
}

/// Whole calendar days between a received timestamp and `today`, in local
/// time. Clock-of-day differences do not count; only the date changes.
fn calendar_age_days(received: i64, today: NaiveDate) -> i64 {
    let received = match Local.timestamp_opt(received, 0) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => return 0,
    };
    (today - received.date_naive()).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use chrono::Days;
    use tokio::time::Instant;

    fn session(mock: &MockTransport) -> AccountSession {
        AccountSession::new("test", Arc::new(mock.clone()), DEFAULT_CALL_TIMEOUT)
    }

    /// Unix seconds for noon, `days_ago` calendar days before today, local
    /// time. Noon keeps the math clear of DST transitions.
    fn noon_days_ago(days_ago: u64) -> i64 {
        let date = Local::now().date_naive() - Days::new(days_ago);
        Local
            .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
            .timestamp()
    }

    #[test]
    fn age_counts_calendar_days_not_hours() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        let just_before_midnight = Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2026, 3, 10)
                    .unwrap()
                    .and_hms_opt(23, 59, 0)
                    .unwrap(),
            )
            .unwrap()
            .timestamp();
        // Received one minute before the date rolled over: one day old even
        // though almost no time has elapsed.
        assert_eq!(calendar_age_days(just_before_midnight, today), 1);

        let same_morning = Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2026, 3, 11)
                    .unwrap()
                    .and_hms_opt(0, 1, 0)
                    .unwrap(),
            )
            .unwrap()
            .timestamp();
        assert_eq!(calendar_age_days(same_morning, today), 0);
    }

    #[tokio::test]
    async fn find_old_with_zero_days_issues_no_transport_call() {
        let mock = MockTransport::new();
        mock.add_folder("INBOX");
        mock.add_message("INBOX", noon_days_ago(100), b"old".to_vec());
        let session = session(&mock);

        assert!(session.find_old_messages("INBOX", 0).await.is_empty());
        assert!(session.find_old_messages("INBOX", -5).await.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn find_old_boundary_is_inclusive() {
        let mock = MockTransport::new();
        mock.add_folder("INBOX");
        let exactly_n = mock.add_message("INBOX", noon_days_ago(30), b"a".to_vec());
        let newer = mock.add_message("INBOX", noon_days_ago(29), b"b".to_vec());
        let older = mock.add_message("INBOX", noon_days_ago(31), b"c".to_vec());
        let session = session(&mock);

        let old = session.find_old_messages("INBOX", 30).await;
        assert!(old.contains(&exactly_n));
        assert!(old.contains(&older));
        assert!(!old.contains(&newer));
    }

    #[tokio::test]
    async fn mark_deleted_on_empty_set_is_a_no_op() {
        let mock = MockTransport::new();
        mock.add_folder("INBOX");
        let session = session(&mock);

        assert!(session.mark_deleted("INBOX", &MessageSet::new()).await);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn operations_execute_in_submission_order() {
        let mock = MockTransport::new();
        mock.add_folder("INBOX");
        mock.add_folder("Sent");
        let session = session(&mock);

        let (a, b) = tokio::join!(
            session.count_messages("INBOX"),
            session.count_messages("Sent")
        );
        assert_eq!((a, b), (0, 0));
        assert_eq!(
            mock.calls(),
            vec!["count INBOX".to_string(), "count Sent".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_returns_default_and_session_survives() {
        let mock = MockTransport::new();
        mock.add_folder("INBOX");
        mock.add_message("INBOX", noon_days_ago(1), b"x".to_vec());
        mock.set_delay(Duration::from_secs(400));
        let session = AccountSession::new("slow", Arc::new(mock.clone()), Duration::from_secs(5));

        // Times out at 5s; the mock completes at 400s and must be inert.
        assert_eq!(session.count_messages("INBOX").await, 0);

        mock.set_delay(Duration::ZERO);
        // Once the stuck operation drains, the same session works again.
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(session.count_messages("INBOX").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_account_does_not_delay_a_fast_one() {
        let slow_mock = MockTransport::new();
        slow_mock.add_folder("INBOX");
        slow_mock.set_delay(Duration::from_secs(100));
        let slow = AccountSession::new("slow", Arc::new(slow_mock), DEFAULT_CALL_TIMEOUT);

        let fast_mock = MockTransport::new();
        fast_mock.add_folder("INBOX");
        fast_mock.add_message("INBOX", noon_days_ago(1), b"x".to_vec());
        let fast = AccountSession::new("fast", Arc::new(fast_mock), DEFAULT_CALL_TIMEOUT);

        let started = Instant::now();
        let (slow_count, (fast_count, fast_elapsed)) = tokio::join!(
            slow.count_messages("INBOX"),
            async {
                let count = fast.count_messages("INBOX").await;
                (count, started.elapsed())
            }
        );
        assert_eq!(slow_count, 0);
        assert_eq!(fast_count, 1);
        assert!(
            fast_elapsed < Duration::from_secs(100),
            "fast account waited {fast_elapsed:?} behind the slow one"
        );
    }
}
