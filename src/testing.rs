//! In-memory transport double for exercising sessions and workflows.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;

use crate::models::{Folder, MessageMeta};
use crate::transport::{MailTransport, MessageFlag, TransportError, TransportFuture};

struct MockMessage {
    uid: u64,
    received: i64,
    body: Vec<u8>,
    deleted: bool,
}

#[derive(Default)]
struct Inner {
    folders: BTreeMap<String, Vec<MockMessage>>,
    next_uid: u64,
    delay: Duration,
    drop_appends: bool,
    empty_reads: HashSet<u64>,
    fail_ops: HashSet<&'static str>,
    calls: Vec<String>,
}

/// An in-memory mail store with knobs for injecting slowness and failure.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_folder(&self, folder: &str) {
        self.inner
            .lock()
            .unwrap()
            .folders
            .entry(folder.to_string())
            .or_default();
    }

    /// Store a message and return its uid.
    pub(crate) fn add_message(&self, folder: &str, received: i64, body: Vec<u8>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_uid += 1;
        let uid = inner.next_uid;
        inner
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(MockMessage {
                uid,
                received,
                body,
                deleted: false,
            });
        uid
    }

    /// Delay applied to every subsequent operation.
    pub(crate) fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = delay;
    }

    /// Make appends report success without storing anything, so a later
    /// count shows the copy never landed.
    pub(crate) fn drop_appends(&self) {
        self.inner.lock().unwrap().drop_appends = true;
    }

    /// Make reads of this uid return zero bytes.
    pub(crate) fn empty_read(&self, uid: u64) {
        self.inner.lock().unwrap().empty_reads.insert(uid);
    }

    /// Make every call of the named operation fail.
    pub(crate) fn fail_op(&self, op: &'static str) {
        self.inner.lock().unwrap().fail_ops.insert(op);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn message_count(&self, folder: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|msgs| msgs.len())
            .unwrap_or(0)
    }

    pub(crate) fn uids(&self, folder: &str) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|msgs| msgs.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    pub(crate) fn deleted_uids(&self, folder: &str) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|msgs| msgs.iter().filter(|m| m.deleted).map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    fn begin(&self, op: &'static str, call: String) -> Result<Duration, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        if inner.fail_ops.contains(op) {
            return Err(TransportError::Imap(format!("injected {op} failure")));
        }
        Ok(inner.delay)
    }
}

impl MailTransport for MockTransport {
    fn list_folders(&self) -> TransportFuture<Vec<Folder>> {
        let this = self.clone();
        async move {
            let delay = this.begin("list", "list".to_string())?;
            tokio::time::sleep(delay).await;
            let inner = this.inner.lock().unwrap();
            Ok(inner
                .folders
                .iter()
                .map(|(path, msgs)| Folder {
                    name: path.clone(),
                    path: path.clone(),
                    unread_count: 0,
                    total_count: msgs.len() as u32,
                })
                .collect())
        }
        .boxed()
    }

    fn count_messages(&self, folder: &str) -> TransportFuture<u32> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let delay = this.begin("count", format!("count {folder}"))?;
            tokio::time::sleep(delay).await;
            let inner = this.inner.lock().unwrap();
            inner
                .folders
                .get(&folder)
                .map(|msgs| msgs.len() as u32)
                .ok_or(TransportError::UnknownFolder(folder))
        }
        .boxed()
    }

    fn fetch_messages(&self, folder: &str) -> TransportFuture<Vec<MessageMeta>> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let delay = this.begin("fetch", format!("fetch {folder}"))?;
            tokio::time::sleep(delay).await;
            let inner = this.inner.lock().unwrap();
            inner
                .folders
                .get(&folder)
                .map(|msgs| {
                    msgs.iter()
                        .map(|m| MessageMeta {
                            uid: m.uid,
                            received: m.received,
                        })
                        .collect()
                })
                .ok_or(TransportError::UnknownFolder(folder))
        }
        .boxed()
    }

    fn set_flags(
        &self,
        folder: &str,
        uids: &[u64],
        flag: MessageFlag,
        set: bool,
    ) -> TransportFuture<()> {
        let this = self.clone();
        let folder = folder.to_string();
        let uids = uids.to_vec();
        async move {
            let delay = this.begin("set_flags", format!("set_flags {folder}"))?;
            tokio::time::sleep(delay).await;
            let mut inner = this.inner.lock().unwrap();
            let msgs = inner
                .folders
                .get_mut(&folder)
                .ok_or(TransportError::UnknownFolder(folder))?;
            if flag == MessageFlag::Deleted {
                for msg in msgs.iter_mut() {
                    if uids.contains(&msg.uid) {
                        msg.deleted = set;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn expunge(&self, folder: &str) -> TransportFuture<()> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let delay = this.begin("expunge", format!("expunge {folder}"))?;
            tokio::time::sleep(delay).await;
            let mut inner = this.inner.lock().unwrap();
            let msgs = inner
                .folders
                .get_mut(&folder)
                .ok_or(TransportError::UnknownFolder(folder))?;
            msgs.retain(|m| !m.deleted);
            Ok(())
        }
        .boxed()
    }

    fn fetch_full_message(&self, folder: &str, uid: u64) -> TransportFuture<Vec<u8>> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let delay = this.begin("read", format!("read {folder} {uid}"))?;
            tokio::time::sleep(delay).await;
            let inner = this.inner.lock().unwrap();
            if inner.empty_reads.contains(&uid) {
                return Ok(Vec::new());
            }
            inner
                .folders
                .get(&folder)
                .and_then(|msgs| msgs.iter().find(|m| m.uid == uid))
                .map(|m| m.body.clone())
                .ok_or(TransportError::Imap(format!("no such uid {uid}")))
        }
        .boxed()
    }

    fn append_message(
        &self,
        folder: &str,
        bytes: Vec<u8>,
        _flag: Option<MessageFlag>,
    ) -> TransportFuture<()> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let delay = this.begin("append", format!("append {folder}"))?;
            tokio::time::sleep(delay).await;
            let mut inner = this.inner.lock().unwrap();
            if inner.drop_appends {
                return Ok(());
            }
            inner.next_uid += 1;
            let uid = inner.next_uid;
            let msgs = inner
                .folders
                .entry(folder)
                .or_default();
            msgs.push(MockMessage {
                uid,
                received: 0,
                body: bytes,
                deleted: false,
            });
            Ok(())
        }
        .boxed()
    }
}
