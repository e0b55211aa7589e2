use std::collections::HashMap;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use tokio::sync::Mutex;

use melib::backends::{
    BackendEventConsumer, EnvelopeHashBatch, FlagOp, IsSubscribedFn, MailBackend,
};
use melib::conf::AccountSettings;
use melib::email::{Envelope, Flag};
use melib::imap::ImapType;
use melib::{AccountHash, EnvelopeHash, MailboxHash};

use crate::config::AccountConfig;
use crate::models::{Folder, MessageMeta};
use crate::transport::{MailTransport, MessageFlag, TransportError, TransportFuture};

/// A live IMAP transport backed by melib.
///
/// Cheap to clone: the backend and the mailbox path map are shared. All
/// serialization of operations happens above this layer, in the session
/// worker; the internal mutex only guards melib's handle.
#[derive(Clone)]
pub struct ImapTransport {
    account: String,
    backend: Arc<Mutex<Box<ImapType>>>,
    /// Map from folder path to mailbox hash (for lookups).
    mailbox_hashes: Arc<Mutex<HashMap<String, MailboxHash>>>,
}

impl std::fmt::Debug for ImapTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapTransport")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

fn imap_err(e: melib::error::Error) -> TransportError {
    TransportError::Imap(e.to_string())
}

fn to_melib_flag(flag: MessageFlag) -> Flag {
    match flag {
        MessageFlag::Seen => Flag::SEEN,
        MessageFlag::Flagged => Flag::FLAGGED,
        MessageFlag::Deleted => Flag::TRASHED,
    }
}

impl ImapTransport {
    /// Connect to the account's IMAP server and verify the session is live.
    pub async fn connect(config: &AccountConfig) -> Result<Self, TransportError> {
        let mut extra = IndexMap::new();
        extra.insert("server_hostname".into(), config.server.clone());
        extra.insert("server_username".into(), config.username.clone());
        extra.insert("server_password".into(), config.password.clone());
        extra.insert("server_port".into(), config.port.to_string());
        extra.insert(
            "use_tls".into(),
            if config.use_tls() { "true" } else { "false" }.into(),
        );
        extra.insert("use_starttls".into(), "false".into());
        extra.insert("danger_accept_invalid_certs".into(), "false".into());

        let account_settings = AccountSettings {
            name: config.name.clone(),
            root_mailbox: "INBOX".into(),
            format: "imap".into(),
            identity: config.username.clone(),
            extra,
            ..Default::default()
        };

        let is_subscribed: IsSubscribedFn =
            (Arc::new(|_: &str| true) as Arc<dyn Fn(&str) -> bool + Send + Sync>).into();

        let event_consumer = BackendEventConsumer::new(Arc::new(
            |_account_hash: AccountHash, event: melib::backends::BackendEvent| {
                log::debug!("IMAP backend event: {:?}", event);
            },
        ));

        let backend = ImapType::new(&account_settings, is_subscribed, event_consumer)
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let transport = ImapTransport {
            account: config.name.clone(),
            backend: Arc::new(Mutex::new(backend)),
            mailbox_hashes: Arc::new(Mutex::new(HashMap::new())),
        };

        // Verify we can connect
        {
            let backend = transport.backend.lock().await;
            let online_future = backend
                .is_online()
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            online_future
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        Ok(transport)
    }

    /// Fetch the mailbox list, refresh the path map, and return folders.
    async fn load_folders(&self) -> Result<Vec<Folder>, TransportError> {
        let future = {
            let backend = self.backend.lock().await;
            backend.mailboxes().map_err(imap_err)?
        };
        let mailboxes = future.await.map_err(imap_err)?;

        let mut folders: Vec<Folder> = Vec::with_capacity(mailboxes.len());
        let mut path_map = HashMap::new();

        for (hash, mailbox) in &mailboxes {
            let (total, unseen) = mailbox.count().map_err(imap_err)?;
            path_map.insert(mailbox.path().to_string(), *hash);
            folders.push(Folder {
                name: mailbox.name().to_string(),
                path: mailbox.path().to_string(),
                unread_count: unseen as u32,
                total_count: total as u32,
            });
        }

        // Sort: INBOX first, then alphabetical
        folders.sort_by(|a, b| {
            if a.path == "INBOX" {
                std::cmp::Ordering::Less
            } else if b.path == "INBOX" {
                std::cmp::Ordering::Greater
            } else {
                a.path.cmp(&b.path)
            }
        });

        *self.mailbox_hashes.lock().await = path_map;

        Ok(folders)
    }

    /// Resolve a folder path to its mailbox hash, refreshing the map once on
    /// a miss.
    async fn mailbox_hash(&self, folder: &str) -> Result<MailboxHash, TransportError> {
        if let Some(hash) = self.mailbox_hashes.lock().await.get(folder) {
            return Ok(*hash);
        }
        self.load_folders().await?;
        self.mailbox_hashes
            .lock()
            .await
            .get(folder)
            .copied()
            .ok_or_else(|| TransportError::UnknownFolder(folder.to_string()))
    }

    /// Drain the envelope stream for a mailbox into one vector.
    async fn collect_envelopes(
        &self,
        mailbox_hash: MailboxHash,
    ) -> Result<Vec<Envelope>, TransportError> {
        let stream = {
            let mut backend = self.backend.lock().await;
            backend.fetch(mailbox_hash).map_err(imap_err)?
        };
        let mut stream = std::pin::pin!(stream);
        let mut envelopes = Vec::new();
        while let Some(batch) = stream.next().await {
            envelopes.extend(batch.map_err(imap_err)?);
        }
        Ok(envelopes)
    }

    async fn set_flags_inner(
        &self,
        folder: &str,
        uids: &[u64],
        flag: MessageFlag,
        set: bool,
    ) -> Result<(), TransportError> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let hashes: Vec<EnvelopeHash> = uids.iter().map(|uid| EnvelopeHash(*uid)).collect();
        let batch = EnvelopeHashBatch::try_from(&hashes[..])
            .map_err(|_| TransportError::Imap("empty uid batch".into()))?;
        let op = if set {
            FlagOp::Set(to_melib_flag(flag))
        } else {
            FlagOp::UnSet(to_melib_flag(flag))
        };
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .set_flags(batch, mailbox_hash, vec![op])
                .map_err(imap_err)?
        };
        future.await.map_err(imap_err)
    }

    async fn expunge_inner(&self, folder: &str) -> Result<(), TransportError> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let deleted: Vec<EnvelopeHash> = self
            .collect_envelopes(mailbox_hash)
            .await?
            .iter()
            .filter(|envelope| envelope.flags().contains(Flag::TRASHED))
            .map(|envelope| envelope.hash())
            .collect();
        if deleted.is_empty() {
            return Ok(());
        }
        let batch = EnvelopeHashBatch::try_from(&deleted[..])
            .map_err(|_| TransportError::Imap("empty expunge batch".into()))?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .delete_messages(batch, mailbox_hash)
                .map_err(imap_err)?
        };
        future.await.map_err(imap_err)
    }

    async fn append_inner(
        &self,
        folder: &str,
        bytes: Vec<u8>,
        flag: Option<MessageFlag>,
    ) -> Result<(), TransportError> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .save(bytes, mailbox_hash, flag.map(to_melib_flag))
                .map_err(imap_err)?
        };
        future.await.map_err(imap_err)
    }

    async fn fetch_bytes_inner(&self, uid: u64) -> Result<Vec<u8>, TransportError> {
        let future = {
            let backend = self.backend.lock().await;
            backend
                .envelope_bytes_by_hash(EnvelopeHash(uid))
                .map_err(imap_err)?
        };
        future.await.map_err(imap_err)
    }
}

impl MailTransport for ImapTransport {
    fn list_folders(&self) -> TransportFuture<Vec<Folder>> {
        let this = self.clone();
        async move { this.load_folders().await }.boxed()
    }

    fn count_messages(&self, folder: &str) -> TransportFuture<u32> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            // Counts must be current, so always re-list instead of trusting
            // the cached map.
            let folders = this.load_folders().await?;
            folders
                .iter()
                .find(|f| f.path == folder)
                .map(|f| f.total_count)
                .ok_or(TransportError::UnknownFolder(folder))
        }
        .boxed()
    }

    fn fetch_messages(&self, folder: &str) -> TransportFuture<Vec<MessageMeta>> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            let mailbox_hash = this.mailbox_hash(&folder).await?;
            let envelopes = this.collect_envelopes(mailbox_hash).await?;
            Ok(envelopes
                .iter()
                .map(|envelope| MessageMeta {
                    uid: envelope.hash().0,
                    received: envelope.timestamp as i64,
                })
                .collect())
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
        async move { this.set_flags_inner(&folder, &uids, flag, set).await }.boxed()
    }

    fn expunge(&self, folder: &str) -> TransportFuture<()> {
        let this = self.clone();
        let folder = folder.to_string();
        async move { this.expunge_inner(&folder).await }.boxed()
    }

    fn fetch_full_message(&self, folder: &str, uid: u64) -> TransportFuture<Vec<u8>> {
        let this = self.clone();
        let folder = folder.to_string();
        async move {
            // The envelope hash is account-global in melib; the folder only
            // matters for the log line.
            log::debug!("{}: fetching full message {uid} from {folder}", this.account);
            this.fetch_bytes_inner(uid).await
        }
        .boxed()
    }

    fn append_message(
        &self,
        folder: &str,
        bytes: Vec<u8>,
        flag: Option<MessageFlag>,
    ) -> TransportFuture<()> {
        let this = self.clone();
        let folder = folder.to_string();
        async move { this.append_inner(&folder, bytes, flag).await }.boxed()
    }
}
