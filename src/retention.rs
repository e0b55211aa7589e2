use crate::config::RetentionPolicy;
use crate::session::AccountSession;

/// Delete messages older than the policy threshold from one account.
///
/// Intentionally best-effort: failures are logged and swallowed, and there
/// is no count verification before or after. The archive workflow is the
/// careful one; retention only ever throws away mail the operator already
/// declared disposable.
pub async fn run(session: &AccountSession, policy: &RetentionPolicy) {
    if !policy.enabled() {
        log::debug!("{}: retention disabled", session.name());
        return;
    }
    log::info!(
        "{} delete older than {} days from {}",
        session.name(),
        policy.days,
        policy.folder
    );
    let old = session.find_old_messages(&policy.folder, policy.days).await;
    if old.is_empty() {
        log::info!("{} {}: nothing to delete", session.name(), policy.folder);
        return;
    }
    log::info!(
        "{} {}: deleting {} messages",
        session.name(),
        policy.folder,
        old.len()
    );
    // Expunge only once the flags are confirmed set.
    if !session.mark_deleted(&policy.folder, &old).await {
        log::error!(
            "{} {}: could not flag messages deleted, leaving folder untouched",
            session.name(),
            policy.folder
        );
        return;
    }
    if !session.expunge(&policy.folder).await {
        log::error!("{} {}: expunge failed", session.name(), policy.folder);
    }
}
