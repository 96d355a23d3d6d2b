use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::provider::{CredentialVerifier, IdentitySubscription, VerifiedUser};
use super::resolve::resolve_identity;
use super::session::{Session, SessionStore};
use crate::storage::IdentityRecordStore;

/// Consumes the verifier's identity notifications for the lifetime of the process
/// and keeps the [`SessionStore`] in step with them.
pub struct SessionInitializer {
    verifier: Arc<dyn CredentialVerifier>,
    records: Arc<dyn IdentityRecordStore>,
    session: SessionStore,
    started: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInitializer {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, records: Arc<dyn IdentityRecordStore>, session: SessionStore) -> Self {
        Self { verifier, records, session, started: AtomicBool::new(false), listener: Mutex::new(None) }
    }

    /// Subscribe, settle the session from the first notification, and leave a
    /// listener task running for later ones. Calls after the first return the
    /// current snapshot without subscribing again.
    pub async fn initialize(&self) -> Session {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(target: "auth", "initialization already started");
            return self.session.snapshot();
        }
        let mut subscription = self.verifier.subscribe();
        // A verifier that closes before its first notification counts as "no session".
        let first = subscription.next().await.flatten();
        handle_notification(self.records.as_ref(), &self.session, first).await;
        let handle = tokio::spawn(listen(subscription, self.records.clone(), self.session.clone()));
        *self.listener.lock() = Some(handle);
        let snapshot = self.session.snapshot();
        info!(target: "auth", authenticated = snapshot.is_authenticated(), "session initialized");
        snapshot
    }

    /// Stop listening for identity changes. Only meant for process shutdown.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionInitializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn listen(mut subscription: IdentitySubscription, records: Arc<dyn IdentityRecordStore>, session: SessionStore) {
    while let Some(event) = subscription.next().await {
        handle_notification(records.as_ref(), &session, event).await;
    }
    debug!(target: "auth", "identity subscription closed");
}

fn echoes_current(session: &Session, event: &Option<VerifiedUser>) -> bool {
    match event {
        Some(user) => session.is_authenticated()
            && session.identity().map(|i| i.unique_id == user.unique_id).unwrap_or(false),
        None => !session.is_authenticated() && !session.is_loading(),
    }
}

/// One notification, at most one commit.
pub(crate) async fn handle_notification(records: &dyn IdentityRecordStore, session: &SessionStore, event: Option<VerifiedUser>) {
    let Some(ticket) = session.begin_notification(event.as_ref().map(|u| u.unique_id.as_str())) else {
        debug!(target: "auth", "notification not applied");
        return;
    };
    if ticket.kind() == super::session::Attempt::Notification && echoes_current(&session.snapshot(), &event) {
        debug!(target: "auth", "notification matches committed state");
        return;
    }
    match event {
        Some(user) => match resolve_identity(records, &user).await {
            Ok(identity) => {
                info!(target: "auth", uid = %identity.unique_id, role = %identity.role, "session restored");
                ticket.commit_signed_in(identity);
            }
            Err(e) => {
                error!(target: "auth", uid = %user.unique_id, "failed to restore session: {}", e);
                ticket.commit_signed_out(Some(e.to_string()));
            }
        },
        None => {
            debug!(target: "auth", "no active session");
            ticket.commit_signed_out(None);
        }
    }
}
