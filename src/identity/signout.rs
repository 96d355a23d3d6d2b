use std::sync::Arc;

use tracing::{info, warn};

use super::provider::CredentialVerifier;
use super::session::{Session, SessionStore};

/// Ends the session. Local state is cleared even when the verifier cannot be reached.
#[derive(Clone)]
pub struct SignOutFlow {
    verifier: Arc<dyn CredentialVerifier>,
    session: SessionStore,
}

impl SignOutFlow {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, session: SessionStore) -> Self {
        Self { verifier, session }
    }

    /// Runs to completion on its own task, so a caller that stops waiting still
    /// ends up signed out.
    pub async fn sign_out(&self) -> Session {
        let ticket = self.session.begin_sign_out();
        let verifier = self.verifier.clone();
        let work = tokio::spawn(async move {
            if let Err(e) = verifier.invalidate().await {
                warn!(target: "auth", "session invalidation failed, clearing local state anyway: {}", e);
            }
            if ticket.commit_signed_out(None) {
                info!(target: "auth", "signed out");
            }
        });
        if let Err(e) = work.await {
            // The ticket was dropped with the task; make sure nothing stays signed in.
            warn!(target: "auth", "sign-out task failed: {}", e);
            self.session.begin_sign_out().commit_signed_out(None);
        }
        self.session.snapshot()
    }
}
