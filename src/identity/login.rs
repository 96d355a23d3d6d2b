use std::sync::Arc;

use tracing::{info, warn};

use super::provider::CredentialVerifier;
use super::resolve::resolve_identity;
use super::session::{AttemptTicket, Session, SessionStore};
use crate::error::AuthError;
use crate::storage::IdentityRecordStore;

/// Detail of the [`AuthError::Unknown`] returned when a sign-out cuts a login off.
pub const SUPERSEDED: &str = "login_superseded";

/// E-mail/password sign-in against the credential verifier.
#[derive(Clone)]
pub struct LoginFlow {
    verifier: Arc<dyn CredentialVerifier>,
    records: Arc<dyn IdentityRecordStore>,
    session: SessionStore,
}

impl LoginFlow {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, records: Arc<dyn IdentityRecordStore>, session: SessionStore) -> Self {
        Self { verifier, records, session }
    }

    /// Fails fast with [`AuthError::AlreadyInProgress`] while another attempt is loading.
    /// A login that a sign-out overtakes fails with `Unknown("login_superseded")`.
    ///
    /// The round-trip runs on its own task: if the caller goes away mid-flight the
    /// request still completes and lands in the session store, and only the
    /// caller's copy of the result is discarded.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let ticket = self.session.begin_login()?;
        let flow = self.clone();
        let email = email.trim().to_string();
        let password = password.to_string();
        tokio::spawn(async move { flow.run(ticket, &email, &password).await })
            .await
            .map_err(|e| AuthError::Unknown(format!("login task failed: {e}")))?
    }

    async fn run(&self, mut ticket: AttemptTicket, email: &str, password: &str) -> Result<Session, AuthError> {
        info!(target: "auth", email = %email, "login started");
        let user = match self.verifier.verify_password(email, password).await {
            Ok(user) => user,
            Err(e) => {
                let err = AuthError::from(e);
                warn!(target: "auth", email = %email, "login rejected: {}", err);
                ticket.commit_failure(err.to_string());
                return Err(err);
            }
        };
        ticket.set_verified(&user.unique_id);
        if !ticket.is_current() {
            ticket.abandon();
            return Err(self.drop_superseded(&user.unique_id).await);
        }
        match resolve_identity(self.records.as_ref(), &user).await {
            Ok(identity) => {
                info!(target: "auth", uid = %identity.unique_id, role = %identity.role, "login complete");
                if !ticket.commit_signed_in(identity) {
                    return Err(self.drop_superseded(&user.unique_id).await);
                }
                Ok(self.session.snapshot())
            }
            Err(err) => {
                // Verified but no trustworthy role: stay signed out.
                warn!(target: "auth", uid = %user.unique_id, "identity resolution failed: {}", err);
                let current = ticket.commit_signed_out(Some(err.to_string()));
                if !current {
                    return Err(self.drop_superseded(&user.unique_id).await);
                }
                if let Err(e) = self.verifier.invalidate().await {
                    warn!(target: "auth", "failed to invalidate verifier session after resolution failure: {}", e);
                }
                Err(err)
            }
        }
    }

    // Only a sign-out can supersede a login, so the verifier session this
    // attempt just opened must not outlive it.
    async fn drop_superseded(&self, uid: &str) -> AuthError {
        warn!(target: "auth", uid = %uid, "login result superseded by sign-out");
        if let Err(e) = self.verifier.invalidate().await {
            warn!(target: "auth", "failed to invalidate superseded login: {}", e);
        }
        AuthError::Unknown(SUPERSEDED.to_string())
    }
}
