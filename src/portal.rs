//!
//! atrium portal shell
//! -------------------
//! Wires the session flows to a navigation model: the current location, the
//! location remembered when the guard sends a visitor to the login view, and
//! the landing dashboard per role. Also hosts the admin-only account operations,
//! which are gated by the same route guard as the admin dashboard.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{AppError, AppResult, AuthError};
use crate::identity::{
    update_user_role, CredentialVerifier, GuardDecision, Identity, LocalCredentialVerifier, LoginFlow, Role,
    RouteGuard, RouteTable, Session, SessionInitializer, SessionStore, SignOutFlow, VerifiedUser, SUPERSEDED,
};
use crate::security::{doc_from, now_rfc3339, validate_new_account};
use crate::storage::IdentityRecordStore;

/// Location whose guard decision authorizes account administration.
pub const USER_ADMIN_PATH: &str = "/dashboard/admin/users";

/// Outcome of one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigation {
    pub requested: String,
    pub decision: GuardDecision,
    /// Where the portal ended up.
    pub location: String,
}

#[derive(Debug, Default)]
struct NavState {
    location: String,
    return_to: Option<String>,
}

pub struct Portal {
    session: SessionStore,
    initializer: SessionInitializer,
    login: LoginFlow,
    sign_out: SignOutFlow,
    guard: RouteGuard,
    records: Arc<dyn IdentityRecordStore>,
    accounts: Option<Arc<LocalCredentialVerifier>>,
    login_path: String,
    home_path: String,
    nav: Mutex<NavState>,
}

impl Portal {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, records: Arc<dyn IdentityRecordStore>, config: &PortalConfig) -> Self {
        let session = SessionStore::new();
        Self {
            initializer: SessionInitializer::new(verifier.clone(), records.clone(), session.clone()),
            login: LoginFlow::new(verifier.clone(), records.clone(), session.clone()),
            sign_out: SignOutFlow::new(verifier, session.clone()),
            guard: RouteGuard::new(RouteTable::portal()),
            records,
            accounts: None,
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
            nav: Mutex::new(NavState { location: config.home_path.clone(), return_to: None }),
            session,
        }
    }

    /// Portal backed by the local verifier, with account administration enabled.
    pub fn local(verifier: Arc<LocalCredentialVerifier>, records: Arc<dyn IdentityRecordStore>, config: &PortalConfig) -> Self {
        let mut portal = Self::new(verifier.clone(), records, config);
        portal.accounts = Some(verifier);
        portal
    }

    pub async fn start(&self) -> Session {
        self.initializer.initialize().await
    }

    pub fn shutdown(&self) {
        self.initializer.shutdown();
    }

    pub fn session(&self) -> Session { self.session.snapshot() }

    pub fn whoami(&self) -> Option<Identity> { self.session.snapshot().identity().cloned() }

    pub fn location(&self) -> String { self.nav.lock().location.clone() }

    pub fn return_to(&self) -> Option<String> { self.nav.lock().return_to.clone() }

    pub fn is_known_route(&self, location: &str) -> bool { self.guard.routes().is_known(location) }

    pub fn navigate(&self, requested: &str) -> Navigation {
        let decision = self.guard.check(&self.session.snapshot(), requested);
        let mut nav = self.nav.lock();
        match &decision {
            GuardDecision::Allow | GuardDecision::Pending => nav.location = requested.to_string(),
            GuardDecision::RedirectToLogin { return_to } => {
                nav.return_to = Some(return_to.clone());
                nav.location = self.login_path.clone();
            }
            GuardDecision::RedirectToDefault => nav.location = self.home_path.clone(),
        }
        debug!(target: "portal", requested, decision = ?decision, location = %nav.location, "navigation");
        Navigation { requested: requested.to_string(), decision, location: nav.location.clone() }
    }

    /// Sign in, then continue to the remembered location or the role's dashboard.
    pub async fn login(&self, email: &str, password: &str) -> AppResult<Navigation> {
        let superseded = || AppError::auth("session_superseded", "login was superseded by a later sign-out");
        let session = match self.login.login(email, password).await {
            Err(AuthError::Unknown(detail)) if detail == SUPERSEDED => return Err(superseded()),
            other => other?,
        };
        let Some(identity) = session.identity() else {
            return Err(superseded());
        };
        let target = self
            .nav
            .lock()
            .return_to
            .take()
            .unwrap_or_else(|| identity.role.dashboard_path().to_string());
        Ok(self.navigate(&target))
    }

    pub async fn logout(&self) -> Navigation {
        self.sign_out.sign_out().await;
        self.nav.lock().return_to = None;
        let home = self.home_path.clone();
        self.navigate(&home)
    }

    fn require_user_admin(&self) -> AppResult<Identity> {
        let session = self.session.snapshot();
        match self.guard.check(&session, USER_ADMIN_PATH) {
            GuardDecision::Allow => session
                .identity()
                .cloned()
                .ok_or_else(|| AppError::auth("not_authenticated", "sign in first")),
            GuardDecision::Pending => Err(AppError::conflict("session_pending", "session is still loading")),
            GuardDecision::RedirectToLogin { .. } => Err(AppError::auth("not_authenticated", "sign in first")),
            GuardDecision::RedirectToDefault => Err(AppError::forbidden("role_mismatch", "administrators only")),
        }
    }

    /// Create a sign-in account plus its identity record with the chosen role.
    /// If the record cannot be written the account is removed again, so a retry
    /// starts from scratch.
    pub async fn register_user(&self, email: &str, password: &str, name: &str, role: Role) -> AppResult<VerifiedUser> {
        let admin = self.require_user_admin()?;
        let Some(accounts) = &self.accounts else {
            return Err(AppError::user("unsupported", "this verifier does not manage accounts"));
        };
        validate_new_account(email, password)?;
        let user = accounts.create_account(email, password, name).await?;
        let now = now_rfc3339();
        let name_value = match name.trim() {
            "" => Value::Null,
            n => Value::String(n.to_string()),
        };
        let record = doc_from(json!({
            "email": user.email,
            "name": name_value,
            "role": role.as_str(),
            "status": "active",
            "created_at": now,
            "updated_at": now,
        }));
        if let Err(e) = self.records.put(&user.unique_id, record, false).await {
            if let Err(undo) = accounts.remove_account(&user.email).await {
                warn!(target: "portal", email = %user.email, "could not roll back account after failed record write: {}", undo);
            }
            return Err(AppError::io("record_write_failed".to_string(), e.to_string()));
        }
        info!(target: "portal", by = %admin.email, email = %user.email, role = %role, "user registered");
        Ok(user)
    }

    pub async fn set_role(&self, unique_id: &str, role: Role) -> AppResult<()> {
        let admin = self.require_user_admin()?;
        let existing = self.records.get(unique_id).await.map_err(|e| AppError::io("record_read_failed".to_string(), e.to_string()))?;
        if existing.is_none() {
            return Err(AppError::not_found("user_not_found".to_string(), format!("no identity record for {unique_id}")));
        }
        update_user_role(self.records.as_ref(), unique_id, role).await?;
        info!(target: "portal", by = %admin.email, uid = unique_id, role = %role, "role changed");
        Ok(())
    }
}
