use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, AuthError};
use crate::security;

/// What the credential verifier knows about a signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedUser {
    pub unique_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account disabled")]
    AccountDisabled,
    #[error("network failure: {0}")]
    Network(String),
    #[error("{0}")]
    Unknown(String),
}

impl From<VerifyError> for AuthError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::InvalidCredentials => AuthError::InvalidCredentials,
            VerifyError::Network(msg) => AuthError::Network(msg),
            VerifyError::AccountDisabled => AuthError::Unknown("account_disabled".into()),
            VerifyError::Unknown(msg) => AuthError::Unknown(msg),
        }
    }
}

/// Stream of identity changes. The first `next()` yields the identity current at
/// subscription time; later calls wait for the next sign-in or sign-out.
/// Returns `None` once the verifier is gone. Dropping the value unsubscribes.
#[derive(Debug)]
pub struct IdentitySubscription {
    rx: watch::Receiver<Option<VerifiedUser>>,
    primed: bool,
}

impl IdentitySubscription {
    pub fn new(rx: watch::Receiver<Option<VerifiedUser>>) -> Self {
        Self { rx, primed: false }
    }

    pub async fn next(&mut self) -> Option<Option<VerifiedUser>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// External service that checks e-mail/password pairs and owns the persisted session.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_password(&self, email: &str, password: &str) -> Result<VerifiedUser, VerifyError>;

    fn subscribe(&self) -> IdentitySubscription;

    /// Best effort: callers clear their own state regardless of the outcome.
    async fn invalidate(&self) -> Result<(), VerifyError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    unique_id: String,
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    password_hash: String,
    #[serde(default)]
    disabled: bool,
}

impl Account {
    fn to_user(&self) -> VerifiedUser {
        VerifiedUser {
            unique_id: self.unique_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    unique_id: Option<String>,
}

fn email_key(email: &str) -> String { email.trim().to_ascii_lowercase() }

/// Argon2-backed verifier. With a root directory it keeps accounts in
/// `<root>/auth/accounts.json` and the signed-in account in `<root>/auth/session.json`;
/// without one everything lives in memory.
pub struct LocalCredentialVerifier {
    dir: Option<PathBuf>,
    accounts: RwLock<HashMap<String, Account>>,
    // Held across every account-table change and its write to disk.
    persist_lock: tokio::sync::Mutex<()>,
    current: watch::Sender<Option<VerifiedUser>>,
}

impl LocalCredentialVerifier {
    pub fn in_memory() -> Self {
        let (current, _) = watch::channel(None);
        Self { dir: None, accounts: RwLock::new(HashMap::new()), persist_lock: tokio::sync::Mutex::new(()), current }
    }

    /// Load accounts and rehydrate the persisted session, if any.
    pub async fn open(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let dir = root.as_ref().join("auth");
        tokio::fs::create_dir_all(&dir).await
            .with_context(|| format!("Failed to create or access auth folder: {}", dir.display()))?;

        let mut accounts: HashMap<String, Account> = HashMap::new();
        let accounts_path = dir.join("accounts.json");
        if tokio::fs::try_exists(&accounts_path).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&accounts_path).await
                .with_context(|| format!("While reading {}", accounts_path.display()))?;
            let list: Vec<Account> = serde_json::from_slice(&bytes)
                .with_context(|| format!("While parsing {}", accounts_path.display()))?;
            for a in list { accounts.insert(email_key(&a.email), a); }
        }

        let session_path = dir.join("session.json");
        let mut current_user = None;
        if let Ok(bytes) = tokio::fs::read(&session_path).await {
            match serde_json::from_slice::<PersistedSession>(&bytes) {
                Ok(PersistedSession { unique_id: Some(uid) }) => {
                    current_user = accounts.values().find(|a| a.unique_id == uid && !a.disabled).map(Account::to_user);
                    if current_user.is_none() {
                        warn!(target: "auth", uid = %uid, "persisted session refers to an unknown or disabled account; ignoring");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(target: "auth", "ignoring unreadable session file {}: {}", session_path.display(), e),
            }
        }
        info!(target: "startup", accounts = accounts.len(), rehydrated = current_user.is_some(), "credential verifier opened");
        let (current, _) = watch::channel(current_user);
        Ok(Self { dir: Some(dir), accounts: RwLock::new(accounts), persist_lock: tokio::sync::Mutex::new(()), current })
    }

    pub fn find_account(&self, email: &str) -> Option<VerifiedUser> {
        self.accounts.read().get(&email_key(email)).map(Account::to_user)
    }

    pub fn current_user(&self) -> Option<VerifiedUser> { self.current.borrow().clone() }

    pub async fn create_account(&self, email: &str, password: &str, display_name: &str) -> AppResult<VerifiedUser> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::user("missing_credentials", "email and password are required"));
        }
        let pw = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || security::hash_password(&pw))
            .await
            .map_err(|e| AppError::internal("hash_failed".to_string(), e.to_string()))??;
        let key = email_key(email);
        let _guard = self.persist_lock.lock().await;
        let account = {
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&key) {
                return Err(AppError::conflict("account_exists".to_string(), format!("an account for {email} already exists")));
            }
            let display_name = Some(display_name.trim().to_string()).filter(|s| !s.is_empty());
            let account = Account {
                unique_id: uuid::Uuid::new_v4().to_string(),
                email: email.trim().to_string(),
                display_name,
                photo_url: None,
                password_hash,
                disabled: false,
            };
            accounts.insert(key.clone(), account.clone());
            account
        };
        if let Err(e) = self.persist_accounts().await {
            self.accounts.write().remove(&key);
            return Err(e);
        }
        info!(target: "auth", email = %account.email, uid = %account.unique_id, "account created");
        Ok(account.to_user())
    }

    /// Delete an account, e.g. to undo a registration that could not be completed.
    pub async fn remove_account(&self, email: &str) -> AppResult<()> {
        let key = email_key(email);
        let _guard = self.persist_lock.lock().await;
        let Some(removed) = self.accounts.write().remove(&key) else {
            return Err(AppError::not_found("account_not_found".to_string(), format!("no account for {email}")));
        };
        if let Err(e) = self.persist_accounts().await {
            self.accounts.write().insert(key, removed);
            return Err(e);
        }
        info!(target: "auth", email = %removed.email, uid = %removed.unique_id, "account removed");
        Ok(())
    }

    pub async fn set_disabled(&self, email: &str, disabled: bool) -> AppResult<()> {
        let key = email_key(email);
        let _guard = self.persist_lock.lock().await;
        let previous = {
            let mut accounts = self.accounts.write();
            let Some(acc) = accounts.get_mut(&key) else {
                return Err(AppError::not_found("account_not_found".to_string(), format!("no account for {email}")));
            };
            std::mem::replace(&mut acc.disabled, disabled)
        };
        if let Err(e) = self.persist_accounts().await {
            if let Some(acc) = self.accounts.write().get_mut(&key) {
                acc.disabled = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    // Callers hold `persist_lock`, so snapshots reach disk in order.
    async fn persist_accounts(&self) -> AppResult<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let mut list: Vec<Account> = self.accounts.read().values().cloned().collect();
        list.sort_by(|a, b| a.email.cmp(&b.email));
        let body = serde_json::to_vec_pretty(&list).map_err(|e| AppError::internal("encode_failed".to_string(), e.to_string()))?;
        write_atomic(dir, "accounts.json", body).await
    }

    async fn persist_session(&self, unique_id: Option<&str>) -> Result<(), VerifyError> {
        let Some(dir) = &self.dir else { return Ok(()) };
        if unique_id.is_none() {
            return match tokio::fs::remove_file(dir.join("session.json")).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(VerifyError::Unknown(format!("failed to clear persisted session: {e}"))),
            };
        }
        let body = serde_json::to_vec(&PersistedSession { unique_id: unique_id.map(str::to_string) })
            .map_err(|e| VerifyError::Unknown(e.to_string()))?;
        write_atomic(dir, "session.json", body).await.map_err(|e| VerifyError::Unknown(e.to_string()))
    }
}

async fn write_atomic(dir: &Path, name: &str, body: Vec<u8>) -> AppResult<()> {
    let tmp = dir.join(format!(".{name}.tmp"));
    let target = dir.join(name);
    let io_err = |e: std::io::Error| AppError::io("write_failed".to_string(), format!("{}: {e}", target.display()));
    tokio::fs::write(&tmp, body).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, &target).await.map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl CredentialVerifier for LocalCredentialVerifier {
    async fn verify_password(&self, email: &str, password: &str) -> Result<VerifiedUser, VerifyError> {
        let account = self.accounts.read().get(&email_key(email)).cloned();
        let Some(account) = account else {
            debug!(target: "auth", email = %email, "no such account");
            return Err(VerifyError::InvalidCredentials);
        };
        let hash = account.password_hash.clone();
        let pw = password.to_string();
        let ok = tokio::task::spawn_blocking(move || security::verify_password(&hash, &pw))
            .await
            .map_err(|e| VerifyError::Unknown(e.to_string()))?;
        if !ok {
            return Err(VerifyError::InvalidCredentials);
        }
        if account.disabled {
            return Err(VerifyError::AccountDisabled);
        }
        let user = account.to_user();
        self.persist_session(Some(&user.unique_id)).await?;
        self.current.send_replace(Some(user.clone()));
        Ok(user)
    }

    fn subscribe(&self) -> IdentitySubscription {
        IdentitySubscription::new(self.current.subscribe())
    }

    async fn invalidate(&self) -> Result<(), VerifyError> {
        self.current.send_replace(None);
        self.persist_session(None).await
    }
}
