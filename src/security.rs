use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use once_cell::sync::Lazy;
use password_hash::{PasswordHash, SaltString};
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;

use crate::config::AdminSeed;
use crate::error::{AppError, AppResult};
use crate::identity::{LocalCredentialVerifier, Role};
use crate::storage::{Document, IdentityRecordStore};

/// Minimum length for passwords set through account administration.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_SHAPE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").ok());

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

pub fn is_valid_email(email: &str) -> bool {
    match EMAIL_SHAPE.as_ref() {
        Some(re) => re.is_match(email.trim()),
        None => false,
    }
}

/// Shape checks applied when an administrator creates an account.
pub fn validate_new_account(email: &str, password: &str) -> AppResult<()> {
    if !is_valid_email(email) {
        return Err(AppError::user("invalid_email", "email address is not well formed"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::user("weak_password", "password must be at least 8 characters long"));
    }
    Ok(())
}

pub fn now_rfc3339() -> String { chrono::Utc::now().to_rfc3339() }

pub(crate) fn doc_from(v: Value) -> Document {
    match v { Value::Object(m) => m, _ => Document::new() }
}

/// Create the configured administrator if the account does not exist yet, and make
/// sure its identity record carries the admin role. Safe to call on every start.
pub async fn ensure_default_admin(
    verifier: &LocalCredentialVerifier,
    records: &dyn IdentityRecordStore,
    seed: &AdminSeed,
) -> Result<()> {
    let (user, created) = match verifier.find_account(&seed.email) {
        Some(user) => (user, false),
        None => {
            let user = verifier
                .create_account(&seed.email, &seed.password, &seed.display_name)
                .await
                .with_context(|| format!("While creating admin account {}", seed.email))?;
            (user, true)
        }
    };
    let mut record = doc_from(json!({
        "email": user.email,
        "name": seed.display_name,
        "role": Role::Admin.as_str(),
        "updated_at": now_rfc3339(),
    }));
    let existing = records.get(&user.unique_id).await.context("While reading admin record")?;
    if existing.is_none() {
        record.insert("created_at".into(), Value::String(now_rfc3339()));
        record.insert("status".into(), Value::String("active".into()));
    }
    records.put(&user.unique_id, record, true).await.context("While writing admin record")?;
    info!(target: "startup", email = %user.email, uid = %user.unique_id, created, "default admin ensured");
    Ok(())
}
