//! Turning a verified account into a full [`Identity`] by consulting its identity record.
//! Shared by the login flow and the session initializer.

use serde_json::{json, Value};
use tracing::{debug, info};

use super::principal::{Identity, Role, Status};
use super::provider::VerifiedUser;
use crate::error::AuthError;
use crate::security::{doc_from, now_rfc3339};
use crate::storage::{Document, IdentityRecordStore};

fn str_field<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.trim().is_empty())
}

/// Look up (or create) the record for `user`, backfill a missing role, and merge.
///
/// Writes at most once: a fresh record when none exists, or a `{role}` merge when
/// the stored record has no role. An unreachable store fails the whole resolution;
/// a default role is only granted once the record is confirmed absent.
pub async fn resolve_identity(records: &dyn IdentityRecordStore, user: &VerifiedUser) -> Result<Identity, AuthError> {
    let uid = user.unique_id.as_str();
    let doc = records.get(uid).await?;

    let (role, status, doc) = match doc {
        None => {
            let now = now_rfc3339();
            let fresh = doc_from(json!({
                "email": user.email,
                "name": non_empty(&user.display_name).unwrap_or("User"),
                "photo_url": non_empty(&user.photo_url).unwrap_or(""),
                "role": Role::DEFAULT.as_str(),
                "status": Status::Active.as_str(),
                "created_at": now,
                "updated_at": now,
            }));
            records.put(uid, fresh.clone(), false).await?;
            info!(target: "auth", uid, "created identity record with default role");
            (Role::DEFAULT, Status::Active, fresh)
        }
        Some(doc) => {
            let role = match str_field(&doc, "role") {
                Some(r) => r.parse::<Role>()?,
                None => {
                    let patch = doc_from(json!({ "role": Role::DEFAULT.as_str() }));
                    records.put(uid, patch, true).await?;
                    info!(target: "auth", uid, "backfilled missing role");
                    Role::DEFAULT
                }
            };
            let status = match str_field(&doc, "status") {
                Some(s) => s.parse::<Status>()?,
                None => Status::Active,
            };
            (role, status, doc)
        }
    };

    let display_name = non_empty(&user.display_name)
        .or_else(|| str_field(&doc, "name"))
        .unwrap_or("User")
        .to_string();
    let photo_url = non_empty(&user.photo_url)
        .or_else(|| str_field(&doc, "photo_url"))
        .unwrap_or("")
        .to_string();
    debug!(target: "auth", uid, role = %role, "identity resolved");
    Ok(Identity {
        unique_id: user.unique_id.clone(),
        email: user.email.clone(),
        display_name,
        photo_url,
        role,
        status,
    })
}

/// Administrative role change on an existing record.
pub async fn update_user_role(records: &dyn IdentityRecordStore, unique_id: &str, role: Role) -> Result<(), AuthError> {
    if records.get(unique_id).await?.is_none() {
        return Err(AuthError::RecordLookup(format!("no identity record for {unique_id}")));
    }
    let patch = doc_from(json!({ "role": role.as_str(), "updated_at": now_rfc3339() }));
    records.put(unique_id, patch, true).await?;
    info!(target: "auth", uid = unique_id, role = %role, "role updated");
    Ok(())
}
