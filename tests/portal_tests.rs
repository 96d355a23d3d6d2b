mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::tempdir;

use atrium::cli::{run_command, Command, Reply};
use atrium::config::{AdminSeed, PortalConfig};
use atrium::identity::{GuardDecision, LocalCredentialVerifier, Role};
use atrium::portal::Portal;
use atrium::security::ensure_default_admin;
use atrium::storage::{FileRecordStore, IdentityRecordStore};

fn seed() -> AdminSeed {
    AdminSeed { email: "admin@example.org".into(), password: "adminpass1".into(), display_name: "Ada Admin".into() }
}

/// Open the data directory the way the console binary does.
async fn open_portal(dir: &Path) -> (Portal, Arc<LocalCredentialVerifier>, Arc<FileRecordStore>) {
    let config = PortalConfig { data_dir: dir.to_path_buf(), admin: Some(seed()), ..PortalConfig::default() };
    let verifier = Arc::new(LocalCredentialVerifier::open(dir).await.unwrap());
    let records = Arc::new(FileRecordStore::new(dir));
    ensure_default_admin(&verifier, &*records, &seed()).await.unwrap();
    let portal = Portal::local(verifier.clone(), records.clone(), &config);
    portal.start().await;
    (portal, verifier, records)
}

#[tokio::test]
async fn default_admin_is_idempotent() {
    let tmp = tempdir().unwrap();
    let verifier = LocalCredentialVerifier::open(tmp.path()).await.unwrap();
    let records = FileRecordStore::new(tmp.path());
    ensure_default_admin(&verifier, &records, &seed()).await.unwrap();
    let first = verifier.find_account("admin@example.org").unwrap();
    let created_at = records.get(&first.unique_id).await.unwrap().unwrap()["created_at"].clone();

    ensure_default_admin(&verifier, &records, &seed()).await.unwrap();
    let again = verifier.find_account("ADMIN@example.org").unwrap();
    assert_eq!(first.unique_id, again.unique_id);
    let rec = records.get(&first.unique_id).await.unwrap().unwrap();
    assert_eq!(rec["role"], "admin");
    assert_eq!(rec["created_at"], created_at);
}

#[tokio::test]
async fn protected_view_returns_after_login() {
    let tmp = tempdir().unwrap();
    let (portal, _, _) = open_portal(tmp.path()).await;

    let nav = portal.navigate("/dashboard/admin/users");
    assert_eq!(nav.decision, GuardDecision::RedirectToLogin { return_to: "/dashboard/admin/users".into() });
    assert_eq!(nav.location, "/login");
    assert_eq!(portal.return_to().as_deref(), Some("/dashboard/admin/users"));

    let nav = portal.login("admin@example.org", "adminpass1").await.unwrap();
    assert_eq!(nav.decision, GuardDecision::Allow);
    assert_eq!(portal.location(), "/dashboard/admin/users");
    assert_eq!(portal.return_to(), None);
}

#[tokio::test]
async fn login_lands_on_role_dashboard_and_wrong_role_goes_home() {
    let tmp = tempdir().unwrap();
    let (portal, _, _) = open_portal(tmp.path()).await;
    portal.login("admin@example.org", "adminpass1").await.unwrap();
    portal.register_user("t@example.com", "teacherpw1", "Tess", Role::Teacher).await.unwrap();
    portal.logout().await;

    let nav = portal.login("t@example.com", "teacherpw1").await.unwrap();
    assert_eq!(nav.location, "/dashboard/teacher");
    assert_eq!(portal.whoami().unwrap().display_name, "Tess");

    let nav = portal.navigate("/dashboard/admin");
    assert_eq!(nav.decision, GuardDecision::RedirectToDefault);
    assert_eq!(nav.location, "/");
}

#[tokio::test]
async fn wrong_password_keeps_visitor_on_login() {
    let tmp = tempdir().unwrap();
    let (portal, _, _) = open_portal(tmp.path()).await;
    portal.navigate("/dashboard");
    let err = portal.login("admin@example.org", "wrongpass").await.unwrap_err();
    assert_eq!(err.code_str(), "invalid_credentials");
    assert_eq!(portal.location(), "/login");
    assert_eq!(portal.return_to().as_deref(), Some("/dashboard"));
    assert_eq!(portal.session().last_error(), Some("invalid_credentials"));
}

#[tokio::test]
async fn session_survives_restart_until_logout() {
    let tmp = tempdir().unwrap();
    {
        let (portal, _, _) = open_portal(tmp.path()).await;
        portal.login("admin@example.org", "adminpass1").await.unwrap();
        portal.shutdown();
    }
    {
        let (portal, verifier, _) = open_portal(tmp.path()).await;
        let s = portal.session();
        assert!(s.is_authenticated());
        assert_eq!(s.identity().unwrap().role, Role::Admin);
        assert!(verifier.current_user().is_some());
        portal.logout().await;
        portal.shutdown();
    }
    let (portal, verifier, _) = open_portal(tmp.path()).await;
    assert!(!portal.session().is_authenticated());
    assert!(verifier.current_user().is_none());
}

#[tokio::test]
async fn disabled_account_cannot_sign_in() {
    let tmp = tempdir().unwrap();
    let (portal, verifier, _) = open_portal(tmp.path()).await;
    portal.login("admin@example.org", "adminpass1").await.unwrap();
    portal.register_user("p@example.com", "parentpw1", "", Role::Parent).await.unwrap();
    portal.logout().await;
    verifier.set_disabled("p@example.com", true).await.unwrap();

    let err = portal.login("p@example.com", "parentpw1").await.unwrap_err();
    assert!(err.message().contains("account_disabled"));
    assert!(!portal.session().is_authenticated());
}

#[tokio::test]
async fn account_administration_requires_admin() {
    let tmp = tempdir().unwrap();
    let (portal, _, records) = open_portal(tmp.path()).await;

    let err = portal.register_user("x@example.com", "longenough", "X", Role::Student).await.unwrap_err();
    assert_eq!(err.code_str(), "not_authenticated");

    portal.login("admin@example.org", "adminpass1").await.unwrap();
    let teacher = portal.register_user("t@example.com", "teacherpw1", "Tess", Role::Teacher).await.unwrap();
    let dup = portal.register_user("T@example.com", "teacherpw1", "Tess", Role::Teacher).await.unwrap_err();
    assert_eq!(dup.code_str(), "account_exists");
    let weak = portal.register_user("w@example.com", "short", "W", Role::Student).await.unwrap_err();
    assert_eq!(weak.code_str(), "weak_password");
    let bad = portal.register_user("not-an-email", "longenough", "W", Role::Student).await.unwrap_err();
    assert_eq!(bad.code_str(), "invalid_email");
    portal.logout().await;

    portal.login("t@example.com", "teacherpw1").await.unwrap();
    let err = portal.set_role(&teacher.unique_id, Role::Admin).await.unwrap_err();
    assert_eq!(err.code_str(), "role_mismatch");
    let rec = records.get(&teacher.unique_id).await.unwrap().unwrap();
    assert_eq!(rec["role"], "teacher");
}

#[tokio::test]
async fn role_change_applies_on_next_login() {
    let tmp = tempdir().unwrap();
    let (portal, _, _) = open_portal(tmp.path()).await;
    portal.login("admin@example.org", "adminpass1").await.unwrap();
    let s = portal.register_user("s@example.com", "studentpw1", "Sam", Role::Student).await.unwrap();
    portal.set_role(&s.unique_id, Role::Parent).await.unwrap();
    let missing = portal.set_role("no-such-uid", Role::Parent).await.unwrap_err();
    assert_eq!(missing.code_str(), "user_not_found");
    portal.logout().await;

    let nav = portal.login("s@example.com", "studentpw1").await.unwrap();
    assert_eq!(nav.location, "/dashboard/parent");
    assert_eq!(portal.whoami().unwrap().role, Role::Parent);
}

#[tokio::test]
async fn console_commands_drive_the_portal() {
    let tmp = tempdir().unwrap();
    let (portal, _, _) = open_portal(tmp.path()).await;

    let run = |line: &'static str| {
        let portal = &portal;
        async move {
            let cmd = Command::parse(line).unwrap().unwrap();
            match run_command(portal, cmd).await.unwrap() {
                Reply::Text(t) => t,
                Reply::Quit => "<quit>".to_string(),
            }
        }
    };

    assert!(run("open /dashboard/admin").await.contains("requires sign-in"));
    assert!(run("login admin@example.org adminpass1").await.contains("viewing /dashboard/admin"));
    assert!(run("whoami").await.contains("admin@example.org"));
    assert!(run("adduser p@example.com parentpw1 parent Pat Doe").await.contains("role parent"));
    assert!(run("status").await.contains("authenticated"));
    assert!(run("open /nowhere").await.contains("not found"));
    assert!(run("logout").await.contains("signed out"));
    assert_eq!(run("quit").await, "<quit>");

    let err = run_command(&portal, Command::SetRole { unique_id: "u".into(), role: Role::Admin }).await.unwrap_err();
    assert_eq!(err.code_str(), "not_authenticated");
}

#[tokio::test]
async fn failed_registration_can_be_retried() {
    let verifier = Arc::new(LocalCredentialVerifier::in_memory());
    let records = Arc::new(common::CountingRecordStore::new());
    ensure_default_admin(&verifier, &*records, &seed()).await.unwrap();
    let portal = Portal::local(verifier.clone(), records.clone(), &PortalConfig::default());
    portal.start().await;
    portal.login("admin@example.org", "adminpass1").await.unwrap();

    records.unreachable.store(true, Ordering::SeqCst);
    let err = portal.register_user("t@example.com", "teacherpw1", "Tess", Role::Teacher).await.unwrap_err();
    assert_eq!(err.code_str(), "record_write_failed");
    assert!(verifier.find_account("t@example.com").is_none());

    records.unreachable.store(false, Ordering::SeqCst);
    let teacher = portal.register_user("t@example.com", "teacherpw1", "Tess", Role::Teacher).await.unwrap();
    assert_eq!(records.inner.peek(&teacher.unique_id).unwrap()["role"], "teacher");
    portal.logout().await;

    let nav = portal.login("t@example.com", "teacherpw1").await.unwrap();
    assert_eq!(portal.whoami().unwrap().role, Role::Teacher);
    assert_eq!(nav.location, "/dashboard/teacher");
}
