use std::path::PathBuf;

use anyhow::{bail, Result};

/// Administrator account created on startup when configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Root for `auth/` (accounts, persisted session) and `users/` (identity records).
    pub data_dir: PathBuf,
    pub admin: Option<AdminSeed>,
    pub login_path: String,
    pub home_path: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("portal_data"),
            admin: None,
            login_path: "/login".to_string(),
            home_path: "/".to_string(),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();
        if let Some(dir) = get("ATRIUM_DATA_DIR") { cfg.data_dir = PathBuf::from(dir); }
        if let Some(p) = get("ATRIUM_LOGIN_PATH") { cfg.login_path = p; }
        if let Some(p) = get("ATRIUM_HOME_PATH") { cfg.home_path = p; }
        for p in [&cfg.login_path, &cfg.home_path] {
            if !p.starts_with('/') { bail!("navigation paths must be absolute, got '{}'", p); }
        }
        cfg.admin = match (get("ATRIUM_ADMIN_EMAIL"), lookup("ATRIUM_ADMIN_PASSWORD").filter(|v| !v.is_empty())) {
            (Some(email), Some(password)) => Some(AdminSeed {
                email,
                password,
                display_name: get("ATRIUM_ADMIN_NAME").unwrap_or_else(|| "Admin User".to_string()),
            }),
            (None, None) => None,
            _ => bail!("ATRIUM_ADMIN_EMAIL and ATRIUM_ADMIN_PASSWORD must be set together"),
        };
        Ok(cfg)
    }
}
