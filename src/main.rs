//!
//! atrium console
//! --------------
//! Interactive portal client: restores any persisted session on start, then reads
//! commands from stdin (`help` lists them).

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use atrium::cli::{self, Command, Reply};
use atrium::config::PortalConfig;
use atrium::identity::LocalCredentialVerifier;
use atrium::portal::Portal;
use atrium::storage::FileRecordStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = PortalConfig::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "atrium starting: RUST_LOG='{}', data_dir='{}', admin_seed={}",
        rust_log, config.data_dir.display(), config.admin.is_some()
    );

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create or access data folder: {}", config.data_dir.display()))?;
    let verifier = Arc::new(LocalCredentialVerifier::open(&config.data_dir).await?);
    let records = Arc::new(FileRecordStore::new(&config.data_dir));
    if let Some(seed) = &config.admin {
        atrium::security::ensure_default_admin(&verifier, &*records, seed)
            .await
            .with_context(|| format!("While ensuring default admin {}", seed.email))?;
    }

    let portal = Portal::local(verifier, records, &config);
    let session = portal.start().await;
    let mut stdout = tokio::io::stdout();
    let banner = match session.identity() {
        Some(i) => format!("welcome back, {} ({})\n", i.display_name, i.role),
        None => "not signed in; type 'help' for commands\n".to_string(),
    };
    stdout.write_all(banner.as_bytes()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = 0;
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let reply = match Command::parse(&line) {
            Ok(None) => continue,
            Ok(Some(cmd)) => cli::run_command(&portal, cmd).await,
            Err(e) => Err(e),
        };
        if matches!(reply, Ok(Reply::Quit)) {
            break;
        }
        status = cli::exit_status(&reply);
        let out = match reply {
            Ok(Reply::Quit) => break,
            Ok(Reply::Text(text)) => text,
            Err(e) => format!("error: {e}"),
        };
        stdout.write_all(out.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    portal.shutdown();
    info!(target: "startup", status, "atrium stopped");
    if status != 0 {
        // Scripted sessions see the outcome of their last command.
        stdout.flush().await?;
        std::process::exit(status);
    }
    Ok(())
}
