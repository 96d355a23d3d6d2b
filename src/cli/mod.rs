//! Console surface for the portal: command parsing, dispatch and plain-text rendering.

use crate::error::{AppError, AppResult};
use crate::identity::{GuardDecision, Role, Session};
use crate::portal::{Navigation, Portal};

pub const HELP: &str = "Commands:\n  login <email> <password>                  sign in\n  logout                                    sign out\n  open <path>                               navigate to a view (e.g. /dashboard/admin)\n  whoami                                    show the signed-in identity\n  status                                    show session state and current location\n  adduser <email> <password> <role> [name]  create an account (admins only)\n  setrole <uid> <role>                      change a user's role (admins only)\n  help                                      show this help\n  quit | exit                               leave the portal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Logout,
    Open(String),
    WhoAmI,
    Status,
    AddUser { email: String, password: String, role: Role, name: String },
    SetRole { unique_id: String, role: Role },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

fn usage(cmd: &str, shape: &str) -> AppError {
    AppError::user("usage".to_string(), format!("usage: {cmd} {shape}"))
}

fn parse_role(s: &str) -> AppResult<Role> {
    s.parse::<Role>()
        .map_err(|_| AppError::user("invalid_role".to_string(), format!("unknown role '{s}' (student, teacher, parent, admin, user)")))
}

impl Command {
    /// Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> AppResult<Option<Command>> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else { return Ok(None) };
        let rest: Vec<&str> = parts.collect();
        let cmd = match head.to_ascii_lowercase().as_str() {
            "login" => match rest.as_slice() {
                [email, password] => Command::Login { email: email.to_string(), password: password.to_string() },
                _ => return Err(usage("login", "<email> <password>")),
            },
            "logout" | "signout" => Command::Logout,
            "open" | "goto" => match rest.as_slice() {
                [path] => Command::Open(path.to_string()),
                _ => return Err(usage("open", "<path>")),
            },
            "whoami" => Command::WhoAmI,
            "status" => Command::Status,
            "adduser" => match rest.as_slice() {
                [email, password, role, name @ ..] => Command::AddUser {
                    email: email.to_string(),
                    password: password.to_string(),
                    role: parse_role(role)?,
                    name: name.join(" "),
                },
                _ => return Err(usage("adduser", "<email> <password> <role> [name]")),
            },
            "setrole" => match rest.as_slice() {
                [uid, role] => Command::SetRole { unique_id: uid.to_string(), role: parse_role(role)? },
                _ => return Err(usage("setrole", "<uid> <role>")),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(AppError::user("unknown_command".to_string(), format!("unknown command '{other}', try 'help'"))),
        };
        Ok(Some(cmd))
    }
}

pub async fn run_command(portal: &Portal, cmd: Command) -> AppResult<Reply> {
    let text = match cmd {
        Command::Login { email, password } => {
            let nav = portal.login(&email, &password).await?;
            let who = portal.whoami().map(|i| format!("{} ({})", i.display_name, i.role)).unwrap_or_default();
            format!("signed in as {who}\n{}", render_navigation(portal, &nav))
        }
        Command::Logout => {
            let nav = portal.logout().await;
            format!("signed out\n{}", render_navigation(portal, &nav))
        }
        Command::Open(path) => render_navigation(portal, &portal.navigate(&path)),
        Command::WhoAmI => match portal.whoami() {
            Some(i) => render_table(&[
                ("uid", i.unique_id),
                ("email", i.email),
                ("name", i.display_name),
                ("role", i.role.to_string()),
                ("status", i.status.as_str().to_string()),
            ]),
            None => "not signed in".to_string(),
        },
        Command::Status => render_status(&portal.session(), &portal.location(), portal.return_to()),
        Command::AddUser { email, password, role, name } => {
            let user = portal.register_user(&email, &password, &name, role).await?;
            format!("created {} with role {} (uid {})", user.email, role, user.unique_id)
        }
        Command::SetRole { unique_id, role } => {
            portal.set_role(&unique_id, role).await?;
            format!("role of {unique_id} set to {role}")
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Text(text))
}

/// Status the console exits with when `outcome` is the last command it ran.
pub fn exit_status(outcome: &AppResult<Reply>) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}

pub fn render_navigation(portal: &Portal, nav: &Navigation) -> String {
    match &nav.decision {
        GuardDecision::Allow if !portal.is_known_route(&nav.location) => format!("{}: not found", nav.location),
        GuardDecision::Allow => format!("viewing {}", nav.location),
        GuardDecision::Pending => format!("{}: loading…", nav.requested),
        GuardDecision::RedirectToLogin { return_to } => {
            format!("{return_to} requires sign-in; redirected to {} (will return after login)", nav.location)
        }
        GuardDecision::RedirectToDefault => {
            format!("{} is not available for your role; redirected to {}", nav.requested, nav.location)
        }
    }
}

pub fn render_status(session: &Session, location: &str, return_to: Option<String>) -> String {
    let state = if session.is_loading() {
        "loading"
    } else if session.is_authenticated() {
        "authenticated"
    } else {
        "signed out"
    };
    let mut rows = vec![("state", state.to_string()), ("location", location.to_string())];
    if let Some(i) = session.identity() {
        rows.push(("user", format!("{} <{}>", i.display_name, i.email)));
        rows.push(("role", i.role.to_string()));
    }
    if let Some(r) = return_to {
        rows.push(("return_to", r));
    }
    if let Some(e) = session.last_error() {
        rows.push(("last_error", e.to_string()));
    }
    render_table(&rows)
}

/// Two-column ASCII table.
pub fn render_table(rows: &[(&str, String)]) -> String {
    let max_col_width: usize = 80; // cap to keep output readable
    let mut widths = [0usize; 2];
    for (k, v) in rows {
        widths[0] = widths[0].max(display_len(k)).min(max_col_width);
        widths[1] = widths[1].max(display_len(v)).min(max_col_width);
    }
    let sep = build_separator(&widths);
    let mut out = vec![sep.clone()];
    for (k, v) in rows {
        out.push(build_row(&[k.to_string(), v.clone()], &widths));
    }
    out.push(sep);
    out.join("\n")
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('+');
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        s.push(' ');
        s.push_str(&text);
        s.push_str(&" ".repeat(w.saturating_sub(display_len(&text))));
        s.push(' ');
        s.push('|');
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if display_len(s) <= max { return s.to_string(); }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_failure_sets_exit_status() {
        assert_eq!(exit_status(&Ok(Reply::Quit)), 0);
        let err = Command::parse("setrole only-uid").unwrap_err();
        assert_eq!(exit_status(&Err(err)), 2);
        assert_eq!(exit_status(&Err(AppError::auth("invalid_credentials", "nope"))), 5);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("login t@example.com correctpw").unwrap(),
            Some(Command::Login { email: "t@example.com".into(), password: "correctpw".into() })
        );
        assert_eq!(Command::parse("OPEN /dashboard/admin").unwrap(), Some(Command::Open("/dashboard/admin".into())));
        assert_eq!(
            Command::parse("adduser p@example.com longenough parent Pat Doe").unwrap(),
            Some(Command::AddUser {
                email: "p@example.com".into(),
                password: "longenough".into(),
                role: Role::Parent,
                name: "Pat Doe".into(),
            })
        );
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(Command::parse("login onlyemail").unwrap_err().code_str(), "usage");
        assert_eq!(Command::parse("setrole u1 wizard").unwrap_err().code_str(), "invalid_role");
        assert_eq!(Command::parse("dance").unwrap_err().code_str(), "unknown_command");
    }

    #[test]
    fn table_pads_and_truncates() {
        let long = "x".repeat(100);
        let out = render_table(&[("a", "1".into()), ("bb", long)]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
        assert!(out.contains('…'));
    }

    #[test]
    fn status_lists_error_and_return_location() {
        let s = Session::signed_out().with_error("invalid_credentials");
        let out = render_status(&s, "/login", Some("/dashboard/admin".into()));
        assert!(out.contains("signed out"));
        assert!(out.contains("invalid_credentials"));
        assert!(out.contains("/dashboard/admin"));
    }
}
