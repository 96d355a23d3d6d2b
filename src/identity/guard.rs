//! Route protection. Everything here is synchronous and free of I/O: a decision
//! depends only on the session snapshot, the required roles and the location.

use serde::Serialize;

use super::principal::Role;
use super::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Session state not settled yet; render a neutral placeholder, do not redirect.
    Pending,
    Allow,
    RedirectToLogin { return_to: String },
    RedirectToDefault,
}

/// Decide whether `requested` may be rendered. An empty `required` set admits any
/// authenticated role.
pub fn evaluate(session: &Session, required: &[Role], requested: &str) -> GuardDecision {
    if session.is_loading() {
        return GuardDecision::Pending;
    }
    if !session.is_authenticated() {
        return GuardDecision::RedirectToLogin { return_to: requested.to_string() };
    }
    let Some(identity) = session.identity() else {
        return GuardDecision::RedirectToLogin { return_to: requested.to_string() };
    };
    if !required.is_empty() && !required.contains(&identity.role) {
        return GuardDecision::RedirectToDefault;
    }
    GuardDecision::Allow
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected(Vec<Role>),
}

#[derive(Debug, Clone)]
struct RouteRule {
    prefix: String,
    access: Access,
}

/// Maps locations to their access rule by longest matching path prefix.
/// Locations that match nothing are public.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    path == prefix || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
}

impl RouteTable {
    pub fn new() -> Self { Self::default() }

    pub fn public(mut self, prefix: &str) -> Self {
        self.rules.push(RouteRule { prefix: normalize(prefix).to_string(), access: Access::Public });
        self
    }

    pub fn protected(mut self, prefix: &str, roles: &[Role]) -> Self {
        self.rules.push(RouteRule { prefix: normalize(prefix).to_string(), access: Access::Protected(roles.to_vec()) });
        self
    }

    /// The portal's routes: marketing pages are public, dashboards are role-gated.
    pub fn portal() -> Self {
        Self::new()
            .public("/")
            .public("/about")
            .public("/programs")
            .public("/events")
            .public("/volunteer")
            .public("/blog")
            .public("/contact")
            .public("/login")
            .protected("/dashboard", &[])
            .protected("/dashboard/student", &[Role::Student])
            .protected("/dashboard/teacher", &[Role::Teacher])
            .protected("/dashboard/parent", &[Role::Parent])
            .protected("/dashboard/admin", &[Role::Admin])
    }

    pub fn access_for(&self, location: &str) -> Access {
        let path = normalize(location);
        self.rules
            .iter()
            .filter(|r| prefix_matches(&r.prefix, path))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.access.clone())
            .unwrap_or(Access::Public)
    }

    pub fn is_known(&self, location: &str) -> bool {
        let path = normalize(location);
        self.rules.iter().any(|r| prefix_matches(&r.prefix, path))
    }
}

/// Route guard bound to a route table.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    routes: RouteTable,
}

impl RouteGuard {
    pub fn new(routes: RouteTable) -> Self { Self { routes } }

    pub fn routes(&self) -> &RouteTable { &self.routes }

    pub fn check(&self, session: &Session, location: &str) -> GuardDecision {
        match self.routes.access_for(location) {
            Access::Public => GuardDecision::Allow,
            Access::Protected(roles) => evaluate(session, &roles, location),
        }
    }
}
