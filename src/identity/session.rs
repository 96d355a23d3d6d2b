use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::principal::Identity;
use crate::error::AuthError;
use crate::tprintln;

/// Snapshot of the process-wide authentication state.
///
/// Only [`SessionStore`] produces sessions with `authenticated == true`, and it
/// always does so together with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    identity: Option<Identity>,
    authenticated: bool,
    loading: bool,
    last_error: Option<String>,
}

impl Session {
    /// State before the first identity notification has been handled.
    pub fn pending() -> Self {
        Self { identity: None, authenticated: false, loading: true, last_error: None }
    }

    pub fn signed_out() -> Self {
        Self { identity: None, authenticated: false, loading: false, last_error: None }
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self { identity: Some(identity), authenticated: true, loading: false, last_error: None }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn with_loading(mut self, loading: bool) -> Self {
        self.loading = loading;
        self
    }

    pub fn identity(&self) -> Option<&Identity> { self.identity.as_ref() }
    pub fn is_authenticated(&self) -> bool { self.authenticated }
    pub fn is_loading(&self) -> bool { self.loading }
    pub fn last_error(&self) -> Option<&str> { self.last_error.as_deref() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Initialize,
    Notification,
    Login,
    SignOut,
}

#[derive(Debug)]
struct SessionCell {
    session: Session,
    // Bumped whenever a flow takes ownership of the next transition.
    epoch: u64,
    in_flight: Option<Attempt>,
    // Logins cut off by a sign-out that have not reported back yet.
    orphaned_logins: u32,
    // Account a cut-off login verified; its sign-in notifications are ignored
    // until the next login or a sign-out notification.
    suppressed: Option<String>,
}

/// Injectable owner of the [`Session`]. Cloning shares the same state.
///
/// Writers go through an [`AttemptTicket`]: a commit only lands if no later
/// attempt has superseded the ticket, so a result arriving for a defunct attempt
/// is discarded instead of overwriting newer state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    cell: Arc<Mutex<SessionCell>>,
}

impl Default for SessionStore {
    fn default() -> Self { Self::new() }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(SessionCell {
                session: Session::pending(),
                epoch: 0,
                in_flight: Some(Attempt::Initialize),
                orphaned_logins: 0,
                suppressed: None,
            })),
        }
    }

    pub fn snapshot(&self) -> Session { self.cell.lock().session.clone() }

    pub fn in_flight(&self) -> Option<Attempt> { self.cell.lock().in_flight }

    /// Single-flight gate for login: fails fast while anything is loading.
    pub fn begin_login(&self) -> Result<AttemptTicket, AuthError> {
        let mut cell = self.cell.lock();
        if cell.session.loading {
            return Err(AuthError::AlreadyInProgress);
        }
        cell.epoch += 1;
        cell.in_flight = Some(Attempt::Login);
        cell.session.loading = true;
        cell.session.last_error = None;
        cell.suppressed = None;
        Ok(self.ticket(cell.epoch, Attempt::Login, true))
    }

    /// Sign-out always proceeds and supersedes whatever is in flight.
    pub fn begin_sign_out(&self) -> AttemptTicket {
        let mut cell = self.cell.lock();
        if cell.in_flight == Some(Attempt::Login) {
            cell.orphaned_logins += 1;
        }
        cell.epoch += 1;
        cell.in_flight = Some(Attempt::SignOut);
        cell.session.loading = true;
        cell.session.last_error = None;
        self.ticket(cell.epoch, Attempt::SignOut, true)
    }

    /// Ticket for handling one identity notification about `unique_id` (`None`
    /// for "signed out"). The first notification completes initialization; later
    /// ones are refused while a login or sign-out owns the next transition, and
    /// sign-ins are refused while they may stem from a login cut off by sign-out.
    pub fn begin_notification(&self, unique_id: Option<&str>) -> Option<AttemptTicket> {
        let mut cell = self.cell.lock();
        match cell.in_flight {
            Some(Attempt::Initialize) => Some(self.ticket(cell.epoch, Attempt::Initialize, true)),
            Some(Attempt::Login) | Some(Attempt::SignOut) => None,
            Some(Attempt::Notification) | None => {
                match unique_id {
                    Some(uid) if cell.orphaned_logins > 0 || cell.suppressed.as_deref() == Some(uid) => {
                        debug!(target: "auth", uid, "ignoring sign-in left over from a cancelled login");
                        return None;
                    }
                    Some(_) => {}
                    None => cell.suppressed = None,
                }
                cell.epoch += 1;
                cell.in_flight = Some(Attempt::Notification);
                Some(self.ticket(cell.epoch, Attempt::Notification, false))
            }
        }
    }

    fn ticket(&self, epoch: u64, kind: Attempt, holds_loading: bool) -> AttemptTicket {
        AttemptTicket { store: self.clone(), epoch, kind, holds_loading, verified: None, done: false }
    }

    fn apply(&self, ticket: &mut AttemptTicket, f: impl FnOnce(&mut Session)) -> bool {
        ticket.done = true;
        let mut cell = self.cell.lock();
        if cell.epoch != ticket.epoch {
            debug!(target: "auth", attempt = ?ticket.kind, "discarding result of a superseded attempt");
            Self::settle_orphan(&mut cell, ticket);
            return false;
        }
        f(&mut cell.session);
        cell.in_flight = None;
        tprintln!("session.commit attempt={:?} authenticated={} error={:?}", ticket.kind, cell.session.authenticated, cell.session.last_error);
        true
    }

    fn release(&self, ticket: &AttemptTicket) {
        let mut cell = self.cell.lock();
        if cell.epoch != ticket.epoch {
            Self::settle_orphan(&mut cell, ticket);
        } else if cell.in_flight == Some(ticket.kind) {
            if ticket.holds_loading {
                cell.session.loading = false;
            }
            cell.in_flight = None;
            debug!(target: "auth", attempt = ?ticket.kind, "attempt dropped without a result");
        }
    }

    fn settle_orphan(cell: &mut SessionCell, ticket: &AttemptTicket) {
        if ticket.kind != Attempt::Login {
            return;
        }
        cell.orphaned_logins = cell.orphaned_logins.saturating_sub(1);
        if let Some(uid) = &ticket.verified {
            cell.suppressed = Some(uid.clone());
        }
    }
}

/// Right to perform the next transition of a [`SessionStore`].
///
/// Dropping an unused ticket hands the store back without changing identity,
/// so a flow that dies mid-way cannot leave the session stuck in `loading`.
#[derive(Debug)]
pub struct AttemptTicket {
    store: SessionStore,
    epoch: u64,
    kind: Attempt,
    holds_loading: bool,
    // Account the verifier accepted for this attempt, if it got that far.
    verified: Option<String>,
    done: bool,
}

impl AttemptTicket {
    pub fn kind(&self) -> Attempt { self.kind }

    /// Returns whether the ticket is still current.
    pub fn is_current(&self) -> bool { self.store.cell.lock().epoch == self.epoch }

    /// Note that the verifier accepted `unique_id`. Should a sign-out have cut
    /// this attempt off, that account's sign-in notifications are ignored once
    /// the ticket is used or dropped.
    pub fn set_verified(&mut self, unique_id: &str) {
        self.verified = Some(unique_id.to_string());
    }

    pub fn commit_signed_in(mut self, identity: Identity) -> bool {
        let store = self.store.clone();
        store.apply(&mut self, |s| *s = Session::signed_in(identity))
    }

    /// Give up without a result, clearing `loading` if still current.
    pub fn abandon(mut self) -> bool {
        let store = self.store.clone();
        store.apply(&mut self, |s| s.loading = false)
    }

    pub fn commit_signed_out(mut self, error: Option<String>) -> bool {
        let store = self.store.clone();
        store.apply(&mut self, |s| {
            *s = Session::signed_out();
            s.last_error = error;
        })
    }

    /// Record a failure without touching `authenticated` or `identity`.
    pub fn commit_failure(mut self, error: String) -> bool {
        let store = self.store.clone();
        store.apply(&mut self, |s| {
            s.loading = false;
            s.last_error = Some(error);
        })
    }
}

impl Drop for AttemptTicket {
    fn drop(&mut self) {
        if !self.done {
            self.store.release(self);
        }
    }
}
