//! Authentication and session lifecycle for the portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod provider;
mod resolve;
mod session;
mod initializer;
mod login;
mod signout;
mod guard;

pub use principal::{Identity, Role, Status};
pub use provider::{CredentialVerifier, IdentitySubscription, LocalCredentialVerifier, VerifiedUser, VerifyError};
pub use resolve::{resolve_identity, update_user_role};
pub use session::{Attempt, AttemptTicket, Session, SessionStore};
pub use initializer::SessionInitializer;
pub use login::{LoginFlow, SUPERSEDED};
pub use signout::SignOutFlow;
pub use guard::{evaluate, Access, GuardDecision, RouteGuard, RouteTable};
