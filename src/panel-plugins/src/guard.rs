//! Guard evaluation.
//!
//! A guard is a string token attached to a page, tab or sidebar entry. The
//! host resolves [`ADMIN_GUARD`] itself; every other token is delegated to
//! the owning plugin's [`GuardEvaluator`]. With neither, access is denied.

use crate::session::{HostServices, User};

/// Guard token reserved to the host.
pub const ADMIN_GUARD: &str = "admin";

/// Capability a plugin bundle may export to decide its own guard tokens.
///
/// Never consulted for [`ADMIN_GUARD`].
pub trait GuardEvaluator: Send + Sync {
    /// Return `true` to grant access.
    fn evaluate(&self, guard: &str, user: Option<&User>) -> bool;
}

impl<F> GuardEvaluator for F
where
    F: Fn(&str, Option<&User>) -> bool + Send + Sync,
{
    fn evaluate(&self, guard: &str, user: Option<&User>) -> bool {
        self(guard, user)
    }
}

/// Snapshot of who is asking, taken at the moment of the check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: Option<User>,
    pub is_admin: bool,
}

impl Identity {
    /// Read the current identity from the host.
    pub fn current(host: &dyn HostServices) -> Self {
        Self {
            user: host.current_user(),
            is_admin: host.is_admin(),
        }
    }

    /// Identity of a specific user, using the `root_admin` flag as the admin predicate.
    pub fn of(user: Option<User>) -> Self {
        let is_admin = user.as_ref().is_some_and(|u| u.root_admin);
        Self { user, is_admin }
    }
}

/// Decide whether `guard` passes for `identity`.
///
/// - no guard (or a blank one): allowed
/// - `"admin"`: the host admin predicate, the evaluator is ignored
/// - anything else: the evaluator's answer, or denied without one
pub fn check_guard(
    guard: Option<&str>,
    identity: &Identity,
    evaluator: Option<&dyn GuardEvaluator>,
) -> bool {
    let guard = match guard.map(str::trim) {
        None | Some("") => return true,
        Some(g) => g,
    };

    if guard == ADMIN_GUARD {
        return identity.is_admin;
    }

    match evaluator {
        Some(evaluator) => evaluator.evaluate(guard, identity.user.as_ref()),
        None => {
            tracing::debug!(guard = %guard, "Unknown guard without evaluator, denying");
            false
        }
    }
}
