// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Role Router - maps roles to dashboards and guards navigation.
//!
//! Three questions are answered here:
//!
//! - Where should this account land? ([`resolve_route`])
//! - May this account view this route? ([`can_access_route`])
//! - Given where the user is now, where should they be sent? ([`get_redirect_route`])
//!
//! Role strings may be compound ("admin+educator"). They are split on
//! [`ROLE_DELIMITERS`] and each token is matched exactly, case-insensitively.
//! A value such as "administrator" therefore does NOT grant admin.
//! Priority is always admin > educator > student.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SecurityError;

// ============================================================================
// ROUTES
// ============================================================================

/// Entry point for unauthenticated users.
pub const AUTH_ROUTE: &str = "/auth";

/// Student dashboard.
pub const STUDENT_DASHBOARD: &str = "/student-dashboard";

/// Educator dashboard.
pub const EDUCATOR_DASHBOARD: &str = "/educator-dashboard";

/// Admin dashboard.
pub const ADMIN_DASHBOARD: &str = "/admin-dashboard";

/// Fallback landing route when no role can be resolved.
pub const DEFAULT_ROUTE: &str = STUDENT_DASHBOARD;

/// Characters that separate tokens inside a compound role string.
pub const ROLE_DELIMITERS: &[char] = &['+', ',', '|', ';', ' ', '\t'];

// ============================================================================
// ROLE
// ============================================================================

/// A single platform role.
///
/// Ordered by privilege: `Student < Educator < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Educator,
    Admin,
}

impl Role {
    /// Every role, highest priority first.
    pub const PRIORITY: [Role; 3] = [Role::Admin, Role::Educator, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Educator => "educator",
            Self::Admin => "admin",
        }
    }

    /// Dashboard route owned by this role.
    pub fn dashboard(&self) -> &'static str {
        match self {
            Self::Student => STUDENT_DASHBOARD,
            Self::Educator => EDUCATOR_DASHBOARD,
            Self::Admin => ADMIN_DASHBOARD,
        }
    }

    /// Match a single token. Exact after trimming, ignoring ASCII case.
    pub fn from_token(token: &str) -> Option<Role> {
        let token = token.trim();
        Self::PRIORITY
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_token(s).ok_or_else(|| SecurityError::InvalidRole(s.to_string()))
    }
}

// ============================================================================
// ROLE SET
// ============================================================================

/// The set of roles encoded by a (possibly compound) role string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleSet {
    student: bool,
    educator: bool,
    admin: bool,
}

impl RoleSet {
    /// Parse a raw role value. Unknown tokens are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut set = Self::default();
        for token in raw.split(ROLE_DELIMITERS).filter(|t| !t.is_empty()) {
            match Role::from_token(token) {
                Some(role) => set.insert(role),
                None => tracing::debug!(token = %token, "ignoring unknown role token"),
            }
        }
        set
    }

    pub fn insert(&mut self, role: Role) {
        match role {
            Role::Student => self.student = true,
            Role::Educator => self.educator = true,
            Role::Admin => self.admin = true,
        }
    }

    pub fn contains(&self, role: Role) -> bool {
        match role {
            Role::Student => self.student,
            Role::Educator => self.educator,
            Role::Admin => self.admin,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.student || self.educator || self.admin)
    }

    /// Highest-priority role present.
    /// Like [`RoleSet::parse`], but a value with no recognised token is
    /// treated as student, matching the default route it resolves to.
    pub fn parse_or_default(raw: &str) -> Self {
        let set = Self::parse(raw);
        if set.is_empty() {
            Role::Student.into()
        } else {
            set
        }
    }

    pub fn highest(&self) -> Option<Role> {
        Role::PRIORITY.into_iter().find(|role| self.contains(*role))
    }

    /// Admin satisfies every role check.
    pub fn satisfies(&self, required: Role) -> bool {
        self.admin || self.contains(required)
    }
}

impl From<Role> for RoleSet {
    fn from(role: Role) -> Self {
        let mut set = RoleSet::default();
        set.insert(role);
        set
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// Preferred landing route for a role.
///
/// - `None` falls back to the student dashboard.
/// - At login (`is_login_context`), any account carrying an admin token lands
///   on the admin dashboard regardless of token order.
/// - Otherwise the highest-priority token wins; an unrecognised value falls
///   back to the student dashboard with a warning.
pub fn resolve_route(role: Option<&str>, is_login_context: bool) -> &'static str {
    let Some(raw) = role else {
        tracing::debug!("no role available; using default route");
        return DEFAULT_ROUTE;
    };

    let roles = RoleSet::parse(raw);

    if is_login_context && roles.contains(Role::Admin) {
        return ADMIN_DASHBOARD;
    }

    match roles.highest() {
        Some(role) => role.dashboard(),
        None => {
            tracing::warn!(role = %raw, "unrecognised role; falling back to default route");
            DEFAULT_ROUTE
        }
    }
}

/// Strip query string, fragment and trailing slash from a route.
fn normalize_route(route: &str) -> &str {
    let path = route.split(['?', '#']).next().unwrap_or(route);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Role required to view a route, if any.
///
/// Sub-paths inherit the requirement of their dashboard
/// (`/admin-dashboard/users` requires admin).
pub fn required_role(route: &str) -> Option<Role> {
    let path = normalize_route(route);
    Role::PRIORITY.into_iter().find(|role| {
        let base = role.dashboard();
        path == base
            || path
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Whether `role` may view `route`.
///
/// Routes without a role requirement are open to any authenticated account.
/// Gated routes are closed to `None`. An unrecognised role has student access.
pub fn can_access_route(role: Option<&str>, route: &str) -> bool {
    let Some(required) = required_role(route) else {
        return true;
    };
    match role {
        Some(raw) => RoleSet::parse_or_default(raw).satisfies(required),
        None => false,
    }
}

/// Redirect to apply for the current navigation, or `None` to stay put.
///
/// `role == None` means unauthenticated.
pub fn get_redirect_route(role: Option<&str>, current_route: &str) -> Option<&'static str> {
    let current = normalize_route(current_route);

    let Some(raw) = role else {
        return if current == AUTH_ROUTE { None } else { Some(AUTH_ROUTE) };
    };

    if current == AUTH_ROUTE {
        return Some(resolve_route(Some(raw), true));
    }

    if !can_access_route(Some(raw), current) {
        let target = resolve_route(Some(raw), false);
        tracing::info!(
            role = %raw,
            from = %current,
            to = %target,
            "ROUTE_DENIED | redirecting to permitted dashboard"
        );
        return Some(target);
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================
