// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! campusgate - session security and role routing for a role-based learning platform
//!
//! Students, educators and administrators share one platform. This crate
//! decides where each of them may go and keeps their sessions safe:
//!
//! **Sign-in** -> **Session timeout** -> **Sign-out**, with role-based
//! routing and admin impersonation throughout.
//!
//! # Core Modules
//!
//! - [`router`] - Role parsing, dashboard resolution and route guards
//! - [`security`] - Rate limiting, inactivity timeout, sign-out and impersonation
//! - [`audit`] - Security audit events with secret redaction
//! - [`backend`] - Hosted backend collaborators (auth, RPC, profiles)
//! - [`cloud`] - Upstream providers for chat, email and translation
//! - [`server`] - HTTP proxy endpoints
//! - [`config`] - Configuration file and environment overrides
//! - [`error`] / [`errors`] - Library errors and user-facing HTTP errors

pub mod audit;
pub mod backend;
pub mod cloud;
pub mod config;
pub mod error;
pub mod errors;
pub mod router;
pub mod security;
pub mod server;

// Re-export routing
pub use router::{
    can_access_route, get_redirect_route, required_role, resolve_route, Role, RoleSet,
    ADMIN_DASHBOARD, AUTH_ROUTE, DEFAULT_ROUTE, EDUCATOR_DASHBOARD, STUDENT_DASHBOARD,
};

// Re-export security services
pub use security::{
    ImpersonationContext, ImpersonationController, LocalAuthState, RateLimitConfig, RateLimiter,
    SecurityServices, Session, SessionConfig, SessionEvent, SessionMonitor, SessionState,
    SessionTimeoutStateMachine, SignOutReason, SignOutService, Transition,
};

// Re-export collaborators
pub use backend::{
    AuthService, AuthUser, BackendRpc, Collaborators, NoticeLevel, Notifier, ProfileStore,
    TracingNotifier,
};

pub use audit::{redact_secrets, SecurityAuditLog, SecurityEvent, SecurityEventType};
pub use config::AppConfig;
pub use error::{SecurityError, SecurityResult};
pub use errors::{ApiResult, UserError};
pub use server::Server;
