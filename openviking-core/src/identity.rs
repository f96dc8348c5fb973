//! Request identity: who is calling, and with which role.
//!
//! Every operation in the system carries a [`RequestContext`]. The context is
//! immutable per request; legacy call paths that cannot thread it explicitly
//! may bind one to the current task with [`bind_context`].

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{Result, VikingError};

/// Caller role. ROOT bypasses tenant filters entirely; ADMIN and USER are
/// scoped to their account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Root,
    Admin,
    User,
}

impl Role {
    /// Whether this role sees all tenants.
    pub fn is_root(&self) -> bool {
        matches!(self, Role::Root)
    }
}

/// Identifies the tenant: account plus the user and agent space segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentifier {
    pub account_id: String,
    pub user_id: String,
    pub agent_id: String,
}

impl UserIdentifier {
    pub fn new(
        account_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Space segment used under `viking://user/...`.
    pub fn user_space_name(&self) -> String {
        self.user_id.clone()
    }

    /// Space segment used under `viking://agent/...`.
    pub fn agent_space_name(&self) -> String {
        self.agent_id.clone()
    }
}

/// Immutable per-request context carried with every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: UserIdentifier,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user: UserIdentifier, role: Role) -> Self {
        Self { user, role }
    }

    /// Shorthand for a ROOT context scoped to an account.
    pub fn root(account_id: impl Into<String>) -> Self {
        Self {
            user: UserIdentifier::new(account_id, "system", "system"),
            role: Role::Root,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.user.account_id
    }

    /// Resolve an explicit context or fall back to the task-local binding.
    pub fn resolve(explicit: Option<&RequestContext>) -> Result<RequestContext> {
        if let Some(ctx) = explicit {
            return Ok(ctx.clone());
        }
        bound_context()
            .ok_or_else(|| VikingError::invalid_argument("request context required"))
    }
}

tokio::task_local! {
    static BOUND_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` bound as the task-local request context.
///
/// The binding is request-scoped: it is released when the future completes,
/// including on error or cancellation.
pub async fn bind_context<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    BOUND_CONTEXT.scope(ctx, fut).await
}

/// The request context bound to the current task, if any.
pub fn bound_context() -> Option<RequestContext> {
    BOUND_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}
