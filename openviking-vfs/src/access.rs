//! The URI access gate.
//!
//! ROOT sees everything. Other roles see shared scopes (`resources`, `temp`,
//! `transactions`), their own `user`/`session` space, and their own `agent`
//! space. The reserved `_system` scope is never exposed. Unknown future
//! scopes round-trip opaquely and stay visible.

use openviking_core::{RequestContext, Result, VikingError, VikingUri};

/// Whether a URI is visible under the given request context.
pub fn is_uri_visible(ctx: &RequestContext, uri: &VikingUri) -> bool {
    if ctx.role.is_root() {
        return true;
    }
    if uri.is_system() {
        return false;
    }
    match uri.scope() {
        "resources" | "temp" | "transactions" => true,
        "user" | "session" => match uri.space() {
            Some(space) => space == ctx.user.user_space_name(),
            // A bare scope root is browsable; children are gated.
            None => true,
        },
        "agent" => match uri.space() {
            Some(space) => space == ctx.user.agent_space_name(),
            None => true,
        },
        _ => true,
    }
}

/// Reject a URI that the context may not touch.
///
/// Fatal for the call; listings instead omit inaccessible children via
/// [`is_uri_visible`].
pub fn check_uri_access(ctx: &RequestContext, uri: &VikingUri) -> Result<()> {
    if is_uri_visible(ctx, uri) {
        Ok(())
    } else {
        Err(VikingError::permission_denied(format!(
            "access to {uri} denied for account {}",
            ctx.account_id()
        )))
    }
}
