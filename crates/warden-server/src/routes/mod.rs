pub mod decisions;
pub mod jobs;
pub mod ledger;
pub mod playbooks;
pub mod proposals;

use axum::http::HeaderMap;
use warden_core::rbac::{Caller, Role};

use crate::error::AppError;

/// Build the acting caller from request headers.
///
/// `x-warden-role` is required; `x-warden-caller` defaults to `anonymous`;
/// `x-warden-orgs` is a comma-separated approval scope for `approver` roles.
pub(crate) fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, AppError> {
    let role: Role = headers
        .get("x-warden-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("missing x-warden-role header"))?
        .parse()?;
    let id = headers
        .get("x-warden-caller")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous");

    let mut caller = Caller::new(id, role);
    if let Some(orgs) = headers.get("x-warden-orgs").and_then(|v| v.to_str().ok()) {
        for org in orgs.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            caller = caller.in_org(org);
        }
    }
    Ok(caller)
}

/// Role header alone, for endpoints that need a role but no approval scope.
pub(crate) fn role_from_headers(headers: &HeaderMap, default: Role) -> Result<Role, AppError> {
    match headers.get("x-warden-role").and_then(|v| v.to_str().ok()) {
        Some(raw) => Ok(raw.parse::<Role>()?),
        None => Ok(default),
    }
}
