//! Caller identity and the approval capability check.
//!
//! Deliberately small: the decision service only needs to answer "may this
//! caller approve or reject proposals in this org". Anything richer belongs
//! to the product's user management, which is an external collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WardenError};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Approver,
    Admin,
}

impl Role {
    /// Whether the role carries the approval capability at all.
    /// Scope is checked separately against the proposal's org.
    pub fn can_approve(self) -> bool {
        matches!(self, Role::Approver | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "approver" => Ok(Role::Approver),
            "admin" => Ok(Role::Admin),
            _ => Err(WardenError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Caller
// ---------------------------------------------------------------------------

/// The authenticated principal behind a decision-service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub role: Role,
    /// Orgs the caller's approval capability is scoped to. Admins are
    /// implicitly scoped to every org.
    #[serde(default)]
    pub org_ids: Vec<String>,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            org_ids: Vec::new(),
        }
    }

    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_ids.push(org_id.into());
        self
    }

    /// Check the approval capability for `org_id`, failing with `RbacDenied`.
    pub fn require_approval_capability(&self, org_id: &str) -> Result<()> {
        let allowed = match self.role {
            Role::Admin => true,
            Role::Approver => self.org_ids.iter().any(|o| o == org_id),
            Role::Viewer | Role::Operator => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(WardenError::RbacDenied {
                caller: self.id.clone(),
                scope: org_id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_approves_anywhere() {
        let caller = Caller::new("root", Role::Admin);
        assert!(caller.require_approval_capability("org-1").is_ok());
        assert!(caller.require_approval_capability("org-2").is_ok());
    }

    #[test]
    fn approver_is_scoped_to_org() {
        let caller = Caller::new("alice", Role::Approver).in_org("org-1");
        assert!(caller.require_approval_capability("org-1").is_ok());
        assert!(matches!(
            caller.require_approval_capability("org-2"),
            Err(WardenError::RbacDenied { .. })
        ));
    }

    #[test]
    fn operator_and_viewer_cannot_approve() {
        for role in [Role::Operator, Role::Viewer] {
            let caller = Caller::new("bob", role).in_org("org-1");
            assert!(caller.require_approval_capability("org-1").is_err());
        }
    }

    #[test]
    fn role_roundtrip() {
        use std::str::FromStr;
        for role in [Role::Viewer, Role::Operator, Role::Approver, Role::Admin] {
            assert_eq!(Role::from_str(role.as_str()).unwrap(), role);
        }
    }
}
