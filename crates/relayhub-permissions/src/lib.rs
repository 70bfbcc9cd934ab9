//! Role-based permission model (§4.2, C2).
//!
//! Grounded on the reference users crate's `PermissionChecker` — a fixed
//! table keyed by role plus a rank-comparison rule for who may manage whom.

use relayhub_core::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    MessageSend,
    MessageEditOwn,
    MessageEditAny,
    MessageDeleteOwn,
    MessageDeleteAny,
    UserInvite,
    UserKick,
    UserChangeRole,
    AiTrigger,
    FileAny,
    SessionAny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    Denied { reason: String },
}

impl PermissionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionCheck::Allowed)
    }
}

/// Returns the fixed permission set for `role` (§4.2).
pub fn permissions_for(role: Role) -> &'static [Permission] {
    use Permission::*;
    match role {
        Role::Guest => &[],
        Role::Ai => &[MessageSend],
        Role::Member => &[MessageSend, MessageEditOwn, MessageDeleteOwn, AiTrigger, FileAny],
        Role::Admin => &[
            MessageSend,
            MessageEditOwn,
            MessageEditAny,
            MessageDeleteOwn,
            MessageDeleteAny,
            UserInvite,
            UserKick,
            UserChangeRole,
            AiTrigger,
            FileAny,
            SessionAny,
        ],
        Role::Owner => &[
            MessageSend,
            MessageEditOwn,
            MessageEditAny,
            MessageDeleteOwn,
            MessageDeleteAny,
            UserInvite,
            UserKick,
            UserChangeRole,
            AiTrigger,
            FileAny,
            SessionAny,
        ],
    }
}

pub struct PermissionChecker;

impl PermissionChecker {
    /// Check whether `role` may perform `permission`.
    pub fn check(role: Role, permission: Permission) -> PermissionCheck {
        if permissions_for(role).contains(&permission) {
            PermissionCheck::Allowed
        } else {
            PermissionCheck::Denied {
                reason: format!("role {role} lacks permission {permission:?}"),
            }
        }
    }

    /// Check whether `actor_role` may manage a target with `target_role`
    /// (kick, change_role). Actor must outrank the target strictly; `owner`
    /// is unmanageable and unkickable (§4.2).
    pub fn can_manage(actor_role: Role, target_role: Role) -> PermissionCheck {
        if target_role == Role::Owner {
            return PermissionCheck::Denied {
                reason: "owner is unmanageable".to_string(),
            };
        }
        if actor_role.rank() > target_role.rank() {
            PermissionCheck::Allowed
        } else {
            PermissionCheck::Denied {
                reason: "actor does not outrank target".to_string(),
            }
        }
    }

    /// Check whether `actor_role` may assign `new_role` to someone.
    /// The assigned role's rank must be strictly below the actor's rank.
    pub fn can_assign_role(actor_role: Role, new_role: Role) -> PermissionCheck {
        if actor_role.rank() > new_role.rank() {
            PermissionCheck::Allowed
        } else {
            PermissionCheck::Denied {
                reason: "cannot assign a role at or above the actor's own rank".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_cannot_send_messages() {
        assert!(!PermissionChecker::check(Role::Guest, Permission::MessageSend).is_allowed());
    }

    #[test]
    fn member_can_send_but_not_kick() {
        assert!(PermissionChecker::check(Role::Member, Permission::MessageSend).is_allowed());
        assert!(!PermissionChecker::check(Role::Member, Permission::UserKick).is_allowed());
    }

    #[test]
    fn admin_can_manage_member_but_not_owner() {
        assert!(PermissionChecker::can_manage(Role::Admin, Role::Member).is_allowed());
        assert!(!PermissionChecker::can_manage(Role::Admin, Role::Owner).is_allowed());
    }

    #[test]
    fn owner_is_unkickable_even_by_owner() {
        assert!(!PermissionChecker::can_manage(Role::Owner, Role::Owner).is_allowed());
    }

    #[test]
    fn cannot_assign_role_at_or_above_own_rank() {
        assert!(!PermissionChecker::can_assign_role(Role::Admin, Role::Admin).is_allowed());
        assert!(!PermissionChecker::can_assign_role(Role::Admin, Role::Owner).is_allowed());
        assert!(PermissionChecker::can_assign_role(Role::Admin, Role::Member).is_allowed());
    }

    #[test]
    fn self_rank_cannot_manage_self_rank() {
        assert!(!PermissionChecker::can_manage(Role::Member, Role::Member).is_allowed());
    }
}
