//! Owner-controlled role registry.

use std::collections::HashMap;

use crate::ledger::{LedgerError, Requirement};
use crate::role::{Action, Role};
use crate::types::ActorId;

/// Owner identity plus the identity → role mapping.
///
/// Only non-`None` roles are stored; absence means [`Role::None`].
#[derive(Debug, Clone)]
pub(crate) struct RoleRegistry {
    owner: ActorId,
    roles: HashMap<ActorId, Role>,
}

impl RoleRegistry {
    pub(crate) fn new(owner: ActorId) -> Self {
        Self {
            owner,
            roles: HashMap::new(),
        }
    }

    pub(crate) fn owner(&self) -> &ActorId {
        &self.owner
    }

    pub(crate) fn role_of(&self, identity: &ActorId) -> Role {
        self.roles.get(identity).copied().unwrap_or_default()
    }

    pub(crate) fn has_role(&self, identity: &ActorId, role: Role) -> bool {
        self.role_of(identity) == role
    }

    /// Identities holding a role other than `None`.
    pub(crate) fn assignments(&self) -> impl Iterator<Item = (&ActorId, Role)> {
        self.roles.iter().map(|(id, role)| (id, *role))
    }

    pub(crate) fn ensure_owner(&self, caller: &ActorId) -> Result<(), LedgerError> {
        if caller == &self.owner {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                actor: caller.clone(),
                required: Requirement::Owner,
            })
        }
    }

    pub(crate) fn ensure_permitted(&self, caller: &ActorId, action: Action) -> Result<(), LedgerError> {
        if self.role_of(caller).permits(action) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                actor: caller.clone(),
                required: Requirement::Role(action.required_role()),
            })
        }
    }

    /// Overwrite `identity`'s role, returning the previous one.
    pub(crate) fn assign(&mut self, identity: ActorId, role: Role) -> Role {
        let previous = if role == Role::None {
            self.roles.remove(&identity)
        } else {
            self.roles.insert(identity, role)
        };
        previous.unwrap_or_default()
    }

    /// Reset `identity` to `None`. The owner cannot be revoked.
    pub(crate) fn revoke(&mut self, identity: &ActorId) -> Result<Role, LedgerError> {
        if identity == &self.owner {
            return Err(LedgerError::InvalidOperation(
                "cannot revoke role from the ledger owner".to_string(),
            ));
        }
        Ok(self.roles.remove(identity).unwrap_or_default())
    }

    /// Hand ownership to `new_owner`, returning the previous owner. Roles are untouched.
    pub(crate) fn transfer(&mut self, new_owner: ActorId) -> ActorId {
        std::mem::replace(&mut self.owner, new_owner)
    }
}
