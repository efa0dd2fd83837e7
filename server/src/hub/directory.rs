use std::collections::HashMap;

use crate::error::RegistryError;
use crate::ws::ConnectionId;

/// Outcome of a successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New (user, connection) pair recorded.
    Registered,
    /// The exact pair was already present; nothing changed.
    AlreadyRegistered,
}

/// Bidirectional user ID <-> connection map.
///
/// Both directions are only ever written together through `claim` and
/// `release`, so a pair present in one map is always present in the other.
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_user: HashMap<String, ConnectionId>,
    by_conn: HashMap<ConnectionId, String>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `user_id` for `conn_id`. First claim wins: an ID held by another
    /// connection is never overwritten, and a connection keeps the first ID it
    /// registered.
    pub fn claim(
        &mut self,
        user_id: &str,
        conn_id: ConnectionId,
    ) -> Result<Registration, RegistryError> {
        if let Some(&owner) = self.by_user.get(user_id) {
            if owner == conn_id {
                return Ok(Registration::AlreadyRegistered);
            }
            return Err(RegistryError::IdentityTaken {
                user_id: user_id.to_string(),
                owner,
            });
        }

        if let Some(existing) = self.by_conn.get(&conn_id) {
            return Err(RegistryError::ConnectionAlreadyNamed {
                conn_id,
                existing: existing.clone(),
            });
        }

        self.by_user.insert(user_id.to_string(), conn_id);
        self.by_conn.insert(conn_id, user_id.to_string());
        self.debug_check();
        Ok(Registration::Registered)
    }

    /// Drop whatever ID `conn_id` holds. Returns the released ID, if any.
    pub fn release(&mut self, conn_id: ConnectionId) -> Option<String> {
        let user_id = self.by_conn.remove(&conn_id)?;
        self.by_user.remove(&user_id);
        self.debug_check();
        Some(user_id)
    }

    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.by_user.get(user_id).copied()
    }

    pub fn user_of(&self, conn_id: ConnectionId) -> Option<&str> {
        self.by_conn.get(&conn_id).map(String::as_str)
    }

    /// Owned copy of every registered ID, in no particular order.
    pub fn user_ids(&self) -> Vec<String> {
        self.by_user.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.by_user.len(), self.by_conn.len());
        debug_assert!(self
            .by_user
            .iter()
            .all(|(user, conn)| self.by_conn.get(conn) == Some(user)));
    }
}
