//! Presence directory: which identities are connected, and through which connection.

use std::{collections::HashMap, fmt};

use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{RelayError, RelayResult, require_id};

/// Opaque identity chosen by the client.
pub type UserId = String;

/// Handle to a single live transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionRef(Uuid);

impl ConnectionRef {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online(ConnectionRef),
    Offline,
}

impl Presence {
    pub fn connection(&self) -> Option<ConnectionRef> {
        match self {
            Presence::Online(conn) => Some(*conn),
            Presence::Offline => None,
        }
    }
}

// On the wire presence is just the live connection, or null once offline.
impl Serialize for Presence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.connection().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: UserId,
    pub username: String,
    #[serde(rename = "connectionRef")]
    pub presence: Presence,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

/// Outcome of [`PresenceDirectory::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity: UserIdentity,
    /// The connection this identity was live on before, now dropped from the directory.
    pub superseded: Option<ConnectionRef>,
    /// Another identity that the registering connection was bound to, now offline.
    pub displaced: Option<UserId>,
}

#[derive(Debug, Default)]
pub struct PresenceDirectory {
    users: HashMap<UserId, UserIdentity>,
    // first-registration order, for stable listings
    order: Vec<UserId>,
    connections: HashMap<ConnectionRef, UserId>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        user_id: &str,
        username: &str,
        conn: ConnectionRef,
    ) -> RelayResult<Registration> {
        require_id("userId", user_id)?;
        if username.is_empty() {
            return Err(RelayError::EmptyPayload { field: "username" });
        }

        let now = OffsetDateTime::now_utc();

        let displaced = match self.connections.get(&conn) {
            Some(previous) if previous != user_id => {
                let previous = previous.clone();
                if let Some(record) = self.users.get_mut(&previous) {
                    record.presence = Presence::Offline;
                    record.last_seen = now;
                }
                Some(previous)
            }
            _ => None,
        };

        let identity = UserIdentity {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            presence: Presence::Online(conn),
            last_seen: now,
        };

        let superseded = match self.users.insert(user_id.to_owned(), identity.clone()) {
            Some(old) => old.presence.connection().filter(|old_conn| *old_conn != conn),
            None => {
                self.order.push(user_id.to_owned());
                None
            }
        };
        if let Some(old_conn) = superseded {
            self.connections.remove(&old_conn);
        }
        self.connections.insert(conn, user_id.to_owned());

        Ok(Registration { identity, superseded, displaced })
    }

    pub fn list_users(&self) -> Vec<UserSummary> {
        self.records()
            .map(|user| UserSummary {
                id: user.user_id.clone(),
                username: user.username.clone(),
            })
            .collect()
    }

    pub fn identities(&self) -> Vec<UserIdentity> {
        self.records().cloned().collect()
    }

    pub fn lookup(&self, user_id: &str) -> Option<&UserIdentity> {
        self.users.get(user_id)
    }

    /// The live connection for `user_id`, if it is online.
    pub fn connection(&self, user_id: &str) -> Option<ConnectionRef> {
        self.users.get(user_id).and_then(|user| user.presence.connection())
    }

    pub fn user_for(&self, conn: ConnectionRef) -> Option<&UserId> {
        self.connections.get(&conn)
    }

    /// Forgets `conn` and takes its identity offline. Returns the identity it was bound to.
    pub fn mark_disconnected(&mut self, conn: ConnectionRef) -> Option<UserId> {
        let user_id = self.connections.remove(&conn)?;
        if let Some(user) = self.users.get_mut(&user_id) {
            if user.presence == Presence::Online(conn) {
                user.presence = Presence::Offline;
            }
            user.last_seen = OffsetDateTime::now_utc();
        }
        Some(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn records(&self) -> impl Iterator<Item = &UserIdentity> {
        self.order.iter().filter_map(|id| self.users.get(id))
    }
}
