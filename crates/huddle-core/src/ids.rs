//! Branded ID newtypes for type safety.
//!
//! Rooms, peers, projects, and agent sessions all travel as strings on the
//! wire. Wrapping each in its own newtype keeps a `ProjectId` from being
//! handed to an API that expects a `RoomId`.
//!
//! Freshly minted IDs are UUID v7 (time-ordered) generated via
//! [`uuid::Uuid::now_v7`]. IDs that originate in the collaboration transport
//! (rooms, projects, users) are wrapped with [`From<String>`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// A room: the set of participants in one shared call.
    RoomId
}

branded_id! {
    /// Connection-scoped participant identity. Never reused after disconnect.
    PeerId
}

branded_id! {
    /// Stable user identity, shared by all of a user's connections.
    UserId
}

branded_id! {
    /// A shared project (workspace) within a room.
    ProjectId
}

branded_id! {
    /// A unit of background agent work, unique within its issuing participant.
    AgentSessionId
}

branded_id! {
    /// Correlation id for one relayed guest → host request.
    RequestId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_new_is_uuid_v7() {
        let id = PeerId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_ref() {
        let id = RoomId::from("room-1");
        assert_eq!(id.as_str(), "room-1");
    }

    #[test]
    fn deref_to_str() {
        let id = ProjectId::from("p-42");
        let s: &str = &id;
        assert_eq!(s, "p-42");
    }

    #[test]
    fn display() {
        let id = AgentSessionId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::from("alice");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alice\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = ProjectId::from("same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn into_inner() {
        let id = RoomId::from("inner");
        assert_eq!(id.into_inner(), "inner");
    }
}
