//! Branded ID newtypes.
//!
//! An engine connection (one WebSocket) and a socket (one namespace joined
//! over that WebSocket) each get their own id type. Both are UUID v7 strings
//! in simple (hyphen-less) form.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().simple().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
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
    };
}

branded_id!(
    /// Id of one engine-level (WebSocket) connection, sent as `sid` in the
    /// open packet.
    EngineId
);

branded_id!(
    /// Id of one namespace socket. Several sockets can share an engine
    /// connection.
    SocketId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = SocketId::new();
        let b = SocketId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_simple_uuid() {
        let id = EngineId::new();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_time_ordered() {
        let first = SocketId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = SocketId::new();
        assert!(first.as_str() < second.as_str());
    }

    #[test]
    fn serde_is_transparent() {
        let id = SocketId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: SocketId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_deref() {
        let id = EngineId::from("e1".to_string());
        assert_eq!(id.to_string(), "e1");
        assert_eq!(&*id, "e1");
        assert_eq!(id.into_inner(), "e1");
    }
}
