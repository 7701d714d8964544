//! Identifier newtypes shared across CollabDrive packages
//!
//! Users, pages, and drives are identified by opaque strings minted by the
//! account and document services. Wrapping them keeps a `UserId` from being
//! passed where a `PageId` belongs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw identifier string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// Account identifier issued by the identity service
    UserId
}

id_type! {
    /// Document page identifier
    PageId
}

id_type! {
    /// Drive identifier; a drive owns a tree of pages
    DriveId
}
