//! Identifiers.
//!
//! Most ids are 128-bit UUIDs generated client side; the server treats them
//! as opaque. `OrganizationID` is the one human-chosen identifier and is
//! validated on construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::DateTime;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn hex(&self) -> String {
                self.0.simple().to_string()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0.simple())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(raw).map(Self)
            }
        }
    };
}

uuid_id!(UserID);
uuid_id!(DeviceID);
uuid_id!(VlobID);
uuid_id!(BlockID);
uuid_id!(SequesterServiceID);
uuid_id!(GreetingAttemptID);
uuid_id!(InvitationToken);
uuid_id!(BootstrapToken);

/// Human-chosen organization identifier.
///
/// At most 32 characters, restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationID(String);

/// Raised when a raw string does not form a valid `OrganizationID`.
#[derive(Debug, thiserror::Error)]
#[error("invalid organization id")]
pub struct InvalidOrganizationID;

impl OrganizationID {
    pub const MAX_LEN: usize = 32;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrganizationID {
    type Error = InvalidOrganizationID;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw.is_empty() || raw.len() > Self::MAX_LEN {
            return Err(InvalidOrganizationID);
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidOrganizationID);
        }
        Ok(Self(raw))
    }
}

impl TryFrom<&str> for OrganizationID {
    type Error = InvalidOrganizationID;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::try_from(raw.to_string())
    }
}

impl FromStr for OrganizationID {
    type Err = InvalidOrganizationID;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::try_from(raw)
    }
}

impl From<OrganizationID> for String {
    fn from(id: OrganizationID) -> Self {
        id.0
    }
}

impl fmt::Debug for OrganizationID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrganizationID({})", self.0)
    }
}

impl fmt::Display for OrganizationID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single-use token revealing a Shamir-recovered secret, handed out at
/// setup time and redeemed once the recipients' shares have been gathered.
pub type ShamirRevealToken = InvitationToken;

/// Per-realm checkpoint used by `vlob_poll_changes`.
pub type Checkpoint = u64;

/// Timestamps keyed by realm, as returned by topic dumps.
pub type RealmTopics = std::collections::HashMap<VlobID, DateTime>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_id_validation() {
        assert!(OrganizationID::try_from("CoolOrg").is_ok());
        assert!(OrganizationID::try_from("cool-org_2").is_ok());
        assert!(OrganizationID::try_from("").is_err());
        assert!(OrganizationID::try_from("bad org").is_err());
        assert!(OrganizationID::try_from("a".repeat(33)).is_err());
    }

    #[test]
    fn test_uuid_id_display_is_simple_hex() {
        let id = VlobID::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
        assert_eq!(id.to_string().parse::<VlobID>().unwrap(), id);
    }
}
