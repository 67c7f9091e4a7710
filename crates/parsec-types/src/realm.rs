//! Realm roles, key algorithms and organization limits.

use serde::{Deserialize, Serialize};

/// Role of a user inside a realm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealmRole {
    /// Full control, including sharing with other owners/managers, key
    /// rotation and renaming.
    #[serde(rename = "OWNER")]
    Owner,
    /// May share and unshare up to contributor level.
    #[serde(rename = "MANAGER")]
    Manager,
    /// Read and write access to vlobs and blocks.
    #[serde(rename = "CONTRIBUTOR")]
    Contributor,
    /// Read-only access.
    #[serde(rename = "READER")]
    Reader,
}

impl RealmRole {
    pub fn can_read(&self) -> bool {
        true
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::Owner | Self::Manager | Self::Contributor)
    }
}

/// Symmetric algorithm advertised by a key rotation certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKeyAlgorithm {
    #[serde(rename = "CHACHA20_POLY1305")]
    Chacha20Poly1305,
}

/// Hash algorithm advertised by a key rotation certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "BLAKE3")]
    Blake3,
}

/// Cap on the number of non-revoked users an organization may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum ActiveUsersLimit {
    LimitedTo(u64),
    NoLimit,
}

impl ActiveUsersLimit {
    pub fn allows(&self, active_users: u64) -> bool {
        match self {
            Self::LimitedTo(limit) => active_users < *limit,
            Self::NoLimit => true,
        }
    }
}

impl From<Option<u64>> for ActiveUsersLimit {
    fn from(raw: Option<u64>) -> Self {
        match raw {
            Some(limit) => Self::LimitedTo(limit),
            None => Self::NoLimit,
        }
    }
}

impl From<ActiveUsersLimit> for Option<u64> {
    fn from(limit: ActiveUsersLimit) -> Self {
        match limit {
            ActiveUsersLimit::LimitedTo(limit) => Some(limit),
            ActiveUsersLimit::NoLimit => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_rights() {
        assert!(RealmRole::Reader.can_read());
        assert!(!RealmRole::Reader.can_write());
        assert!(RealmRole::Contributor.can_write());
    }

    #[test]
    fn test_active_users_limit() {
        assert!(ActiveUsersLimit::NoLimit.allows(u64::MAX - 1));
        assert!(ActiveUsersLimit::LimitedTo(2).allows(1));
        assert!(!ActiveUsersLimit::LimitedTo(2).allows(2));
    }
}
