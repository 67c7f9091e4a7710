//! Realm lifecycle: creation, sharing, key rotation, renaming.

use std::collections::HashMap;
use std::sync::Arc;

use parsec_types::{
    CertificateSigner, DateTime, DeviceID, OrganizationID, RealmKeyRotationCertificate,
    RealmNameCertificate, RealmRole, RealmRoleCertificate, UserID, UserProfile, VlobID,
};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::components::{resolve_author, Author};
use crate::config::ServerConfig;
use crate::datamodel::{Datamodel, MemoryKeyRotation, MemoryRealm, StoredCertificate};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum RealmCreateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm already exists")]
    RealmAlreadyExists {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum RealmShareError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("recipient is revoked")]
    RecipientRevoked,
    #[error("outsiders cannot be owner or manager")]
    RoleIncompatibleWithOutsider,
    #[error("role already granted")]
    RoleAlreadyGranted {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("key index is not the current one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum RealmUnshareError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("recipient already unshared")]
    RecipientAlreadyUnshared {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("a realm keeps at least one owner")]
    LastOwnerCannotBeUnshared,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum RealmRenameError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("realm already has a name")]
    InitialNameAlreadyExists {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("key index is not the current one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum RealmRotateKeyError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("key index is not the current one plus one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("bundle accesses do not match current participants")]
    ParticipantMismatch {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum RealmGetKeysBundleError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("no access stored for author at this key index")]
    AccessNotAvailableForAuthor,
    #[error("unknown key index")]
    BadKeyIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysBundle {
    pub keys_bundle: Vec<u8>,
    pub keys_bundle_access: Vec<u8>,
}

pub struct RealmComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
}

/// Whether `author_role` may grant or remove `target_role`.
fn can_author_role_change(author_role: RealmRole, target_role: Option<RealmRole>) -> bool {
    match author_role {
        RealmRole::Owner => true,
        RealmRole::Manager => matches!(
            target_role,
            None | Some(RealmRole::Contributor) | Some(RealmRole::Reader)
        ),
        RealmRole::Contributor | RealmRole::Reader => false,
    }
}

impl RealmComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
        }
    }

    fn load_role_certificate(
        signed: &[u8],
        author: &Author,
    ) -> Option<RealmRoleCertificate> {
        RealmRoleCertificate::verify_and_load(
            signed,
            &author.verify_key,
            CertificateSigner::Device(author.device_id),
            None,
            None,
        )
        .ok()
    }

    pub async fn create(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_role_certificate: &[u8],
    ) -> Result<(), RealmCreateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmCreateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmCreateError::AuthorNotAllowed)?;
        let certificate = Self::load_role_certificate(realm_role_certificate, &author)
            .ok_or(RealmCreateError::InvalidCertificate)?;

        // The creator grants itself OWNER in the bootstrap certificate
        if certificate.user_id != author.user_id || certificate.role != Some(RealmRole::Owner) {
            return Err(RealmCreateError::InvalidCertificate);
        }
        if author.profile == UserProfile::Outsider {
            return Err(RealmCreateError::AuthorNotAllowed);
        }
        check_ballpark(certificate.timestamp, now, &self.config.ballpark)?;

        if let Some(realm) = store.realms.get(&certificate.realm_id) {
            return Err(RealmCreateError::RealmAlreadyExists {
                last_realm_certificate_timestamp: realm
                    .last_certificate_timestamp()
                    .unwrap_or(realm.created_on),
            });
        }
        if let Some(strictly_greater_than) = store.last_common_timestamp {
            if certificate.timestamp <= strictly_greater_than {
                return Err(RealmCreateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let realm_id = certificate.realm_id;
        let timestamp = certificate.timestamp;
        let mut realm = MemoryRealm::new(timestamp);
        realm
            .certificates
            .push(StoredCertificate::new(timestamp, realm_role_certificate.to_vec()));
        realm.current_roles.insert(author.user_id, RealmRole::Owner);
        realm.role_history.push(certificate);
        store.realms.insert(realm_id, realm);

        tracing::info!(organization = %organization_id, realm = %realm_id, "realm created");
        self.event_bus.emit(
            organization_id,
            Event::RealmCertificate { realm_id, timestamp },
        );
        Ok(())
    }

    pub async fn share(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_role_certificate: &[u8],
        recipient_keys_bundle_access: &[u8],
        key_index: u64,
    ) -> Result<(), RealmShareError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmShareError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmShareError::AuthorNotAllowed)?;
        let certificate = Self::load_role_certificate(realm_role_certificate, &author)
            .ok_or(RealmShareError::InvalidCertificate)?;
        let role = certificate
            .role
            .ok_or(RealmShareError::InvalidCertificate)?;
        // Self-grants go through realm_create only
        if certificate.user_id == author.user_id {
            return Err(RealmShareError::InvalidCertificate);
        }
        check_ballpark(certificate.timestamp, now, &self.config.ballpark)?;

        let realm = store
            .realms
            .get(&certificate.realm_id)
            .ok_or(RealmShareError::RealmNotFound)?;
        let last_realm_timestamp = realm
            .last_certificate_timestamp()
            .unwrap_or(realm.created_on);

        let author_role = realm
            .role_of(&author.user_id)
            .ok_or(RealmShareError::AuthorNotAllowed)?;
        if !can_author_role_change(author_role, Some(role))
            || !can_author_role_change(author_role, realm.role_of(&certificate.user_id))
        {
            return Err(RealmShareError::AuthorNotAllowed);
        }

        let recipient = store
            .users
            .get(&certificate.user_id)
            .ok_or(RealmShareError::RecipientNotFound)?;
        if recipient.is_revoked() {
            return Err(RealmShareError::RecipientRevoked);
        }
        if recipient.current_profile() == UserProfile::Outsider
            && matches!(role, RealmRole::Owner | RealmRole::Manager)
        {
            return Err(RealmShareError::RoleIncompatibleWithOutsider);
        }
        if realm.role_of(&certificate.user_id) == Some(role) {
            return Err(RealmShareError::RoleAlreadyGranted {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }
        // The recipient gets access to the current keys bundle
        if key_index != realm.current_key_index() {
            return Err(RealmShareError::BadKeyIndex {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }

        // Sharing affects user state and realm access, so the common topic
        // and the realm's vlob activity bound it too
        let mut strictly_greater_than = realm.last_certificate_timestamp();
        for candidate in [store.last_common_timestamp, realm.last_vlob_timestamp] {
            if candidate > strictly_greater_than {
                strictly_greater_than = candidate;
            }
        }
        if let Some(strictly_greater_than) = strictly_greater_than {
            if certificate.timestamp <= strictly_greater_than {
                return Err(RealmShareError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let realm_id = certificate.realm_id;
        let timestamp = certificate.timestamp;
        let recipient_id = certificate.user_id;
        let current_key_index = realm.current_key_index();
        if let Some(realm) = store.realms.get_mut(&realm_id) {
            realm
                .certificates
                .push(StoredCertificate::new(timestamp, realm_role_certificate.to_vec()));
            realm.current_roles.insert(recipient_id, role);
            realm.unshared_on.remove(&recipient_id);
            realm.role_history.push(certificate);
            if current_key_index > 0 {
                if let Some(rotation) = realm.key_rotations.last_mut() {
                    rotation
                        .per_participant_access
                        .insert(recipient_id, recipient_keys_bundle_access.to_vec());
                }
            }
        }

        self.event_bus.emit(
            organization_id,
            Event::RealmCertificate { realm_id, timestamp },
        );
        Ok(())
    }

    pub async fn unshare(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_role_certificate: &[u8],
    ) -> Result<(), RealmUnshareError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmUnshareError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmUnshareError::AuthorNotAllowed)?;
        let certificate = Self::load_role_certificate(realm_role_certificate, &author)
            .ok_or(RealmUnshareError::InvalidCertificate)?;
        if certificate.role.is_some() {
            return Err(RealmUnshareError::InvalidCertificate);
        }
        check_ballpark(certificate.timestamp, now, &self.config.ballpark)?;

        let realm = store
            .realms
            .get(&certificate.realm_id)
            .ok_or(RealmUnshareError::RealmNotFound)?;
        let last_realm_timestamp = realm
            .last_certificate_timestamp()
            .unwrap_or(realm.created_on);

        let author_role = realm
            .role_of(&author.user_id)
            .ok_or(RealmUnshareError::AuthorNotAllowed)?;
        let target_role = realm.role_of(&certificate.user_id);
        if certificate.user_id == author.user_id {
            // Self-unshare keeps the realm owned
            if author_role == RealmRole::Owner && realm.owner_count() == 1 {
                return Err(RealmUnshareError::LastOwnerCannotBeUnshared);
            }
        } else if !can_author_role_change(author_role, target_role) {
            return Err(RealmUnshareError::AuthorNotAllowed);
        }

        if !store.users.contains_key(&certificate.user_id) {
            return Err(RealmUnshareError::RecipientNotFound);
        }
        if target_role.is_none() {
            return Err(RealmUnshareError::RecipientAlreadyUnshared {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }
        if target_role == Some(RealmRole::Owner)
            && certificate.user_id != author.user_id
            && author_role != RealmRole::Owner
        {
            return Err(RealmUnshareError::AuthorNotAllowed);
        }
        if target_role == Some(RealmRole::Owner) && realm.owner_count() == 1 {
            return Err(RealmUnshareError::LastOwnerCannotBeUnshared);
        }

        let mut strictly_greater_than = realm.last_certificate_timestamp();
        for candidate in [store.last_common_timestamp, realm.last_vlob_timestamp] {
            if candidate > strictly_greater_than {
                strictly_greater_than = candidate;
            }
        }
        if let Some(strictly_greater_than) = strictly_greater_than {
            if certificate.timestamp <= strictly_greater_than {
                return Err(RealmUnshareError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let realm_id = certificate.realm_id;
        let timestamp = certificate.timestamp;
        let recipient_id = certificate.user_id;
        if let Some(realm) = store.realms.get_mut(&realm_id) {
            realm
                .certificates
                .push(StoredCertificate::new(timestamp, realm_role_certificate.to_vec()));
            realm.current_roles.remove(&recipient_id);
            realm.unshared_on.insert(recipient_id, timestamp);
            realm.role_history.push(certificate);
            if let Some(rotation) = realm.key_rotations.last_mut() {
                rotation.per_participant_access.remove(&recipient_id);
            }
        }

        self.event_bus.emit(
            organization_id,
            Event::RealmCertificate { realm_id, timestamp },
        );
        Ok(())
    }

    pub async fn rename(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_name_certificate: &[u8],
        initial_name_or_fail: bool,
    ) -> Result<(), RealmRenameError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmRenameError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmRenameError::AuthorNotAllowed)?;
        let certificate = RealmNameCertificate::verify_and_load(
            realm_name_certificate,
            &author.verify_key,
            author.device_id,
            None,
        )
        .map_err(|_| RealmRenameError::InvalidCertificate)?;
        check_ballpark(certificate.timestamp, now, &self.config.ballpark)?;

        let realm = store
            .realms
            .get(&certificate.realm_id)
            .ok_or(RealmRenameError::RealmNotFound)?;
        let last_realm_timestamp = realm
            .last_certificate_timestamp()
            .unwrap_or(realm.created_on);

        match realm.role_of(&author.user_id) {
            Some(RealmRole::Owner | RealmRole::Manager | RealmRole::Contributor) => {}
            _ => return Err(RealmRenameError::AuthorNotAllowed),
        }
        if initial_name_or_fail && !realm.renames.is_empty() {
            return Err(RealmRenameError::InitialNameAlreadyExists {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }
        // The name is encrypted with the current realm key
        if certificate.key_index != realm.current_key_index() {
            return Err(RealmRenameError::BadKeyIndex {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }
        if let Some(strictly_greater_than) = realm.last_certificate_timestamp() {
            if certificate.timestamp <= strictly_greater_than {
                return Err(RealmRenameError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let realm_id = certificate.realm_id;
        let timestamp = certificate.timestamp;
        if let Some(realm) = store.realms.get_mut(&realm_id) {
            realm
                .certificates
                .push(StoredCertificate::new(timestamp, realm_name_certificate.to_vec()));
            realm.renames.push(certificate);
        }

        self.event_bus.emit(
            organization_id,
            Event::RealmCertificate { realm_id, timestamp },
        );
        Ok(())
    }

    pub async fn rotate_key(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_key_rotation_certificate: &[u8],
        per_participant_keys_bundle_access: HashMap<UserID, Vec<u8>>,
        keys_bundle: Vec<u8>,
    ) -> Result<(), RealmRotateKeyError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmRotateKeyError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmRotateKeyError::AuthorNotAllowed)?;
        let certificate = RealmKeyRotationCertificate::verify_and_load(
            realm_key_rotation_certificate,
            &author.verify_key,
            author.device_id,
            None,
        )
        .map_err(|_| RealmRotateKeyError::InvalidCertificate)?;
        check_ballpark(certificate.timestamp, now, &self.config.ballpark)?;

        let realm = store
            .realms
            .get(&certificate.realm_id)
            .ok_or(RealmRotateKeyError::RealmNotFound)?;
        let last_realm_timestamp = realm
            .last_certificate_timestamp()
            .unwrap_or(realm.created_on);

        if realm.role_of(&author.user_id) != Some(RealmRole::Owner) {
            return Err(RealmRotateKeyError::AuthorNotAllowed);
        }
        if certificate.key_index != realm.current_key_index() + 1 {
            return Err(RealmRotateKeyError::BadKeyIndex {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }

        // One bundle access per current non-revoked participant, no extras
        let mut expected: Vec<&UserID> = realm
            .current_roles
            .keys()
            .filter(|user_id| {
                store
                    .users
                    .get(user_id)
                    .map(|user| !user.is_revoked())
                    .unwrap_or(false)
            })
            .collect();
        expected.sort();
        let mut provided: Vec<&UserID> = per_participant_keys_bundle_access.keys().collect();
        provided.sort();
        if expected != provided {
            return Err(RealmRotateKeyError::ParticipantMismatch {
                last_realm_certificate_timestamp: last_realm_timestamp,
            });
        }

        if let Some(strictly_greater_than) = realm.last_certificate_timestamp() {
            if certificate.timestamp <= strictly_greater_than {
                return Err(RealmRotateKeyError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let realm_id = certificate.realm_id;
        let timestamp = certificate.timestamp;
        if let Some(realm) = store.realms.get_mut(&realm_id) {
            realm.certificates.push(StoredCertificate::new(
                timestamp,
                realm_key_rotation_certificate.to_vec(),
            ));
            realm.key_rotations.push(MemoryKeyRotation {
                cooked: certificate,
                keys_bundle,
                per_participant_access: per_participant_keys_bundle_access,
            });
        }

        tracing::info!(organization = %organization_id, realm = %realm_id, "realm key rotated");
        self.event_bus.emit(
            organization_id,
            Event::RealmCertificate { realm_id, timestamp },
        );
        Ok(())
    }

    pub async fn get_keys_bundle(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        realm_id: VlobID,
        key_index: u64,
    ) -> Result<KeysBundle, RealmGetKeysBundleError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmGetKeysBundleError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| RealmGetKeysBundleError::AuthorNotAllowed)?;
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(RealmGetKeysBundleError::AuthorNotAllowed)?;
        if realm.role_of(&author.user_id).is_none() {
            return Err(RealmGetKeysBundleError::AuthorNotAllowed);
        }
        if key_index == 0 || key_index > realm.current_key_index() {
            return Err(RealmGetKeysBundleError::BadKeyIndex);
        }
        let rotation = &realm.key_rotations[key_index as usize - 1];
        let access = rotation
            .per_participant_access
            .get(&author.user_id)
            .ok_or(RealmGetKeysBundleError::AccessNotAvailableForAuthor)?;
        Ok(KeysBundle {
            keys_bundle: rotation.keys_bundle.clone(),
            keys_bundle_access: access.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rights_matrix() {
        use RealmRole::*;
        assert!(can_author_role_change(Owner, Some(Owner)));
        assert!(can_author_role_change(Owner, Some(Manager)));
        assert!(can_author_role_change(Owner, None));
        assert!(can_author_role_change(Manager, Some(Contributor)));
        assert!(can_author_role_change(Manager, Some(Reader)));
        assert!(can_author_role_change(Manager, None));
        assert!(!can_author_role_change(Manager, Some(Manager)));
        assert!(!can_author_role_change(Manager, Some(Owner)));
        assert!(!can_author_role_change(Contributor, Some(Reader)));
        assert!(!can_author_role_change(Reader, None));
    }
}
