//! User and device certificates: creation, profile updates, revocation,
//! freezing, TOS acceptance and certificate retrieval.

use std::collections::HashMap;
use std::sync::Arc;

use parsec_crypto::ed25519::VerifyKey;
use parsec_types::{
    CertificateSigner, DateTime, DeviceCertificate, DeviceID, OrganizationID, RealmRole,
    RevokedUserCertificate, UserCertificate, UserID, UserProfile, UserUpdateCertificate, VlobID,
};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::components::resolve_author;
use crate::config::ServerConfig;
use crate::datamodel::{
    Datamodel, MemoryDevice, MemoryProfileUpdate, MemoryUser, MemoryUserRevocation,
    StoredCertificate,
};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum UserCreateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("active users limit reached")]
    ActiveUsersLimitReached,
    #[error("human handle already taken")]
    HumanHandleAlreadyTaken,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("device already exists")]
    DeviceAlreadyExists,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceCreateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("device already exists")]
    DeviceAlreadyExists,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum UserRevokeError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("user not found")]
    UserNotFound,
    #[error("user already revoked")]
    UserAlreadyRevoked {
        last_common_certificate_timestamp: DateTime,
    },
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum UserUpdateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("user not found")]
    UserNotFound,
    #[error("user is revoked")]
    UserRevoked,
    #[error("profile unchanged")]
    UserNoChanges,
    #[error("user owns or manages realms")]
    UserCannotBecomeOutsider,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum UserFreezeError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("user not found")]
    UserNotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum TosAcceptError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("organization has no terms of service")]
    NoTos,
    #[error("terms of service were updated since")]
    TosMismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum GetCertificatesError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
}

/// Raw signed certificates, grouped by topic.
#[derive(Debug, Default)]
pub struct CertificatesBundle {
    pub common: Vec<Vec<u8>>,
    pub sequester: Vec<Vec<u8>>,
    pub shamir_recovery: Vec<Vec<u8>>,
    pub realm: HashMap<VlobID, Vec<Vec<u8>>>,
}

/// Administrative view of one user, as listed by the administration API.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user_id: UserID,
    pub email: String,
    pub profile: UserProfile,
    pub created_on: DateTime,
    pub revoked_on: Option<DateTime>,
    pub is_frozen: bool,
}

pub struct UserComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
}

impl UserComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_user(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        user_certificate: &[u8],
        device_certificate: &[u8],
        redacted_user_certificate: &[u8],
        redacted_device_certificate: &[u8],
    ) -> Result<(), UserCreateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(UserCreateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| UserCreateError::AuthorNotAllowed)?;
        if author.profile != UserProfile::Admin {
            return Err(UserCreateError::AuthorNotAllowed);
        }

        let expected_author = CertificateSigner::Device(author.device_id);
        let user =
            UserCertificate::verify_and_load(user_certificate, &author.verify_key, expected_author, None)
                .map_err(|_| UserCreateError::InvalidCertificate)?;
        let device = DeviceCertificate::verify_and_load(
            device_certificate,
            &author.verify_key,
            expected_author,
            None,
        )
        .map_err(|_| UserCreateError::InvalidCertificate)?;
        if device.user_id != user.user_id || device.timestamp != user.timestamp {
            return Err(UserCreateError::InvalidCertificate);
        }
        let timestamp = user.timestamp;
        check_ballpark(timestamp, now, &self.config.ballpark)?;

        let redacted_user = UserCertificate::verify_and_load(
            redacted_user_certificate,
            &author.verify_key,
            expected_author,
            Some(user.user_id),
        )
        .map_err(|_| UserCreateError::InvalidCertificate)?;
        if redacted_user != user.clone().into_redacted() {
            return Err(UserCreateError::InvalidCertificate);
        }
        let redacted_device = DeviceCertificate::verify_and_load(
            redacted_device_certificate,
            &author.verify_key,
            expected_author,
            Some(device.device_id),
        )
        .map_err(|_| UserCreateError::InvalidCertificate)?;
        if redacted_device != device.clone().into_redacted() {
            return Err(UserCreateError::InvalidCertificate);
        }

        if user.profile == UserProfile::Outsider && !store.user_profile_outsider_allowed {
            return Err(UserCreateError::AuthorNotAllowed);
        }

        if let Some(strictly_greater_than) = store.last_common_timestamp {
            if timestamp <= strictly_greater_than {
                return Err(UserCreateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        if store.users.contains_key(&user.user_id) {
            return Err(UserCreateError::UserAlreadyExists);
        }
        if store.devices.contains_key(&device.device_id) {
            return Err(UserCreateError::DeviceAlreadyExists);
        }
        if store
            .user_by_email(user.human_handle.as_ref().email())
            .is_some()
        {
            return Err(UserCreateError::HumanHandleAlreadyTaken);
        }
        if !store.active_users_limit.allows(store.active_user_count()) {
            return Err(UserCreateError::ActiveUsersLimitReached);
        }

        let user_id = user.user_id;
        store.users.insert(
            user_id,
            MemoryUser {
                cooked: user,
                user_certificate: user_certificate.to_vec(),
                redacted_user_certificate: redacted_user_certificate.to_vec(),
                profile_updates: Vec::new(),
                is_frozen: false,
                revoked: None,
                tos_accepted_on: None,
            },
        );
        store.devices.insert(
            device.device_id,
            MemoryDevice {
                cooked: device,
                device_certificate: device_certificate.to_vec(),
                redacted_device_certificate: redacted_device_certificate.to_vec(),
            },
        );
        store.common_certificates.push(StoredCertificate::with_redacted(
            timestamp,
            user_certificate.to_vec(),
            redacted_user_certificate.to_vec(),
        ));
        store.common_certificates.push(StoredCertificate::with_redacted(
            timestamp,
            device_certificate.to_vec(),
            redacted_device_certificate.to_vec(),
        ));
        store.last_common_timestamp = Some(timestamp);

        tracing::info!(organization = %organization_id, user = %user_id, "user created");
        self.event_bus
            .emit(organization_id, Event::CommonCertificate { timestamp });
        Ok(())
    }

    pub async fn create_device(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        device_certificate: &[u8],
        redacted_device_certificate: &[u8],
    ) -> Result<(), DeviceCreateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(DeviceCreateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| DeviceCreateError::AuthorNotAllowed)?;
        let expected_author = CertificateSigner::Device(author.device_id);

        let device = DeviceCertificate::verify_and_load(
            device_certificate,
            &author.verify_key,
            expected_author,
            None,
        )
        .map_err(|_| DeviceCreateError::InvalidCertificate)?;
        // A device is always enrolled by its own user
        if device.user_id != author.user_id {
            return Err(DeviceCreateError::InvalidCertificate);
        }
        let timestamp = device.timestamp;
        check_ballpark(timestamp, now, &self.config.ballpark)?;

        let redacted_device = DeviceCertificate::verify_and_load(
            redacted_device_certificate,
            &author.verify_key,
            expected_author,
            Some(device.device_id),
        )
        .map_err(|_| DeviceCreateError::InvalidCertificate)?;
        if redacted_device != device.clone().into_redacted() {
            return Err(DeviceCreateError::InvalidCertificate);
        }

        if let Some(strictly_greater_than) = store.last_common_timestamp {
            if timestamp <= strictly_greater_than {
                return Err(DeviceCreateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }
        if store.devices.contains_key(&device.device_id) {
            return Err(DeviceCreateError::DeviceAlreadyExists);
        }

        store.devices.insert(
            device.device_id,
            MemoryDevice {
                cooked: device,
                device_certificate: device_certificate.to_vec(),
                redacted_device_certificate: redacted_device_certificate.to_vec(),
            },
        );
        store.common_certificates.push(StoredCertificate::with_redacted(
            timestamp,
            device_certificate.to_vec(),
            redacted_device_certificate.to_vec(),
        ));
        store.last_common_timestamp = Some(timestamp);

        self.event_bus
            .emit(organization_id, Event::CommonCertificate { timestamp });
        Ok(())
    }

    pub async fn revoke_user(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        revoked_user_certificate: &[u8],
    ) -> Result<(), UserRevokeError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(UserRevokeError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| UserRevokeError::AuthorNotAllowed)?;
        if author.profile != UserProfile::Admin {
            return Err(UserRevokeError::AuthorNotAllowed);
        }

        let revocation = RevokedUserCertificate::verify_and_load(
            revoked_user_certificate,
            &author.verify_key,
            author.device_id,
            None,
        )
        .map_err(|_| UserRevokeError::InvalidCertificate)?;
        if revocation.user_id == author.user_id {
            return Err(UserRevokeError::AuthorNotAllowed);
        }
        check_ballpark(revocation.timestamp, now, &self.config.ballpark)?;

        let target = store
            .users
            .get(&revocation.user_id)
            .ok_or(UserRevokeError::UserNotFound)?;
        if target.is_revoked() {
            return Err(UserRevokeError::UserAlreadyRevoked {
                last_common_certificate_timestamp: store
                    .last_common_timestamp
                    .unwrap_or(store.created_on),
            });
        }

        // The revocation must postdate anything the target could still be
        // writing: the common topic plus the vlob activity of its realms
        let mut strictly_greater_than = store.last_common_timestamp;
        for (realm_id, _) in store.realms_for_user(&revocation.user_id) {
            if let Some(realm) = store.realms.get(&realm_id) {
                let candidate = realm.last_vlob_timestamp;
                if candidate > strictly_greater_than {
                    strictly_greater_than = candidate;
                }
            }
        }
        if let Some(strictly_greater_than) = strictly_greater_than {
            if revocation.timestamp <= strictly_greater_than {
                return Err(UserRevokeError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = revocation.timestamp;
        let target_id = revocation.user_id;
        if let Some(user) = store.users.get_mut(&target_id) {
            user.revoked = Some(MemoryUserRevocation {
                cooked: revocation,
                revoked_user_certificate: revoked_user_certificate.to_vec(),
            });
        }
        store
            .common_certificates
            .push(StoredCertificate::new(timestamp, revoked_user_certificate.to_vec()));
        store.last_common_timestamp = Some(timestamp);

        tracing::info!(organization = %organization_id, user = %target_id, "user revoked");
        self.event_bus
            .emit(organization_id, Event::CommonCertificate { timestamp });
        self.event_bus
            .emit(organization_id, Event::UserRevokedOrFrozen { user_id: target_id });
        Ok(())
    }

    pub async fn update_user(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        user_update_certificate: &[u8],
    ) -> Result<(), UserUpdateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(UserUpdateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| UserUpdateError::AuthorNotAllowed)?;
        if author.profile != UserProfile::Admin {
            return Err(UserUpdateError::AuthorNotAllowed);
        }

        let update = UserUpdateCertificate::verify_and_load(
            user_update_certificate,
            &author.verify_key,
            author.device_id,
            None,
        )
        .map_err(|_| UserUpdateError::InvalidCertificate)?;
        if update.user_id == author.user_id {
            return Err(UserUpdateError::AuthorNotAllowed);
        }
        check_ballpark(update.timestamp, now, &self.config.ballpark)?;

        let target = store
            .users
            .get(&update.user_id)
            .ok_or(UserUpdateError::UserNotFound)?;
        if target.is_revoked() {
            return Err(UserUpdateError::UserRevoked);
        }
        if target.current_profile() == update.new_profile {
            return Err(UserUpdateError::UserNoChanges);
        }
        if update.new_profile == UserProfile::Outsider {
            if !store.user_profile_outsider_allowed {
                return Err(UserUpdateError::AuthorNotAllowed);
            }
            let owns_or_manages = store
                .realms_for_user(&update.user_id)
                .into_iter()
                .any(|(_, role)| matches!(role, RealmRole::Owner | RealmRole::Manager));
            if owns_or_manages {
                return Err(UserUpdateError::UserCannotBecomeOutsider);
            }
        }

        // Realm rights derive from the profile, so the update must also
        // postdate the target's realm topics
        let mut strictly_greater_than = store.last_common_timestamp;
        for (realm_id, _) in store.realms_for_user(&update.user_id) {
            if let Some(realm) = store.realms.get(&realm_id) {
                let candidate = realm.last_certificate_timestamp();
                if candidate > strictly_greater_than {
                    strictly_greater_than = candidate;
                }
            }
        }
        if let Some(strictly_greater_than) = strictly_greater_than {
            if update.timestamp <= strictly_greater_than {
                return Err(UserUpdateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = update.timestamp;
        let target_id = update.user_id;
        if let Some(user) = store.users.get_mut(&target_id) {
            user.profile_updates.push(MemoryProfileUpdate {
                cooked: update,
                user_update_certificate: user_update_certificate.to_vec(),
            });
        }
        store
            .common_certificates
            .push(StoredCertificate::new(timestamp, user_update_certificate.to_vec()));
        store.last_common_timestamp = Some(timestamp);

        self.event_bus
            .emit(organization_id, Event::CommonCertificate { timestamp });
        Ok(())
    }

    /// Administrative flag, not a certificate: a frozen user keeps its
    /// place in the certificate chain but every request is rejected until
    /// unfrozen.
    pub async fn freeze_user(
        &self,
        organization_id: &OrganizationID,
        user_id: UserID,
        frozen: bool,
    ) -> Result<(), UserFreezeError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(UserFreezeError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let user = store
            .users
            .get_mut(&user_id)
            .ok_or(UserFreezeError::UserNotFound)?;
        user.is_frozen = frozen;

        let event = if frozen {
            Event::UserRevokedOrFrozen { user_id }
        } else {
            Event::UserUnfrozen { user_id }
        };
        self.event_bus.emit(organization_id, event);
        Ok(())
    }

    pub async fn accept_tos(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        tos_updated_on: DateTime,
    ) -> Result<(), TosAcceptError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(TosAcceptError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| TosAcceptError::AuthorNotAllowed)?;
        let current = store.tos.as_ref().ok_or(TosAcceptError::NoTos)?;
        if current.updated_on != tos_updated_on {
            return Err(TosAcceptError::TosMismatch);
        }
        if let Some(user) = store.users.get_mut(&author.user_id) {
            user.tos_accepted_on = Some(now);
        }
        Ok(())
    }

    /// Incremental certificate fetch.
    ///
    /// OUTSIDER authors receive the redacted flavor of every certificate.
    /// Shamir certificates are only served to the setup author and the
    /// share recipients. Realm histories served to a removed member stop
    /// at the unshare timestamp.
    pub async fn get_certificates(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        common_after: Option<DateTime>,
        sequester_after: Option<DateTime>,
        shamir_recovery_after: Option<DateTime>,
        realm_after: &HashMap<VlobID, DateTime>,
    ) -> Result<CertificatesBundle, GetCertificatesError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(GetCertificatesError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| GetCertificatesError::AuthorNotAllowed)?;
        let redacted = author.profile == UserProfile::Outsider;

        let after = |watermark: Option<DateTime>, timestamp: DateTime| match watermark {
            Some(watermark) => timestamp > watermark,
            None => true,
        };

        let mut bundle = CertificatesBundle::default();
        for stored in &store.common_certificates {
            if after(common_after, stored.timestamp) {
                let bytes = if redacted {
                    stored.redacted_or_real()
                } else {
                    &stored.certificate
                };
                bundle.common.push(bytes.to_vec());
            }
        }
        for stored in &store.sequester_certificates {
            if after(sequester_after, stored.timestamp) {
                bundle.sequester.push(stored.certificate.clone());
            }
        }
        for stored in &store.shamir_certificates {
            if after(shamir_recovery_after, stored.timestamp)
                && stored.visible_to.contains(&author.user_id)
            {
                bundle.shamir_recovery.push(stored.certificate.clone());
            }
        }
        for (realm_id, realm) in &store.realms {
            let truncate_at = match realm.role_of(&author.user_id) {
                Some(_) => None,
                None => match realm.unshared_on.get(&author.user_id) {
                    Some(unshared_on) => Some(*unshared_on),
                    // Never part of this realm
                    None => continue,
                },
            };
            let watermark = realm_after.get(realm_id).copied();
            let certificates: Vec<Vec<u8>> = realm
                .certificates
                .iter()
                .filter(|stored| after(watermark, stored.timestamp))
                .filter(|stored| truncate_at.map(|t| stored.timestamp <= t).unwrap_or(true))
                .map(|stored| stored.certificate.clone())
                .collect();
            if !certificates.is_empty() {
                bundle.realm.insert(*realm_id, certificates);
            }
        }
        Ok(bundle)
    }

    /// Used by the transport to authenticate request signatures.
    pub async fn get_active_device_verify_key(
        &self,
        organization_id: &OrganizationID,
        device_id: DeviceID,
    ) -> Option<VerifyKey> {
        let org = self.datamodel.organization(organization_id).await?;
        let store = org.lock().await;
        resolve_author(&store, device_id)
            .ok()
            .map(|author| author.verify_key)
    }

    pub async fn list_users(&self, organization_id: &OrganizationID) -> Option<Vec<UserInfo>> {
        let org = self.datamodel.organization(organization_id).await?;
        let store = org.lock().await;
        let mut users: Vec<UserInfo> = store
            .users
            .iter()
            .map(|(user_id, user)| UserInfo {
                user_id: *user_id,
                email: user.email().to_string(),
                profile: user.current_profile(),
                created_on: user.created_on(),
                revoked_on: user.revoked.as_ref().map(|r| r.cooked.timestamp),
                is_frozen: user.is_frozen,
            })
            .collect();
        users.sort_by_key(|info| info.created_on);
        Some(users)
    }
}
