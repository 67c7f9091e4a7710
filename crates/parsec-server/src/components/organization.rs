//! Organization registry: creation, bootstrap, configuration updates.

use std::sync::Arc;

use parsec_crypto::ed25519::VerifyKey;
use parsec_types::{
    ActiveUsersLimit, BootstrapToken, CertificateSigner, DateTime, DeviceCertificate,
    OrganizationID, SequesterAuthorityCertificate, UserCertificate, UserProfile,
};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::config::{AllowedClientAgent, ServerConfig};
use crate::datamodel::{
    Datamodel, MemoryDevice, MemoryUser, OrganizationStore, SequesterAuthority,
    StoredCertificate, TopicLastTimestamps, Tos,
};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum OrganizationCreateError {
    #[error("organization already exists")]
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum OrganizationBootstrapError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization expired")]
    OrganizationExpired,
    #[error("invalid bootstrap token")]
    InvalidBootstrapToken,
    #[error("organization already bootstrapped")]
    AlreadyBootstrapped,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
}

#[derive(Debug, thiserror::Error)]
pub enum OrganizationUpdateError {
    #[error("organization not found")]
    OrganizationNotFound,
}

/// Fields of `organization_update`; `None` leaves the field untouched.
#[derive(Debug, Default, Clone)]
pub struct OrganizationUpdate {
    pub is_expired: Option<bool>,
    pub active_users_limit: Option<ActiveUsersLimit>,
    pub user_profile_outsider_allowed: Option<bool>,
    pub allowed_client_agent: Option<AllowedClientAgent>,
    /// Locale to URL; `Some(empty)` removes the TOS entirely.
    pub tos: Option<std::collections::HashMap<String, String>>,
}

pub struct OrganizationComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
}

impl OrganizationComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
        }
    }

    /// Register a new organization and return its bootstrap token.
    pub async fn create(
        &self,
        organization_id: OrganizationID,
        now: DateTime,
        active_users_limit: Option<ActiveUsersLimit>,
        user_profile_outsider_allowed: Option<bool>,
        allowed_client_agent: Option<AllowedClientAgent>,
    ) -> Result<BootstrapToken, OrganizationCreateError> {
        let bootstrap_token = BootstrapToken::generate();
        let store = OrganizationStore::new(
            organization_id.clone(),
            Some(bootstrap_token),
            now,
            active_users_limit.unwrap_or_else(|| self.config.default_active_users_limit()),
            user_profile_outsider_allowed
                .unwrap_or(self.config.organization.user_profile_outsider_allowed),
            allowed_client_agent.unwrap_or(self.config.organization.allowed_client_agent),
        );
        if !self.datamodel.insert_organization(store).await {
            return Err(OrganizationCreateError::AlreadyExists);
        }
        tracing::info!(organization = %organization_id, "organization created");
        Ok(bootstrap_token)
    }

    /// Install the root verify key and the first admin user/device.
    #[allow(clippy::too_many_arguments)]
    pub async fn bootstrap(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        bootstrap_token: Option<BootstrapToken>,
        root_verify_key: VerifyKey,
        user_certificate: &[u8],
        device_certificate: &[u8],
        redacted_user_certificate: &[u8],
        redacted_device_certificate: &[u8],
        sequester_authority_certificate: Option<&[u8]>,
    ) -> Result<(), OrganizationBootstrapError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(OrganizationBootstrapError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        if store.is_expired {
            return Err(OrganizationBootstrapError::OrganizationExpired);
        }
        if store.is_bootstrapped() {
            return Err(OrganizationBootstrapError::AlreadyBootstrapped);
        }
        if store.bootstrap_token != bootstrap_token {
            return Err(OrganizationBootstrapError::InvalidBootstrapToken);
        }

        let user = UserCertificate::verify_and_load(
            user_certificate,
            &root_verify_key,
            CertificateSigner::Root,
            None,
        )
        .map_err(|_| OrganizationBootstrapError::InvalidCertificate)?;
        let device = DeviceCertificate::verify_and_load(
            device_certificate,
            &root_verify_key,
            CertificateSigner::Root,
            None,
        )
        .map_err(|_| OrganizationBootstrapError::InvalidCertificate)?;

        // The first user administrates the organization
        if user.profile != UserProfile::Admin {
            return Err(OrganizationBootstrapError::InvalidCertificate);
        }
        if device.user_id != user.user_id {
            return Err(OrganizationBootstrapError::InvalidCertificate);
        }
        if user.timestamp != device.timestamp {
            return Err(OrganizationBootstrapError::InvalidCertificate);
        }
        let timestamp = user.timestamp;
        check_ballpark(timestamp, now, &self.config.ballpark)?;

        // Redacted twins must be the real certificates stripped of their
        // private fields
        let redacted_user = UserCertificate::verify_and_load(
            redacted_user_certificate,
            &root_verify_key,
            CertificateSigner::Root,
            Some(user.user_id),
        )
        .map_err(|_| OrganizationBootstrapError::InvalidCertificate)?;
        if redacted_user != user.clone().into_redacted() {
            return Err(OrganizationBootstrapError::InvalidCertificate);
        }
        let redacted_device = DeviceCertificate::verify_and_load(
            redacted_device_certificate,
            &root_verify_key,
            CertificateSigner::Root,
            Some(device.device_id),
        )
        .map_err(|_| OrganizationBootstrapError::InvalidCertificate)?;
        if redacted_device != device.clone().into_redacted() {
            return Err(OrganizationBootstrapError::InvalidCertificate);
        }

        let sequester_authority = match sequester_authority_certificate {
            Some(signed) => {
                let authority =
                    SequesterAuthorityCertificate::verify_and_load(signed, &root_verify_key)
                        .map_err(|_| OrganizationBootstrapError::InvalidCertificate)?;
                if authority.timestamp != timestamp {
                    return Err(OrganizationBootstrapError::InvalidCertificate);
                }
                Some(SequesterAuthority {
                    certificate: signed.to_vec(),
                    verify_key: authority.verify_key,
                })
            }
            None => None,
        };

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
        if let Some(authority) = sequester_authority {
            store
                .sequester_certificates
                .push(StoredCertificate::new(timestamp, authority.certificate.clone()));
            store.last_sequester_timestamp = Some(timestamp);
            store.sequester_authority = Some(authority);
        }
        store.root_verify_key = Some(root_verify_key);
        store.bootstrapped_on = Some(now);

        tracing::info!(organization = %organization_id, user = %user_id, "organization bootstrapped");
        self.event_bus
            .emit(organization_id, Event::CommonCertificate { timestamp });
        Ok(())
    }

    pub async fn update(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        update: OrganizationUpdate,
    ) -> Result<(), OrganizationUpdateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(OrganizationUpdateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        if let Some(is_expired) = update.is_expired {
            store.is_expired = is_expired;
        }
        if let Some(limit) = update.active_users_limit {
            store.active_users_limit = limit;
        }
        if let Some(allowed) = update.user_profile_outsider_allowed {
            store.user_profile_outsider_allowed = allowed;
        }
        if let Some(agent) = update.allowed_client_agent {
            store.allowed_client_agent = agent;
        }
        if let Some(per_locale_urls) = update.tos {
            // Any TOS change forces every user to re-accept
            store.tos = if per_locale_urls.is_empty() {
                None
            } else {
                Some(Tos {
                    updated_on: now,
                    per_locale_urls,
                })
            };
        }
        tracing::info!(organization = %organization_id, "organization updated");
        Ok(())
    }

    /// Per-topic last timestamps, used by clients and tests to compute the
    /// next valid certificate timestamp.
    pub async fn dump_topics(
        &self,
        organization_id: &OrganizationID,
    ) -> Option<TopicLastTimestamps> {
        let org = self.datamodel.organization(organization_id).await?;
        let store = org.lock().await;
        Some(store.per_topic_last_timestamps())
    }
}
