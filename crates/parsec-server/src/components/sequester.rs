//! Sequester services: administrative escrow endpoints.
//!
//! Service certificates are signed by the sequester authority key
//! installed at bootstrap, not by a device. All operations are rejected
//! with `SequesterDisabled` on organizations bootstrapped without an
//! authority.

use std::sync::Arc;

use parsec_types::{
    DateTime, OrganizationID, SequesterRevokedServiceCertificate, SequesterServiceCertificate,
    SequesterServiceID,
};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::config::ServerConfig;
use crate::datamodel::{
    Datamodel, MemorySequesterRevocation, MemorySequesterService, SequesterServiceConfig,
    StoredCertificate,
};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum SequesterCreateServiceError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization is not sequestered")]
    SequesterDisabled,
    #[error("service already exists")]
    ServiceAlreadyExists,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum SequesterRevokeServiceError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization is not sequestered")]
    SequesterDisabled,
    #[error("service not found")]
    ServiceNotFound,
    #[error("service already revoked")]
    ServiceAlreadyRevoked,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum SequesterGetServiceError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization is not sequestered")]
    SequesterDisabled,
    #[error("service not found")]
    ServiceNotFound,
}

/// Administrative view of a sequester service.
#[derive(Debug, Clone)]
pub struct SequesterServiceInfo {
    pub service_id: SequesterServiceID,
    pub service_label: String,
    pub created_on: DateTime,
    pub revoked_on: Option<DateTime>,
    pub config: SequesterServiceConfig,
}

pub struct SequesterComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
}

impl SequesterComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
        }
    }

    pub async fn create_service(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        service_certificate: &[u8],
        service_config: SequesterServiceConfig,
    ) -> Result<(), SequesterCreateServiceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(SequesterCreateServiceError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let authority = store
            .sequester_authority
            .as_ref()
            .ok_or(SequesterCreateServiceError::SequesterDisabled)?;
        let service = SequesterServiceCertificate::verify_and_load(
            service_certificate,
            &authority.verify_key,
        )
        .map_err(|_| SequesterCreateServiceError::InvalidCertificate)?;
        check_ballpark(service.timestamp, now, &self.config.ballpark)?;

        if store.sequester_services.contains_key(&service.service_id) {
            return Err(SequesterCreateServiceError::ServiceAlreadyExists);
        }
        if let Some(strictly_greater_than) = store.last_sequester_timestamp {
            if service.timestamp <= strictly_greater_than {
                return Err(SequesterCreateServiceError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = service.timestamp;
        let service_id = service.service_id;
        store
            .sequester_certificates
            .push(StoredCertificate::new(timestamp, service_certificate.to_vec()));
        store.sequester_services.insert(
            service_id,
            MemorySequesterService {
                cooked: service,
                service_certificate: service_certificate.to_vec(),
                config: service_config,
                revoked: None,
            },
        );
        store.last_sequester_timestamp = Some(timestamp);

        tracing::info!(organization = %organization_id, service = %service_id, "sequester service created");
        self.event_bus
            .emit(organization_id, Event::SequesterCertificate { timestamp });
        Ok(())
    }

    /// Switch a service between storage and webhook delivery.
    pub async fn update_config_for_service(
        &self,
        organization_id: &OrganizationID,
        service_id: SequesterServiceID,
        service_config: SequesterServiceConfig,
    ) -> Result<(), SequesterGetServiceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(SequesterGetServiceError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        if !store.is_sequestered() {
            return Err(SequesterGetServiceError::SequesterDisabled);
        }
        let service = store
            .sequester_services
            .get_mut(&service_id)
            .ok_or(SequesterGetServiceError::ServiceNotFound)?;
        service.config = service_config;
        Ok(())
    }

    pub async fn revoke_service(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        revoked_service_certificate: &[u8],
    ) -> Result<(), SequesterRevokeServiceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(SequesterRevokeServiceError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let authority = store
            .sequester_authority
            .as_ref()
            .ok_or(SequesterRevokeServiceError::SequesterDisabled)?;
        let revocation = SequesterRevokedServiceCertificate::verify_and_load(
            revoked_service_certificate,
            &authority.verify_key,
        )
        .map_err(|_| SequesterRevokeServiceError::InvalidCertificate)?;
        check_ballpark(revocation.timestamp, now, &self.config.ballpark)?;

        let service = store
            .sequester_services
            .get(&revocation.service_id)
            .ok_or(SequesterRevokeServiceError::ServiceNotFound)?;
        if service.is_revoked() {
            return Err(SequesterRevokeServiceError::ServiceAlreadyRevoked);
        }
        if let Some(strictly_greater_than) = store.last_sequester_timestamp {
            if revocation.timestamp <= strictly_greater_than {
                return Err(SequesterRevokeServiceError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = revocation.timestamp;
        let service_id = revocation.service_id;
        store.sequester_certificates.push(StoredCertificate::new(
            timestamp,
            revoked_service_certificate.to_vec(),
        ));
        if let Some(service) = store.sequester_services.get_mut(&service_id) {
            service.revoked = Some(MemorySequesterRevocation {
                cooked: revocation,
                revoked_service_certificate: revoked_service_certificate.to_vec(),
            });
        }
        store.last_sequester_timestamp = Some(timestamp);

        tracing::info!(organization = %organization_id, service = %service_id, "sequester service revoked");
        self.event_bus
            .emit(organization_id, Event::SequesterCertificate { timestamp });
        Ok(())
    }

    pub async fn get_service(
        &self,
        organization_id: &OrganizationID,
        service_id: SequesterServiceID,
    ) -> Result<SequesterServiceInfo, SequesterGetServiceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(SequesterGetServiceError::OrganizationNotFound)?;
        let store = org.lock().await;

        if !store.is_sequestered() {
            return Err(SequesterGetServiceError::SequesterDisabled);
        }
        store
            .sequester_services
            .get(&service_id)
            .map(describe)
            .ok_or(SequesterGetServiceError::ServiceNotFound)
    }

    pub async fn get_organization_services(
        &self,
        organization_id: &OrganizationID,
    ) -> Result<Vec<SequesterServiceInfo>, SequesterGetServiceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(SequesterGetServiceError::OrganizationNotFound)?;
        let store = org.lock().await;

        if !store.is_sequestered() {
            return Err(SequesterGetServiceError::SequesterDisabled);
        }
        let mut services: Vec<SequesterServiceInfo> =
            store.sequester_services.values().map(describe).collect();
        services.sort_by_key(|service| service.created_on);
        Ok(services)
    }
}

fn describe(service: &MemorySequesterService) -> SequesterServiceInfo {
    SequesterServiceInfo {
        service_id: service.cooked.service_id,
        service_label: service.cooked.service_label.clone(),
        created_on: service.cooked.timestamp,
        revoked_on: service
            .revoked
            .as_ref()
            .map(|revocation| revocation.cooked.timestamp),
        config: service.config.clone(),
    }
}
