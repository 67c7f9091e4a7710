//! Command dispatch: decode a request envelope, run the pre-command
//! checks, call the owning component and encode the typed reply.
//!
//! Early rejections map to HTTP statuses and never reach a command
//! handler; everything past them is answered with a `status`-tagged reply,
//! including errors.

use std::collections::HashMap;
use std::sync::Arc;

use serde_bytes::ByteBuf;

use parsec_protocol::{anonymous, authenticated, invited, tos, EarlyRejection};
use parsec_types::{DateTime, DeviceID, InvitationToken, OrganizationID};

use crate::ballpark::TimestampOutOfBallpark;
use crate::blockstore::{BlockStore, MemoryBlockStore};
use crate::components::block::{BlockComponent, BlockCreateError, BlockReadError};
use crate::components::invite::{
    CancelAttemptError, ClaimerStartAttemptError, GreeterStartAttemptError, InviteCancelError,
    InviteComponent, InviteInfoError, InviteListError, InviteNewDeviceError,
    InviteNewShamirRecoveryError, InviteNewUserError, StepError,
};
use crate::components::organization::{OrganizationBootstrapError, OrganizationComponent};
use crate::components::realm::{
    RealmComponent, RealmCreateError, RealmGetKeysBundleError, RealmRenameError,
    RealmRotateKeyError, RealmShareError, RealmUnshareError,
};
use crate::components::sequester::SequesterComponent;
use crate::components::shamir::{
    ShamirComponent, ShamirDeleteError, ShamirRevealError, ShamirSetupError,
};
use crate::components::user::{
    DeviceCreateError, GetCertificatesError, TosAcceptError, UserComponent, UserCreateError,
    UserRevokeError, UserUpdateError,
};
use crate::components::vlob::{
    VlobComponent, VlobCreateError, VlobPollChangesError, VlobReadError, VlobUpdateError,
};
use crate::config::{AllowedClientAgent, ServerConfig};
use crate::datamodel::Datamodel;
use crate::events::EventBus;
use crate::export::RealmExporter;
use crate::webhooks::WebhookDispatcher;

fn dump<T: serde::Serialize>(rep: &T) -> Result<Vec<u8>, EarlyRejection> {
    rmp_serde::to_vec_named(rep).map_err(|_| EarlyRejection::MalformedBody)
}

/// Expands a `TimestampOutOfBallpark` reply from the error struct.
macro_rules! ballpark_rep {
    ($rep:ident, $err:expr) => {{
        let TimestampOutOfBallpark {
            server_timestamp,
            client_timestamp,
            ballpark_client_early_offset,
            ballpark_client_late_offset,
        } = $err;
        $rep::TimestampOutOfBallpark {
            server_timestamp,
            client_timestamp,
            ballpark_client_early_offset,
            ballpark_client_late_offset,
        }
    }};
}

/// The server core: one instance per process, all components sharing the
/// same datamodel and event bus.
pub struct Server {
    pub config: Arc<ServerConfig>,
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    blockstore: Arc<dyn BlockStore>,
    pub organization: OrganizationComponent,
    pub user: UserComponent,
    pub realm: RealmComponent,
    pub vlob: VlobComponent,
    pub block: BlockComponent,
    pub invite: InviteComponent,
    pub shamir: ShamirComponent,
    pub sequester: SequesterComponent,
}

impl Server {
    pub fn new(config: ServerConfig, blockstore: Arc<dyn BlockStore>) -> Self {
        let config = Arc::new(config);
        let datamodel = Arc::new(Datamodel::new());
        let event_bus = EventBus::new(config.event_queue_capacity);
        let webhooks = WebhookDispatcher::new(config.clone(), event_bus.clone());
        Self {
            organization: OrganizationComponent::new(
                datamodel.clone(),
                event_bus.clone(),
                config.clone(),
            ),
            user: UserComponent::new(datamodel.clone(), event_bus.clone(), config.clone()),
            realm: RealmComponent::new(datamodel.clone(), event_bus.clone(), config.clone()),
            vlob: VlobComponent::new(
                datamodel.clone(),
                event_bus.clone(),
                config.clone(),
                webhooks,
            ),
            block: BlockComponent::new(datamodel.clone(), config.clone(), blockstore.clone()),
            invite: InviteComponent::new(datamodel.clone(), event_bus.clone()),
            shamir: ShamirComponent::new(datamodel.clone(), event_bus.clone(), config.clone()),
            sequester: SequesterComponent::new(
                datamodel.clone(),
                event_bus.clone(),
                config.clone(),
            ),
            config,
            datamodel,
            event_bus,
            blockstore,
        }
    }

    /// Fully in-memory server, used by tests and the development mode.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(MemoryBlockStore::new()))
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn exporter(&self) -> RealmExporter {
        RealmExporter::new(self.datamodel.clone(), self.blockstore.clone())
    }

    /// Pre-command checks for the authenticated family.
    pub async fn check_authenticated(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        client_is_web: bool,
    ) -> Result<(), EarlyRejection> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(EarlyRejection::OrganizationNotFound)?;
        let store = org.lock().await;

        if store.is_expired {
            return Err(EarlyRejection::OrganizationExpired);
        }
        if client_is_web && store.allowed_client_agent == AllowedClientAgent::NativeOnly {
            return Err(EarlyRejection::ClientAgentNotAllowed);
        }
        let user_id = *store
            .user_of_device(&author)
            .ok_or(EarlyRejection::InvalidAuthentication)?;
        let user = store
            .users
            .get(&user_id)
            .ok_or(EarlyRejection::InvalidAuthentication)?;
        if user.is_revoked() {
            return Err(EarlyRejection::AuthorRevoked);
        }
        if user.is_frozen {
            return Err(EarlyRejection::AuthorFrozen);
        }
        if let Some(tos) = &store.tos {
            let accepted = user
                .tos_accepted_on
                .map(|accepted_on| accepted_on >= tos.updated_on)
                .unwrap_or(false);
            if !accepted {
                return Err(EarlyRejection::TosNotAccepted);
            }
        }
        Ok(())
    }

    /// Pre-command checks for the invited family.
    pub async fn check_invited(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
    ) -> Result<(), EarlyRejection> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(EarlyRejection::OrganizationNotFound)?;
        let store = org.lock().await;

        if store.is_expired {
            return Err(EarlyRejection::OrganizationExpired);
        }
        let invitation = store
            .invitations
            .get(&token)
            .ok_or(EarlyRejection::InvalidAuthentication)?;
        if invitation.deleted.is_some() {
            return Err(EarlyRejection::InvitationAlreadyUsedOrDeleted);
        }
        Ok(())
    }

    pub async fn handle_authenticated(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        raw: &[u8],
    ) -> Result<Vec<u8>, EarlyRejection> {
        use authenticated::AnyCmdReq;

        let req = AnyCmdReq::load(raw).map_err(|_| EarlyRejection::MalformedBody)?;
        let now = DateTime::now();
        match req {
            AnyCmdReq::Ping(req) => {
                dump(&authenticated::ping::Rep::Ok { pong: req.ping })
            }
            AnyCmdReq::CertificateGet(req) => {
                self.certificate_get(organization_id, author, req).await
            }
            AnyCmdReq::UserCreate(req) => {
                use authenticated::user_create::Rep;
                let rep = match self
                    .user
                    .create_user(
                        organization_id,
                        now,
                        author,
                        &req.user_certificate,
                        &req.device_certificate,
                        &req.redacted_user_certificate,
                        &req.redacted_device_certificate,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(UserCreateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(UserCreateError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(UserCreateError::ActiveUsersLimitReached) => Rep::ActiveUsersLimitReached,
                    Err(UserCreateError::HumanHandleAlreadyTaken) => Rep::HumanHandleAlreadyTaken,
                    Err(UserCreateError::UserAlreadyExists) => Rep::UserAlreadyExists,
                    Err(UserCreateError::DeviceAlreadyExists)
                    | Err(UserCreateError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(UserCreateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(UserCreateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::DeviceCreate(req) => {
                use authenticated::device_create::Rep;
                let rep = match self
                    .user
                    .create_device(
                        organization_id,
                        now,
                        author,
                        &req.device_certificate,
                        &req.redacted_device_certificate,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(DeviceCreateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(DeviceCreateError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(DeviceCreateError::DeviceAlreadyExists) => Rep::DeviceAlreadyExists,
                    Err(DeviceCreateError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(DeviceCreateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(DeviceCreateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::UserRevoke(req) => {
                use authenticated::user_revoke::Rep;
                let rep = match self
                    .user
                    .revoke_user(organization_id, now, author, &req.revoked_user_certificate)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(UserRevokeError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(UserRevokeError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(UserRevokeError::UserNotFound) => Rep::UserNotFound,
                    Err(UserRevokeError::UserAlreadyRevoked {
                        last_common_certificate_timestamp,
                    }) => Rep::UserAlreadyRevoked {
                        last_common_certificate_timestamp,
                    },
                    Err(UserRevokeError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(UserRevokeError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(UserRevokeError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::UserUpdate(req) => {
                use authenticated::user_update::Rep;
                let rep = match self
                    .user
                    .update_user(organization_id, now, author, &req.user_update_certificate)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(UserUpdateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(UserUpdateError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(UserUpdateError::UserNotFound) => Rep::UserNotFound,
                    Err(UserUpdateError::UserRevoked) => Rep::UserRevoked,
                    Err(UserUpdateError::UserNoChanges) => Rep::UserNoChanges,
                    Err(UserUpdateError::UserCannotBecomeOutsider) => {
                        Rep::UserCannotBecomeOutsider
                    }
                    Err(UserUpdateError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(UserUpdateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(UserUpdateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmCreate(req) => {
                use authenticated::realm_create::Rep;
                let rep = match self
                    .realm
                    .create(organization_id, now, author, &req.realm_role_certificate)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(RealmCreateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmCreateError::AuthorNotAllowed)
                    | Err(RealmCreateError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(RealmCreateError::RealmAlreadyExists {
                        last_realm_certificate_timestamp,
                    }) => Rep::RealmAlreadyExists {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmCreateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(RealmCreateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmShare(req) => {
                use authenticated::realm_share::Rep;
                let rep = match self
                    .realm
                    .share(
                        organization_id,
                        now,
                        author,
                        &req.realm_role_certificate,
                        &req.recipient_keys_bundle_access,
                        req.key_index,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(RealmShareError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmShareError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(RealmShareError::RealmNotFound) => Rep::RealmNotFound,
                    Err(RealmShareError::RecipientNotFound) => Rep::RecipientNotFound,
                    Err(RealmShareError::RecipientRevoked) => Rep::RecipientRevoked,
                    Err(RealmShareError::RoleIncompatibleWithOutsider) => {
                        Rep::RoleIncompatibleWithOutsider
                    }
                    Err(RealmShareError::RoleAlreadyGranted {
                        last_realm_certificate_timestamp,
                    }) => Rep::RoleAlreadyGranted {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmShareError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmShareError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(RealmShareError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(RealmShareError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmUnshare(req) => {
                use authenticated::realm_unshare::Rep;
                let rep = match self
                    .realm
                    .unshare(organization_id, now, author, &req.realm_role_certificate)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(RealmUnshareError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmUnshareError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(RealmUnshareError::RealmNotFound) => Rep::RealmNotFound,
                    Err(RealmUnshareError::RecipientNotFound) => Rep::RecipientNotFound,
                    Err(RealmUnshareError::RecipientAlreadyUnshared {
                        last_realm_certificate_timestamp,
                    }) => Rep::RecipientAlreadyUnshared {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmUnshareError::LastOwnerCannotBeUnshared) => {
                        Rep::LastOwnerCannotBeUnshared
                    }
                    Err(RealmUnshareError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(RealmUnshareError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(RealmUnshareError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmRename(req) => {
                use authenticated::realm_rename::Rep;
                let rep = match self
                    .realm
                    .rename(
                        organization_id,
                        now,
                        author,
                        &req.realm_name_certificate,
                        req.initial_name_or_fail,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(RealmRenameError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmRenameError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(RealmRenameError::RealmNotFound) => Rep::RealmNotFound,
                    Err(RealmRenameError::InitialNameAlreadyExists {
                        last_realm_certificate_timestamp,
                    }) => Rep::InitialNameAlreadyExists {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmRenameError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmRenameError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(RealmRenameError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(RealmRenameError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmRotateKey(req) => {
                use authenticated::realm_rotate_key::Rep;
                let per_participant = req
                    .per_participant_keys_bundle_access
                    .into_iter()
                    .map(|(user_id, access)| (user_id, access.into_vec()))
                    .collect();
                let rep = match self
                    .realm
                    .rotate_key(
                        organization_id,
                        now,
                        author,
                        &req.realm_key_rotation_certificate,
                        per_participant,
                        req.keys_bundle.into_vec(),
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(RealmRotateKeyError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmRotateKeyError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(RealmRotateKeyError::RealmNotFound) => Rep::RealmNotFound,
                    Err(RealmRotateKeyError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmRotateKeyError::ParticipantMismatch {
                        last_realm_certificate_timestamp,
                    }) => Rep::ParticipantMismatch {
                        last_realm_certificate_timestamp,
                    },
                    Err(RealmRotateKeyError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(RealmRotateKeyError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(RealmRotateKeyError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::RealmGetKeysBundle(req) => {
                use authenticated::realm_get_keys_bundle::Rep;
                let rep = match self
                    .realm
                    .get_keys_bundle(organization_id, author, req.realm_id, req.key_index)
                    .await
                {
                    Ok(bundle) => Rep::Ok {
                        keys_bundle: ByteBuf::from(bundle.keys_bundle),
                        keys_bundle_access: ByteBuf::from(bundle.keys_bundle_access),
                    },
                    Err(RealmGetKeysBundleError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(RealmGetKeysBundleError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(RealmGetKeysBundleError::AccessNotAvailableForAuthor) => {
                        Rep::AccessNotAvailableForAuthor
                    }
                    Err(RealmGetKeysBundleError::BadKeyIndex) => Rep::BadKeyIndex,
                };
                dump(&rep)
            }
            AnyCmdReq::VlobCreate(req) => {
                use authenticated::vlob_create::Rep;
                let sequester_blob = req.sequester_blob.map(|blob| {
                    blob.into_iter()
                        .map(|(service_id, data)| (service_id, data.into_vec()))
                        .collect()
                });
                let rep = match self
                    .vlob
                    .create(
                        organization_id,
                        now,
                        author,
                        req.realm_id,
                        req.vlob_id,
                        req.key_index,
                        req.timestamp,
                        req.blob.into_vec(),
                        sequester_blob,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(VlobCreateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(VlobCreateError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(VlobCreateError::RealmNotFound) => Rep::RealmNotFound,
                    Err(VlobCreateError::VlobAlreadyExists) => Rep::VlobAlreadyExists,
                    Err(VlobCreateError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(VlobCreateError::OrganizationNotSequestered) => {
                        Rep::OrganizationNotSequestered
                    }
                    Err(VlobCreateError::SequesterServiceMismatch {
                        last_sequester_certificate_timestamp,
                    }) => Rep::SequesterServiceMismatch {
                        last_sequester_certificate_timestamp,
                    },
                    Err(VlobCreateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(VlobCreateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::VlobUpdate(req) => {
                use authenticated::vlob_update::Rep;
                let sequester_blob = req.sequester_blob.map(|blob| {
                    blob.into_iter()
                        .map(|(service_id, data)| (service_id, data.into_vec()))
                        .collect()
                });
                let rep = match self
                    .vlob
                    .update(
                        organization_id,
                        now,
                        author,
                        req.vlob_id,
                        req.key_index,
                        req.timestamp,
                        req.version,
                        req.blob.into_vec(),
                        sequester_blob,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(VlobUpdateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(VlobUpdateError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(VlobUpdateError::VlobNotFound) => Rep::VlobNotFound,
                    Err(VlobUpdateError::BadVersion) => Rep::BadVersion,
                    Err(VlobUpdateError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(VlobUpdateError::OrganizationNotSequestered) => {
                        Rep::OrganizationNotSequestered
                    }
                    Err(VlobUpdateError::SequesterServiceMismatch {
                        last_sequester_certificate_timestamp,
                    }) => Rep::SequesterServiceMismatch {
                        last_sequester_certificate_timestamp,
                    },
                    Err(VlobUpdateError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(VlobUpdateError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::VlobReadBatch(req) => {
                use authenticated::vlob_read_batch::Rep;
                let rep = match self
                    .vlob
                    .read_batch(organization_id, author, req.realm_id, &req.vlobs, req.at)
                    .await
                {
                    Ok(result) => Rep::Ok {
                        items: result
                            .items
                            .into_iter()
                            .map(|(id, key_index, author, version, created_on, blob)| {
                                (id, key_index, author, version, created_on, ByteBuf::from(blob))
                            })
                            .collect(),
                        needed_common_certificate_timestamp: result
                            .needed_common_certificate_timestamp,
                        needed_realm_certificate_timestamp: result
                            .needed_realm_certificate_timestamp,
                    },
                    Err(VlobReadError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(VlobReadError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(VlobReadError::RealmNotFound) => Rep::RealmNotFound,
                    Err(VlobReadError::TooManyElements) => Rep::TooManyElements,
                };
                dump(&rep)
            }
            AnyCmdReq::VlobReadVersions(req) => {
                use authenticated::vlob_read_versions::Rep;
                let rep = match self
                    .vlob
                    .read_versions(organization_id, author, req.realm_id, &req.items)
                    .await
                {
                    Ok(result) => Rep::Ok {
                        items: result
                            .items
                            .into_iter()
                            .map(|(id, key_index, author, version, created_on, blob)| {
                                (id, key_index, author, version, created_on, ByteBuf::from(blob))
                            })
                            .collect(),
                        needed_common_certificate_timestamp: result
                            .needed_common_certificate_timestamp,
                        needed_realm_certificate_timestamp: result
                            .needed_realm_certificate_timestamp,
                    },
                    Err(VlobReadError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(VlobReadError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(VlobReadError::RealmNotFound) => Rep::RealmNotFound,
                    Err(VlobReadError::TooManyElements) => Rep::TooManyElements,
                };
                dump(&rep)
            }
            AnyCmdReq::VlobPollChanges(req) => {
                use authenticated::vlob_poll_changes::Rep;
                let rep = match self
                    .vlob
                    .poll_changes(organization_id, author, req.realm_id, req.last_checkpoint)
                    .await
                {
                    Ok(changes) => Rep::Ok {
                        current_checkpoint: changes.current_checkpoint,
                        changes: changes.changes,
                    },
                    Err(VlobPollChangesError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(VlobPollChangesError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(VlobPollChangesError::RealmNotFound) => Rep::RealmNotFound,
                };
                dump(&rep)
            }
            AnyCmdReq::BlockCreate(req) => {
                use authenticated::block_create::Rep;
                let rep = match self
                    .block
                    .create(
                        organization_id,
                        now,
                        author,
                        req.block_id,
                        req.realm_id,
                        req.key_index,
                        req.block.into_vec(),
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(BlockCreateError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(BlockCreateError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(BlockCreateError::RealmNotFound) => Rep::RealmNotFound,
                    Err(BlockCreateError::BlockAlreadyExists) => Rep::BlockAlreadyExists,
                    Err(BlockCreateError::BlockTooLarge) => Rep::BlockTooLarge,
                    Err(BlockCreateError::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    }) => Rep::BadKeyIndex {
                        last_realm_certificate_timestamp,
                    },
                    Err(BlockCreateError::StoreUnavailable) => Rep::StoreUnavailable,
                };
                dump(&rep)
            }
            AnyCmdReq::BlockRead(req) => {
                use authenticated::block_read::Rep;
                let rep = match self.block.read(organization_id, author, req.block_id).await {
                    Ok(result) => Rep::Ok {
                        block: ByteBuf::from(result.block),
                        key_index: result.key_index,
                        needed_realm_certificate_timestamp: result
                            .needed_realm_certificate_timestamp,
                    },
                    Err(BlockReadError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(BlockReadError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(BlockReadError::BlockNotFound) => Rep::BlockNotFound,
                    Err(BlockReadError::StoreUnavailable) => Rep::StoreUnavailable,
                };
                dump(&rep)
            }
            AnyCmdReq::InviteNewUser(req) => {
                use authenticated::invite_new_user::Rep;
                let rep = match self
                    .invite
                    .new_for_user(organization_id, now, author, req.claimer_email)
                    .await
                {
                    Ok(token) => Rep::Ok { token },
                    Err(InviteNewUserError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteNewUserError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(InviteNewUserError::ClaimerEmailAlreadyEnrolled) => {
                        Rep::ClaimerEmailAlreadyEnrolled
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteNewDevice(_) => {
                use authenticated::invite_new_device::Rep;
                let rep = match self.invite.new_for_device(organization_id, now, author).await {
                    Ok(token) => Rep::Ok { token },
                    Err(InviteNewDeviceError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteNewDeviceError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteNewShamirRecovery(req) => {
                use authenticated::invite_new_shamir_recovery::Rep;
                let rep = match self
                    .invite
                    .new_for_shamir_recovery(organization_id, now, author, req.claimer_user_id)
                    .await
                {
                    Ok(token) => Rep::Ok { token },
                    Err(InviteNewShamirRecoveryError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteNewShamirRecoveryError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(InviteNewShamirRecoveryError::ShamirRecoveryNotSetup) => {
                        Rep::ShamirRecoveryNotSetup
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteCancel(req) => {
                use authenticated::invite_cancel::Rep;
                let rep = match self
                    .invite
                    .cancel(organization_id, now, author, req.token)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(InviteCancelError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteCancelError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(InviteCancelError::InvitationNotFound) => Rep::InvitationNotFound,
                    Err(InviteCancelError::InvitationAlreadyCancelled) => {
                        Rep::InvitationAlreadyCancelled
                    }
                    Err(InviteCancelError::InvitationCompleted) => Rep::InvitationCompleted,
                };
                dump(&rep)
            }
            AnyCmdReq::InviteList(_) => {
                use authenticated::invite_list::Rep;
                let rep = match self.invite.list(organization_id, author).await {
                    Ok(invitations) => Rep::Ok { invitations },
                    Err(InviteListError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteListError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteGreeterStartGreetingAttempt(req) => {
                use authenticated::invite_greeter_start_greeting_attempt::Rep;
                let rep = match self
                    .invite
                    .greeter_start_greeting_attempt(organization_id, now, author, req.token)
                    .await
                {
                    Ok(greeting_attempt) => Rep::Ok { greeting_attempt },
                    Err(GreeterStartAttemptError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(GreeterStartAttemptError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(GreeterStartAttemptError::InvitationNotFound) => Rep::InvitationNotFound,
                    Err(GreeterStartAttemptError::InvitationCancelled) => {
                        Rep::InvitationCancelled
                    }
                    Err(GreeterStartAttemptError::InvitationCompleted) => {
                        Rep::InvitationCompleted
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteGreeterCancelGreetingAttempt(req) => {
                use authenticated::invite_greeter_cancel_greeting_attempt::Rep;
                let rep = match self
                    .invite
                    .greeter_cancel_greeting_attempt(
                        organization_id,
                        now,
                        author,
                        req.greeting_attempt,
                        req.reason,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(CancelAttemptError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(CancelAttemptError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(CancelAttemptError::GreetingAttemptNotFound) => {
                        Rep::GreetingAttemptNotFound
                    }
                    Err(CancelAttemptError::GreetingAttemptNotJoined) => {
                        Rep::GreetingAttemptNotJoined
                    }
                    Err(CancelAttemptError::GreetingAttemptAlreadyCancelled {
                        origin,
                        reason,
                        timestamp,
                    }) => Rep::GreetingAttemptAlreadyCancelled {
                        origin,
                        reason,
                        timestamp,
                    },
                    Err(CancelAttemptError::InvitationCancelled) => Rep::InvitationCancelled,
                    Err(CancelAttemptError::InvitationCompleted) => Rep::InvitationCompleted,
                };
                dump(&rep)
            }
            AnyCmdReq::InviteGreeterStep(req) => {
                use authenticated::invite_greeter_step::Rep;
                let rep = match self
                    .invite
                    .greeter_step(organization_id, now, author, req.greeting_attempt, req.greeter_step)
                    .await
                {
                    Ok(Some(claimer_step)) => Rep::Ok { claimer_step },
                    Ok(None) => Rep::NotReady,
                    Err(StepError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(StepError::AuthorNotAllowed) => Rep::AuthorNotAllowed,
                    Err(StepError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
                    Err(StepError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
                    Err(StepError::GreetingAttemptCancelled {
                        origin,
                        reason,
                        timestamp,
                    }) => Rep::GreetingAttemptCancelled {
                        origin,
                        reason,
                        timestamp,
                    },
                    Err(StepError::StepMismatch) => Rep::StepMismatch,
                    Err(StepError::StepTooAdvanced) => Rep::StepTooAdvanced,
                    Err(StepError::InvitationCancelled) => Rep::InvitationCancelled,
                    Err(StepError::InvitationCompleted) => Rep::InvitationCompleted,
                };
                dump(&rep)
            }
            AnyCmdReq::ShamirRecoverySetup(req) => {
                use authenticated::shamir_recovery_setup::Rep;
                let shares: Vec<Vec<u8>> = req
                    .shamir_recovery_share_certificates
                    .into_iter()
                    .map(ByteBuf::into_vec)
                    .collect();
                let rep = match self
                    .shamir
                    .setup(
                        organization_id,
                        now,
                        author,
                        &req.shamir_recovery_brief_certificate,
                        &shares,
                        req.reveal_token,
                        req.ciphered_data.into_vec(),
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(ShamirSetupError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(ShamirSetupError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(ShamirSetupError::ShamirRecoveryAlreadyExists {
                        last_shamir_certificate_timestamp,
                    }) => Rep::ShamirRecoveryAlreadyExists {
                        last_shamir_certificate_timestamp,
                    },
                    Err(ShamirSetupError::AuthorIncludedAsRecipient) => {
                        Rep::AuthorIncludedAsRecipient
                    }
                    Err(ShamirSetupError::RecipientNotFound) => Rep::RecipientNotFound,
                    Err(ShamirSetupError::RecipientRevoked) => Rep::RecipientRevoked,
                    Err(ShamirSetupError::ShareInconsistentTimestamp) => {
                        Rep::ShareInconsistentTimestamp
                    }
                    Err(ShamirSetupError::ShareRecipientsMismatch) => {
                        Rep::ShareRecipientsMismatch
                    }
                    Err(ShamirSetupError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(ShamirSetupError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(ShamirSetupError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::ShamirRecoveryDelete(req) => {
                use authenticated::shamir_recovery_delete::Rep;
                let rep = match self
                    .shamir
                    .delete(
                        organization_id,
                        now,
                        author,
                        &req.shamir_recovery_deletion_certificate,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(ShamirDeleteError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(ShamirDeleteError::AuthorNotAllowed)
                    | Err(ShamirDeleteError::InvalidCertificate) => Rep::InvalidCertificate,
                    Err(ShamirDeleteError::ShamirRecoveryNotFound) => Rep::ShamirRecoveryNotFound,
                    Err(ShamirDeleteError::ShamirRecoveryAlreadyDeleted {
                        last_shamir_certificate_timestamp,
                    }) => Rep::ShamirRecoveryAlreadyDeleted {
                        last_shamir_certificate_timestamp,
                    },
                    Err(ShamirDeleteError::RecipientsMismatch) => Rep::RecipientsMismatch,
                    Err(ShamirDeleteError::TimestampOutOfBallpark(b)) => ballpark_rep!(Rep, b),
                    Err(ShamirDeleteError::RequireGreaterTimestamp {
                        strictly_greater_than,
                    }) => Rep::RequireGreaterTimestamp {
                        strictly_greater_than,
                    },
                };
                dump(&rep)
            }
            AnyCmdReq::UnknownCommand => dump(&authenticated::ping::Rep::UnknownCommand),
        }
    }

    async fn certificate_get(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        req: authenticated::certificate_get::Req,
    ) -> Result<Vec<u8>, EarlyRejection> {
        use authenticated::certificate_get::Rep;
        let bundle = match self
            .user
            .get_certificates(
                organization_id,
                author,
                req.common_after,
                req.sequester_after,
                req.shamir_recovery_after,
                &req.realm_after,
            )
            .await
        {
            Ok(bundle) => bundle,
            Err(GetCertificatesError::OrganizationNotFound) => {
                return Err(EarlyRejection::OrganizationNotFound)
            }
            Err(GetCertificatesError::AuthorNotAllowed) => {
                return Err(EarlyRejection::InvalidAuthentication)
            }
        };
        let to_bufs = |certs: Vec<Vec<u8>>| certs.into_iter().map(ByteBuf::from).collect();
        let realm_certificates: HashMap<_, Vec<ByteBuf>> = bundle
            .realm
            .into_iter()
            .map(|(realm_id, certs)| (realm_id, certs.into_iter().map(ByteBuf::from).collect()))
            .collect();
        dump(&Rep::Ok {
            common_certificates: to_bufs(bundle.common),
            sequester_certificates: to_bufs(bundle.sequester),
            shamir_recovery_certificates: to_bufs(bundle.shamir_recovery),
            realm_certificates,
        })
    }

    pub async fn handle_invited(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
        raw: &[u8],
    ) -> Result<Vec<u8>, EarlyRejection> {
        use invited::AnyCmdReq;

        let req = AnyCmdReq::load(raw).map_err(|_| EarlyRejection::MalformedBody)?;
        let now = DateTime::now();
        match req {
            AnyCmdReq::Ping(req) => dump(&invited::ping::Rep::Ok { pong: req.ping }),
            AnyCmdReq::InviteInfo(_) => {
                use invited::invite_info::Rep;
                match self.invite.info(organization_id, token).await {
                    Ok(info) => dump(&Rep::Ok(info)),
                    Err(InviteInfoError::OrganizationNotFound) => {
                        Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(InviteInfoError::InvitationNotFound) => {
                        Err(EarlyRejection::InvalidAuthentication)
                    }
                }
            }
            AnyCmdReq::InviteClaimerStartGreetingAttempt(req) => {
                use invited::invite_claimer_start_greeting_attempt::Rep;
                let rep = match self
                    .invite
                    .claimer_start_greeting_attempt(organization_id, now, token, req.greeter)
                    .await
                {
                    Ok(greeting_attempt) => Rep::Ok { greeting_attempt },
                    Err(ClaimerStartAttemptError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(ClaimerStartAttemptError::InvitationNotFound) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(ClaimerStartAttemptError::GreeterNotFound) => Rep::GreeterNotFound,
                    Err(ClaimerStartAttemptError::GreeterRevoked) => Rep::GreeterRevoked,
                    Err(ClaimerStartAttemptError::GreeterNotAllowed) => Rep::GreeterNotAllowed,
                };
                dump(&rep)
            }
            AnyCmdReq::InviteClaimerCancelGreetingAttempt(req) => {
                use invited::invite_claimer_cancel_greeting_attempt::Rep;
                let rep = match self
                    .invite
                    .claimer_cancel_greeting_attempt(
                        organization_id,
                        now,
                        token,
                        req.greeting_attempt,
                        req.reason,
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(CancelAttemptError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(CancelAttemptError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(CancelAttemptError::GreetingAttemptNotFound) => {
                        Rep::GreetingAttemptNotFound
                    }
                    Err(CancelAttemptError::GreetingAttemptNotJoined) => {
                        Rep::GreetingAttemptNotJoined
                    }
                    Err(CancelAttemptError::GreetingAttemptAlreadyCancelled {
                        origin,
                        reason,
                        timestamp,
                    }) => Rep::GreetingAttemptAlreadyCancelled {
                        origin,
                        reason,
                        timestamp,
                    },
                    // The invitation state is re-checked by the transport on
                    // the next request
                    Err(CancelAttemptError::InvitationCancelled)
                    | Err(CancelAttemptError::InvitationCompleted) => {
                        return Err(EarlyRejection::InvitationAlreadyUsedOrDeleted)
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteClaimerStep(req) => {
                use invited::invite_claimer_step::Rep;
                let rep = match self
                    .invite
                    .claimer_step(organization_id, now, token, req.greeting_attempt, req.claimer_step)
                    .await
                {
                    Ok(Some(greeter_step)) => Rep::Ok { greeter_step },
                    Ok(None) => Rep::NotReady,
                    Err(StepError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(StepError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(StepError::GreetingAttemptNotFound) => Rep::GreetingAttemptNotFound,
                    Err(StepError::GreetingAttemptNotJoined) => Rep::GreetingAttemptNotJoined,
                    Err(StepError::GreetingAttemptCancelled {
                        origin,
                        reason,
                        timestamp,
                    }) => Rep::GreetingAttemptCancelled {
                        origin,
                        reason,
                        timestamp,
                    },
                    Err(StepError::StepMismatch) => Rep::StepMismatch,
                    Err(StepError::StepTooAdvanced) => Rep::StepTooAdvanced,
                    Err(StepError::InvitationCancelled)
                    | Err(StepError::InvitationCompleted) => {
                        return Err(EarlyRejection::InvitationAlreadyUsedOrDeleted)
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::InviteShamirRecoveryReveal(req) => {
                use invited::invite_shamir_recovery_reveal::Rep;
                let rep = match self
                    .shamir
                    .reveal(organization_id, token, req.reveal_token)
                    .await
                {
                    Ok(ciphered_data) => Rep::Ok {
                        ciphered_data: ByteBuf::from(ciphered_data),
                    },
                    Err(ShamirRevealError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(ShamirRevealError::InvitationNotFound) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(ShamirRevealError::BadInvitationType) => Rep::BadInvitationType,
                    Err(ShamirRevealError::BadRevealToken) => Rep::BadRevealToken,
                };
                dump(&rep)
            }
            AnyCmdReq::UnknownCommand => dump(&invited::ping::Rep::UnknownCommand),
        }
    }

    pub async fn handle_anonymous(
        &self,
        organization_id: &OrganizationID,
        raw: &[u8],
    ) -> Result<Vec<u8>, EarlyRejection> {
        use anonymous::AnyCmdReq;

        let req = AnyCmdReq::load(raw).map_err(|_| EarlyRejection::MalformedBody)?;
        let now = DateTime::now();
        match req {
            AnyCmdReq::Ping(req) => dump(&anonymous::ping::Rep::Ok { pong: req.ping }),
            AnyCmdReq::OrganizationBootstrap(req) => {
                use anonymous::organization_bootstrap::Rep;
                let rep = match self
                    .organization
                    .bootstrap(
                        organization_id,
                        now,
                        req.bootstrap_token,
                        req.root_verify_key,
                        &req.user_certificate,
                        &req.device_certificate,
                        &req.redacted_user_certificate,
                        &req.redacted_device_certificate,
                        req.sequester_authority_certificate
                            .as_ref()
                            .map(|certificate| certificate.as_slice()),
                    )
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(OrganizationBootstrapError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(OrganizationBootstrapError::OrganizationExpired) => {
                        Rep::OrganizationExpired
                    }
                    Err(OrganizationBootstrapError::InvalidBootstrapToken) => {
                        Rep::InvalidBootstrapToken
                    }
                    Err(OrganizationBootstrapError::AlreadyBootstrapped) => {
                        Rep::AlreadyBootstrapped
                    }
                    Err(OrganizationBootstrapError::InvalidCertificate) => {
                        Rep::InvalidCertificate
                    }
                    Err(OrganizationBootstrapError::TimestampOutOfBallpark(b)) => {
                        ballpark_rep!(Rep, b)
                    }
                };
                dump(&rep)
            }
            AnyCmdReq::UnknownCommand => dump(&anonymous::ping::Rep::UnknownCommand),
        }
    }

    /// The `tos_cmds` family is reachable even when the author has not
    /// accepted the current TOS; only revocation and freezing are checked
    /// by the transport.
    pub async fn handle_tos(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        raw: &[u8],
    ) -> Result<Vec<u8>, EarlyRejection> {
        use tos::AnyCmdReq;

        let req = AnyCmdReq::load(raw).map_err(|_| EarlyRejection::MalformedBody)?;
        let now = DateTime::now();
        match req {
            AnyCmdReq::TosGet(_) => {
                use tos::tos_get::Rep;
                let org = self
                    .datamodel
                    .organization(organization_id)
                    .await
                    .ok_or(EarlyRejection::OrganizationNotFound)?;
                let store = org.lock().await;
                let rep = match &store.tos {
                    Some(tos) => Rep::Ok {
                        updated_on: tos.updated_on,
                        per_locale_urls: tos.per_locale_urls.clone(),
                    },
                    None => Rep::NoTos,
                };
                dump(&rep)
            }
            AnyCmdReq::TosAccept(req) => {
                use tos::tos_accept::Rep;
                let rep = match self
                    .user
                    .accept_tos(organization_id, now, author, req.tos_updated_on)
                    .await
                {
                    Ok(()) => Rep::Ok,
                    Err(TosAcceptError::OrganizationNotFound) => {
                        return Err(EarlyRejection::OrganizationNotFound)
                    }
                    Err(TosAcceptError::AuthorNotAllowed) => {
                        return Err(EarlyRejection::InvalidAuthentication)
                    }
                    Err(TosAcceptError::NoTos) => Rep::NoTos,
                    Err(TosAcceptError::TosMismatch) => Rep::TosMismatch,
                };
                dump(&rep)
            }
            AnyCmdReq::UnknownCommand => dump(&tos::tos_get::Rep::UnknownCommand),
        }
    }
}
