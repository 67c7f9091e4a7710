//! Shamir recovery setups.
//!
//! The server never sees the secret: it stores the brief and share
//! certificates, the opaque ciphered recovery data and the reveal token.
//! Reconstruction happens client-side from the shares the recipients
//! decrypt.

use std::collections::HashSet;
use std::sync::Arc;

use parsec_types::{
    DateTime, DeviceID, InvitationToken, OrganizationID, ShamirRecoveryBriefCertificate,
    ShamirRecoveryDeletionCertificate, ShamirRecoveryShareCertificate, UserID,
};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::components::resolve_author;
use crate::config::ServerConfig;
use crate::datamodel::{
    Datamodel, InvitationClaimer, MemoryShamirDeletion, MemoryShamirSetup, MemoryShamirShare,
    ShamirStoredCertificate,
};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum ShamirSetupError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("an active shamir recovery already exists")]
    ShamirRecoveryAlreadyExists {
        last_shamir_certificate_timestamp: DateTime,
    },
    #[error("author cannot be a recipient of its own recovery")]
    AuthorIncludedAsRecipient,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("recipient is revoked")]
    RecipientRevoked,
    #[error("share timestamps differ from the brief")]
    ShareInconsistentTimestamp,
    #[error("share recipients differ from the brief")]
    ShareRecipientsMismatch,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum ShamirDeleteError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("no matching shamir recovery")]
    ShamirRecoveryNotFound,
    #[error("shamir recovery already deleted")]
    ShamirRecoveryAlreadyDeleted {
        last_shamir_certificate_timestamp: DateTime,
    },
    #[error("deletion recipients differ from the brief")]
    RecipientsMismatch,
    #[error("invalid certificate")]
    InvalidCertificate,
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum ShamirRevealError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("not a shamir recovery invitation")]
    BadInvitationType,
    #[error("reveal token does not match")]
    BadRevealToken,
}

pub struct ShamirComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
}

impl ShamirComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn setup(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        brief_certificate: &[u8],
        share_certificates: &[Vec<u8>],
        reveal_token: InvitationToken,
        ciphered_data: Vec<u8>,
    ) -> Result<(), ShamirSetupError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(ShamirSetupError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| ShamirSetupError::AuthorNotAllowed)?;
        let brief = ShamirRecoveryBriefCertificate::verify_and_load(
            brief_certificate,
            &author.verify_key,
            author.device_id,
        )
        .map_err(|_| ShamirSetupError::InvalidCertificate)?;
        // A recovery is always set up by its own user
        if brief.user_id != author.user_id {
            return Err(ShamirSetupError::InvalidCertificate);
        }
        if brief.per_recipient_shares.contains_key(&author.user_id) {
            return Err(ShamirSetupError::AuthorIncludedAsRecipient);
        }
        if brief.threshold.get() > brief.total_shares() {
            return Err(ShamirSetupError::InvalidCertificate);
        }
        check_ballpark(brief.timestamp, now, &self.config.ballpark)?;

        let mut shares = Vec::with_capacity(share_certificates.len());
        let mut share_recipients = HashSet::new();
        for signed in share_certificates {
            let share = ShamirRecoveryShareCertificate::verify_and_load(
                signed,
                &author.verify_key,
                author.device_id,
                None,
            )
            .map_err(|_| ShamirSetupError::InvalidCertificate)?;
            if share.user_id != author.user_id {
                return Err(ShamirSetupError::InvalidCertificate);
            }
            if share.timestamp != brief.timestamp {
                return Err(ShamirSetupError::ShareInconsistentTimestamp);
            }
            if !share_recipients.insert(share.recipient) {
                return Err(ShamirSetupError::ShareRecipientsMismatch);
            }
            shares.push((share, signed.clone()));
        }
        let brief_recipients: HashSet<UserID> =
            brief.per_recipient_shares.keys().copied().collect();
        if share_recipients != brief_recipients {
            return Err(ShamirSetupError::ShareRecipientsMismatch);
        }
        for recipient_id in &brief_recipients {
            let recipient = store
                .users
                .get(recipient_id)
                .ok_or(ShamirSetupError::RecipientNotFound)?;
            if recipient.is_revoked() {
                return Err(ShamirSetupError::RecipientRevoked);
            }
        }

        if let Some(setup) = store.last_shamir_setup(&author.user_id) {
            if !setup.is_deleted() {
                return Err(ShamirSetupError::ShamirRecoveryAlreadyExists {
                    last_shamir_certificate_timestamp: store
                        .last_shamir_timestamp
                        .unwrap_or(setup.brief.timestamp),
                });
            }
        }
        let mut strictly_greater_than = store.last_shamir_timestamp;
        if store.last_common_timestamp > strictly_greater_than {
            strictly_greater_than = store.last_common_timestamp;
        }
        if let Some(strictly_greater_than) = strictly_greater_than {
            if brief.timestamp <= strictly_greater_than {
                return Err(ShamirSetupError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = brief.timestamp;
        let mut brief_visible_to: Vec<UserID> = brief_recipients.iter().copied().collect();
        brief_visible_to.push(author.user_id);
        store.shamir_certificates.push(ShamirStoredCertificate {
            timestamp,
            certificate: brief_certificate.to_vec(),
            visible_to: brief_visible_to,
        });
        let mut stored_shares = std::collections::HashMap::new();
        for (share, signed) in shares {
            // Each share certificate is only served to its recipient
            store.shamir_certificates.push(ShamirStoredCertificate {
                timestamp,
                certificate: signed.clone(),
                visible_to: vec![share.recipient],
            });
            stored_shares.insert(
                share.recipient,
                MemoryShamirShare {
                    cooked: share,
                    share_certificate: signed,
                },
            );
        }
        store
            .shamir_recoveries
            .entry(author.user_id)
            .or_default()
            .push(MemoryShamirSetup {
                brief,
                brief_certificate: brief_certificate.to_vec(),
                shares: stored_shares,
                reveal_token,
                ciphered_data,
                deleted: None,
            });
        store.last_shamir_timestamp = Some(timestamp);

        tracing::info!(organization = %organization_id, user = %author.user_id, "shamir recovery set up");
        self.event_bus
            .emit(organization_id, Event::ShamirRecoveryCertificate { timestamp });
        Ok(())
    }

    pub async fn delete(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        deletion_certificate: &[u8],
    ) -> Result<(), ShamirDeleteError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(ShamirDeleteError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| ShamirDeleteError::AuthorNotAllowed)?;
        let deletion = ShamirRecoveryDeletionCertificate::verify_and_load(
            deletion_certificate,
            &author.verify_key,
            author.device_id,
        )
        .map_err(|_| ShamirDeleteError::InvalidCertificate)?;
        // Only the protected user deletes its own recovery
        if deletion.setup_to_delete_user_id != author.user_id {
            return Err(ShamirDeleteError::AuthorNotAllowed);
        }
        check_ballpark(deletion.timestamp, now, &self.config.ballpark)?;

        let setups = store
            .shamir_recoveries
            .get(&author.user_id)
            .ok_or(ShamirDeleteError::ShamirRecoveryNotFound)?;
        let setup_index = setups
            .iter()
            .position(|setup| setup.brief.timestamp == deletion.setup_to_delete_timestamp)
            .ok_or(ShamirDeleteError::ShamirRecoveryNotFound)?;
        let setup = &setups[setup_index];
        if setup.is_deleted() {
            return Err(ShamirDeleteError::ShamirRecoveryAlreadyDeleted {
                last_shamir_certificate_timestamp: store
                    .last_shamir_timestamp
                    .unwrap_or(deletion.setup_to_delete_timestamp),
            });
        }
        let brief_recipients: HashSet<UserID> =
            setup.brief.per_recipient_shares.keys().copied().collect();
        if deletion.share_recipients != brief_recipients {
            return Err(ShamirDeleteError::RecipientsMismatch);
        }

        if let Some(strictly_greater_than) = store.last_shamir_timestamp {
            if deletion.timestamp <= strictly_greater_than {
                return Err(ShamirDeleteError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let timestamp = deletion.timestamp;
        let mut visible_to: Vec<UserID> = brief_recipients.into_iter().collect();
        visible_to.push(author.user_id);
        store.shamir_certificates.push(ShamirStoredCertificate {
            timestamp,
            certificate: deletion_certificate.to_vec(),
            visible_to,
        });
        if let Some(setups) = store.shamir_recoveries.get_mut(&author.user_id) {
            if let Some(setup) = setups.get_mut(setup_index) {
                setup.deleted = Some(MemoryShamirDeletion {
                    cooked: deletion,
                    deletion_certificate: deletion_certificate.to_vec(),
                });
            }
        }
        store.last_shamir_timestamp = Some(timestamp);

        self.event_bus
            .emit(organization_id, Event::ShamirRecoveryCertificate { timestamp });
        Ok(())
    }

    /// Hand the ciphered recovery data to a claimer presenting the right
    /// reveal token.
    pub async fn reveal(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
        reveal_token: InvitationToken,
    ) -> Result<Vec<u8>, ShamirRevealError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(ShamirRevealError::OrganizationNotFound)?;
        let store = org.lock().await;

        let invitation = store
            .invitations
            .get(&token)
            .ok_or(ShamirRevealError::InvitationNotFound)?;
        let claimer_user_id = match &invitation.claimer {
            InvitationClaimer::ShamirRecovery { claimer_user_id } => *claimer_user_id,
            _ => return Err(ShamirRevealError::BadInvitationType),
        };
        let setup = store
            .last_shamir_setup(&claimer_user_id)
            .filter(|setup| !setup.is_deleted())
            .ok_or(ShamirRevealError::BadRevealToken)?;
        if setup.reveal_token != reveal_token {
            return Err(ShamirRevealError::BadRevealToken);
        }
        Ok(setup.ciphered_data.clone())
    }
}
