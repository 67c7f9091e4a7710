//! Invitations and the SAS greeting conduit.
//!
//! A greeting attempt is a pair of dense step lists, one per side. Both
//! sides submit their half of slot `n`; a submission returns the peer's
//! half once it is present, `NotReady` otherwise. Submissions are
//! idempotent: resubmitting an already stored slot with the same content
//! is allowed, with different content it is a `StepMismatch`.

use std::sync::Arc;

use parsec_protocol::invite::{
    ClaimerStep, GreeterStep, InvitationInfo, InviteListItem, ShamirRecoveryRecipient,
    UserGreeter,
};
use parsec_types::{
    CancelledGreetingAttemptReason, DateTime, DeviceID, GreeterOrClaimer, GreetingAttemptID,
    InvitationStatus, InvitationToken, OrganizationID, UserID, UserProfile,
};

use crate::components::resolve_author;
use crate::datamodel::{
    Datamodel, InvitationClaimer, InvitationDeletedReason, MemoryGreetingAttempt,
    MemoryInvitation, OrganizationStore,
};
use crate::events::{Event, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum InviteNewUserError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("claimer email already belongs to an active user")]
    ClaimerEmailAlreadyEnrolled,
}

#[derive(Debug, thiserror::Error)]
pub enum InviteNewDeviceError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum InviteNewShamirRecoveryError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("claimer has no active shamir recovery")]
    ShamirRecoveryNotSetup,
}

#[derive(Debug, thiserror::Error)]
pub enum InviteCancelError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("invitation already cancelled")]
    InvitationAlreadyCancelled,
    #[error("invitation completed")]
    InvitationCompleted,
}

#[derive(Debug, thiserror::Error)]
pub enum InviteListError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum InviteInfoError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("invitation not found")]
    InvitationNotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum GreeterStartAttemptError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("invitation cancelled")]
    InvitationCancelled,
    #[error("invitation completed")]
    InvitationCompleted,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimerStartAttemptError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("invitation not found")]
    InvitationNotFound,
    #[error("greeter not found")]
    GreeterNotFound,
    #[error("greeter is revoked")]
    GreeterRevoked,
    #[error("greeter not allowed for this invitation")]
    GreeterNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelAttemptError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("greeting attempt not found")]
    GreetingAttemptNotFound,
    #[error("greeting attempt not joined")]
    GreetingAttemptNotJoined,
    #[error("greeting attempt already cancelled")]
    GreetingAttemptAlreadyCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
    #[error("invitation cancelled")]
    InvitationCancelled,
    #[error("invitation completed")]
    InvitationCompleted,
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("greeting attempt not found")]
    GreetingAttemptNotFound,
    #[error("greeting attempt not joined")]
    GreetingAttemptNotJoined,
    #[error("greeting attempt cancelled")]
    GreetingAttemptCancelled {
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    },
    #[error("slot content differs from the stored one")]
    StepMismatch,
    #[error("earlier slots are not complete")]
    StepTooAdvanced,
    #[error("invitation cancelled")]
    InvitationCancelled,
    #[error("invitation completed")]
    InvitationCompleted,
}

/// `Ok(None)` means the peer's half is not there yet.
pub type StepOutcome<T> = Result<Option<T>, StepError>;

pub struct InviteComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
}

/// Users allowed to greet an invitation.
fn is_greeter_allowed(
    store: &OrganizationStore,
    invitation: &MemoryInvitation,
    greeter: &UserID,
) -> bool {
    match &invitation.claimer {
        InvitationClaimer::User { .. } => store
            .users
            .get(greeter)
            .map(|user| !user.is_revoked() && user.current_profile() == UserProfile::Admin)
            .unwrap_or(false),
        InvitationClaimer::Device { claimer_user_id } => claimer_user_id == greeter,
        InvitationClaimer::ShamirRecovery { claimer_user_id } => store
            .last_shamir_setup(claimer_user_id)
            .filter(|setup| !setup.is_deleted())
            .map(|setup| setup.brief.per_recipient_shares.contains_key(greeter))
            .unwrap_or(false),
    }
}

/// Map the invitation's terminal state, if any, to the right rejection.
fn check_invitation_live<C, F>(
    invitation: &MemoryInvitation,
    cancelled: C,
    completed: F,
) -> Result<(), StepError>
where
    C: FnOnce() -> StepError,
    F: FnOnce() -> StepError,
{
    match invitation.deleted {
        Some((_, InvitationDeletedReason::Cancelled)) => Err(cancelled()),
        Some((_, InvitationDeletedReason::Finished)) => Err(completed()),
        None => Ok(()),
    }
}

impl InviteComponent {
    pub fn new(datamodel: Arc<Datamodel>, event_bus: EventBus) -> Self {
        Self {
            datamodel,
            event_bus,
        }
    }

    pub async fn new_for_user(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        claimer_email: String,
    ) -> Result<InvitationToken, InviteNewUserError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteNewUserError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| InviteNewUserError::AuthorNotAllowed)?;
        if author.profile != UserProfile::Admin {
            return Err(InviteNewUserError::AuthorNotAllowed);
        }
        if store.user_by_email(&claimer_email).is_some() {
            return Err(InviteNewUserError::ClaimerEmailAlreadyEnrolled);
        }

        let claimer = InvitationClaimer::User { claimer_email };
        let token = self.get_or_create(&mut store, organization_id, now, &author_key(&author), claimer);
        Ok(token)
    }

    pub async fn new_for_device(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
    ) -> Result<InvitationToken, InviteNewDeviceError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteNewDeviceError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| InviteNewDeviceError::AuthorNotAllowed)?;
        let claimer = InvitationClaimer::Device {
            claimer_user_id: author.user_id,
        };
        let token = self.get_or_create(&mut store, organization_id, now, &author_key(&author), claimer);
        Ok(token)
    }

    pub async fn new_for_shamir_recovery(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        claimer_user_id: UserID,
    ) -> Result<InvitationToken, InviteNewShamirRecoveryError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteNewShamirRecoveryError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| InviteNewShamirRecoveryError::AuthorNotAllowed)?;
        let setup = store
            .last_shamir_setup(&claimer_user_id)
            .filter(|setup| !setup.is_deleted())
            .ok_or(InviteNewShamirRecoveryError::ShamirRecoveryNotSetup)?;
        // Only share recipients can open the recovery
        if !setup
            .brief
            .per_recipient_shares
            .contains_key(&author.user_id)
        {
            return Err(InviteNewShamirRecoveryError::AuthorNotAllowed);
        }

        let claimer = InvitationClaimer::ShamirRecovery { claimer_user_id };
        let token = self.get_or_create(&mut store, organization_id, now, &author_key(&author), claimer);
        Ok(token)
    }

    /// Idempotent creation: an idle or ready invitation with the same
    /// creator and claimer is reused.
    fn get_or_create(
        &self,
        store: &mut OrganizationStore,
        organization_id: &OrganizationID,
        now: DateTime,
        author: &(UserID, DeviceID),
        claimer: InvitationClaimer,
    ) -> InvitationToken {
        let existing = store.invitations.values().find(|invitation| {
            invitation.deleted.is_none()
                && invitation.created_by_user == author.0
                && invitation.claimer == claimer
        });
        if let Some(invitation) = existing {
            return invitation.token;
        }

        let token = InvitationToken::generate();
        store.invitations.insert(
            token,
            MemoryInvitation {
                token,
                created_by_user: author.0,
                created_by_device: author.1,
                created_on: now,
                claimer,
                claimer_joined: false,
                deleted: None,
            },
        );
        tracing::info!(organization = %organization_id, %token, "invitation created");
        self.event_bus.emit(
            organization_id,
            Event::InvitationChanged {
                token,
                status: InvitationStatus::Idle,
            },
        );
        token
    }

    pub async fn cancel(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        token: InvitationToken,
    ) -> Result<(), InviteCancelError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteCancelError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| InviteCancelError::AuthorNotAllowed)?;
        let invitation = store
            .invitations
            .get(&token)
            .ok_or(InviteCancelError::InvitationNotFound)?;
        match invitation.deleted {
            Some((_, InvitationDeletedReason::Cancelled)) => {
                return Err(InviteCancelError::InvitationAlreadyCancelled)
            }
            Some((_, InvitationDeletedReason::Finished)) => {
                return Err(InviteCancelError::InvitationCompleted)
            }
            None => {}
        }
        if author.profile != UserProfile::Admin && invitation.created_by_user != author.user_id {
            return Err(InviteCancelError::AuthorNotAllowed);
        }

        if let Some(invitation) = store.invitations.get_mut(&token) {
            invitation.deleted = Some((now, InvitationDeletedReason::Cancelled));
        }
        self.event_bus.emit(
            organization_id,
            Event::InvitationChanged {
                token,
                status: InvitationStatus::Cancelled,
            },
        );
        Ok(())
    }

    pub async fn list(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
    ) -> Result<Vec<InviteListItem>, InviteListError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteListError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| InviteListError::AuthorNotAllowed)?;
        let mut invitations: Vec<&MemoryInvitation> = store
            .invitations
            .values()
            .filter(|invitation| {
                // Admins see everything, others only what they created or
                // can greet
                author.profile == UserProfile::Admin
                    || invitation.created_by_user == author.user_id
                    || is_greeter_allowed(&store, invitation, &author.user_id)
            })
            .collect();
        invitations.sort_by_key(|invitation| invitation.created_on);

        let items = invitations
            .into_iter()
            .map(|invitation| match &invitation.claimer {
                InvitationClaimer::User { claimer_email } => InviteListItem::User {
                    token: invitation.token,
                    created_on: invitation.created_on,
                    created_by: invitation.created_by_device,
                    claimer_email: claimer_email.clone(),
                    status: invitation.status(),
                },
                InvitationClaimer::Device { .. } => InviteListItem::Device {
                    token: invitation.token,
                    created_on: invitation.created_on,
                    created_by: invitation.created_by_device,
                    status: invitation.status(),
                },
                InvitationClaimer::ShamirRecovery { claimer_user_id } => {
                    let shamir_recovery_created_on = store
                        .last_shamir_setup(claimer_user_id)
                        .map(|setup| setup.brief.timestamp)
                        .unwrap_or(invitation.created_on);
                    InviteListItem::ShamirRecovery {
                        token: invitation.token,
                        created_on: invitation.created_on,
                        created_by: invitation.created_by_device,
                        claimer_user_id: *claimer_user_id,
                        shamir_recovery_created_on,
                        status: invitation.status(),
                    }
                }
            })
            .collect();
        Ok(items)
    }

    /// What the claimer learns when connecting with its token.
    pub async fn info(
        &self,
        organization_id: &OrganizationID,
        token: InvitationToken,
    ) -> Result<InvitationInfo, InviteInfoError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(InviteInfoError::OrganizationNotFound)?;
        let store = org.lock().await;

        let invitation = store
            .invitations
            .get(&token)
            .ok_or(InviteInfoError::InvitationNotFound)?;
        let info = match &invitation.claimer {
            InvitationClaimer::User { claimer_email } => {
                let mut administrators: Vec<UserGreeter> = store
                    .users
                    .values()
                    .filter(|user| {
                        !user.is_revoked() && user.current_profile() == UserProfile::Admin
                    })
                    .map(|user| UserGreeter {
                        user_id: user.cooked.user_id,
                        human_handle: user.cooked.human_handle.as_ref().clone(),
                        online_status: false,
                    })
                    .collect();
                administrators.sort_by_key(|greeter| greeter.user_id);
                InvitationInfo::User {
                    claimer_email: claimer_email.clone(),
                    created_by: invitation.created_by_user,
                    administrators,
                }
            }
            InvitationClaimer::Device { claimer_user_id } => {
                let user = store
                    .users
                    .get(claimer_user_id)
                    .ok_or(InviteInfoError::InvitationNotFound)?;
                InvitationInfo::Device {
                    claimer_user_id: *claimer_user_id,
                    claimer_human_handle: user.cooked.human_handle.as_ref().clone(),
                }
            }
            InvitationClaimer::ShamirRecovery { claimer_user_id } => {
                let user = store
                    .users
                    .get(claimer_user_id)
                    .ok_or(InviteInfoError::InvitationNotFound)?;
                let setup = store
                    .last_shamir_setup(claimer_user_id)
                    .ok_or(InviteInfoError::InvitationNotFound)?;
                let mut recipients: Vec<ShamirRecoveryRecipient> = setup
                    .brief
                    .per_recipient_shares
                    .iter()
                    .filter_map(|(recipient_id, shares)| {
                        store.users.get(recipient_id).map(|recipient| {
                            ShamirRecoveryRecipient {
                                user_id: *recipient_id,
                                human_handle: recipient.cooked.human_handle.as_ref().clone(),
                                shares: shares.get(),
                                revoked_on: recipient
                                    .revoked
                                    .as_ref()
                                    .map(|revocation| revocation.cooked.timestamp),
                            }
                        })
                    })
                    .collect();
                recipients.sort_by_key(|recipient| recipient.user_id);
                InvitationInfo::ShamirRecovery {
                    claimer_user_id: *claimer_user_id,
                    claimer_human_handle: user.cooked.human_handle.as_ref().clone(),
                    threshold: setup.brief.threshold.get(),
                    recipients,
                }
            }
        };
        Ok(info)
    }

    pub async fn greeter_start_greeting_attempt(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        token: InvitationToken,
    ) -> Result<GreetingAttemptID, GreeterStartAttemptError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(GreeterStartAttemptError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| GreeterStartAttemptError::AuthorNotAllowed)?;
        let invitation = store
            .invitations
            .get(&token)
            .ok_or(GreeterStartAttemptError::InvitationNotFound)?;
        check_invitation_live(
            invitation,
            || StepError::InvitationCancelled,
            || StepError::InvitationCompleted,
        )
        .map_err(|err| match err {
            StepError::InvitationCancelled => GreeterStartAttemptError::InvitationCancelled,
            _ => GreeterStartAttemptError::InvitationCompleted,
        })?;
        if !is_greeter_allowed(&store, invitation, &author.user_id) {
            return Err(GreeterStartAttemptError::AuthorNotAllowed);
        }

        Ok(self.join_or_restart(
            &mut store,
            organization_id,
            now,
            token,
            author.user_id,
            GreeterOrClaimer::Greeter,
        ))
    }

    pub async fn claimer_start_greeting_attempt(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        token: InvitationToken,
        greeter: UserID,
    ) -> Result<GreetingAttemptID, ClaimerStartAttemptError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(ClaimerStartAttemptError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let invitation = store
            .invitations
            .get(&token)
            .ok_or(ClaimerStartAttemptError::InvitationNotFound)?;
        let greeter_user = store
            .users
            .get(&greeter)
            .ok_or(ClaimerStartAttemptError::GreeterNotFound)?;
        if greeter_user.is_revoked() {
            return Err(ClaimerStartAttemptError::GreeterRevoked);
        }
        if !is_greeter_allowed(&store, invitation, &greeter) {
            return Err(ClaimerStartAttemptError::GreeterNotAllowed);
        }

        let attempt_id = self.join_or_restart(
            &mut store,
            organization_id,
            now,
            token,
            greeter,
            GreeterOrClaimer::Claimer,
        );
        if let Some(invitation) = store.invitations.get_mut(&token) {
            if !invitation.claimer_joined {
                invitation.claimer_joined = true;
                self.event_bus.emit(
                    organization_id,
                    Event::InvitationChanged {
                        token,
                        status: InvitationStatus::Ready,
                    },
                );
            }
        }
        Ok(attempt_id)
    }

    /// Join the active attempt of the `(token, greeter)` session, or cancel
    /// it and open a fresh one when this side had already joined.
    fn join_or_restart(
        &self,
        store: &mut OrganizationStore,
        organization_id: &OrganizationID,
        now: DateTime,
        token: InvitationToken,
        greeter: UserID,
        side: GreeterOrClaimer,
    ) -> GreetingAttemptID {
        let session = (token, greeter);
        if let Some(attempt_id) = store.greeting_sessions.get(&session).copied() {
            if let Some(attempt) = store.greeting_attempts.get_mut(&attempt_id) {
                if attempt.is_active() {
                    let joined = match side {
                        GreeterOrClaimer::Greeter => &mut attempt.greeter_joined,
                        GreeterOrClaimer::Claimer => &mut attempt.claimer_joined,
                    };
                    match joined {
                        None => {
                            *joined = Some(now);
                            return attempt_id;
                        }
                        // Starting again supersedes the previous attempt
                        Some(_) => {
                            attempt.cancel(
                                side,
                                CancelledGreetingAttemptReason::AutomaticallyCancelled,
                                now,
                            );
                        }
                    }
                }
            }
        }

        let mut attempt = MemoryGreetingAttempt::new(token, greeter);
        match side {
            GreeterOrClaimer::Greeter => attempt.greeter_joined = Some(now),
            GreeterOrClaimer::Claimer => attempt.claimer_joined = Some(now),
        }
        let attempt_id = attempt.id;
        store.greeting_attempts.insert(attempt_id, attempt);
        store.greeting_sessions.insert(session, attempt_id);
        tracing::debug!(organization = %organization_id, attempt = %attempt_id, ?side, "greeting attempt opened");
        attempt_id
    }

    pub async fn greeter_cancel_greeting_attempt(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        attempt_id: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<(), CancelAttemptError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(CancelAttemptError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| CancelAttemptError::AuthorNotAllowed)?;
        Self::cancel_attempt(
            &mut store,
            now,
            attempt_id,
            GreeterOrClaimer::Greeter,
            reason,
            Some(author.user_id),
            None,
        )
    }

    pub async fn claimer_cancel_greeting_attempt(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        token: InvitationToken,
        attempt_id: GreetingAttemptID,
        reason: CancelledGreetingAttemptReason,
    ) -> Result<(), CancelAttemptError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(CancelAttemptError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        Self::cancel_attempt(
            &mut store,
            now,
            attempt_id,
            GreeterOrClaimer::Claimer,
            reason,
            None,
            Some(token),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn cancel_attempt(
        store: &mut OrganizationStore,
        now: DateTime,
        attempt_id: GreetingAttemptID,
        side: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        expected_greeter: Option<UserID>,
        expected_token: Option<InvitationToken>,
    ) -> Result<(), CancelAttemptError> {
        let attempt = store
            .greeting_attempts
            .get(&attempt_id)
            .ok_or(CancelAttemptError::GreetingAttemptNotFound)?;
        if let Some(greeter) = expected_greeter {
            if attempt.greeter != greeter {
                return Err(CancelAttemptError::GreetingAttemptNotFound);
            }
        }
        if let Some(token) = expected_token {
            if attempt.token != token {
                return Err(CancelAttemptError::GreetingAttemptNotFound);
            }
        }
        let invitation = store
            .invitations
            .get(&attempt.token)
            .ok_or(CancelAttemptError::GreetingAttemptNotFound)?;
        check_invitation_live(
            invitation,
            || StepError::InvitationCancelled,
            || StepError::InvitationCompleted,
        )
        .map_err(|err| match err {
            StepError::InvitationCancelled => CancelAttemptError::InvitationCancelled,
            _ => CancelAttemptError::InvitationCompleted,
        })?;
        let joined = match side {
            GreeterOrClaimer::Greeter => attempt.greeter_joined,
            GreeterOrClaimer::Claimer => attempt.claimer_joined,
        };
        if joined.is_none() {
            return Err(CancelAttemptError::GreetingAttemptNotJoined);
        }
        if let Some((origin, reason, timestamp)) = attempt.cancelled {
            return Err(CancelAttemptError::GreetingAttemptAlreadyCancelled {
                origin,
                reason,
                timestamp,
            });
        }

        if let Some(attempt) = store.greeting_attempts.get_mut(&attempt_id) {
            attempt.cancel(side, reason, now);
        }
        Ok(())
    }

    pub async fn greeter_step(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        attempt_id: GreetingAttemptID,
        greeter_step: GreeterStep,
    ) -> StepOutcome<ClaimerStep> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(StepError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author).map_err(|_| StepError::AuthorNotAllowed)?;
        let index = greeter_step.index();
        let attempt = Self::checked_attempt(
            &mut store,
            attempt_id,
            GreeterOrClaimer::Greeter,
            Some(author.user_id),
            None,
        )?;

        let peer_len = attempt.claimer_steps.len() as u64;
        Self::submit_step(index, &mut attempt.greeter_steps, greeter_step, peer_len)?;
        let peer_step = attempt.claimer_steps.get(index as usize).cloned();
        let own_last = matches!(
            attempt.greeter_steps.get(index as usize),
            Some(GreeterStep::Communicate { last: true, .. })
        );

        let peer_last = matches!(
            peer_step,
            Some(ClaimerStep::Communicate { last: true, .. })
        );
        if own_last && peer_last {
            Self::finish_invitation(&mut store, organization_id, now, attempt_id, &self.event_bus);
        }
        Ok(peer_step)
    }

    pub async fn claimer_step(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        token: InvitationToken,
        attempt_id: GreetingAttemptID,
        claimer_step: ClaimerStep,
    ) -> StepOutcome<GreeterStep> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(StepError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let index = claimer_step.index();
        let attempt = Self::checked_attempt(
            &mut store,
            attempt_id,
            GreeterOrClaimer::Claimer,
            None,
            Some(token),
        )?;

        let peer_len = attempt.greeter_steps.len() as u64;
        Self::submit_step(index, &mut attempt.claimer_steps, claimer_step, peer_len)?;
        let peer_step = attempt.greeter_steps.get(index as usize).cloned();
        let own_last = matches!(
            attempt.claimer_steps.get(index as usize),
            Some(ClaimerStep::Communicate { last: true, .. })
        );

        let peer_last = matches!(
            peer_step,
            Some(GreeterStep::Communicate { last: true, .. })
        );
        if own_last && peer_last {
            Self::finish_invitation(&mut store, organization_id, now, attempt_id, &self.event_bus);
        }
        Ok(peer_step)
    }

    fn checked_attempt<'a>(
        store: &'a mut OrganizationStore,
        attempt_id: GreetingAttemptID,
        side: GreeterOrClaimer,
        expected_greeter: Option<UserID>,
        expected_token: Option<InvitationToken>,
    ) -> Result<&'a mut MemoryGreetingAttempt, StepError> {
        let attempt = store
            .greeting_attempts
            .get(&attempt_id)
            .ok_or(StepError::GreetingAttemptNotFound)?;
        if let Some(greeter) = expected_greeter {
            if attempt.greeter != greeter {
                return Err(StepError::GreetingAttemptNotFound);
            }
        }
        if let Some(token) = expected_token {
            if attempt.token != token {
                return Err(StepError::GreetingAttemptNotFound);
            }
        }
        let invitation = store
            .invitations
            .get(&attempt.token)
            .ok_or(StepError::GreetingAttemptNotFound)?;
        check_invitation_live(
            invitation,
            || StepError::InvitationCancelled,
            || StepError::InvitationCompleted,
        )?;
        let joined = match side {
            GreeterOrClaimer::Greeter => attempt.greeter_joined,
            GreeterOrClaimer::Claimer => attempt.claimer_joined,
        };
        if joined.is_none() {
            return Err(StepError::GreetingAttemptNotJoined);
        }
        if let Some((origin, reason, timestamp)) = attempt.cancelled {
            return Err(StepError::GreetingAttemptCancelled {
                origin,
                reason,
                timestamp,
            });
        }
        store
            .greeting_attempts
            .get_mut(&attempt_id)
            .ok_or(StepError::GreetingAttemptNotFound)
    }

    /// Store one half of a conduit slot.
    fn submit_step<T: PartialEq>(
        index: u64,
        own_steps: &mut Vec<T>,
        step: T,
        peer_len: u64,
    ) -> Result<(), StepError> {
        let own_len = own_steps.len() as u64;
        if index < own_len {
            // Idempotent resubmission of an already stored slot
            if own_steps[index as usize] != step {
                return Err(StepError::StepMismatch);
            }
            return Ok(());
        }
        // A new slot requires every earlier slot complete on both sides
        if index > own_len || index > peer_len {
            return Err(StepError::StepTooAdvanced);
        }
        own_steps.push(step);
        Ok(())
    }

    /// Terminal success: the final communicate round has been exchanged.
    fn finish_invitation(
        store: &mut OrganizationStore,
        organization_id: &OrganizationID,
        now: DateTime,
        attempt_id: GreetingAttemptID,
        event_bus: &EventBus,
    ) {
        let Some(attempt) = store.greeting_attempts.get(&attempt_id) else {
            return;
        };
        let token = attempt.token;
        let Some(invitation) = store.invitations.get_mut(&token) else {
            return;
        };
        if invitation.deleted.is_none() {
            invitation.deleted = Some((now, InvitationDeletedReason::Finished));
            tracing::info!(organization = %organization_id, %token, "invitation completed");
            event_bus.emit(
                organization_id,
                Event::InvitationChanged {
                    token,
                    status: InvitationStatus::Finished,
                },
            );
        }
    }
}

fn author_key(author: &crate::components::Author) -> (UserID, DeviceID) {
    (author.user_id, author.device_id)
}
