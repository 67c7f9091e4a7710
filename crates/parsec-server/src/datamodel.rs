//! In-memory authoritative state.
//!
//! One `OrganizationStore` per organization, each behind its own async
//! mutex: every mutating handler locks the organization first, which gives
//! the per-organization serialisability the protocol relies on. Reads go
//! through the same lock; the store itself is plain data.
//!
//! Certificates are kept both cooked (parsed, validated at insertion) and
//! as their raw signed bytes, because `certificate_get` re-emits the exact
//! bytes the author produced.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use parsec_crypto::ed25519::VerifyKey;
use parsec_protocol::invite::{ClaimerStep, GreeterStep};
use parsec_types::{
    ActiveUsersLimit, BlockID, BootstrapToken, CancelledGreetingAttemptReason, DateTime,
    DeviceCertificate, DeviceID, GreeterOrClaimer, GreetingAttemptID, InvitationStatus,
    InvitationToken, InvitationType, OrganizationID, RealmKeyRotationCertificate,
    RealmNameCertificate, RealmRole, RealmRoleCertificate, RevokedUserCertificate,
    SequesterRevokedServiceCertificate, SequesterServiceCertificate, SequesterServiceID,
    ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate,
    ShamirRecoveryShareCertificate, UserCertificate, UserID, UserProfile,
    UserUpdateCertificate, VlobID,
};

use crate::config::AllowedClientAgent;

/// Root of the in-memory backend.
#[derive(Default)]
pub struct Datamodel {
    organizations: RwLock<HashMap<OrganizationID, Arc<Mutex<OrganizationStore>>>>,
}

impl Datamodel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn organization(
        &self,
        organization_id: &OrganizationID,
    ) -> Option<Arc<Mutex<OrganizationStore>>> {
        self.organizations
            .read()
            .await
            .get(organization_id)
            .cloned()
    }

    /// Insert a freshly created organization. Returns `false` when the id
    /// is already taken.
    pub async fn insert_organization(&self, store: OrganizationStore) -> bool {
        let mut organizations = self.organizations.write().await;
        if organizations.contains_key(&store.organization_id) {
            return false;
        }
        organizations.insert(
            store.organization_id.clone(),
            Arc::new(Mutex::new(store)),
        );
        true
    }

    pub async fn organization_ids(&self) -> Vec<OrganizationID> {
        self.organizations.read().await.keys().cloned().collect()
    }
}

/// Last certificate timestamp per topic, the `strictly_greater_than`
/// bounds new certificates must exceed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicLastTimestamps {
    pub common: Option<DateTime>,
    pub sequester: Option<DateTime>,
    pub shamir_recovery: Option<DateTime>,
    pub realms: HashMap<VlobID, DateTime>,
}

impl TopicLastTimestamps {
    /// Highest timestamp across every topic.
    pub fn max(&self) -> Option<DateTime> {
        let mut out = self.common;
        for candidate in [self.sequester, self.shamir_recovery]
            .into_iter()
            .flatten()
            .chain(self.realms.values().copied())
        {
            if out.map(|current| candidate > current).unwrap_or(true) {
                out = Some(candidate);
            }
        }
        out
    }
}

/// Raw signed certificate bytes plus the redacted twin when one exists.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub timestamp: DateTime,
    pub certificate: Vec<u8>,
    pub redacted_certificate: Option<Vec<u8>>,
}

impl StoredCertificate {
    pub fn new(timestamp: DateTime, certificate: Vec<u8>) -> Self {
        Self {
            timestamp,
            certificate,
            redacted_certificate: None,
        }
    }

    pub fn with_redacted(timestamp: DateTime, certificate: Vec<u8>, redacted: Vec<u8>) -> Self {
        Self {
            timestamp,
            certificate,
            redacted_certificate: Some(redacted),
        }
    }

    /// The bytes an OUTSIDER reader is allowed to see.
    pub fn redacted_or_real(&self) -> &[u8] {
        self.redacted_certificate
            .as_deref()
            .unwrap_or(&self.certificate)
    }
}

/// Shamir certificates are only visible to the setup author and the share
/// recipients, so visibility is stored alongside.
#[derive(Debug, Clone)]
pub struct ShamirStoredCertificate {
    pub timestamp: DateTime,
    pub certificate: Vec<u8>,
    pub visible_to: Vec<UserID>,
}

pub struct MemoryUser {
    pub cooked: UserCertificate,
    pub user_certificate: Vec<u8>,
    pub redacted_user_certificate: Vec<u8>,
    pub profile_updates: Vec<MemoryProfileUpdate>,
    pub is_frozen: bool,
    pub revoked: Option<MemoryUserRevocation>,
    pub tos_accepted_on: Option<DateTime>,
}

pub struct MemoryProfileUpdate {
    pub cooked: UserUpdateCertificate,
    pub user_update_certificate: Vec<u8>,
}

pub struct MemoryUserRevocation {
    pub cooked: RevokedUserCertificate,
    pub revoked_user_certificate: Vec<u8>,
}

impl MemoryUser {
    pub fn current_profile(&self) -> UserProfile {
        self.profile_updates
            .last()
            .map(|update| update.cooked.new_profile)
            .unwrap_or(self.cooked.profile)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_some()
    }

    pub fn created_on(&self) -> DateTime {
        self.cooked.timestamp
    }

    pub fn email(&self) -> &str {
        self.cooked.human_handle.as_ref().email()
    }
}

pub struct MemoryDevice {
    pub cooked: DeviceCertificate,
    pub device_certificate: Vec<u8>,
    pub redacted_device_certificate: Vec<u8>,
}

pub struct MemoryRealm {
    pub created_on: DateTime,
    /// Every certificate touching the realm topic, in timestamp order.
    pub certificates: Vec<StoredCertificate>,
    pub role_history: Vec<RealmRoleCertificate>,
    pub current_roles: HashMap<UserID, RealmRole>,
    /// When a member was unshared, the timestamp of that unshare; used to
    /// truncate the history served to them.
    pub unshared_on: HashMap<UserID, DateTime>,
    pub key_rotations: Vec<MemoryKeyRotation>,
    pub renames: Vec<RealmNameCertificate>,
    /// Monotonic counter bumped by every vlob write in the realm.
    pub checkpoint: u64,
    /// vlob id to `(checkpoint, version)` of its latest write.
    pub vlob_changes: HashMap<VlobID, (u64, u64)>,
    pub last_vlob_timestamp: Option<DateTime>,
}

pub struct MemoryKeyRotation {
    pub cooked: RealmKeyRotationCertificate,
    pub keys_bundle: Vec<u8>,
    pub per_participant_access: HashMap<UserID, Vec<u8>>,
}

impl MemoryRealm {
    pub fn new(created_on: DateTime) -> Self {
        Self {
            created_on,
            certificates: Vec::new(),
            role_history: Vec::new(),
            current_roles: HashMap::new(),
            unshared_on: HashMap::new(),
            key_rotations: Vec::new(),
            renames: Vec::new(),
            checkpoint: 0,
            vlob_changes: HashMap::new(),
            last_vlob_timestamp: None,
        }
    }

    /// 0 before the first rotation, then the index of the latest one.
    pub fn current_key_index(&self) -> u64 {
        self.key_rotations.len() as u64
    }

    pub fn role_of(&self, user_id: &UserID) -> Option<RealmRole> {
        self.current_roles.get(user_id).copied()
    }

    pub fn owner_count(&self) -> usize {
        self.current_roles
            .values()
            .filter(|role| **role == RealmRole::Owner)
            .count()
    }

    pub fn last_certificate_timestamp(&self) -> Option<DateTime> {
        self.certificates.last().map(|stored| stored.timestamp)
    }
}

pub struct MemoryVlob {
    pub realm_id: VlobID,
    /// Version `n` lives at index `n - 1`; versions are dense.
    pub atoms: Vec<MemoryVlobAtom>,
}

pub struct MemoryVlobAtom {
    pub key_index: u64,
    pub blob: Vec<u8>,
    pub author: DeviceID,
    pub created_on: DateTime,
    /// Per-service sequestered copies, for sequestered organizations.
    pub sequestered: Option<HashMap<SequesterServiceID, Vec<u8>>>,
}

pub struct MemoryBlock {
    pub realm_id: VlobID,
    pub key_index: u64,
    pub author: DeviceID,
    pub created_on: DateTime,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvitationClaimer {
    User { claimer_email: String },
    Device { claimer_user_id: UserID },
    ShamirRecovery { claimer_user_id: UserID },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDeletedReason {
    Cancelled,
    Finished,
}

pub struct MemoryInvitation {
    pub token: InvitationToken,
    pub created_by_user: UserID,
    pub created_by_device: DeviceID,
    pub created_on: DateTime,
    pub claimer: InvitationClaimer,
    /// Set the first time the claimer connects.
    pub claimer_joined: bool,
    pub deleted: Option<(DateTime, InvitationDeletedReason)>,
}

impl MemoryInvitation {
    pub fn invitation_type(&self) -> InvitationType {
        match self.claimer {
            InvitationClaimer::User { .. } => InvitationType::User,
            InvitationClaimer::Device { .. } => InvitationType::Device,
            InvitationClaimer::ShamirRecovery { .. } => InvitationType::ShamirRecovery,
        }
    }

    pub fn status(&self) -> InvitationStatus {
        match (&self.deleted, self.claimer_joined) {
            (Some((_, InvitationDeletedReason::Cancelled)), _) => InvitationStatus::Cancelled,
            (Some((_, InvitationDeletedReason::Finished)), _) => InvitationStatus::Finished,
            (None, true) => InvitationStatus::Ready,
            (None, false) => InvitationStatus::Idle,
        }
    }
}

pub struct MemoryGreetingAttempt {
    pub id: GreetingAttemptID,
    pub token: InvitationToken,
    pub greeter: UserID,
    pub greeter_joined: Option<DateTime>,
    pub claimer_joined: Option<DateTime>,
    /// Dense: slot `i` submitted iff `len() > i`.
    pub greeter_steps: Vec<GreeterStep>,
    pub claimer_steps: Vec<ClaimerStep>,
    pub cancelled: Option<(GreeterOrClaimer, CancelledGreetingAttemptReason, DateTime)>,
}

impl MemoryGreetingAttempt {
    pub fn new(token: InvitationToken, greeter: UserID) -> Self {
        Self {
            id: GreetingAttemptID::generate(),
            token,
            greeter,
            greeter_joined: None,
            claimer_joined: None,
            greeter_steps: Vec::new(),
            claimer_steps: Vec::new(),
            cancelled: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancelled.is_none()
    }

    pub fn cancel(
        &mut self,
        origin: GreeterOrClaimer,
        reason: CancelledGreetingAttemptReason,
        timestamp: DateTime,
    ) {
        if self.cancelled.is_none() {
            self.cancelled = Some((origin, reason, timestamp));
        }
    }
}

pub struct MemoryShamirSetup {
    pub brief: ShamirRecoveryBriefCertificate,
    pub brief_certificate: Vec<u8>,
    pub shares: HashMap<UserID, MemoryShamirShare>,
    pub reveal_token: InvitationToken,
    pub ciphered_data: Vec<u8>,
    pub deleted: Option<MemoryShamirDeletion>,
}

pub struct MemoryShamirShare {
    pub cooked: ShamirRecoveryShareCertificate,
    pub share_certificate: Vec<u8>,
}

pub struct MemoryShamirDeletion {
    pub cooked: ShamirRecoveryDeletionCertificate,
    pub deletion_certificate: Vec<u8>,
}

impl MemoryShamirSetup {
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

pub struct SequesterAuthority {
    pub certificate: Vec<u8>,
    pub verify_key: VerifyKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequesterServiceConfig {
    Storage,
    Webhook { url: String },
}

pub struct MemorySequesterService {
    pub cooked: SequesterServiceCertificate,
    pub service_certificate: Vec<u8>,
    pub config: SequesterServiceConfig,
    pub revoked: Option<MemorySequesterRevocation>,
}

pub struct MemorySequesterRevocation {
    pub cooked: SequesterRevokedServiceCertificate,
    pub revoked_service_certificate: Vec<u8>,
}

impl MemorySequesterService {
    pub fn is_revoked(&self) -> bool {
        self.revoked.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tos {
    pub updated_on: DateTime,
    pub per_locale_urls: HashMap<String, String>,
}

/// Everything the server knows about one organization.
pub struct OrganizationStore {
    pub organization_id: OrganizationID,
    pub bootstrap_token: Option<BootstrapToken>,
    pub created_on: DateTime,
    pub bootstrapped_on: Option<DateTime>,
    pub is_expired: bool,
    pub active_users_limit: ActiveUsersLimit,
    pub user_profile_outsider_allowed: bool,
    pub allowed_client_agent: AllowedClientAgent,
    pub tos: Option<Tos>,
    pub root_verify_key: Option<VerifyKey>,
    pub sequester_authority: Option<SequesterAuthority>,
    pub sequester_services: HashMap<SequesterServiceID, MemorySequesterService>,

    pub last_common_timestamp: Option<DateTime>,
    pub last_sequester_timestamp: Option<DateTime>,
    pub last_shamir_timestamp: Option<DateTime>,

    pub common_certificates: Vec<StoredCertificate>,
    pub sequester_certificates: Vec<StoredCertificate>,
    pub shamir_certificates: Vec<ShamirStoredCertificate>,

    pub users: HashMap<UserID, MemoryUser>,
    pub devices: HashMap<DeviceID, MemoryDevice>,
    pub realms: HashMap<VlobID, MemoryRealm>,
    pub vlobs: HashMap<VlobID, MemoryVlob>,
    pub blocks: HashMap<BlockID, MemoryBlock>,
    pub invitations: HashMap<InvitationToken, MemoryInvitation>,
    pub greeting_attempts: HashMap<GreetingAttemptID, MemoryGreetingAttempt>,
    /// Active attempt per (invitation, greeter) session.
    pub greeting_sessions: HashMap<(InvitationToken, UserID), GreetingAttemptID>,
    /// Newest setup last; only the last one may be active.
    pub shamir_recoveries: HashMap<UserID, Vec<MemoryShamirSetup>>,
}

impl OrganizationStore {
    pub fn new(
        organization_id: OrganizationID,
        bootstrap_token: Option<BootstrapToken>,
        created_on: DateTime,
        active_users_limit: ActiveUsersLimit,
        user_profile_outsider_allowed: bool,
        allowed_client_agent: AllowedClientAgent,
    ) -> Self {
        Self {
            organization_id,
            bootstrap_token,
            created_on,
            bootstrapped_on: None,
            is_expired: false,
            active_users_limit,
            user_profile_outsider_allowed,
            allowed_client_agent,
            tos: None,
            root_verify_key: None,
            sequester_authority: None,
            sequester_services: HashMap::new(),
            last_common_timestamp: None,
            last_sequester_timestamp: None,
            last_shamir_timestamp: None,
            common_certificates: Vec::new(),
            sequester_certificates: Vec::new(),
            shamir_certificates: Vec::new(),
            users: HashMap::new(),
            devices: HashMap::new(),
            realms: HashMap::new(),
            vlobs: HashMap::new(),
            blocks: HashMap::new(),
            invitations: HashMap::new(),
            greeting_attempts: HashMap::new(),
            greeting_sessions: HashMap::new(),
            shamir_recoveries: HashMap::new(),
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped_on.is_some()
    }

    pub fn is_sequestered(&self) -> bool {
        self.sequester_authority.is_some()
    }

    pub fn per_topic_last_timestamps(&self) -> TopicLastTimestamps {
        TopicLastTimestamps {
            common: self.last_common_timestamp,
            sequester: self.last_sequester_timestamp,
            shamir_recovery: self.last_shamir_timestamp,
            realms: self
                .realms
                .iter()
                .filter_map(|(realm_id, realm)| {
                    realm
                        .last_certificate_timestamp()
                        .map(|timestamp| (*realm_id, timestamp))
                })
                .collect(),
        }
    }

    pub fn active_user_count(&self) -> u64 {
        self.users.values().filter(|user| !user.is_revoked()).count() as u64
    }

    /// Non-revoked user holding this email, if any.
    pub fn user_by_email(&self, email: &str) -> Option<(&UserID, &MemoryUser)> {
        self.users
            .iter()
            .find(|(_, user)| !user.is_revoked() && user.email() == email)
    }

    /// The user owning a device.
    pub fn user_of_device(&self, device_id: &DeviceID) -> Option<&UserID> {
        self.devices
            .get(device_id)
            .map(|device| &device.cooked.user_id)
    }

    pub fn device_verify_key(&self, device_id: &DeviceID) -> Option<&VerifyKey> {
        self.devices
            .get(device_id)
            .map(|device| &device.cooked.verify_key)
    }

    /// Active sequester services, the required key set of every
    /// `sequester_blob` mapping.
    pub fn active_sequester_services(
        &self,
    ) -> impl Iterator<Item = (&SequesterServiceID, &MemorySequesterService)> {
        self.sequester_services
            .iter()
            .filter(|(_, service)| !service.is_revoked())
    }

    /// Latest Shamir setup for a user, deleted or not.
    pub fn last_shamir_setup(&self, user_id: &UserID) -> Option<&MemoryShamirSetup> {
        self.shamir_recoveries
            .get(user_id)
            .and_then(|setups| setups.last())
    }

    /// Realms where the user currently holds a role.
    pub fn realms_for_user(&self, user_id: &UserID) -> Vec<(VlobID, RealmRole)> {
        self.realms
            .iter()
            .filter_map(|(realm_id, realm)| {
                realm.role_of(user_id).map(|role| (*realm_id, role))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org_id() -> OrganizationID {
        "CoolOrg".parse().unwrap()
    }

    fn empty_store() -> OrganizationStore {
        OrganizationStore::new(
            org_id(),
            Some(BootstrapToken::generate()),
            DateTime::now(),
            ActiveUsersLimit::NoLimit,
            true,
            AllowedClientAgent::NativeOrWeb,
        )
    }

    #[tokio::test]
    async fn test_organization_insert_is_unique() {
        let datamodel = Datamodel::new();
        assert!(datamodel.insert_organization(empty_store()).await);
        assert!(!datamodel.insert_organization(empty_store()).await);
        assert!(datamodel.organization(&org_id()).await.is_some());
    }

    #[test]
    fn test_topic_timestamps_max() {
        let t0 = DateTime::from_rfc3339("2000-01-02T00:00:00Z").unwrap();
        let mut topics = TopicLastTimestamps {
            common: Some(t0),
            ..Default::default()
        };
        assert_eq!(topics.max(), Some(t0));
        topics.realms.insert(VlobID::generate(), t0.add_seconds(5));
        assert_eq!(topics.max(), Some(t0.add_seconds(5)));
    }

    #[test]
    fn test_invitation_status_transitions() {
        let mut invitation = MemoryInvitation {
            token: InvitationToken::generate(),
            created_by_user: UserID::generate(),
            created_by_device: DeviceID::generate(),
            created_on: DateTime::now(),
            claimer: InvitationClaimer::Device {
                claimer_user_id: UserID::generate(),
            },
            claimer_joined: false,
            deleted: None,
        };
        assert_eq!(invitation.status(), InvitationStatus::Idle);
        invitation.claimer_joined = true;
        assert_eq!(invitation.status(), InvitationStatus::Ready);
        invitation.deleted = Some((DateTime::now(), InvitationDeletedReason::Finished));
        assert_eq!(invitation.status(), InvitationStatus::Finished);
    }

    #[test]
    fn test_realm_key_index_progression() {
        let realm = MemoryRealm::new(DateTime::now());
        assert_eq!(realm.current_key_index(), 0);
    }
}
